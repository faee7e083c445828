use crate::model::*;

use super::EngineError;

pub(crate) fn now_min() -> Minutes {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as Minutes
        / 60
}

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    use crate::limits::*;
    if window.start < MIN_VALID_TIME_MIN || window.end > MAX_VALID_TIME_MIN {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_min() > MAX_LESSON_MIN {
        return Err(EngineError::LimitExceeded("lesson too long"));
    }
    Ok(())
}

/// Commit-time conflict check, run under the instructor's write lock.
///
/// The search window is widened by the buffer to catch:
/// - existing lessons whose padding reaches into the requested window
/// - the requested window's own padding reaching into existing lessons
pub(crate) fn check_no_conflict(
    state: &InstructorState,
    window: &Window,
) -> Result<(), EngineError> {
    let probe = window.padded(state.buffer_min);
    for r in state.reservations_overlapping(&probe) {
        if !r.status.is_active() {
            continue;
        }
        if r.window.padded(state.buffer_min).overlaps(window) {
            return Err(EngineError::SlotConflict(r.id));
        }
    }
    Ok(())
}
