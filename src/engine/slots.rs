use crate::model::*;

use super::schedule::merge_windows;

// ── Busy time & slot discretization ──────────────────────────────

/// Busy windows on `day` from active (pending/confirmed) reservations, each
/// padded by the instructor's buffer on both sides, merged into disjoint
/// sorted order. The probe window is widened by the buffer too, so a lesson
/// on a neighbouring day whose padding reaches into `day` is caught.
pub fn busy_windows(state: &InstructorState, day: Day) -> Vec<Window> {
    let day_window = Window::new(day_start(day), day_start(day) + DAY_MIN);
    let probe = day_window.padded(state.buffer_min);

    let mut busy: Vec<Window> = state
        .reservations_overlapping(&probe)
        .filter(|r| r.status.is_active())
        .map(|r| r.window.padded(state.buffer_min))
        .collect();
    busy.sort_by_key(|w| w.start);
    merge_windows(&busy)
}

/// Discrete candidate lesson windows inside `free`.
///
/// Candidate starts are anchored at each window's start at `step` granularity
/// while `start + duration <= window.end` (half-open boundaries: a lesson may
/// end exactly where the window does). Candidates starting before `earliest`
/// are dropped. `free` must be sorted and disjoint, so the output is
/// chronological and duplicate-free by construction.
pub fn enumerate_slots(
    free: &[Window],
    duration: Minutes,
    step: Minutes,
    earliest: Minutes,
) -> Vec<Window> {
    debug_assert!(duration > 0 && step > 0);
    let mut slots = Vec::new();
    for w in free {
        let mut t = w.start;
        while t + duration <= w.end {
            if t >= earliest {
                slots.push(Window::new(t, t + duration));
            }
            t += step;
        }
    }
    slots
}
