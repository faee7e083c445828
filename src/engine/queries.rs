use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::schedule::{resolve_day, subtract_windows};
use super::slots::{busy_windows, enumerate_slots};
use super::{Engine, EngineError};

impl Engine {
    /// Effective schedule for one day: weekly rules plus overrides and time
    /// off, with no reservations subtracted. Read-only, takes no write lock.
    pub async fn resolve_schedule(
        &self,
        instructor_id: Ulid,
        day: Day,
    ) -> Result<Vec<Window>, EngineError> {
        validate_day(day)?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(resolve_day(&guard, day))
    }

    /// Free-and-unbooked windows: the resolved schedule minus buffered active
    /// reservations. Advisory — commit re-validates against live state.
    pub async fn open_windows(
        &self,
        instructor_id: Ulid,
        day: Day,
    ) -> Result<Vec<Window>, EngineError> {
        validate_day(day)?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(open_windows_locked(&guard, day))
    }

    /// Discrete bookable slots for a lesson of `duration_min` on `day`.
    /// Deterministic for fixed inputs including `now`: recomputing without a
    /// state change yields an identical list.
    pub async fn compute_slots(
        &self,
        instructor_id: Ulid,
        day: Day,
        duration_min: Minutes,
        now: Minutes,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        validate_day(day)?;
        if duration_min <= 0 {
            return Err(EngineError::InvalidInput("duration must be positive"));
        }
        if duration_min > MAX_LESSON_MIN {
            return Err(EngineError::LimitExceeded("lesson too long"));
        }
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;

        let open = open_windows_locked(&guard, day);
        let earliest = now + guard.lead_min;
        Ok(enumerate_slots(&open, duration_min, guard.step_min, earliest)
            .into_iter()
            .map(|w| SlotInfo {
                instructor_id,
                start: w.start,
                end: w.end,
            })
            .collect())
    }

    pub async fn list_instructors(&self) -> Vec<InstructorInfo> {
        // Clone the Arcs first so no shard lock is held across an await.
        let states: Vec<super::SharedInstructorState> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            let guard = state.read().await;
            out.push(InstructorInfo {
                id: guard.id,
                name: guard.name.clone(),
                buffer_min: guard.buffer_min,
                step_min: guard.step_min,
                lead_min: guard.lead_min,
            });
        }
        out
    }

    pub async fn get_weekly_rules(
        &self,
        instructor_id: Ulid,
    ) -> Result<Vec<WeeklyRuleInfo>, EngineError> {
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(guard
            .weekly_rules
            .iter()
            .map(|r| WeeklyRuleInfo {
                id: r.id,
                instructor_id,
                weekday: r.weekday,
                start: r.start,
                end: r.end,
            })
            .collect())
    }

    pub async fn get_time_off(&self, instructor_id: Ulid) -> Result<Vec<TimeOffInfo>, EngineError> {
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(guard
            .time_off
            .iter()
            .map(|t| TimeOffInfo {
                id: t.id,
                instructor_id,
                first_day: t.first_day,
                last_day: t.last_day,
                hours: t.hours,
            })
            .collect())
    }

    pub async fn get_overrides(
        &self,
        instructor_id: Ulid,
    ) -> Result<Vec<OverrideInfo>, EngineError> {
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(guard
            .overrides
            .iter()
            .map(|o| OverrideInfo {
                id: o.id,
                instructor_id,
                day: o.day,
                start: o.start,
                end: o.end,
                polarity: o.polarity,
            })
            .collect())
    }

    pub async fn get_reservations(
        &self,
        instructor_id: Ulid,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = state.read().await;
        Ok(guard
            .reservations
            .iter()
            .map(|r| ReservationInfo {
                id: r.id,
                instructor_id,
                student_id: r.student_id,
                start: r.window.start,
                end: r.window.end,
                status: r.status,
            })
            .collect())
    }
}

fn open_windows_locked(state: &InstructorState, day: Day) -> Vec<Window> {
    let free = resolve_day(state, day);
    let busy = busy_windows(state, day);
    if busy.is_empty() {
        free
    } else {
        subtract_windows(&free, &busy)
    }
}

fn validate_day(day: Day) -> Result<(), EngineError> {
    // Compared as raw day numbers so absurd inputs cannot overflow day_start.
    if day < MIN_VALID_TIME_MIN / DAY_MIN || day >= MAX_VALID_TIME_MIN / DAY_MIN {
        return Err(EngineError::InvalidInput("day out of range"));
    }
    Ok(())
}
