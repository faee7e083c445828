use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_min, validate_window};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_instructor(
        &self,
        id: Ulid,
        name: Option<String>,
        buffer_min: Minutes,
        step_min: Minutes,
        lead_min: Minutes,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_INSTRUCTORS_PER_SCHOOL {
            return Err(EngineError::LimitExceeded("too many instructors"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("instructor name too long"));
            }
        if step_min <= 0 {
            return Err(EngineError::InvalidInput("step must be positive"));
        }
        if buffer_min < 0 || lead_min < 0 {
            return Err(EngineError::InvalidInput("buffer and lead must be non-negative"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::InstructorRegistered {
            id,
            name: name.clone(),
            buffer_min,
            step_min,
            lead_min,
        };
        self.wal_append(&event).await?;
        let state = InstructorState::new(id, name, buffer_min, step_min, lead_min);
        self.state.insert(id, Arc::new(RwLock::new(state)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Update instructor settings. `None` fields keep their current value;
    /// the merge happens under the write lock and the event carries the
    /// final values.
    pub async fn update_instructor(
        &self,
        id: Ulid,
        name: Option<Option<String>>,
        buffer_min: Option<Minutes>,
        step_min: Option<Minutes>,
        lead_min: Option<Minutes>,
    ) -> Result<(), EngineError> {
        let state = self.get_instructor(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.lock_write(state).await?;

        let name = name.unwrap_or_else(|| guard.name.clone());
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("instructor name too long"));
            }
        let buffer_min = buffer_min.unwrap_or(guard.buffer_min);
        let step_min = step_min.unwrap_or(guard.step_min);
        let lead_min = lead_min.unwrap_or(guard.lead_min);
        if step_min <= 0 {
            return Err(EngineError::InvalidInput("step must be positive"));
        }
        if buffer_min < 0 || lead_min < 0 {
            return Err(EngineError::InvalidInput("buffer and lead must be non-negative"));
        }

        let event = Event::InstructorUpdated {
            id,
            name,
            buffer_min,
            step_min,
            lead_min,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn remove_instructor(&self, id: Ulid) -> Result<(), EngineError> {
        let state = self.get_instructor(&id).ok_or(EngineError::NotFound(id))?;
        let guard = self.lock_write(state).await?;

        let event = Event::InstructorRemoved { id };
        self.wal_append(&event).await?;
        for r in &guard.reservations {
            self.entity_to_instructor.remove(&r.id);
        }
        for rule in &guard.weekly_rules {
            self.entity_to_instructor.remove(&rule.id);
        }
        for t in &guard.time_off {
            self.entity_to_instructor.remove(&t.id);
        }
        for o in &guard.overrides {
            self.entity_to_instructor.remove(&o.id);
        }
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn add_weekly_rule(
        &self,
        id: Ulid,
        instructor_id: Ulid,
        weekday: u8,
        start: Minutes,
        end: Minutes,
    ) -> Result<(), EngineError> {
        validate_day_hours(weekday, start, end)?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let mut guard = self.lock_write(state).await?;
        if guard.schedule_entry_count() >= MAX_SCHEDULE_ENTRIES {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }

        let event = Event::WeeklyRuleAdded {
            id,
            instructor_id,
            weekday,
            start,
            end,
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await
    }

    /// Update a weekly rule. `None` fields keep their current value.
    pub async fn update_weekly_rule(
        &self,
        id: Ulid,
        weekday: Option<u8>,
        start: Option<Minutes>,
        end: Option<Minutes>,
    ) -> Result<Ulid, EngineError> {
        let (instructor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .weekly_rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let weekday = weekday.unwrap_or(current.weekday);
        let start = start.unwrap_or(current.start);
        let end = end.unwrap_or(current.end);
        validate_day_hours(weekday, start, end)?;

        let event = Event::WeeklyRuleUpdated {
            id,
            instructor_id,
            weekday,
            start,
            end,
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(instructor_id)
    }

    pub async fn remove_weekly_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (instructor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::WeeklyRuleRemoved { id, instructor_id };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(instructor_id)
    }

    pub async fn add_time_off(
        &self,
        id: Ulid,
        instructor_id: Ulid,
        first_day: Day,
        last_day: Day,
        hours: Option<(Minutes, Minutes)>,
    ) -> Result<(), EngineError> {
        if first_day > last_day {
            return Err(EngineError::InvalidInput("time off range is inverted"));
        }
        validate_day_in_range(first_day)?;
        validate_day_in_range(last_day)?;
        if let Some((s, e)) = hours {
            validate_hours_of_day(s, e)?;
        }
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let mut guard = self.lock_write(state).await?;
        if guard.schedule_entry_count() >= MAX_SCHEDULE_ENTRIES {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }

        let event = Event::TimeOffAdded {
            id,
            instructor_id,
            first_day,
            last_day,
            hours,
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await
    }

    pub async fn remove_time_off(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (instructor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::TimeOffRemoved { id, instructor_id };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(instructor_id)
    }

    pub async fn add_override(
        &self,
        id: Ulid,
        instructor_id: Ulid,
        day: Day,
        start: Minutes,
        end: Minutes,
        polarity: Polarity,
    ) -> Result<(), EngineError> {
        validate_hours_of_day(start, end)?;
        validate_day_in_range(day)?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let mut guard = self.lock_write(state).await?;
        if guard.schedule_entry_count() >= MAX_SCHEDULE_ENTRIES {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }

        let event = Event::OverrideAdded {
            id,
            instructor_id,
            day,
            start,
            end,
            polarity,
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await
    }

    pub async fn remove_override(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (instructor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::OverrideRemoved { id, instructor_id };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(instructor_id)
    }

    /// The commit path. Re-validates the requested window against live
    /// reservations inside the instructor's serialized critical section, then
    /// books atomically — or rejects leaving zero new state behind. Under
    /// concurrent attempts for overlapping windows, exactly one succeeds.
    pub async fn book_reservation(
        &self,
        id: Ulid,
        instructor_id: Ulid,
        student_id: Ulid,
        start: Minutes,
        duration_min: Minutes,
    ) -> Result<ReservationInfo, EngineError> {
        if duration_min <= 0 {
            return Err(EngineError::InvalidInput("duration must be positive"));
        }
        if duration_min > MAX_LESSON_MIN {
            return Err(EngineError::LimitExceeded("lesson too long"));
        }
        if start < MIN_VALID_TIME_MIN || start > MAX_VALID_TIME_MIN {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        let window = Window::new(start, start + duration_min);
        validate_window(&window)?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let mut guard = self.lock_write(state).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_INSTRUCTOR {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }

        if let Err(e) = check_no_conflict(&guard, &window) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::ReservationBooked {
            id,
            instructor_id,
            student_id,
            window,
            booked_at: now_min(),
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(ReservationInfo {
            id,
            instructor_id,
            student_id,
            start: window.start,
            end: window.end,
            status: ReservationStatus::Pending,
        })
    }

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_reservation_status(id, ReservationStatus::Confirmed).await
    }

    pub async fn complete_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_reservation_status(id, ReservationStatus::Completed).await
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_reservation_status(id, ReservationStatus::Cancelled).await
    }

    /// Drive the status machine: Pending → Confirmed → Completed, with
    /// Cancelled reachable from Pending and Confirmed. Anything else is
    /// rejected without touching state.
    async fn set_reservation_status(
        &self,
        id: Ulid,
        to: ReservationStatus,
    ) -> Result<Ulid, EngineError> {
        let (instructor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let from = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .status;

        use ReservationStatus::*;
        let legal = matches!(
            (from, to),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        );
        if !legal {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let event = match to {
            Confirmed => Event::ReservationConfirmed { id, instructor_id },
            Completed => Event::ReservationCompleted { id, instructor_id },
            Cancelled => Event::ReservationCancelled { id, instructor_id },
            Pending => unreachable!("no transition targets Pending"),
        };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(instructor_id)
    }

    /// Pending reservations whose payment window lapsed, as (reservation,
    /// instructor) pairs. Skips instructors whose lock is busy — the sweeper
    /// catches them on its next pass.
    pub fn collect_stale_pending(&self, now: Minutes) -> Vec<(Ulid, Ulid)> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let state = entry.value().clone();
            if let Ok(guard) = state.try_read() {
                for r in &guard.reservations {
                    if r.status == ReservationStatus::Pending
                        && r.booked_at + PENDING_PAYMENT_WINDOW_MIN <= now
                    {
                        stale.push((r.id, guard.id));
                    }
                }
            }
        }
        stale
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Finished reservations whose window ended more than
    /// the retention period ago are dropped from the rewrite.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let now = now_min();
        let mut events = Vec::new();

        let instructor_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in instructor_ids {
            // Clone the Arc out of the map so no shard lock is held across the await.
            let state = match self.state.get(&id) {
                Some(e) => e.value().clone(),
                None => continue,
            };
            let guard = state.read().await;

            events.push(Event::InstructorRegistered {
                id: guard.id,
                name: guard.name.clone(),
                buffer_min: guard.buffer_min,
                step_min: guard.step_min,
                lead_min: guard.lead_min,
            });

            for rule in &guard.weekly_rules {
                events.push(Event::WeeklyRuleAdded {
                    id: rule.id,
                    instructor_id: guard.id,
                    weekday: rule.weekday,
                    start: rule.start,
                    end: rule.end,
                });
            }
            for t in &guard.time_off {
                events.push(Event::TimeOffAdded {
                    id: t.id,
                    instructor_id: guard.id,
                    first_day: t.first_day,
                    last_day: t.last_day,
                    hours: t.hours,
                });
            }
            for o in &guard.overrides {
                events.push(Event::OverrideAdded {
                    id: o.id,
                    instructor_id: guard.id,
                    day: o.day,
                    start: o.start,
                    end: o.end,
                    polarity: o.polarity,
                });
            }
            for r in &guard.reservations {
                let finished = !r.status.is_active();
                if finished && r.window.end + self.retention_min <= now {
                    continue;
                }
                events.push(Event::ReservationBooked {
                    id: r.id,
                    instructor_id: guard.id,
                    student_id: r.student_id,
                    window: r.window,
                    booked_at: r.booked_at,
                });
                match r.status {
                    ReservationStatus::Pending => {}
                    ReservationStatus::Confirmed => events.push(Event::ReservationConfirmed {
                        id: r.id,
                        instructor_id: guard.id,
                    }),
                    ReservationStatus::Completed => events.push(Event::ReservationCompleted {
                        id: r.id,
                        instructor_id: guard.id,
                    }),
                    ReservationStatus::Cancelled => events.push(Event::ReservationCancelled {
                        id: r.id,
                        instructor_id: guard.id,
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_day_hours(weekday: u8, start: Minutes, end: Minutes) -> Result<(), EngineError> {
    if weekday > 6 {
        return Err(EngineError::InvalidInput("weekday must be 0-6"));
    }
    validate_hours_of_day(start, end)
}

/// Compared as raw day numbers so absurd inputs cannot overflow day_start.
fn validate_day_in_range(day: Day) -> Result<(), EngineError> {
    if day < MIN_VALID_TIME_MIN / DAY_MIN || day >= MAX_VALID_TIME_MIN / DAY_MIN {
        return Err(EngineError::LimitExceeded("day out of range"));
    }
    Ok(())
}

fn validate_hours_of_day(start: Minutes, end: Minutes) -> Result<(), EngineError> {
    if start < 0 || end > DAY_MIN || start >= end {
        return Err(EngineError::InvalidInput("hours must satisfy 0 <= start < end <= 1440"));
    }
    Ok(())
}
