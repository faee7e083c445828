mod conflict;
mod error;
mod mutations;
mod queries;
mod schedule;
mod slots;

pub use error::EngineError;
pub use schedule::{merge_windows, resolve_day, subtract_windows};
pub use slots::{busy_windows, enumerate_slots};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::COMMIT_LOCK_TIMEOUT_MS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedInstructorState = Arc<RwLock<InstructorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedInstructorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: schedule-entry/reservation id → instructor id
    pub(super) entity_to_instructor: DashMap<Ulid, Ulid>,
    /// Finished reservations older than this are dropped at compaction.
    pub(super) retention_min: Minutes,
}

/// Apply an event directly to an InstructorState (no locking — caller holds the lock).
fn apply_to_instructor(state: &mut InstructorState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WeeklyRuleAdded {
            id,
            instructor_id,
            weekday,
            start,
            end,
        } => {
            state.weekly_rules.push(WeeklyRule {
                id: *id,
                weekday: *weekday,
                start: *start,
                end: *end,
            });
            entity_map.insert(*id, *instructor_id);
        }
        Event::WeeklyRuleUpdated {
            id,
            instructor_id,
            weekday,
            start,
            end,
        } => {
            state.remove_weekly_rule(id);
            state.weekly_rules.push(WeeklyRule {
                id: *id,
                weekday: *weekday,
                start: *start,
                end: *end,
            });
            entity_map.insert(*id, *instructor_id);
        }
        Event::WeeklyRuleRemoved { id, .. } => {
            state.remove_weekly_rule(id);
            entity_map.remove(id);
        }
        Event::TimeOffAdded {
            id,
            instructor_id,
            first_day,
            last_day,
            hours,
        } => {
            state.time_off.push(TimeOff {
                id: *id,
                first_day: *first_day,
                last_day: *last_day,
                hours: *hours,
            });
            entity_map.insert(*id, *instructor_id);
        }
        Event::TimeOffRemoved { id, .. } => {
            state.remove_time_off(id);
            entity_map.remove(id);
        }
        Event::OverrideAdded {
            id,
            instructor_id,
            day,
            start,
            end,
            polarity,
        } => {
            state.overrides.push(DayOverride {
                id: *id,
                day: *day,
                start: *start,
                end: *end,
                polarity: *polarity,
            });
            entity_map.insert(*id, *instructor_id);
        }
        Event::OverrideRemoved { id, .. } => {
            state.remove_override(id);
            entity_map.remove(id);
        }
        Event::ReservationBooked {
            id,
            instructor_id,
            student_id,
            window,
            booked_at,
        } => {
            state.insert_reservation(Reservation {
                id: *id,
                student_id: *student_id,
                window: *window,
                status: ReservationStatus::Pending,
                booked_at: *booked_at,
            });
            entity_map.insert(*id, *instructor_id);
        }
        Event::ReservationConfirmed { id, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Confirmed;
            }
        }
        Event::ReservationCompleted { id, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Completed;
            }
        }
        Event::ReservationCancelled { id, .. } => {
            // Logical delete: the row stays but stops occupying time.
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Cancelled;
            }
        }
        Event::InstructorUpdated {
            name,
            buffer_min,
            step_min,
            lead_min,
            ..
        } => {
            state.name = name.clone();
            state.buffer_min = *buffer_min;
            state.step_min = *step_min;
            state.lead_min = *lead_min;
        }
        // Registered/Removed are handled at the DashMap level, not here
        Event::InstructorRegistered { .. } | Event::InstructorRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, retention_min: Minutes) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_instructor: DashMap::new(),
            retention_min,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy school creation).
        for event in &events {
            match event {
                Event::InstructorRegistered {
                    id,
                    name,
                    buffer_min,
                    step_min,
                    lead_min,
                } => {
                    let state =
                        InstructorState::new(*id, name.clone(), *buffer_min, *step_min, *lead_min);
                    engine.state.insert(*id, Arc::new(RwLock::new(state)));
                }
                Event::InstructorRemoved { id } => {
                    if let Some((_, state)) = engine.state.remove(id) {
                        let guard = state.try_read().expect("replay: uncontended read");
                        for r in &guard.reservations {
                            engine.entity_to_instructor.remove(&r.id);
                        }
                        for rule in &guard.weekly_rules {
                            engine.entity_to_instructor.remove(&rule.id);
                        }
                        for t in &guard.time_off {
                            engine.entity_to_instructor.remove(&t.id);
                        }
                        for o in &guard.overrides {
                            engine.entity_to_instructor.remove(&o.id);
                        }
                    }
                }
                other => {
                    let instructor_id = event_instructor_id(other);
                    if let Some(instructor_id) = instructor_id
                        && let Some(entry) = engine.state.get(&instructor_id) {
                            let state_arc = entry.clone();
                            let mut guard =
                                state_arc.try_write().expect("replay: uncontended write");
                            apply_to_instructor(&mut guard, other, &engine.entity_to_instructor);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_instructor(&self, id: &Ulid) -> Option<SharedInstructorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn instructor_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_instructor.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        instructor_id: Ulid,
        state: &mut InstructorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_instructor(state, event, &self.entity_to_instructor);
        self.notify.send(instructor_id, event);
        Ok(())
    }

    /// Bounded wait for an instructor's write lock: the serialization point
    /// for all commits on that instructor. A stuck holder surfaces as
    /// `Timeout` instead of hanging the caller.
    pub(super) async fn lock_write(
        &self,
        state: SharedInstructorState,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<InstructorState>, EngineError> {
        tokio::time::timeout(
            Duration::from_millis(COMMIT_LOCK_TIMEOUT_MS),
            state.write_owned(),
        )
        .await
        .map_err(|_| EngineError::Timeout)
    }

    /// Lookup entity → instructor, get instructor, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<InstructorState>), EngineError> {
        let instructor_id = self
            .instructor_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let state = self
            .get_instructor(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = self.lock_write(state).await?;
        Ok((instructor_id, guard))
    }
}

/// Extract the instructor_id from an event (for non-Register/Remove events).
fn event_instructor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WeeklyRuleAdded { instructor_id, .. }
        | Event::WeeklyRuleUpdated { instructor_id, .. }
        | Event::WeeklyRuleRemoved { instructor_id, .. }
        | Event::TimeOffAdded { instructor_id, .. }
        | Event::TimeOffRemoved { instructor_id, .. }
        | Event::OverrideAdded { instructor_id, .. }
        | Event::OverrideRemoved { instructor_id, .. }
        | Event::ReservationBooked { instructor_id, .. }
        | Event::ReservationConfirmed { instructor_id, .. }
        | Event::ReservationCompleted { instructor_id, .. }
        | Event::ReservationCancelled { instructor_id, .. } => Some(*instructor_id),
        Event::InstructorUpdated { id, .. } => Some(*id),
        Event::InstructorRegistered { .. } | Event::InstructorRemoved { .. } => None,
    }
}
