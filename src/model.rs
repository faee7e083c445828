use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since the platform epoch (1970-01-01 00:00, instructor-local) —
/// the only time type.
pub type Minutes = i64;

/// Whole days since the platform epoch.
pub type Day = i64;

pub const DAY_MIN: Minutes = 24 * 60;

/// Midnight of `day`, in absolute minutes.
pub fn day_start(day: Day) -> Minutes {
    day * DAY_MIN
}

/// Day the instant `t` falls on.
pub fn day_of(t: Minutes) -> Day {
    t.div_euclid(DAY_MIN)
}

/// Day-of-week, 0 = Monday through 6 = Sunday. The epoch day was a Thursday.
pub fn weekday(day: Day) -> u8 {
    (day + 3).rem_euclid(7) as u8
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minutes,
    pub end: Minutes,
}

impl Window {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minutes) -> bool {
        self.start <= t && t < self.end
    }

    /// Widen by `margin` minutes on both sides.
    pub fn padded(&self, margin: Minutes) -> Window {
        Window::new(self.start - margin, self.end + margin)
    }
}

/// Recurring teaching hours: `[start, end)` minutes-of-day on `weekday`.
/// Multiple rules per weekday are allowed; overlaps are merged at resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    pub id: Ulid,
    pub weekday: u8,
    pub start: Minutes,
    pub end: Minutes,
}

/// Ad-hoc absence over an inclusive day range. `hours` restricts the block to
/// part of each covered day; `None` blocks whole days. Entries whose range has
/// passed simply stop matching — the write path never removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOff {
    pub id: Ulid,
    pub first_day: Day,
    pub last_day: Day,
    pub hours: Option<(Minutes, Minutes)>,
}

impl TimeOff {
    pub fn covers(&self, day: Day) -> bool {
        self.first_day <= day && day <= self.last_day
    }

    /// The blocked window on `day`, in absolute minutes.
    pub fn window_on(&self, day: Day) -> Window {
        let origin = day_start(day);
        match self.hours {
            Some((s, e)) => Window::new(origin + s, origin + e),
            None => Window::new(origin, origin + DAY_MIN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    Add,
    Remove,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Add => "ADD",
            Polarity::Remove => "REMOVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADD" => Some(Polarity::Add),
            "REMOVE" => Some(Polarity::Remove),
            _ => None,
        }
    }
}

/// Date-specific deviation from the weekly rules. `Add` opens extra hours on
/// `day` and is unioned in before any subtraction; `Remove` closes hours and
/// is subtracted together with time off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOverride {
    pub id: Ulid,
    pub day: Day,
    pub start: Minutes,
    pub end: Minutes,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Only pending and confirmed lessons occupy time.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(ReservationStatus::Pending),
            "CONFIRMED" => Some(ReservationStatus::Confirmed),
            "COMPLETED" => Some(ReservationStatus::Completed),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

/// A booked lesson. `booked_at` drives the unpaid-pending sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub student_id: Ulid,
    pub window: Window,
    pub status: ReservationStatus,
    pub booked_at: Minutes,
}

#[derive(Debug, Clone)]
pub struct InstructorState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Margin kept free before and after every lesson (travel/handover).
    pub buffer_min: Minutes,
    /// Granularity of offered slot starts.
    pub step_min: Minutes,
    /// Minimum notice between "now" and the earliest bookable start.
    pub lead_min: Minutes,
    pub weekly_rules: Vec<WeeklyRule>,
    pub time_off: Vec<TimeOff>,
    pub overrides: Vec<DayOverride>,
    /// All reservations, sorted by `window.start`.
    pub reservations: Vec<Reservation>,
}

impl InstructorState {
    pub fn new(
        id: Ulid,
        name: Option<String>,
        buffer_min: Minutes,
        step_min: Minutes,
        lead_min: Minutes,
    ) -> Self {
        Self {
            id,
            name,
            buffer_min,
            step_min,
            lead_min,
            weekly_rules: Vec::new(),
            time_off: Vec::new(),
            overrides: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Weekly rules + time-off entries + overrides, combined.
    pub fn schedule_entry_count(&self) -> usize {
        self.weekly_rules.len() + self.time_off.len() + self.overrides.len()
    }

    /// Insert reservation maintaining sort order by window.start.
    pub fn insert_reservation(&mut self, r: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&r.window.start, |x| x.window.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, r);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose window overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn reservations_overlapping(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.window.end > query.start)
    }

    pub fn rules_for(&self, weekday: u8) -> impl Iterator<Item = &WeeklyRule> {
        self.weekly_rules.iter().filter(move |r| r.weekday == weekday)
    }

    pub fn overrides_on(&self, day: Day) -> impl Iterator<Item = &DayOverride> {
        self.overrides.iter().filter(move |o| o.day == day)
    }

    pub fn time_off_on(&self, day: Day) -> impl Iterator<Item = &TimeOff> {
        self.time_off.iter().filter(move |t| t.covers(day))
    }

    pub fn remove_weekly_rule(&mut self, id: &Ulid) -> Option<WeeklyRule> {
        let pos = self.weekly_rules.iter().position(|r| r.id == *id)?;
        Some(self.weekly_rules.remove(pos))
    }

    pub fn remove_time_off(&mut self, id: &Ulid) -> Option<TimeOff> {
        let pos = self.time_off.iter().position(|t| t.id == *id)?;
        Some(self.time_off.remove(pos))
    }

    pub fn remove_override(&mut self, id: &Ulid) -> Option<DayOverride> {
        let pos = self.overrides.iter().position(|o| o.id == *id)?;
        Some(self.overrides.remove(pos))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    InstructorRegistered {
        id: Ulid,
        name: Option<String>,
        buffer_min: Minutes,
        step_min: Minutes,
        lead_min: Minutes,
    },
    InstructorUpdated {
        id: Ulid,
        name: Option<String>,
        buffer_min: Minutes,
        step_min: Minutes,
        lead_min: Minutes,
    },
    InstructorRemoved {
        id: Ulid,
    },
    WeeklyRuleAdded {
        id: Ulid,
        instructor_id: Ulid,
        weekday: u8,
        start: Minutes,
        end: Minutes,
    },
    WeeklyRuleUpdated {
        id: Ulid,
        instructor_id: Ulid,
        weekday: u8,
        start: Minutes,
        end: Minutes,
    },
    WeeklyRuleRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    TimeOffAdded {
        id: Ulid,
        instructor_id: Ulid,
        first_day: Day,
        last_day: Day,
        hours: Option<(Minutes, Minutes)>,
    },
    TimeOffRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    OverrideAdded {
        id: Ulid,
        instructor_id: Ulid,
        day: Day,
        start: Minutes,
        end: Minutes,
        polarity: Polarity,
    },
    OverrideRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    ReservationBooked {
        id: Ulid,
        instructor_id: Ulid,
        student_id: Ulid,
        window: Window,
        booked_at: Minutes,
    },
    ReservationConfirmed {
        id: Ulid,
        instructor_id: Ulid,
    },
    ReservationCompleted {
        id: Ulid,
        instructor_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        instructor_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructorInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub buffer_min: Minutes,
    pub step_min: Minutes,
    pub lead_min: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRuleInfo {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub weekday: u8,
    pub start: Minutes,
    pub end: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOffInfo {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub first_day: Day,
    pub last_day: Day,
    pub hours: Option<(Minutes, Minutes)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideInfo {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub day: Day,
    pub start: Minutes,
    pub end: Minutes,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub student_id: Ulid,
    pub start: Minutes,
    pub end: Minutes,
    pub status: ReservationStatus,
}

/// Advisory candidate lesson window. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub instructor_id: Ulid,
    pub start: Minutes,
    pub end: Minutes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_basics() {
        let w = Window::new(100, 200);
        assert_eq!(w.duration_min(), 100);
        assert!(w.contains_instant(100));
        assert!(w.contains_instant(199));
        assert!(!w.contains_instant(200)); // half-open
    }

    #[test]
    fn window_overlap() {
        let a = Window::new(100, 200);
        let b = Window::new(150, 250);
        let c = Window::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn window_padded() {
        let w = Window::new(100, 200);
        assert_eq!(w.padded(10), Window::new(90, 210));
        assert_eq!(w.padded(0), w);
    }

    #[test]
    fn weekday_anchors() {
        // 1970-01-01 (day 0) was a Thursday; 1970-01-05 (day 4) a Monday.
        assert_eq!(weekday(0), 3);
        assert_eq!(weekday(4), 0);
        assert_eq!(weekday(10), 6); // Sunday 1970-01-11
        assert_eq!(weekday(11), 0); // next Monday
        assert_eq!(weekday(-3), 0); // 1969-12-29 was a Monday
    }

    #[test]
    fn day_conversions() {
        assert_eq!(day_start(2), 2 * DAY_MIN);
        assert_eq!(day_of(2 * DAY_MIN), 2);
        assert_eq!(day_of(2 * DAY_MIN + DAY_MIN - 1), 2);
        assert_eq!(day_of(3 * DAY_MIN), 3);
    }

    #[test]
    fn time_off_full_day_window() {
        let t = TimeOff {
            id: Ulid::new(),
            first_day: 10,
            last_day: 12,
            hours: None,
        };
        assert!(t.covers(10));
        assert!(t.covers(12));
        assert!(!t.covers(13));
        assert_eq!(t.window_on(11), Window::new(11 * DAY_MIN, 12 * DAY_MIN));
    }

    #[test]
    fn time_off_partial_day_window() {
        let t = TimeOff {
            id: Ulid::new(),
            first_day: 10,
            last_day: 10,
            hours: Some((9 * 60, 12 * 60)),
        };
        assert_eq!(
            t.window_on(10),
            Window::new(10 * DAY_MIN + 9 * 60, 10 * DAY_MIN + 12 * 60)
        );
    }

    #[test]
    fn status_activity() {
        assert!(ReservationStatus::Pending.is_active());
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(!ReservationStatus::Completed.is_active());
        assert!(!ReservationStatus::Cancelled.is_active());
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Completed,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(ReservationStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(
            ReservationStatus::parse("confirmed"),
            Some(ReservationStatus::Confirmed)
        );
        assert_eq!(ReservationStatus::parse("PAID"), None);
    }

    #[test]
    fn polarity_parse() {
        assert_eq!(Polarity::parse("add"), Some(Polarity::Add));
        assert_eq!(Polarity::parse("REMOVE"), Some(Polarity::Remove));
        assert_eq!(Polarity::parse("subtract"), None);
    }

    fn reservation(start: Minutes, end: Minutes) -> Reservation {
        Reservation {
            id: Ulid::new(),
            student_id: Ulid::new(),
            window: Window::new(start, end),
            status: ReservationStatus::Pending,
            booked_at: 0,
        }
    }

    #[test]
    fn reservation_ordering() {
        let mut state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        state.insert_reservation(reservation(300, 400));
        state.insert_reservation(reservation(100, 200));
        state.insert_reservation(reservation(200, 300));
        assert_eq!(state.reservations[0].window.start, 100);
        assert_eq!(state.reservations[1].window.start, 200);
        assert_eq!(state.reservations[2].window.start, 300);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        state.insert_reservation(reservation(100, 200));
        state.insert_reservation(reservation(450, 600));
        state.insert_reservation(reservation(1000, 1100));

        let query = Window::new(500, 800);
        let hits: Vec<_> = state.reservations_overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].window, Window::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Reservation ending exactly at query.start is NOT overlapping (half-open)
        let mut state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        state.insert_reservation(reservation(100, 200));
        let hits: Vec<_> = state
            .reservations_overlapping(&Window::new(200, 300))
            .collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_spanning_query() {
        let mut state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        state.insert_reservation(reservation(0, 10_000));
        let hits: Vec<_> = state
            .reservations_overlapping(&Window::new(500, 600))
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn overlapping_empty_state() {
        let state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        let hits: Vec<_> = state
            .reservations_overlapping(&Window::new(0, 1000))
            .collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn remove_schedule_entries() {
        let mut state = InstructorState::new(Ulid::new(), None, 0, 30, 0);
        let rule_id = Ulid::new();
        state.weekly_rules.push(WeeklyRule {
            id: rule_id,
            weekday: 0,
            start: 8 * 60,
            end: 12 * 60,
        });
        assert_eq!(state.schedule_entry_count(), 1);
        assert!(state.remove_weekly_rule(&rule_id).is_some());
        assert!(state.remove_weekly_rule(&rule_id).is_none());
        assert_eq!(state.schedule_entry_count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationBooked {
            id: Ulid::new(),
            instructor_id: Ulid::new(),
            student_id: Ulid::new(),
            window: Window::new(1000, 1060),
            booked_at: 900,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
