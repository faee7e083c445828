use crate::model::{DAY_MIN, Minutes};

/// Hard caps protecting a school's engine from unbounded input, plus the
/// platform defaults an instructor row falls back to when the account
/// service omits a setting.

pub const MAX_INSTRUCTORS_PER_SCHOOL: usize = 10_000;

/// Weekly rules + time-off entries + overrides, combined, per instructor.
pub const MAX_SCHEDULE_ENTRIES: usize = 2_000;

pub const MAX_RESERVATIONS_PER_INSTRUCTOR: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_SCHOOLS: usize = 1_024;

pub const MAX_SCHOOL_NAME_LEN: usize = 256;

/// Valid absolute-time range: [epoch, epoch + 100 years).
pub const MIN_VALID_TIME_MIN: Minutes = 0;
pub const MAX_VALID_TIME_MIN: Minutes = 100 * 365 * DAY_MIN;

/// A lesson never spans more than one day.
pub const MAX_LESSON_MIN: Minutes = DAY_MIN;

pub const DEFAULT_STEP_MIN: Minutes = 30;

pub const DEFAULT_LEAD_MIN: Minutes = 0;

pub const DEFAULT_BUFFER_MIN: Minutes = 0;

/// Unpaid pending reservations are cancelled after this long.
pub const PENDING_PAYMENT_WINDOW_MIN: Minutes = 30;

/// Bound on waiting for an instructor's commit lock.
pub const COMMIT_LOCK_TIMEOUT_MS: u64 = 2_000;
