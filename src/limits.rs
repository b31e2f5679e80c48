//! Hard caps. Requests past these are rejected with `LimitExceeded`, never
//! silently truncated.

use crate::model::{Ms, DAY_MS, HOUR_MS};

/// Earliest timestamp the engine accepts (epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest timestamp the engine accepts (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single lesson may not run longer than this.
pub const MAX_LESSON_DURATION_MS: Ms = 8 * HOUR_MS;

/// Availability queries are capped to keep slot enumeration bounded.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * DAY_MS;

pub const MAX_TEACHERS: usize = 10_000;

pub const MAX_LESSONS_PER_TEACHER: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_STUDENTS_PER_LESSON: u32 = 100;

/// Meeting URL / id / password fields are opaque but still bounded.
pub const MAX_MEETING_FIELD_LEN: usize = 512;
