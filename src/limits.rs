use crate::model::Ms;

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single booking: 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

/// Active and canceled bookings together.
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;
pub const MAX_RESOURCES: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BOOKER_LEN: usize = 256;
