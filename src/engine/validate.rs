use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Check a requested window against "now" and the configured limits.
/// Well-formedness is checked before the past check, limits last.
pub(super) fn validate_window(start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidTimeRange("start must be before end"));
    }
    if start <= now {
        return Err(EngineError::InvalidTimeRange(
            "booking cannot start in the past",
        ));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

pub(super) fn validate_booker(booker: Option<&str>) -> Result<(), EngineError> {
    if let Some(name) = booker
        && name.len() > MAX_BOOKER_LEN
    {
        return Err(EngineError::LimitExceeded("booker name too long"));
    }
    Ok(())
}
