use crate::model::{BookingId, ResourceId};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidTimeRange(&'static str),
    ResourceNotFound(ResourceId),
    BookingNotFound(BookingId),
    /// Carries the active booking that already holds the window.
    OverlapConflict(BookingId),
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeRange(reason) => write!(f, "invalid time range: {reason}"),
            EngineError::ResourceNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::OverlapConflict(id) => write!(
                f,
                "booking overlaps with an existing booking for this room: {id}"
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ResourceNotFound(id) => EngineError::ResourceNotFound(id),
            StoreError::BookingNotFound(id) => EngineError::BookingNotFound(id),
            StoreError::Overlap(id) => EngineError::OverlapConflict(id),
            StoreError::LimitExceeded(msg) => EngineError::LimitExceeded(msg),
            StoreError::Unavailable(e) => EngineError::StoreUnavailable(e),
        }
    }
}
