//! Collaborators the reservation engine consumes: the resource registry and
//! the booking store. `WalStore` implements both.

mod room;
mod wal_store;

pub use room::RoomState;
pub use wal_store::WalStore;

use async_trait::async_trait;

use crate::model::*;

/// Booking fields supplied by the engine; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource_id: ResourceId,
    pub span: Span,
    pub booker: Option<String>,
    pub created_at: Ms,
}

/// Result of a cancel request. Both variants carry the booking as stored
/// after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled(Booking),
    AlreadyCanceled(Booking),
}

impl CancelOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            CancelOutcome::Canceled(b) | CancelOutcome::AlreadyCanceled(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            CancelOutcome::Canceled(b) | CancelOutcome::AlreadyCanceled(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ResourceNotFound(ResourceId),
    BookingNotFound(BookingId),
    /// An active booking already occupies part of the window.
    Overlap(BookingId),
    LimitExceeded(&'static str),
    /// Durable storage could not complete the operation.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            StoreError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::Overlap(id) => write!(f, "overlaps active booking: {id}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn resource_exists(&self, id: ResourceId) -> Result<bool, StoreError>;

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError>;

    /// All resources in registration order.
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn create_resource(&self, name: String) -> Result<Resource, StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Any active booking on `resource_id` intersecting `span`. Advisory only:
    /// the answer may be stale by the time the caller acts on it.
    async fn find_overlapping(
        &self,
        resource_id: ResourceId,
        span: Span,
    ) -> Result<Option<BookingId>, StoreError>;

    /// Atomic check-and-insert: fails with `StoreError::Overlap` if any active
    /// booking on the resource intersects the new span at commit time.
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// `Active → Canceled`, the only update a booking admits. Idempotent.
    async fn cancel(&self, id: BookingId, at: Ms) -> Result<CancelOutcome, StoreError>;

    /// Active bookings in the order the store accepted them.
    async fn find_active_by_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<Booking>, StoreError>;
}
