mod error;
mod mutations;
mod queries;
mod validate;

pub use error::EngineError;

use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{ReservationStore, ResourceRegistry};

/// Reservation engine: validation, overlap policy and status transitions
/// over a resource registry and a booking store.
///
/// The engine holds no booking state of its own. Cloning it is cheap, and
/// every clone shares the same collaborators.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<dyn ResourceRegistry>,
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    /// Engine over a single value that is both registry and store.
    pub fn from_store<S>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: ResourceRegistry + ReservationStore + 'static,
    {
        Self::new(store.clone(), store, clock)
    }
}
