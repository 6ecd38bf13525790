use crate::model::*;
use crate::observability;
use crate::store::{CancelOutcome, NewBooking, StoreError};

use super::validate::{validate_booker, validate_window};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_booking(
        &self,
        resource_id: ResourceId,
        start: Ms,
        end: Ms,
        booker: Option<String>,
    ) -> Result<Booking, EngineError> {
        let now = self.clock.now();
        let span = validate_window(start, end, now)?;
        validate_booker(booker.as_deref())?;
        if !self.registry.resource_exists(resource_id).await? {
            return Err(EngineError::ResourceNotFound(resource_id));
        }

        // Cheap early rejection. The store repeats this under its lock.
        if let Some(existing) = self.store.find_overlapping(resource_id, span).await? {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "stage" => "precheck")
                .increment(1);
            tracing::debug!("booking on {resource_id} rejected: overlaps {existing}");
            return Err(EngineError::OverlapConflict(existing));
        }

        let new = NewBooking {
            resource_id,
            span,
            booker,
            created_at: now,
        };
        match self.store.insert(new).await {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                tracing::info!(
                    "booked {} on {resource_id} [{}, {})",
                    booking.id,
                    span.start,
                    span.end
                );
                Ok(booking)
            }
            Err(StoreError::Overlap(existing)) => {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "stage" => "commit")
                    .increment(1);
                tracing::debug!("booking on {resource_id} lost race to {existing}");
                Err(EngineError::OverlapConflict(existing))
            }
            Err(e) => {
                if let StoreError::Unavailable(msg) = &e {
                    tracing::error!("insert on {resource_id} failed: {msg}");
                }
                Err(e.into())
            }
        }
    }

    /// Idempotent: a booking that is already canceled comes back unchanged.
    pub async fn cancel_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let outcome = self.store.cancel(id, self.clock.now()).await.inspect_err(|e| {
            if let StoreError::Unavailable(msg) = e {
                tracing::error!("cancel of {id} failed: {msg}");
            }
        })?;
        match outcome {
            CancelOutcome::Canceled(booking) => {
                metrics::counter!(observability::BOOKINGS_CANCELED_TOTAL).increment(1);
                tracing::info!("canceled {id} on {}", booking.resource_id);
                Ok(booking)
            }
            CancelOutcome::AlreadyCanceled(booking) => {
                tracing::debug!("{id} already canceled");
                Ok(booking)
            }
        }
    }
}
