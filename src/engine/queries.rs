use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Active bookings of a room, in the order they were created.
    pub async fn list_active_bookings(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<Booking>, EngineError> {
        if !self.registry.resource_exists(resource_id).await? {
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        Ok(self.store.find_active_by_resource(resource_id).await?)
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn get_resource(&self, id: ResourceId) -> Result<Resource, EngineError> {
        self.registry
            .get_resource(id)
            .await?
            .ok_or(EngineError::ResourceNotFound(id))
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, EngineError> {
        Ok(self.registry.list_resources().await?)
    }
}
