use crate::model::Resource;
use crate::store::{ResourceRegistry, StoreError};

/// Register the default rooms on a fresh registry. A registry that already
/// has rooms (a replayed WAL) is left as it is.
pub async fn seed_rooms(
    registry: &dyn ResourceRegistry,
    names: &[String],
) -> Result<Vec<Resource>, StoreError> {
    if names.is_empty() || !registry.list_resources().await?.is_empty() {
        return Ok(Vec::new());
    }
    let mut created = Vec::with_capacity(names.len());
    for name in names {
        let room = registry.create_resource(name.clone()).await?;
        tracing::info!("seeded room {:?} ({})", room.name, room.id);
        created.push(room);
    }
    Ok(created)
}
