use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{
    CancelOutcome, NewBooking, ReservationStore, ResourceRegistry, RoomState, StoreError,
};

/// A registered room and its booking state. The resource itself is
/// immutable, so reading it never waits on the lock.
pub struct Room {
    pub resource: Resource,
    pub state: RwLock<RoomState>,
}

pub type SharedRoom = Arc<Room>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until a command arrives.
/// 2. Drain every append already queued behind it (the batch window).
/// 3. One fsync for the whole batch, then acknowledge each sender.
/// A non-append command found while draining runs after the batch commits.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: a failed batch is cut back out of the file so none of
/// its records can become durable with a later batch.
fn write_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("WAL rollback failed, refusing further appends: {e}");
    }
    result
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply an event to a room (caller holds the lock).
fn apply_to_room(
    room: &mut RoomState,
    event: &Event,
    booking_index: &DashMap<BookingId, ResourceId>,
) {
    match event {
        Event::BookingCreated {
            id,
            resource_id,
            span,
            booker,
            created_at,
        } => {
            room.insert(Booking::new(*id, *resource_id, *span, booker.clone(), *created_at));
            booking_index.insert(*id, *resource_id);
        }
        Event::BookingCanceled { id, at, .. } => {
            room.cancel(id, *at);
        }
        // Handled at the registry level
        Event::ResourceCreated { .. } => {}
    }
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Durable store: per-room state in memory, every mutation logged to a WAL
/// before it becomes visible.
///
/// Mutations of one room are serialized by that room's write lock, which is
/// held across the overlap check, the fsync, and the in-memory apply. That
/// makes `insert` an atomic check-and-insert for every caller sharing the
/// store.
pub struct WalStore {
    rooms: DashMap<ResourceId, SharedRoom>,
    /// Registration order. Also serializes registration against compaction.
    registry: Mutex<Vec<ResourceId>>,
    booking_index: DashMap<BookingId, ResourceId>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::recover(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let booking_index = DashMap::new();
        let mut order = Vec::new();
        let mut resources: HashMap<ResourceId, (Resource, RoomState)> = HashMap::new();
        for event in &events {
            match event {
                Event::ResourceCreated { id, name } => {
                    order.push(*id);
                    let resource = Resource {
                        id: *id,
                        name: name.clone(),
                    };
                    resources.insert(*id, (resource, RoomState::new()));
                }
                Event::BookingCreated { resource_id, .. }
                | Event::BookingCanceled { resource_id, .. } => {
                    if let Some((_, room)) = resources.get_mut(resource_id) {
                        apply_to_room(room, event, &booking_index);
                    }
                }
            }
        }

        let rooms = DashMap::new();
        for (id, (resource, state)) in resources {
            rooms.insert(
                id,
                Arc::new(Room {
                    resource,
                    state: RwLock::new(state),
                }),
            );
        }
        tracing::debug!(
            "replayed {} WAL events: {} rooms, {} bookings",
            events.len(),
            rooms.len(),
            booking_index.len()
        );

        Ok(Self {
            rooms,
            registry: Mutex::new(order),
            booking_index,
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| unavailable("WAL writer dropped response"))?
            .map_err(unavailable)
    }

    fn room(&self, id: &ResourceId) -> Result<SharedRoom, StoreError> {
        self.rooms
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::ResourceNotFound(*id))
    }

    fn room_for_booking(&self, id: &BookingId) -> Result<SharedRoom, StoreError> {
        let resource_id = self
            .booking_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(StoreError::BookingNotFound(*id))?;
        self.room(&resource_id)
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    ///
    /// Holds the registry lock and a read lock on every room while the
    /// compacted file is written, so no mutation can be acknowledged in the
    /// old file and then lost by the swap.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let order = self.registry.lock().await;
        let rooms: Vec<SharedRoom> = order
            .iter()
            .filter_map(|id| self.rooms.get(id).map(|e| e.value().clone()))
            .collect();

        let mut guards = Vec::with_capacity(rooms.len());
        for room in &rooms {
            guards.push(room.state.read().await);
        }

        let mut events = Vec::new();
        for (room, guard) in rooms.iter().zip(&guards) {
            events.push(Event::ResourceCreated {
                id: room.resource.id,
                name: room.resource.name.clone(),
            });
            for booking in guard.bookings() {
                events.push(Event::BookingCreated {
                    id: booking.id,
                    resource_id: booking.resource_id,
                    span: booking.span,
                    booker: booking.booker.clone(),
                    created_at: booking.created_at,
                });
                if let BookingStatus::Canceled { at } = booking.status() {
                    events.push(Event::BookingCanceled {
                        id: booking.id,
                        resource_id: booking.resource_id,
                        at,
                    });
                }
            }
        }

        let event_count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| unavailable("WAL writer dropped response"))?
            .map_err(unavailable)?;
        tracing::info!("compacted WAL to {event_count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ResourceRegistry for WalStore {
    async fn resource_exists(&self, id: ResourceId) -> Result<bool, StoreError> {
        Ok(self.rooms.contains_key(&id))
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.rooms.get(&id).map(|e| e.value().resource.clone()))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let order = self.registry.lock().await;
        Ok(order
            .iter()
            .filter_map(|id| self.rooms.get(id).map(|e| e.value().resource.clone()))
            .collect())
    }

    async fn create_resource(&self, name: String) -> Result<Resource, StoreError> {
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("resource name too long"));
        }
        let mut order = self.registry.lock().await;
        if order.len() >= MAX_RESOURCES {
            return Err(StoreError::LimitExceeded("too many resources"));
        }

        let id = Ulid::new();
        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;

        let resource = Resource { id, name };
        self.rooms.insert(
            id,
            Arc::new(Room {
                resource: resource.clone(),
                state: RwLock::new(RoomState::new()),
            }),
        );
        order.push(id);
        Ok(resource)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find_overlapping(
        &self,
        resource_id: ResourceId,
        span: Span,
    ) -> Result<Option<BookingId>, StoreError> {
        let room = self.room(&resource_id)?;
        let guard = room.state.read().await;
        Ok(guard.first_conflict(&span))
    }

    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let room = self.room(&booking.resource_id)?;
        let mut guard = room.state.write().await;
        if guard.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(StoreError::LimitExceeded("too many bookings on resource"));
        }
        if let Some(existing) = guard.first_conflict(&booking.span) {
            return Err(StoreError::Overlap(existing));
        }

        let id = Ulid::new();
        let event = Event::BookingCreated {
            id,
            resource_id: booking.resource_id,
            span: booking.span,
            booker: booking.booker,
            created_at: booking.created_at,
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut guard, &event, &self.booking_index);

        guard
            .booking(&id)
            .cloned()
            .ok_or_else(|| unavailable("booking vanished after apply"))
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let room = match self.room_for_booking(&id) {
            Ok(room) => room,
            Err(StoreError::BookingNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let guard = room.state.read().await;
        Ok(guard.booking(&id).cloned())
    }

    async fn cancel(&self, id: BookingId, at: Ms) -> Result<CancelOutcome, StoreError> {
        let room = self.room_for_booking(&id)?;
        let mut guard = room.state.write().await;
        let current = guard
            .booking(&id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(id))?;
        if !current.is_active() {
            return Ok(CancelOutcome::AlreadyCanceled(current));
        }

        let event = Event::BookingCanceled {
            id,
            resource_id: current.resource_id,
            at,
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut guard, &event, &self.booking_index);

        guard
            .booking(&id)
            .cloned()
            .map(CancelOutcome::Canceled)
            .ok_or(StoreError::BookingNotFound(id))
    }

    async fn find_active_by_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<Booking>, StoreError> {
        let room = self.room(&resource_id)?;
        let guard = room.state.read().await;
        Ok(guard.active_bookings().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const H: Ms = 3_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomd_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn new_booking(resource_id: ResourceId, start: Ms, end: Ms) -> NewBooking {
        NewBooking {
            resource_id,
            span: Span::new(start, end),
            booker: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_and_starts_active() {
        let store = WalStore::open(&test_wal_path("insert_assigns.wal")).unwrap();
        let room = store.create_resource("Board Room".into()).await.unwrap();

        let a = store.insert(new_booking(room.id, H, 2 * H)).await.unwrap();
        let b = store.insert(new_booking(room.id, 2 * H, 3 * H)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.is_active());
        assert_eq!(store.find_by_id(a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn insert_rejects_overlap_under_lock() {
        let store = WalStore::open(&test_wal_path("insert_overlap.wal")).unwrap();
        let room = store.create_resource("Board Room".into()).await.unwrap();

        let first = store.insert(new_booking(room.id, H, 3 * H)).await.unwrap();
        let err = store.insert(new_booking(room.id, 2 * H, 4 * H)).await.unwrap_err();
        assert_eq!(err, StoreError::Overlap(first.id));
    }

    #[tokio::test]
    async fn insert_unknown_resource() {
        let store = WalStore::open(&test_wal_path("insert_unknown.wal")).unwrap();
        let rid = Ulid::new();
        let err = store.insert(new_booking(rid, H, 2 * H)).await.unwrap_err();
        assert_eq!(err, StoreError::ResourceNotFound(rid));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_logged_once() {
        let store = WalStore::open(&test_wal_path("cancel_once.wal")).unwrap();
        let room = store.create_resource("Board Room".into()).await.unwrap();
        let b = store.insert(new_booking(room.id, H, 2 * H)).await.unwrap();
        assert_eq!(store.appends_since_compact().await, 2);

        let first = store.cancel(b.id, 10).await.unwrap();
        assert!(matches!(first, CancelOutcome::Canceled(_)));
        let second = store.cancel(b.id, 20).await.unwrap();
        assert!(matches!(second, CancelOutcome::AlreadyCanceled(_)));
        assert_eq!(first.booking(), second.booking());
        assert_eq!(
            second.into_booking().status(),
            BookingStatus::Canceled { at: 10 }
        );
        assert_eq!(store.appends_since_compact().await, 3);
    }

    #[tokio::test]
    async fn cancel_unknown_booking() {
        let store = WalStore::open(&test_wal_path("cancel_unknown.wal")).unwrap();
        let id = Ulid::new();
        assert_eq!(
            store.cancel(id, 0).await.unwrap_err(),
            StoreError::BookingNotFound(id)
        );
        assert_eq!(store.find_by_id(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn resources_listed_in_registration_order() {
        let store = WalStore::open(&test_wal_path("resource_order.wal")).unwrap();
        let names = ["Conference Room A", "Board Room", "Meeting Room 1"];
        for name in names {
            store.create_resource(name.into()).await.unwrap();
        }
        let listed: Vec<_> = store
            .list_resources()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(listed, names);
    }

    #[tokio::test]
    async fn resource_name_limit() {
        let store = WalStore::open(&test_wal_path("resource_name_limit.wal")).unwrap();
        let err = store
            .create_resource("x".repeat(MAX_NAME_LEN + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn replay_restores_status_and_order() {
        let path = test_wal_path("replay_restore.wal");
        let (rid, ids) = {
            let store = WalStore::open(&path).unwrap();
            let room = store.create_resource("Board Room".into()).await.unwrap();
            let mut ids = Vec::new();
            for start in [5, 1, 3] {
                let b = store
                    .insert(new_booking(room.id, start * H, (start + 1) * H))
                    .await
                    .unwrap();
                ids.push(b.id);
            }
            store.cancel(ids[1], 42).await.unwrap();
            (room.id, ids)
        };

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.get_resource(rid).await.unwrap().unwrap().name, "Board Room");
        let active: Vec<_> = store
            .find_active_by_resource(rid)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(active, vec![ids[0], ids[2]]);
        let canceled = store.find_by_id(ids[1]).await.unwrap().unwrap();
        assert_eq!(canceled.status(), BookingStatus::Canceled { at: 42 });

        // The canceled window is free again after restart
        assert!(store
            .find_overlapping(rid, Span::new(H, 2 * H))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn compact_preserves_state_and_order() {
        let path = test_wal_path("compact_state.wal");
        let store = WalStore::open(&path).unwrap();
        let room = store.create_resource("Board Room".into()).await.unwrap();

        let keep = store.insert(new_booking(room.id, 9 * H, 10 * H)).await.unwrap();
        let gone = store.insert(new_booking(room.id, 11 * H, 12 * H)).await.unwrap();
        store.cancel(gone.id, 1).await.unwrap();
        store.cancel(gone.id, 2).await.unwrap();

        let size_before = std::fs::metadata(&path).unwrap().len();
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(size_after <= size_before);

        let after_compact = store.insert(new_booking(room.id, 13 * H, 14 * H)).await.unwrap();
        drop(store);

        let store = WalStore::open(&path).unwrap();
        let active: Vec<_> = store
            .find_active_by_resource(room.id)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(active, vec![keep.id, after_compact.id]);
        assert_eq!(
            store.find_by_id(gone.id).await.unwrap().unwrap().status(),
            BookingStatus::Canceled { at: 1 }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_same_window_one_wins() {
        let store = Arc::new(WalStore::open(&test_wal_path("concurrent_insert.wal")).unwrap());
        let room = store.create_resource("Board Room".into()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(new_booking(room.id, 14 * H, 15 * H)).await
            }));
        }

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(matches!(e, StoreError::Overlap(_)), "unexpected: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(store.find_active_by_resource(room.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn group_commit_survives_restart() {
        let path = test_wal_path("group_commit.wal");
        let store = Arc::new(WalStore::open(&path).unwrap());

        let n = 20;
        let mut handles = Vec::new();
        for i in 0..n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_resource(format!("Room {i}")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.list_resources().await.unwrap().len(), n);

        let reopened = WalStore::open(&path).unwrap();
        assert_eq!(reopened.list_resources().await.unwrap().len(), n);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failing_disk_rejects_writes_and_keeps_memory_clean() {
        // Every write to /dev/full fails with ENOSPC
        let path = Path::new("/dev/full");
        if !path.exists() {
            return;
        }
        let store = WalStore::open(path).unwrap();

        for name in ["Board Room", "Meeting Room 1"] {
            let err = store.create_resource(name.into()).await.unwrap_err();
            assert!(matches!(err, StoreError::Unavailable(_)), "unexpected: {err}");
        }
        assert!(store.list_resources().await.unwrap().is_empty());
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
