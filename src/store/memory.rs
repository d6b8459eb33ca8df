use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{normalize_email, AllowlistEntry, Identity, Reservation, Room, Window};

use super::{ExternalStore, StoreError};

/// Volatile `ExternalStore` over keyed maps. Serves local runs without a
/// configured backend, and tests — the failure toggles exist for the reload
/// fallback and fail-closed paths.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<Ulid, Room>,
    reservations: DashMap<Ulid, Reservation>,
    allowlist: DashMap<String, AllowlistEntry>,
    identities: DashMap<String, Identity>,
    fail_joined: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    stall: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, room: Room) {
        self.rooms.insert(room.id, room);
    }

    pub fn add_reservation(&self, reservation: Reservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn add_identity(&self, identity: Identity) {
        self.identities
            .insert(normalize_email(&identity.email), identity);
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Fail only the joined bulk read, leaving the plain read working.
    pub fn set_joined_read_failing(&self, failing: bool) {
        self.fail_joined.store(failing, Ordering::Relaxed);
    }

    /// Fail every read, joined or plain.
    pub fn set_reads_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::Relaxed);
    }

    pub fn set_writes_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Relaxed);
    }

    /// Make every call hang well past any client-side deadline.
    pub fn set_stalled(&self, stalled: bool) {
        self.stall.store(stalled, Ordering::Relaxed);
    }

    async fn gate_read(&self) -> Result<(), StoreError> {
        if self.stall.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Transport("injected read failure".into()));
        }
        Ok(())
    }

    async fn gate_write(&self) -> Result<(), StoreError> {
        if self.stall.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Transport("injected write failure".into()));
        }
        Ok(())
    }

    fn sorted_reservations(&self) -> Vec<Reservation> {
        let mut rows: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|r| r.window.start);
        rows
    }

    fn owner_email_for(&self, owner_id: Ulid) -> Option<String> {
        self.identities
            .iter()
            .find(|e| e.value().id == owner_id)
            .map(|e| e.value().email.clone())
    }
}

#[async_trait]
impl ExternalStore for MemoryStore {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.gate_read().await?;
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn fetch_reservations_joined(&self) -> Result<Vec<Reservation>, StoreError> {
        self.gate_read().await?;
        if self.fail_joined.load(Ordering::Relaxed) {
            return Err(StoreError::Rejected {
                status: 400,
                message: "injected joined-read failure".into(),
            });
        }
        let rows = self
            .sorted_reservations()
            .into_iter()
            .map(|mut r| {
                r.room_name = self.rooms.get(&r.room_id).map(|e| e.value().name.clone());
                r.owner_email = self.owner_email_for(r.owner_id);
                r
            })
            .collect();
        Ok(rows)
    }

    async fn fetch_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.gate_read().await?;
        Ok(self.sorted_reservations())
    }

    async fn conflicts_for(
        &self,
        room_id: Ulid,
        window: &Window,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.gate_read().await?;
        Ok(self
            .sorted_reservations()
            .into_iter()
            .filter(|r| r.room_id == room_id && r.window.overlaps(window))
            .collect())
    }

    async fn insert_reservations(&self, rows: &[Reservation]) -> Result<(), StoreError> {
        self.gate_write().await?;
        for row in rows {
            self.reservations.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn delete_reservation(&self, id: Ulid, owner_id: Ulid) -> Result<(), StoreError> {
        self.gate_write().await?;
        self.reservations
            .remove_if(&id, |_, r| r.owner_id == owner_id);
        Ok(())
    }

    async fn put_room(&self, room: &Room) -> Result<(), StoreError> {
        self.gate_write().await?;
        self.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), StoreError> {
        self.gate_write().await?;
        self.rooms.remove(&id);
        Ok(())
    }

    async fn fetch_allowlist(&self) -> Result<Vec<AllowlistEntry>, StoreError> {
        self.gate_read().await?;
        let mut entries: Vec<AllowlistEntry> =
            self.allowlist.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(entries)
    }

    async fn insert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), StoreError> {
        self.gate_write().await?;
        self.allowlist
            .insert(normalize_email(&entry.email), entry.clone());
        Ok(())
    }

    async fn delete_allowlist(&self, email: &str) -> Result<(), StoreError> {
        self.gate_write().await?;
        self.allowlist.remove(&normalize_email(email));
        Ok(())
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        self.gate_read().await?;
        Ok(self
            .identities
            .get(&normalize_email(email))
            .map(|e| e.value().clone()))
    }
}
