mod memory;
mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{AllowlistEntry, Identity, Reservation, Room, Window};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend transport failure: {0}")]
    Transport(String),
    #[error("backend rejected the request: status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("backend call exceeded the {0:?} deadline")]
    Timeout(Duration),
    #[error("malformed backend payload: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// The hosted backend, reduced to the row operations this application uses.
///
/// Deletes are filter-scoped like the backing row API: removing zero rows is
/// not an error. Ownership and role checks happen against the snapshot before
/// the call; the filters here are the second line, not the first.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Bulk reservation read with room name and owner email attached,
    /// ordered by start.
    async fn fetch_reservations_joined(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Un-joined fallback for the bulk read, ordered by start.
    async fn fetch_reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Server-side overlap probe scoped to one room, against committed data.
    async fn conflicts_for(
        &self,
        room_id: Ulid,
        window: &Window,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// One batch write — a single booking is a batch of one.
    async fn insert_reservations(&self, rows: &[Reservation]) -> Result<(), StoreError>;

    async fn delete_reservation(&self, id: Ulid, owner_id: Ulid) -> Result<(), StoreError>;

    /// Insert-or-update of a room row.
    async fn put_room(&self, room: &Room) -> Result<(), StoreError>;

    async fn delete_room(&self, id: Ulid) -> Result<(), StoreError>;

    async fn fetch_allowlist(&self) -> Result<Vec<AllowlistEntry>, StoreError>;

    async fn insert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), StoreError>;

    async fn delete_allowlist(&self, email: &str) -> Result<(), StoreError>;

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;
}
