use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::warn;
use ulid::Ulid;

use crate::booking::{
    self, book_series, check_rooms, first_conflict, BookingError, RepeatRule, SeriesRequest,
};
use crate::limits::{MAX_EMAIL_LEN, MAX_ROOM_NAME_LEN};
use crate::model::{
    normalize_email, AllowlistEntry, Identity, LoginPath, Reservation, Room, RoomAvailability,
    Stamp,
};
use crate::store::{ExternalStore, StoreError};

/// The cached view of the external store. Only ever replaced as a whole —
/// there is no incremental merge.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub rooms: Vec<Room>,
    pub reservations: Vec<Reservation>,
}

/// The application context: one store handle, one snapshot, one per-call
/// deadline. Handed to the request layer as a shared read-only handle; every
/// mutation goes through the store and comes back via a wholesale reload.
pub struct Session {
    store: Arc<dyn ExternalStore>,
    snapshot: RwLock<Snapshot>,
    call_timeout: Duration,
}

impl Session {
    pub fn new(store: Arc<dyn ExternalStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Snapshot::default()),
            call_timeout,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Apply the client-side deadline to one store call. The backend is not
    /// told about the deadline; a timed-out call may still land server-side.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL).increment(1);
                Err(StoreError::Timeout(self.call_timeout))
            }
        }
    }

    // ── Snapshot loads ───────────────────────────────────────

    /// Bulk room load. Success replaces the list wholesale; a timeout clears
    /// it; any other failure keeps the previous (stale-but-consistent) list.
    pub async fn reload_rooms(&self) -> Result<(), StoreError> {
        match self.call(self.store.fetch_rooms()).await {
            Ok(rooms) => {
                metrics::gauge!(crate::observability::SNAPSHOT_ROOMS).set(rooms.len() as f64);
                metrics::counter!(crate::observability::SNAPSHOT_RELOADS_TOTAL,
                    "entity" => "rooms", "outcome" => "ok")
                .increment(1);
                self.snapshot.write().await.rooms = rooms;
                Ok(())
            }
            Err(e) => {
                self.handle_reload_failure("rooms", &e, |snap| snap.rooms.clear())
                    .await;
                Err(e)
            }
        }
    }

    /// Bulk reservation load, ordered by start. Tries the joined read first
    /// and falls back to the un-joined one when the backend rejects it; the
    /// same replace/clear/keep rules as [`Self::reload_rooms`] apply.
    pub async fn reload_reservations(&self) -> Result<(), StoreError> {
        let loaded = match self.call(self.store.fetch_reservations_joined()).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_timeout() => Err(e),
            Err(e) => {
                warn!(error = %e, "joined reservation load failed, retrying un-joined");
                self.call(self.store.fetch_reservations()).await
            }
        };
        match loaded {
            Ok(rows) => {
                metrics::gauge!(crate::observability::SNAPSHOT_RESERVATIONS)
                    .set(rows.len() as f64);
                metrics::counter!(crate::observability::SNAPSHOT_RELOADS_TOTAL,
                    "entity" => "reservations", "outcome" => "ok")
                .increment(1);
                self.snapshot.write().await.reservations = rows;
                Ok(())
            }
            Err(e) => {
                self.handle_reload_failure("reservations", &e, |snap| snap.reservations.clear())
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_reload_failure(
        &self,
        entity: &'static str,
        error: &StoreError,
        clear: impl FnOnce(&mut Snapshot),
    ) {
        if error.is_timeout() {
            // Deadline missed: backend state unknown, so an empty list beats
            // an indeterminate one.
            warn!(entity, error = %error, "snapshot load timed out, clearing");
            clear(&mut *self.snapshot.write().await);
            metrics::counter!(crate::observability::SNAPSHOT_RELOADS_TOTAL,
                "entity" => entity, "outcome" => "timeout")
            .increment(1);
        } else {
            warn!(entity, error = %error, "snapshot load failed, keeping previous data");
            metrics::counter!(crate::observability::SNAPSHOT_RELOADS_TOTAL,
                "entity" => entity, "outcome" => "error")
            .increment(1);
        }
    }

    /// Explicit refresh of both entity lists. Both loads run even if the
    /// first fails; the first error is reported.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let rooms = self.reload_rooms().await;
        let reservations = self.reload_reservations().await;
        rooms.and(reservations)
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn availability(
        &self,
        start: Stamp,
        end: Stamp,
        min_capacity: Option<u32>,
    ) -> Result<Vec<RoomAvailability>, BookingError> {
        let window = booking::validate_window(start, end)?;
        let snap = self.snapshot.read().await;
        Ok(check_rooms(
            &snap.rooms,
            &snap.reservations,
            &window,
            min_capacity,
        ))
    }

    pub async fn identify(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        self.call(self.store.identity_by_email(email)).await
    }

    /// Classify a login email: allow-listed addresses get the streamlined
    /// path, everyone else gets a one-time link. Credentials themselves are
    /// the external provider's concern.
    pub async fn login_path(&self, email: &str) -> Result<LoginPath, BookingError> {
        let email = validate_email(email)?;
        let entries = self.call(self.store.fetch_allowlist()).await?;
        let listed = entries.iter().any(|e| normalize_email(&e.email) == email);
        Ok(if listed {
            LoginPath::Preapproved
        } else {
            LoginPath::EmailLink
        })
    }

    // ── Booking flows ────────────────────────────────────────

    /// Book a single window. The conflict check runs against the cached
    /// snapshot; the insert is unconditional, so a concurrent booking between
    /// check and insert can still land (accepted, same as the series path).
    pub async fn reserve(
        &self,
        identity: &Identity,
        room_id: Ulid,
        start: Stamp,
        end: Stamp,
        purpose: &str,
    ) -> Result<Reservation, BookingError> {
        let window = booking::validate_window(start, end)?;
        booking::validate_purpose(purpose)?;
        {
            let snap = self.snapshot.read().await;
            if !snap.rooms.iter().any(|r| r.id == room_id) {
                return Err(BookingError::RoomMissing(room_id));
            }
            if let Some(existing) = first_conflict(room_id, &snap.reservations, &window) {
                return Err(BookingError::Taken(Box::new(existing.clone())));
            }
        }

        let row = Reservation {
            id: Ulid::new(),
            room_id,
            owner_id: identity.id,
            window,
            purpose: purpose.trim().to_string(),
            room_name: None,
            owner_email: None,
        };
        self.call(self.store.insert_reservations(std::slice::from_ref(&row)))
            .await?;
        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL).increment(1);
        // The booking exists even if the refresh fails; the reload reports
        // its own failure.
        let _ = self.reload_reservations().await;
        Ok(row)
    }

    /// Book a weekly series, all-or-nothing. See [`book_series`] for the
    /// probe semantics.
    pub async fn book_weekly(
        &self,
        identity: &Identity,
        room_id: Ulid,
        start: Stamp,
        end: Stamp,
        purpose: &str,
        repeat: RepeatRule,
    ) -> Result<Vec<Reservation>, BookingError> {
        let base = booking::validate_window(start, end)?;
        {
            let snap = self.snapshot.read().await;
            if !snap.rooms.iter().any(|r| r.id == room_id) {
                return Err(BookingError::RoomMissing(room_id));
            }
        }
        let request = SeriesRequest {
            room_id,
            owner_id: identity.id,
            base,
            purpose: purpose.trim().to_string(),
            repeat,
        };
        let rows = book_series(self.store.as_ref(), &request).await?;
        let _ = self.reload_reservations().await;
        Ok(rows)
    }

    /// Self-service cancellation — owner only. The store delete is scoped to
    /// the owner as well, so a stale snapshot can't delete someone else's row.
    pub async fn cancel(&self, identity: &Identity, id: Ulid) -> Result<(), BookingError> {
        {
            let snap = self.snapshot.read().await;
            let row = snap
                .reservations
                .iter()
                .find(|r| r.id == id)
                .ok_or(BookingError::NotFound(id))?;
            if row.owner_id != identity.id {
                return Err(BookingError::NotOwner(id));
            }
        }
        self.call(self.store.delete_reservation(id, identity.id))
            .await?;
        let _ = self.reload_reservations().await;
        Ok(())
    }

    // ── Administration ───────────────────────────────────────

    /// Insert-or-update a room row. Administrator only.
    pub async fn save_room(&self, identity: &Identity, room: Room) -> Result<Room, BookingError> {
        require_admin(identity)?;
        validate_room(&room)?;
        self.call(self.store.put_room(&room)).await?;
        let _ = self.reload_rooms().await;
        Ok(room)
    }

    pub async fn delete_room(&self, identity: &Identity, id: Ulid) -> Result<(), BookingError> {
        require_admin(identity)?;
        self.call(self.store.delete_room(id)).await?;
        let _ = self.reload_rooms().await;
        Ok(())
    }

    pub async fn allowlist_entries(
        &self,
        identity: &Identity,
    ) -> Result<Vec<AllowlistEntry>, BookingError> {
        require_admin(identity)?;
        Ok(self.call(self.store.fetch_allowlist()).await?)
    }

    pub async fn allowlist_add(
        &self,
        identity: &Identity,
        email: &str,
        note: Option<String>,
    ) -> Result<AllowlistEntry, BookingError> {
        require_admin(identity)?;
        let entry = AllowlistEntry {
            email: validate_email(email)?,
            note,
            created_at: Utc::now(),
        };
        self.call(self.store.insert_allowlist(&entry)).await?;
        Ok(entry)
    }

    pub async fn allowlist_remove(
        &self,
        identity: &Identity,
        email: &str,
    ) -> Result<(), BookingError> {
        require_admin(identity)?;
        let email = validate_email(email)?;
        self.call(self.store.delete_allowlist(&email)).await?;
        Ok(())
    }
}

fn require_admin(identity: &Identity) -> Result<(), BookingError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(BookingError::Forbidden)
    }
}

fn validate_room(room: &Room) -> Result<(), BookingError> {
    if room.name.trim().is_empty() {
        return Err(BookingError::InvalidRoom("name must not be empty"));
    }
    if room.name.len() > MAX_ROOM_NAME_LEN {
        return Err(BookingError::InvalidRoom("name too long"));
    }
    if room.capacity == 0 {
        return Err(BookingError::InvalidRoom("capacity must be positive"));
    }
    Ok(())
}

fn validate_email(raw: &str) -> Result<String, BookingError> {
    let email = normalize_email(raw);
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
        return Err(BookingError::InvalidEmail(raw.to_string()));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, Verdict};
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    const CALL_TIMEOUT: Duration = Duration::from_secs(5);

    fn at(h: u32, m: u32) -> Stamp {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn member() -> Identity {
        Identity {
            id: Ulid::new(),
            email: "alice@example.com".into(),
            role: Role::Member,
        }
    }

    fn admin() -> Identity {
        Identity {
            id: Ulid::new(),
            email: "root@example.com".into(),
            role: Role::Admin,
        }
    }

    fn room(name: &str, capacity: u32) -> Room {
        Room {
            id: Ulid::new(),
            name: name.into(),
            capacity,
            description: None,
            location: None,
        }
    }

    fn session_over(store: Arc<MemoryStore>) -> Session {
        Session::new(store, CALL_TIMEOUT)
    }

    #[tokio::test]
    async fn reload_replaces_wholesale() {
        let store = Arc::new(MemoryStore::new());
        let stale = room("Old", 2);
        store.add_room(stale.clone());
        let session = session_over(store.clone());
        session.reload_rooms().await.unwrap();
        assert_eq!(session.snapshot().await.rooms.len(), 1);

        store.delete_room(stale.id).await.unwrap();
        store.add_room(room("New A", 4));
        store.add_room(room("New B", 6));
        session.reload_rooms().await.unwrap();

        let rooms = session.snapshot().await.rooms;
        assert_eq!(rooms.len(), 2);
        assert!(rooms.iter().all(|r| r.id != stale.id));
    }

    #[tokio::test]
    async fn joined_failure_falls_back_to_plain_read() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.reload_rooms().await.unwrap();
        session
            .reserve(&member(), r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();

        store.set_joined_read_failing(true);
        session.reload_reservations().await.unwrap();

        let rows = session.snapshot().await.reservations;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].room_name, None); // un-joined fallback data
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_the_affected_list() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();
        session
            .reserve(&member(), r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();
        assert_eq!(session.snapshot().await.reservations.len(), 1);

        store.set_stalled(true);
        let err = session.reload_reservations().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(session.snapshot().await.reservations.is_empty());
    }

    #[tokio::test]
    async fn plain_failure_keeps_previous_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();
        session
            .reserve(&member(), r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();

        store.set_reads_failing(true);
        assert!(session.reload_reservations().await.is_err());
        // stale but consistent
        assert_eq!(session.snapshot().await.reservations.len(), 1);
    }

    #[tokio::test]
    async fn availability_reflects_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();
        session
            .reserve(&member(), r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();

        let result = session
            .availability(at(10, 30), at(11, 30), None)
            .await
            .unwrap();
        assert!(matches!(result[0].verdict, Verdict::Unavailable(_)));

        let result = session
            .availability(at(11, 0), at(12, 0), None)
            .await
            .unwrap();
        assert!(result[0].verdict.is_available());
    }

    #[tokio::test]
    async fn inverted_window_rejected_before_any_query() {
        let store = Arc::new(MemoryStore::new());
        let session = session_over(store);
        let err = session
            .availability(at(11, 0), at(10, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidWindow { .. }));
    }

    #[tokio::test]
    async fn reserve_rejects_conflicts_and_unknown_rooms() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();

        let alice = member();
        session
            .reserve(&alice, r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();

        let err = session
            .reserve(&member(), r.id, at(10, 30), at(11, 30), "overlap")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Taken(_)));

        let err = session
            .reserve(&member(), Ulid::new(), at(12, 0), at(13, 0), "ghost room")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::RoomMissing(_)));
    }

    #[tokio::test]
    async fn cancel_is_owner_only() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();

        let alice = member();
        let row = session
            .reserve(&alice, r.id, at(10, 0), at(11, 0), "standup")
            .await
            .unwrap();

        let mallory = member();
        let err = session.cancel(&mallory, row.id).await.unwrap_err();
        assert!(matches!(err, BookingError::NotOwner(_)));
        assert_eq!(store.reservation_count(), 1);

        session.cancel(&alice, row.id).await.unwrap();
        assert_eq!(store.reservation_count(), 0);
    }

    #[tokio::test]
    async fn admin_gate_on_room_and_allowlist_mutation() {
        let store = Arc::new(MemoryStore::new());
        let session = session_over(store.clone());

        let err = session.save_room(&member(), room("A", 4)).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden));

        session.save_room(&admin(), room("A", 4)).await.unwrap();
        assert_eq!(session.snapshot().await.rooms.len(), 1);

        let err = session
            .allowlist_add(&member(), "bob@example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden));

        session
            .allowlist_add(&admin(), " Bob@Example.com ", None)
            .await
            .unwrap();
        let entries = session.allowlist_entries(&admin()).await.unwrap();
        assert_eq!(entries[0].email, "bob@example.com");
    }

    #[tokio::test]
    async fn room_payload_validation() {
        let store = Arc::new(MemoryStore::new());
        let session = session_over(store);
        let root = admin();

        let err = session.save_room(&root, room("  ", 4)).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidRoom(_)));
        let err = session.save_room(&root, room("A", 0)).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidRoom(_)));
    }

    #[tokio::test]
    async fn login_path_classification() {
        let store = Arc::new(MemoryStore::new());
        let session = session_over(store.clone());
        session
            .allowlist_add(&admin(), "carol@example.com", Some("facilities".into()))
            .await
            .unwrap();

        let path = session.login_path(" Carol@Example.COM ").await.unwrap();
        assert_eq!(path, LoginPath::Preapproved);

        let path = session.login_path("dave@example.com").await.unwrap();
        assert_eq!(path, LoginPath::EmailLink);

        let err = session.login_path("not-an-email").await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidEmail(_)));
    }

    #[tokio::test]
    async fn weekly_series_through_the_session() {
        let store = Arc::new(MemoryStore::new());
        let r = room("Fishbowl", 6);
        store.add_room(r.clone());
        let session = session_over(store.clone());
        session.refresh().await.unwrap();

        let rows = session
            .book_weekly(
                &member(),
                r.id,
                at(9, 0),
                at(10, 0),
                "retro",
                RepeatRule::Count(3),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        // committed and visible after the automatic reload
        assert_eq!(session.snapshot().await.reservations.len(), 3);
        assert_eq!(
            rows[2].window.start - rows[0].window.start,
            ChronoDuration::weeks(2)
        );
    }
}
