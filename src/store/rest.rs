use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{normalize_email, AllowlistEntry, Identity, Reservation, Room, Stamp, Window};

use super::{ExternalStore, StoreError};

/// Client for the hosted backend's row API (PostgREST dialect: filter query
/// params, embedded joins via `select`, upsert via `Prefer`).
///
/// Every request carries the service key and the configured deadline; a
/// deadline miss surfaces as [`StoreError::Timeout`], but the request itself
/// is not cancelled server-side.
pub struct RestStore {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| StoreError::Transport(format!("invalid api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| StoreError::Transport(format!("invalid api key: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base, table)
    }

    fn classify(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            metrics::counter!(crate::observability::STORE_TIMEOUTS_TOTAL).increment(1);
            StoreError::Timeout(self.timeout)
        } else if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }

    async fn reject_on_error_status(
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let mut message = resp.text().await.unwrap_or_default();
        message.truncate(200);
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        op: &'static str,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let result = async {
            let resp = self
                .http
                .get(self.url(table))
                .query(query)
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            let resp = Self::reject_on_error_status(resp).await?;
            resp.json::<Vec<T>>().await.map_err(|e| self.classify(e))
        }
        .await;
        record(op, &result);
        result
    }

    async fn post_rows<T: Serialize>(
        &self,
        op: &'static str,
        table: &str,
        prefer: &'static str,
        rows: &T,
    ) -> Result<(), StoreError> {
        let result = async {
            let resp = self
                .http
                .post(self.url(table))
                .header("Prefer", prefer)
                .json(rows)
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            Self::reject_on_error_status(resp).await.map(|_| ())
        }
        .await;
        record(op, &result);
        result
    }

    async fn delete_rows(
        &self,
        op: &'static str,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<(), StoreError> {
        let result = async {
            let resp = self
                .http
                .delete(self.url(table))
                .query(query)
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            Self::reject_on_error_status(resp).await.map(|_| ())
        }
        .await;
        record(op, &result);
        result
    }
}

fn record<T>(op: &'static str, result: &Result<T, StoreError>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(
        crate::observability::STORE_CALLS_TOTAL,
        "op" => op,
        "status" => status
    )
    .increment(1);
}

// ── Row shapes ──────────────────────────────────────────────────
// The backend stores reservation instants as `start_at`/`end_at` columns;
// domain `Reservation` flattens its window as `start`/`end`.

#[derive(Debug, Serialize, Deserialize)]
struct ReservationRow {
    id: Ulid,
    room_id: Ulid,
    owner_id: Ulid,
    start_at: Stamp,
    end_at: Stamp,
    purpose: String,
}

impl ReservationRow {
    fn from_domain(r: &Reservation) -> Self {
        Self {
            id: r.id,
            room_id: r.room_id,
            owner_id: r.owner_id,
            start_at: r.window.start,
            end_at: r.window.end,
            purpose: r.purpose.clone(),
        }
    }

    fn into_domain(self) -> Reservation {
        Reservation {
            id: self.id,
            room_id: self.room_id,
            owner_id: self.owner_id,
            window: Window::new(self.start_at, self.end_at),
            purpose: self.purpose,
            room_name: None,
            owner_email: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JoinedReservationRow {
    #[serde(flatten)]
    row: ReservationRow,
    rooms: Option<RoomJoin>,
    identities: Option<OwnerJoin>,
}

#[derive(Debug, Deserialize)]
struct RoomJoin {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OwnerJoin {
    email: String,
}

impl JoinedReservationRow {
    fn into_domain(self) -> Reservation {
        let mut r = self.row.into_domain();
        r.room_name = self.rooms.map(|j| j.name);
        r.owner_email = self.identities.map(|j| j.email);
        r
    }
}

#[async_trait]
impl ExternalStore for RestStore {
    async fn fetch_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.get_rows(
            "fetch_rooms",
            "rooms",
            &[("select", "*".into()), ("order", "name.asc".into())],
        )
        .await
    }

    async fn fetch_reservations_joined(&self) -> Result<Vec<Reservation>, StoreError> {
        let rows: Vec<JoinedReservationRow> = self
            .get_rows(
                "fetch_reservations_joined",
                "reservations",
                &[
                    ("select", "*,rooms(name),identities(email)".into()),
                    ("order", "start_at.asc".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(JoinedReservationRow::into_domain).collect())
    }

    async fn fetch_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let rows: Vec<ReservationRow> = self
            .get_rows(
                "fetch_reservations",
                "reservations",
                &[("select", "*".into()), ("order", "start_at.asc".into())],
            )
            .await?;
        Ok(rows.into_iter().map(ReservationRow::into_domain).collect())
    }

    async fn conflicts_for(
        &self,
        room_id: Ulid,
        window: &Window,
    ) -> Result<Vec<Reservation>, StoreError> {
        // Half-open overlap pushed down: start_at < end AND end_at > start.
        let rows: Vec<ReservationRow> = self
            .get_rows(
                "conflicts_for",
                "reservations",
                &[
                    ("select", "*".into()),
                    ("room_id", format!("eq.{room_id}")),
                    ("start_at", format!("lt.{}", window.end.to_rfc3339())),
                    ("end_at", format!("gt.{}", window.start.to_rfc3339())),
                    ("order", "start_at.asc".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(ReservationRow::into_domain).collect())
    }

    async fn insert_reservations(&self, rows: &[Reservation]) -> Result<(), StoreError> {
        let payload: Vec<ReservationRow> = rows.iter().map(ReservationRow::from_domain).collect();
        self.post_rows(
            "insert_reservations",
            "reservations",
            "return=minimal",
            &payload,
        )
        .await
    }

    async fn delete_reservation(&self, id: Ulid, owner_id: Ulid) -> Result<(), StoreError> {
        self.delete_rows(
            "delete_reservation",
            "reservations",
            &[
                ("id", format!("eq.{id}")),
                ("owner_id", format!("eq.{owner_id}")),
            ],
        )
        .await
    }

    async fn put_room(&self, room: &Room) -> Result<(), StoreError> {
        self.post_rows(
            "put_room",
            "rooms",
            "resolution=merge-duplicates,return=minimal",
            &[room],
        )
        .await
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), StoreError> {
        self.delete_rows("delete_room", "rooms", &[("id", format!("eq.{id}"))])
            .await
    }

    async fn fetch_allowlist(&self) -> Result<Vec<AllowlistEntry>, StoreError> {
        self.get_rows(
            "fetch_allowlist",
            "allowlist",
            &[("select", "*".into()), ("order", "email.asc".into())],
        )
        .await
    }

    async fn insert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), StoreError> {
        self.post_rows("insert_allowlist", "allowlist", "return=minimal", &[entry])
            .await
    }

    async fn delete_allowlist(&self, email: &str) -> Result<(), StoreError> {
        self.delete_rows(
            "delete_allowlist",
            "allowlist",
            &[("email", format!("eq.{}", normalize_email(email)))],
        )
        .await
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let rows: Vec<Identity> = self
            .get_rows(
                "identity_by_email",
                "identities",
                &[
                    ("select", "*".into()),
                    ("email", format!("eq.{}", normalize_email(email))),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
