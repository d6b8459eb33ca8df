use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::booking::{BookingError, DayGrid, RepeatRule};
use crate::model::{Identity, Reservation, Room, RoomAvailability, Stamp};
use crate::session::Session;
use crate::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub grid: DayGrid,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/availability", post(availability))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{id}", axum::routing::put(update_room).delete(remove_room))
        .route("/rooms/{id}/timeline", get(room_timeline))
        .route(
            "/reservations",
            get(list_reservations).post(create_reservation),
        )
        .route("/reservations/series", post(create_series))
        .route("/reservations/{id}", delete(cancel_reservation))
        .route("/allowlist", get(list_allowlist).post(add_allowlist))
        .route("/allowlist/{email}", delete(remove_allowlist))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Error mapping ───────────────────────────────────────────────

pub enum ApiError {
    Booking(BookingError),
    Store(StoreError),
    /// Missing or unknown `x-user-email` header.
    Unidentified,
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError::Booking(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, body) = match self {
            ApiError::Booking(e) => match &e {
                BookingError::InvalidWindow { .. }
                | BookingError::StopBeforeStart(_)
                | BookingError::EmptyPurpose
                | BookingError::InvalidRoom(_)
                | BookingError::InvalidEmail(_)
                | BookingError::LimitExceeded(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION", json!(e.to_string()))
                }
                BookingError::RoomMissing(_) | BookingError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", json!(e.to_string()))
                }
                BookingError::NotOwner(_) | BookingError::Forbidden => {
                    (StatusCode::FORBIDDEN, "FORBIDDEN", json!(e.to_string()))
                }
                BookingError::Taken(existing) => (
                    StatusCode::CONFLICT,
                    "CONFLICT",
                    json!({ "message": e.to_string(), "conflict": existing }),
                ),
                BookingError::SeriesConflicts(conflicts) => (
                    StatusCode::CONFLICT,
                    "SERIES_CONFLICT",
                    json!({ "message": e.to_string(), "conflicts": conflicts }),
                ),
                BookingError::Store(inner) => store_response(inner),
            },
            ApiError::Store(e) => store_response(&e),
            ApiError::Unidentified => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                json!("unknown or missing identity"),
            ),
        };
        (status, Json(json!({ "code": code, "error": body }))).into_response()
    }
}

fn store_response(e: &StoreError) -> (StatusCode, &'static str, serde_json::Value) {
    if e.is_timeout() {
        (
            StatusCode::GATEWAY_TIMEOUT,
            "UPSTREAM_TIMEOUT",
            json!(e.to_string()),
        )
    } else {
        (StatusCode::BAD_GATEWAY, "UPSTREAM", json!(e.to_string()))
    }
}

/// Resolve the acting identity from the `x-user-email` header. Session
/// authentication itself lives with the external provider; this header is
/// the seam it hands us.
async fn identify(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let email = headers
        .get("x-user-email")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unidentified)?;
    state
        .session
        .identify(email)
        .await?
        .ok_or(ApiError::Unidentified)
}

// ── Request/response shapes ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityRequest {
    start: Stamp,
    end: Stamp,
    min_capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReservationRequest {
    room_id: Ulid,
    start: Stamp,
    end: Stamp,
    purpose: String,
}

#[derive(Debug, Deserialize)]
struct SeriesRequestBody {
    room_id: Ulid,
    start: Stamp,
    end: Stamp,
    purpose: String,
    repeat: RepeatRule,
}

#[derive(Debug, Deserialize)]
struct RoomPayload {
    name: String,
    capacity: u32,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

impl RoomPayload {
    fn into_room(self, id: Ulid) -> Room {
        Room {
            id,
            name: self.name,
            capacity: self.capacity,
            description: self.description,
            location: self.location,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AllowlistRequest {
    email: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimelineQuery {
    date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct TimelineBlock {
    reservation: Reservation,
    top: f64,
    height: f64,
}

// ── Handlers ────────────────────────────────────────────────────

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = state.session.login_path(&req.email).await?;
    Ok(Json(json!({ "path": path })))
}

async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.session.refresh().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.session.snapshot().await.rooms)
}

async fn list_reservations(State(state): State<AppState>) -> Json<Vec<Reservation>> {
    Json(state.session.snapshot().await.reservations)
}

async fn availability(
    State(state): State<AppState>,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<Vec<RoomAvailability>>, ApiError> {
    let verdicts = state
        .session
        .availability(req.start, req.end, req.min_capacity)
        .await?;
    Ok(Json(verdicts))
}

async fn room_timeline(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Query(query): Query<TimelineQuery>,
) -> Json<Vec<TimelineBlock>> {
    let snapshot = state.session.snapshot().await;
    let blocks = snapshot
        .reservations
        .into_iter()
        .filter(|r| r.room_id == id)
        .filter_map(|r| {
            state
                .grid
                .place(query.date, &r.window)
                .map(|block| TimelineBlock {
                    reservation: r,
                    top: block.top,
                    height: block.height,
                })
        })
        .collect();
    Json(blocks)
}

async fn create_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let identity = identify(&state, &headers).await?;
    let row = state
        .session
        .reserve(&identity, req.room_id, req.start, req.end, &req.purpose)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn create_series(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SeriesRequestBody>,
) -> Result<(StatusCode, Json<Vec<Reservation>>), ApiError> {
    let identity = identify(&state, &headers).await?;
    let rows = state
        .session
        .book_weekly(
            &identity, req.room_id, req.start, req.end, &req.purpose, req.repeat,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rows)))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    let identity = identify(&state, &headers).await?;
    state.session.cancel(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RoomPayload>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let identity = identify(&state, &headers).await?;
    let room = state
        .session
        .save_room(&identity, req.into_room(Ulid::new()))
        .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn update_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Json(req): Json<RoomPayload>,
) -> Result<Json<Room>, ApiError> {
    let identity = identify(&state, &headers).await?;
    let room = state.session.save_room(&identity, req.into_room(id)).await?;
    Ok(Json(room))
}

async fn remove_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    let identity = identify(&state, &headers).await?;
    state.session.delete_room(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_allowlist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::model::AllowlistEntry>>, ApiError> {
    let identity = identify(&state, &headers).await?;
    let entries = state.session.allowlist_entries(&identity).await?;
    Ok(Json(entries))
}

async fn add_allowlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AllowlistRequest>,
) -> Result<(StatusCode, Json<crate::model::AllowlistEntry>), ApiError> {
    let identity = identify(&state, &headers).await?;
    let entry = state
        .session
        .allowlist_add(&identity, &req.email, req.note)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_allowlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(email): Path<String>,
) -> Result<StatusCode, ApiError> {
    let identity = identify(&state, &headers).await?;
    state.session.allowlist_remove(&identity, &email).await?;
    Ok(StatusCode::NO_CONTENT)
}
