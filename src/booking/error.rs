use ulid::Ulid;

use crate::model::{Reservation, Stamp};
use crate::store::StoreError;

use super::recurrence::OccurrenceConflict;

#[derive(Debug)]
pub enum BookingError {
    /// `end <= start` — rejected before any store call.
    InvalidWindow { start: Stamp, end: Stamp },
    /// `Until` bound earlier than the first occurrence start.
    StopBeforeStart(Stamp),
    EmptyPurpose,
    /// Room payload failed validation (blank name, zero capacity, ...).
    InvalidRoom(&'static str),
    InvalidEmail(String),
    LimitExceeded(&'static str),
    RoomMissing(Ulid),
    NotFound(Ulid),
    /// The acting identity does not own the reservation.
    NotOwner(Ulid),
    /// The acting identity lacks the administrator role.
    Forbidden,
    /// Single booking: the window is already claimed on this room.
    Taken(Box<Reservation>),
    /// Recurring series: every conflicting occurrence, 1-indexed. No rows
    /// were written.
    SeriesConflicts(Vec<OccurrenceConflict>),
    Store(StoreError),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidWindow { start, end } => {
                write!(f, "window end must be after start: [{start}, {end})")
            }
            BookingError::StopBeforeStart(stop) => {
                write!(f, "series stop date {stop} is before the first occurrence")
            }
            BookingError::EmptyPurpose => write!(f, "purpose must not be empty"),
            BookingError::InvalidRoom(msg) => write!(f, "invalid room: {msg}"),
            BookingError::InvalidEmail(email) => write!(f, "not a usable email: {email:?}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::RoomMissing(id) => write!(f, "no such room: {id}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::NotOwner(id) => {
                write!(f, "reservation {id} belongs to another identity")
            }
            BookingError::Forbidden => write!(f, "administrator role required"),
            BookingError::Taken(existing) => write!(
                f,
                "room already reserved for [{}, {}): {}",
                existing.window.start, existing.window.end, existing.purpose
            ),
            BookingError::SeriesConflicts(conflicts) => {
                let indices: Vec<String> = conflicts
                    .iter()
                    .map(|c| c.occurrence.to_string())
                    .collect();
                write!(
                    f,
                    "series rejected, occurrence(s) {} conflict with existing reservations",
                    indices.join(", ")
                )
            }
            BookingError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}
