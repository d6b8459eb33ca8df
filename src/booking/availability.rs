use ulid::Ulid;

use crate::model::{Reservation, Room, RoomAvailability, Verdict, Window};

/// First reservation in snapshot order claiming `room_id` and overlapping
/// `window`. Snapshot order is whatever the bulk load produced — no attempt
/// is made to find the earliest or "most relevant" conflict.
pub fn first_conflict<'a>(
    room_id: Ulid,
    reservations: &'a [Reservation],
    window: &Window,
) -> Option<&'a Reservation> {
    reservations
        .iter()
        .find(|r| r.room_id == room_id && r.window.overlaps(window))
}

/// Per-room availability verdict for a desired window against the cached
/// reservation snapshot. Rooms below `min_capacity` are excluded entirely.
///
/// Callers must reject inverted or zero-duration windows first; this is a
/// precondition, not a possible verdict.
pub fn check_rooms(
    rooms: &[Room],
    reservations: &[Reservation],
    window: &Window,
    min_capacity: Option<u32>,
) -> Vec<RoomAvailability> {
    rooms
        .iter()
        .filter(|room| min_capacity.is_none_or(|min| room.capacity >= min))
        .map(|room| {
            let verdict = match first_conflict(room.id, reservations, window) {
                Some(existing) => Verdict::Unavailable(existing.clone()),
                None => Verdict::Available,
            };
            RoomAvailability {
                room: room.clone(),
                verdict,
            }
        })
        .collect()
}
