use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_SERIES_OCCURRENCES;
use crate::model::{Reservation, Stamp, Window};
use crate::store::ExternalStore;

use super::{validate_purpose, BookingError};

/// When a weekly series stops: after a fixed number of occurrences, or once
/// the shifted start passes a stop instant (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatRule {
    Count(u32),
    Until(Stamp),
}

#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub room_id: Ulid,
    pub owner_id: Ulid,
    pub base: Window,
    pub purpose: String,
    pub repeat: RepeatRule,
}

/// One rejected occurrence of a series, numbered as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct OccurrenceConflict {
    pub occurrence: usize,
    #[serde(flatten)]
    pub window: Window,
    pub existing: Reservation,
}

/// Candidate occurrence windows for a base window under a repeat rule.
/// Occurrence k is the base shifted by 7k days.
pub fn expand(base: &Window, repeat: &RepeatRule) -> Result<Vec<Window>, BookingError> {
    match repeat {
        RepeatRule::Count(0) => Err(BookingError::LimitExceeded(
            "series needs at least one occurrence",
        )),
        RepeatRule::Count(n) => {
            if *n as usize > MAX_SERIES_OCCURRENCES {
                return Err(BookingError::LimitExceeded("series too long"));
            }
            Ok((0..i64::from(*n)).map(|k| base.shift_weeks(k)).collect())
        }
        RepeatRule::Until(stop) => {
            if *stop < base.start {
                return Err(BookingError::StopBeforeStart(*stop));
            }
            let mut windows = Vec::new();
            for k in 0.. {
                let w = base.shift_weeks(k);
                if w.start > *stop {
                    break;
                }
                if windows.len() >= MAX_SERIES_OCCURRENCES {
                    return Err(BookingError::LimitExceeded("series too long"));
                }
                windows.push(w);
            }
            Ok(windows)
        }
    }
}

fn occurrence_purpose(purpose: &str, k: usize) -> String {
    format!("{purpose} (Week {k})")
}

/// Probe every occurrence against the store, then commit all or nothing.
///
/// Probes run against committed backend data rather than the cached snapshot
/// so a stale client can't silently double-book itself. The probe→insert gap
/// is still unguarded across concurrent sessions: a booking landing between
/// the two steps can produce an undetected double-booking. Accepted behavior,
/// not a guarantee.
///
/// Any store failure while probing aborts before the write (fail-closed).
pub async fn book_series(
    store: &dyn ExternalStore,
    request: &SeriesRequest,
) -> Result<Vec<Reservation>, BookingError> {
    validate_purpose(&request.purpose)?;
    let windows = expand(&request.base, &request.repeat)?;

    let mut conflicts = Vec::new();
    for (i, window) in windows.iter().enumerate() {
        let hits = store.conflicts_for(request.room_id, window).await?;
        if let Some(existing) = hits.into_iter().next() {
            conflicts.push(OccurrenceConflict {
                occurrence: i + 1,
                window: *window,
                existing,
            });
        }
    }
    if !conflicts.is_empty() {
        metrics::counter!(crate::observability::SERIES_REJECTED_TOTAL).increment(1);
        return Err(BookingError::SeriesConflicts(conflicts));
    }

    let rows: Vec<Reservation> = windows
        .iter()
        .enumerate()
        .map(|(i, window)| Reservation {
            id: Ulid::new(),
            room_id: request.room_id,
            owner_id: request.owner_id,
            window: *window,
            purpose: occurrence_purpose(&request.purpose, i + 1),
            room_name: None,
            owner_email: None,
        })
        .collect();
    store.insert_reservations(&rows).await?;
    metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL)
        .increment(rows.len() as u64);
    Ok(rows)
}
