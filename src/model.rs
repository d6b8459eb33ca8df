use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// UTC instant — the only time type.
pub type Stamp = DateTime<Utc>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Stamp,
    pub end: Stamp,
}

impl Window {
    pub fn new(start: Stamp, end: Stamp) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The same window shifted forward by whole weeks.
    pub fn shift_weeks(&self, weeks: i64) -> Window {
        Window {
            start: self.start + Duration::weeks(weeks),
            end: self.end + Duration::weeks(weeks),
        }
    }
}

/// A bookable room. Created, edited and deleted by administrators only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A claimed time interval on one room by one identity.
///
/// There is no update operation — changing a reservation means cancel and
/// recreate. `room_name` and `owner_email` are display data carried only by
/// the joined bulk read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub owner_id: Ulid,
    #[serde(flatten)]
    pub window: Window,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

/// One email granted the streamlined login path. Keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: Stamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// An authenticated identity as the external provider reports it.
/// The role attribute is read-only from this system's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Allow-list emails are compared and stored trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Which login entry path an email gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginPath {
    /// Allow-listed: streamlined credential sign-in.
    Preapproved,
    /// Not listed: one-time emailed verification link.
    EmailLink,
}

// ── Availability query results ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "conflict")]
pub enum Verdict {
    Available,
    /// The first overlapping reservation found, in snapshot order.
    Unavailable(Reservation),
}

impl Verdict {
    pub fn is_available(&self) -> bool {
        matches!(self, Verdict::Available)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomAvailability {
    pub room: Room,
    #[serde(flatten)]
    pub verdict: Verdict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> Stamp {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn window_basics() {
        let w = Window::new(at(9, 0), at(10, 30));
        assert_eq!(w.duration(), Duration::minutes(90));
    }

    #[test]
    fn window_overlap() {
        let a = Window::new(at(10, 0), at(11, 0));
        let b = Window::new(at(10, 30), at(11, 30));
        let c = Window::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn window_overlap_is_symmetric() {
        let a = Window::new(at(9, 0), at(12, 0));
        let b = Window::new(at(10, 0), at(10, 15)); // fully inside
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn shift_weeks_preserves_duration() {
        let base = Window::new(at(14, 0), at(15, 30));
        let third = base.shift_weeks(3);
        assert_eq!(third.duration(), base.duration());
        assert_eq!(third.start - base.start, Duration::days(21));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("bob@host.org"), "bob@host.org");
    }

    #[test]
    fn reservation_serde_flattens_window() {
        let r = Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            owner_id: Ulid::new(),
            window: Window::new(at(10, 0), at(11, 0)),
            purpose: "standup".into(),
            room_name: None,
            owner_email: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("start").is_some());
        assert!(v.get("end").is_some());
        assert!(v.get("window").is_none());
        assert!(v.get("room_name").is_none()); // skipped when absent

        let back: Reservation = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
