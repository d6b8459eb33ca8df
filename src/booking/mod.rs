mod availability;
mod error;
mod recurrence;
mod timeline;

pub use availability::{check_rooms, first_conflict};
pub use error::BookingError;
pub use recurrence::{book_series, expand, OccurrenceConflict, RepeatRule, SeriesRequest};
pub use timeline::{Block, DayGrid};

use chrono::{Datelike, Duration};

use crate::limits::*;
use crate::model::{Stamp, Window};

/// Submission-time window check: strict ordering, sane years, bounded width.
pub fn validate_window(start: Stamp, end: Stamp) -> Result<Window, BookingError> {
    if end <= start {
        return Err(BookingError::InvalidWindow { start, end });
    }
    if start.year() < MIN_VALID_YEAR || end.year() > MAX_VALID_YEAR {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    if end - start > Duration::days(MAX_WINDOW_DAYS) {
        return Err(BookingError::LimitExceeded("window too wide"));
    }
    Ok(Window::new(start, end))
}

pub fn validate_purpose(purpose: &str) -> Result<(), BookingError> {
    if purpose.trim().is_empty() {
        return Err(BookingError::EmptyPurpose);
    }
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(BookingError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> Stamp {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn window_must_be_ordered() {
        assert!(matches!(
            validate_window(at(11, 0), at(10, 0)),
            Err(BookingError::InvalidWindow { .. })
        ));
        // zero duration is rejected too
        assert!(matches!(
            validate_window(at(10, 0), at(10, 0)),
            Err(BookingError::InvalidWindow { .. })
        ));
        assert!(validate_window(at(10, 0), at(11, 0)).is_ok());
    }

    #[test]
    fn window_year_sanity() {
        let far = Utc.with_ymd_and_hms(2150, 1, 1, 10, 0, 0).unwrap();
        let result = validate_window(far, far + Duration::hours(1));
        assert!(matches!(result, Err(BookingError::LimitExceeded(_))));
    }

    #[test]
    fn window_width_capped() {
        let result = validate_window(at(10, 0), at(10, 0) + Duration::days(MAX_WINDOW_DAYS + 1));
        assert!(matches!(result, Err(BookingError::LimitExceeded(_))));
    }

    #[test]
    fn purpose_must_not_be_blank() {
        assert!(matches!(
            validate_purpose("   "),
            Err(BookingError::EmptyPurpose)
        ));
        assert!(validate_purpose("weekly sync").is_ok());
        let long = "x".repeat(MAX_PURPOSE_LEN + 1);
        assert!(matches!(
            validate_purpose(&long),
            Err(BookingError::LimitExceeded(_))
        ));
    }
}
