//! Hard caps enforced at the validation edge, before any store call.

/// Longest recurring series the expander will generate (the booking form's
/// largest preset).
pub const MAX_SERIES_OCCURRENCES: usize = 16;

/// Widest single query/booking window, in days.
pub const MAX_WINDOW_DAYS: i64 = 90;

pub const MAX_PURPOSE_LEN: usize = 200;
pub const MAX_ROOM_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;

/// Sanity range for submitted instants.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;
