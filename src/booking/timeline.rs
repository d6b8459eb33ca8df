use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{Stamp, Window};

/// Fixed-hour day strip with a linear pixels-per-hour scale.
#[derive(Debug, Clone, Copy)]
pub struct DayGrid {
    pub start_hour: u32,
    pub end_hour: u32,
    pub px_per_hour: f64,
}

impl Default for DayGrid {
    fn default() -> Self {
        Self {
            start_hour: 6,
            end_hour: 22,
            px_per_hour: 60.0,
        }
    }
}

/// Vertical placement of one reservation block on the strip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Block {
    pub top: f64,
    pub height: f64,
}

impl DayGrid {
    /// Place a reservation window on `day`'s strip, clipped to the display
    /// range. Windows entirely outside the range yield `None` and are omitted
    /// by the caller. Overlapping blocks in the same room keep identical
    /// horizontal extent and rely on layering order — no side-by-side packing.
    pub fn place(&self, day: NaiveDate, window: &Window) -> Option<Block> {
        let midnight = day.and_hms_opt(0, 0, 0)?.and_utc();
        let hours_of_day = |t: Stamp| (t - midnight).num_seconds() as f64 / 3600.0;

        let lo = f64::from(self.start_hour);
        let hi = f64::from(self.end_hour);
        let start = hours_of_day(window.start).clamp(lo, hi);
        let end = hours_of_day(window.end).clamp(lo, hi);
        if end <= start {
            return None;
        }
        Some(Block {
            top: (start - lo) * self.px_per_hour,
            height: (end - start) * self.px_per_hour,
        })
    }
}
