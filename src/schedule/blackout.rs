//! Time-of-day blackout windows
//!
//! A window suppresses run admission while the wall clock (UTC) sits inside
//! it. Suppression never advances a target's next-due time: once the window
//! ends, an overdue target is admitted on the next tick.

use chrono::NaiveTime;

/// One blackout window, half-open `[start, end)`, UTC
///
/// A window whose end precedes its start wraps past midnight, e.g.
/// 22:00-06:00.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackoutWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl BlackoutWindow {
    /// Parses a window from two "HH:MM" endpoints
    ///
    /// Equal endpoints are rejected: the window would mean either nothing
    /// or the whole day, and neither reading is safe to guess.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let start = parse_hhmm(start)?;
        let end = parse_hhmm(end)?;

        if start == end {
            return Err(format!(
                "window endpoints are equal ({}); a window must span part of the day",
                start.format("%H:%M")
            ));
        }

        Ok(Self { start, end })
    }

    /// Whether the given time of day falls inside the window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            // Wraps past midnight
            time >= self.start || time < self.end
        }
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| format!("'{}' is not a valid HH:MM time", s))
}
