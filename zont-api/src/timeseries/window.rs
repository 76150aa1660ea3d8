use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ZontError, ZontResult};

/// Half-open query range `[from, to)` with `from < to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted ranges.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> ZontResult<Self> {
        if from >= to {
            return Err(ZontError::validation(format!(
                "window start {from} must be before its end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn span(&self) -> chrono::Duration {
        self.to - self.from
    }

    /// Whether a UNIX timestamp falls inside the window.
    pub fn contains_timestamp(&self, timestamp: i64) -> bool {
        timestamp >= self.from.timestamp() && timestamp < self.to.timestamp()
    }

    /// Split in two at the whole-second midpoint; `None` once the span is a single second.
    pub fn bisect(&self) -> Option<(TimeWindow, TimeWindow)> {
        let seconds = self.span().num_seconds();
        if seconds < 2 {
            return None;
        }
        let middle = self.from + chrono::Duration::seconds(seconds / 2);
        Some((
            TimeWindow {
                from: self.from,
                to: middle,
            },
            TimeWindow {
                from: middle,
                to: self.to,
            },
        ))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.from.format("%Y-%m-%d %H:%M:%S"),
            self.to.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Calendar boundaries (UTC) that windows must not cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    None,
    Hour,
    Day,
    Month,
}

impl Alignment {
    /// First boundary strictly after `at`, if this alignment has any.
    pub fn next_boundary(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = at.date_naive();
        match self {
            Alignment::None => None,
            Alignment::Hour => date
                .and_hms_opt(at.hour(), 0, 0)
                .map(|start| Utc.from_utc_datetime(&start) + chrono::Duration::hours(1)),
            Alignment::Day => date
                .and_hms_opt(0, 0, 0)
                .map(|start| Utc.from_utc_datetime(&start) + chrono::Duration::days(1)),
            Alignment::Month => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|first| first.and_hms_opt(0, 0, 0))
                    .map(|start| Utc.from_utc_datetime(&start))
            }
        }
    }
}

/// Lazily splits `[from, to)` into consecutive API-legal windows, in ascending order.
///
/// Instants are truncated to whole seconds, the resolution of the vendor API.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    max_span: chrono::Duration,
    alignment: Alignment,
}

impl WindowPlan {
    /// Plan windows of at most `max_window` covering `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `from > to` or `max_window` is shorter than one second.
    pub fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_window: Duration,
        alignment: Alignment,
    ) -> ZontResult<Self> {
        if from > to {
            return Err(ZontError::validation(format!(
                "range start {from} is after its end {to}"
            )));
        }
        if max_window < Duration::from_secs(1) {
            return Err(ZontError::validation(
                "maximum window must be at least one second",
            ));
        }
        let max_span = chrono::Duration::from_std(max_window)
            .map_err(|e| ZontError::validation(format!("maximum window out of range: {e}")))?;

        Ok(Self {
            cursor: from.trunc_subsecs(0),
            end: to.trunc_subsecs(0),
            max_span,
            alignment,
        })
    }

    /// Start of the next window to be produced.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// Exclusive end of the planned range.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }
}

impl Iterator for WindowPlan {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return None;
        }

        let mut to = (self.cursor + self.max_span).min(self.end);
        if let Some(boundary) = self.alignment.next_boundary(self.cursor) {
            to = to.min(boundary);
        }

        let window = TimeWindow {
            from: self.cursor,
            to,
        };
        self.cursor = to;
        Some(window)
    }
}
