//! Date windows, chunking and time-aggregation periods.
//!
//! All windows are inclusive at one-second resolution: a chunk ending at
//! `2020-01-31 23:59:59` is followed by one starting at `2020-02-01 00:00:00`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses `YYYY-MM-DD HH:MM:SS` (optionally with a `T` separator) or a bare
/// `YYYY-MM-DD`, which maps to the start of that day.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Like [`parse_datetime`] but a bare date maps to the last second of that day.
pub fn parse_end_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return date.and_hms_opt(23, 59, 59);
    }
    parse_datetime(value)
}

pub fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// Inclusive `[start, end]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.start <= *ts && *ts <= self.end
    }

    /// Splits the range into ascending, contiguous chunks of at most
    /// `days` days. `None` or zero yields the whole range as one chunk.
    pub fn chunks(&self, days: Option<u32>) -> Vec<DateRange> {
        let days = match days {
            Some(d) if d > 0 => d,
            _ => return vec![*self],
        };

        // A step too large to represent covers every range.
        let Some(step) = Duration::try_days(i64::from(days)) else {
            return vec![*self];
        };
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        loop {
            // A step past the calendar's end clamps to the range end.
            let end = cursor
                .checked_add_signed(step)
                .and_then(|t| t.checked_sub_signed(Duration::seconds(1)))
                .map_or(self.end, |t| t.min(self.end));
            chunks.push(DateRange { start: cursor, end });
            if end >= self.end {
                break;
            }
            cursor = end + Duration::seconds(1);
        }
        chunks
    }

    /// Window remaining after a watermark: starts one second past it.
    /// `None` when the watermark already covers the whole range.
    pub fn after_watermark(&self, watermark: &NaiveDateTime) -> Option<DateRange> {
        if *watermark >= self.end {
            return None;
        }
        if *watermark < self.start {
            return Some(*self);
        }
        Some(DateRange {
            start: *watermark + Duration::seconds(1),
            end: self.end,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            format_datetime(&self.start),
            format_datetime(&self.end)
        )
    }
}

/// Time-aggregation unit used by aggregate actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Day,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 4] = [
        TimeUnit::Day,
        TimeUnit::Month,
        TimeUnit::Quarter,
        TimeUnit::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Day => "day",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        }
    }

    /// The period of this unit containing `ts`.
    pub fn period_containing(&self, ts: &NaiveDateTime) -> Option<Period> {
        let date = ts.date();
        let (first, next_first) = match self {
            TimeUnit::Day => (date, date.succ_opt()?),
            TimeUnit::Month => {
                let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?;
                (first, first_of_following_month(first, 1)?)
            }
            TimeUnit::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                let first = NaiveDate::from_ymd_opt(date.year(), month, 1)?;
                (first, first_of_following_month(first, 3)?)
            }
            TimeUnit::Year => {
                let first = NaiveDate::from_ymd_opt(date.year(), 1, 1)?;
                (first, NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?)
            }
        };

        let key = match self {
            TimeUnit::Day => first.format(DATE_FORMAT).to_string(),
            TimeUnit::Month => first.format("%Y-%m").to_string(),
            TimeUnit::Quarter => format!("{}-Q{}", first.year(), first.month0() / 3 + 1),
            TimeUnit::Year => first.format("%Y").to_string(),
        };

        Some(Period {
            unit: *self,
            key,
            range: DateRange {
                start: first.and_time(NaiveTime::MIN),
                end: next_first.and_time(NaiveTime::MIN) - Duration::seconds(1),
            },
        })
    }

    /// Every whole period overlapping `range`, ascending.
    pub fn periods_overlapping(&self, range: &DateRange) -> Vec<Period> {
        let mut periods = Vec::new();
        let mut cursor = range.start;
        while let Some(period) = self.period_containing(&cursor) {
            let next = period.range.end + Duration::seconds(1);
            let done = period.range.end >= range.end;
            periods.push(period);
            if done {
                break;
            }
            cursor = next;
        }
        periods
    }
}

fn first_of_following_month(first: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = first.month0() + months;
    NaiveDate::from_ymd_opt(first.year() + (total / 12) as i32, total % 12 + 1, 1)
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(TimeUnit::Day),
            "month" => Ok(TimeUnit::Month),
            "quarter" => Ok(TimeUnit::Quarter),
            "year" => Ok(TimeUnit::Year),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

/// One aggregation bucket, e.g. `2020-Q1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub unit: TimeUnit,
    pub key: String,
    pub range: DateRange,
}
