//! Partial-precision temporal values and the comparison kernel
//!
//! CQL Date, DateTime, and Time values carry only the components that were
//! written in the source: `@2020-03` knows its year and month and nothing
//! else. The value's precision is derived from which components are present,
//! and comparison only inspects components down to the coarser of the two
//! operands' precisions. When the inspected components are all equal but the
//! walk ran out of components before it could decide, the result is
//! [`TemporalCompare::InsufficientPrecision`]: unknown, never false.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors constructing, parsing, or stepping values in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("invalid date/time component: {0}")]
    InvalidComponent(String),
    #[error("cannot parse {kind} literal: {input}")]
    Parse { kind: &'static str, input: String },
    #[error("{0} is outside the representable range")]
    OutOfRange(String),
}

fn parse_err(kind: &'static str, input: &str) -> ValueError {
    ValueError::Parse {
        kind,
        input: input.to_string(),
    }
}

/// Calendar/clock precision of a temporal value, coarsest first.
///
/// `Ord` follows declaration order, so `min` of two precisions is the
/// coarser one. Week is not a value precision; duration units carry it
/// separately.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DateTimePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DateTimePrecision {
    /// All precisions from `self` down to and including `ceiling`.
    pub fn through(self, ceiling: DateTimePrecision) -> impl Iterator<Item = DateTimePrecision> {
        use DateTimePrecision::*;
        [Year, Month, Day, Hour, Minute, Second, Millisecond]
            .into_iter()
            .filter(move |p| *p >= self && *p <= ceiling)
    }

    pub fn is_date_precision(self) -> bool {
        self <= DateTimePrecision::Day
    }

    pub fn is_time_precision(self) -> bool {
        self >= DateTimePrecision::Hour
    }
}

impl fmt::Display for DateTimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DateTimePrecision {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            "second" => Ok(Self::Second),
            "millisecond" => Ok(Self::Millisecond),
            _ => Err(parse_err("precision", s)),
        }
    }
}

/// Outcome of a precision-aware temporal comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalCompare {
    Before,
    Equal,
    After,
    /// The operands agree on every shared component but neither specifies
    /// enough precision to decide. Callers must treat this as unknown.
    InsufficientPrecision,
    /// At least one operand was null.
    ComparedToNull,
}

impl TemporalCompare {
    /// The outcome with the operands swapped.
    pub fn flip(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            other => other,
        }
    }

    /// Collapse to a three-valued boolean given which definite outcomes
    /// count as true. Unknown outcomes collapse to `None`.
    pub fn to_bool(self, true_on: &[TemporalCompare]) -> Option<bool> {
        match self {
            Self::InsufficientPrecision | Self::ComparedToNull => None,
            definite => Some(true_on.contains(&definite)),
        }
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Walk paired components down to `ceiling`, deciding at the first
/// difference. Missing components before the ceiling mean the comparison
/// cannot be decided at the requested depth.
fn walk_components(
    a: &[Option<i64>],
    b: &[Option<i64>],
    start: DateTimePrecision,
    ceiling: DateTimePrecision,
) -> TemporalCompare {
    for p in start.through(ceiling) {
        let i = (p as usize) - (start as usize);
        match (a[i], b[i]) {
            (Some(x), Some(y)) if x < y => return TemporalCompare::Before,
            (Some(x), Some(y)) if x > y => return TemporalCompare::After,
            (Some(_), Some(_)) => {}
            _ => return TemporalCompare::InsufficientPrecision,
        }
    }
    TemporalCompare::Equal
}

// =============================================================================
// Date
// =============================================================================

/// A CQL Date: year required, month and day optional in cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlDate {
    pub year: i32,
    pub month: Option<u8>,
    pub day: Option<u8>,
}

impl CqlDate {
    pub const MIN_YEAR: i32 = 1;
    pub const MAX_YEAR: i32 = 9999;

    pub fn new(year: i32, month: Option<u8>, day: Option<u8>) -> Result<Self, ValueError> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(ValueError::InvalidComponent(format!("year {year}")));
        }
        if let Some(m) = month {
            if !(1..=12).contains(&m) {
                return Err(ValueError::InvalidComponent(format!("month {m}")));
            }
        }
        match (month, day) {
            (None, Some(_)) => {
                return Err(ValueError::InvalidComponent(
                    "day specified without month".to_string(),
                ));
            }
            (Some(m), Some(d)) => {
                if d < 1 || d > days_in_month(year, m) {
                    return Err(ValueError::InvalidComponent(format!("day {d}")));
                }
            }
            _ => {}
        }
        Ok(Self { year, month, day })
    }

    pub fn from_ymd(year: i32, month: u8, day: u8) -> Result<Self, ValueError> {
        Self::new(year, Some(month), Some(day))
    }

    /// Parse `2020`, `2020-03`, or `2020-03-14`.
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let mut parts = input.splitn(3, '-');
        let year = parts
            .next()
            .filter(|s| s.len() == 4)
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(|| parse_err("Date", input))?;
        let month = match parts.next() {
            Some(s) => Some(
                s.parse::<u8>()
                    .map_err(|_| parse_err("Date", input))?,
            ),
            None => None,
        };
        let day = match parts.next() {
            Some(s) => Some(
                s.parse::<u8>()
                    .map_err(|_| parse_err("Date", input))?,
            ),
            None => None,
        };
        Self::new(year, month, day).map_err(|_| parse_err("Date", input))
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.day.is_some() {
            DateTimePrecision::Day
        } else if self.month.is_some() {
            DateTimePrecision::Month
        } else {
            DateTimePrecision::Year
        }
    }

    fn components(&self) -> [Option<i64>; 3] {
        [
            Some(i64::from(self.year)),
            self.month.map(i64::from),
            self.day.map(i64::from),
        ]
    }

    /// Precision-aware comparison; see [`TemporalCompare`].
    pub fn compare_with_precision(
        &self,
        other: &CqlDate,
        max_precision: Option<DateTimePrecision>,
    ) -> TemporalCompare {
        let ceiling = match max_precision {
            Some(p) => p.min(DateTimePrecision::Day),
            None => self.precision().min(other.precision()),
        };
        walk_components(
            &self.components(),
            &other.components(),
            DateTimePrecision::Year,
            ceiling,
        )
    }

    /// Fill missing components with their smallest values.
    pub fn low_boundary(&self) -> CqlDate {
        CqlDate {
            year: self.year,
            month: Some(self.month.unwrap_or(1)),
            day: Some(self.day.unwrap_or(1)),
        }
    }

    /// Fill missing components with their largest values.
    pub fn high_boundary(&self) -> CqlDate {
        let month = self.month.unwrap_or(12);
        CqlDate {
            year: self.year,
            month: Some(month),
            day: Some(self.day.unwrap_or_else(|| days_in_month(self.year, month))),
        }
    }

    /// The low-boundary expansion as a chrono date.
    pub fn to_naive(&self) -> chrono::NaiveDate {
        let low = self.low_boundary();
        chrono::NaiveDate::from_ymd_opt(
            low.year,
            u32::from(low.month.unwrap_or(1)),
            u32::from(low.day.unwrap_or(1)),
        )
        .unwrap_or(chrono::NaiveDate::MIN)
    }

    pub fn truncate_to(&self, precision: DateTimePrecision) -> CqlDate {
        CqlDate {
            year: self.year,
            month: if precision >= DateTimePrecision::Month {
                self.month
            } else {
                None
            },
            day: if precision >= DateTimePrecision::Day {
                self.day
            } else {
                None
            },
        }
    }

    pub fn add_years(&self, years: i32) -> Result<Self, ValueError> {
        let year = self
            .year
            .checked_add(years)
            .ok_or_else(|| ValueError::OutOfRange("Date".to_string()))?;
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(ValueError::OutOfRange("Date".to_string()));
        }
        // Feb 29 clamps on non-leap targets
        let day = match (self.month, self.day) {
            (Some(m), Some(d)) => Some(d.min(days_in_month(year, m))),
            (_, d) => d,
        };
        Ok(CqlDate {
            year,
            month: self.month,
            day,
        })
    }

    pub fn add_months(&self, months: i64) -> Result<Self, ValueError> {
        let month0 = i64::from(self.month.unwrap_or(1)) - 1;
        let total = i64::from(self.year) * 12 + month0 + months;
        let year = total.div_euclid(12);
        let month = (total.rem_euclid(12) + 1) as u8;
        if !(i64::from(Self::MIN_YEAR)..=i64::from(Self::MAX_YEAR)).contains(&year) {
            return Err(ValueError::OutOfRange("Date".to_string()));
        }
        let year = year as i32;
        let day = self.day.map(|d| d.min(days_in_month(year, month)));
        Ok(CqlDate {
            year,
            month: self.month.map(|_| month),
            day,
        })
    }

    pub fn add_days(&self, days: i64) -> Result<Self, ValueError> {
        let base = self.to_naive();
        let shifted = base
            .checked_add_signed(chrono::Duration::days(days))
            .ok_or_else(|| ValueError::OutOfRange("Date".to_string()))?;
        use chrono::Datelike;
        let result = CqlDate::new(
            shifted.year(),
            Some(shifted.month() as u8),
            Some(shifted.day() as u8),
        )?;
        Ok(result.truncate_to(self.precision()))
    }

    /// One step forward at this value's own precision.
    pub fn successor(&self) -> Result<Self, ValueError> {
        match self.precision() {
            DateTimePrecision::Year => self.add_years(1),
            DateTimePrecision::Month => self.add_months(1),
            _ => self.add_days(1),
        }
    }

    /// One step backward at this value's own precision.
    pub fn predecessor(&self) -> Result<Self, ValueError> {
        match self.precision() {
            DateTimePrecision::Year => self.add_years(-1),
            DateTimePrecision::Month => self.add_months(-1),
            _ => self.add_days(-1),
        }
    }

    pub fn min_value() -> CqlDate {
        CqlDate {
            year: Self::MIN_YEAR,
            month: Some(1),
            day: Some(1),
        }
    }

    pub fn max_value() -> CqlDate {
        CqlDate {
            year: Self::MAX_YEAR,
            month: Some(12),
            day: Some(31),
        }
    }
}

impl fmt::Display for CqlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(m) = self.month {
            write!(f, "-{m:02}")?;
        }
        if let Some(d) = self.day {
            write!(f, "-{d:02}")?;
        }
        Ok(())
    }
}

// =============================================================================
// DateTime
// =============================================================================

/// A CQL DateTime: date components plus optional clock components in
/// cascade, with an optional UTC offset in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlDateTime {
    pub year: i32,
    pub month: Option<u8>,
    pub day: Option<u8>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub second: Option<u8>,
    pub millisecond: Option<u16>,
    /// UTC offset in minutes; `None` means "use the evaluation default".
    pub timezone_offset: Option<i16>,
}

impl CqlDateTime {
    pub const MAX_OFFSET_MINUTES: i16 = 14 * 60;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: i32,
        month: Option<u8>,
        day: Option<u8>,
        hour: Option<u8>,
        minute: Option<u8>,
        second: Option<u8>,
        millisecond: Option<u16>,
        timezone_offset: Option<i16>,
    ) -> Result<Self, ValueError> {
        CqlDate::new(year, month, day)?;
        let cascade = [
            day.is_some(),
            hour.is_some(),
            minute.is_some(),
            second.is_some(),
            millisecond.is_some(),
        ];
        if cascade.windows(2).any(|w| w[1] && !w[0]) {
            return Err(ValueError::InvalidComponent(
                "time component specified without its parent".to_string(),
            ));
        }
        if let Some(h) = hour {
            if h > 23 {
                return Err(ValueError::InvalidComponent(format!("hour {h}")));
            }
        }
        for (name, v) in [("minute", minute), ("second", second)] {
            if let Some(v) = v {
                if v > 59 {
                    return Err(ValueError::InvalidComponent(format!("{name} {v}")));
                }
            }
        }
        if let Some(ms) = millisecond {
            if ms > 999 {
                return Err(ValueError::InvalidComponent(format!("millisecond {ms}")));
            }
        }
        if let Some(off) = timezone_offset {
            if off.abs() > Self::MAX_OFFSET_MINUTES {
                return Err(ValueError::InvalidComponent(format!(
                    "timezone offset {off} minutes"
                )));
            }
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
            timezone_offset,
        })
    }

    pub fn from_date(date: CqlDate) -> Self {
        Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: None,
            minute: None,
            second: None,
            millisecond: None,
            timezone_offset: None,
        }
    }

    /// The date components as a [`CqlDate`].
    pub fn date(&self) -> CqlDate {
        CqlDate {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    /// The clock components as a [`CqlTime`] when any are present.
    pub fn time(&self) -> Option<CqlTime> {
        self.hour.map(|hour| CqlTime {
            hour,
            minute: self.minute,
            second: self.second,
            millisecond: self.millisecond,
        })
    }

    /// Parse `2020-01-15T10:30:00.123+01:00` and every shorter prefix down
    /// to a bare year. A trailing `T` without clock components is accepted.
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let (datetime, offset) = split_offset(input);
        let timezone_offset = match offset {
            Some(o) => Some(parse_offset(o).ok_or_else(|| parse_err("DateTime", input))?),
            None => None,
        };
        let (date_part, time_part) = match datetime.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (datetime, None),
        };
        let date = CqlDate::parse(date_part).map_err(|_| parse_err("DateTime", input))?;
        let time = match time_part {
            Some("") | None => None,
            Some(t) => Some(CqlTime::parse(t).map_err(|_| parse_err("DateTime", input))?),
        };
        Self::new(
            date.year,
            date.month,
            date.day,
            time.map(|t| t.hour),
            time.and_then(|t| t.minute),
            time.and_then(|t| t.second),
            time.and_then(|t| t.millisecond),
            timezone_offset,
        )
        .map_err(|_| parse_err("DateTime", input))
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.millisecond.is_some() {
            DateTimePrecision::Millisecond
        } else if self.second.is_some() {
            DateTimePrecision::Second
        } else if self.minute.is_some() {
            DateTimePrecision::Minute
        } else if self.hour.is_some() {
            DateTimePrecision::Hour
        } else {
            self.date().precision()
        }
    }

    fn components(&self) -> [Option<i64>; 7] {
        [
            Some(i64::from(self.year)),
            self.month.map(i64::from),
            self.day.map(i64::from),
            self.hour.map(i64::from),
            self.minute.map(i64::from),
            self.second.map(i64::from),
            self.millisecond.map(i64::from),
        ]
    }

    fn masked_components(&self, precision: DateTimePrecision) -> [Option<i64>; 7] {
        let mut out = self.components();
        for (i, slot) in out.iter_mut().enumerate() {
            if i > precision as usize {
                *slot = None;
            }
        }
        out
    }

    /// Precision-aware comparison. When the effective UTC offsets differ,
    /// both operands are normalized to UTC instants (at their low boundary)
    /// before the component walk; the insufficiency rule still follows each
    /// operand's original precision.
    pub fn compare_with_precision(
        &self,
        other: &CqlDateTime,
        max_precision: Option<DateTimePrecision>,
        default_offset: Option<i16>,
    ) -> TemporalCompare {
        let off_a = self.timezone_offset.or(default_offset).unwrap_or(0);
        let off_b = other.timezone_offset.or(default_offset).unwrap_or(0);
        let (a, b) = if off_a == off_b {
            (*self, *other)
        } else {
            (self.shifted_to_utc(off_a), other.shifted_to_utc(off_b))
        };
        let ceiling = match max_precision {
            Some(p) => p,
            None => self.precision().min(other.precision()),
        };
        walk_components(
            &a.masked_components(self.precision()),
            &b.masked_components(other.precision()),
            DateTimePrecision::Year,
            ceiling,
        )
    }

    fn shifted_to_utc(&self, offset_minutes: i16) -> CqlDateTime {
        let low = self.low_boundary();
        let naive = low.to_naive_datetime();
        let shifted = naive - chrono::Duration::minutes(i64::from(offset_minutes));
        CqlDateTime::from_naive(shifted, Some(0))
    }

    /// This value on the chrono side, missing components filled with their
    /// minimums. The offset is not applied.
    pub fn to_naive_datetime(&self) -> chrono::NaiveDateTime {
        let date = self.date().to_naive();
        let time = chrono::NaiveTime::from_hms_milli_opt(
            u32::from(self.hour.unwrap_or(0)),
            u32::from(self.minute.unwrap_or(0)),
            u32::from(self.second.unwrap_or(0)),
            u32::from(self.millisecond.unwrap_or(0)),
        )
        .unwrap_or(chrono::NaiveTime::MIN);
        date.and_time(time)
    }

    fn from_naive(naive: chrono::NaiveDateTime, offset: Option<i16>) -> CqlDateTime {
        use chrono::{Datelike, Timelike};
        CqlDateTime {
            year: naive.year(),
            month: Some(naive.month() as u8),
            day: Some(naive.day() as u8),
            hour: Some(naive.hour() as u8),
            minute: Some(naive.minute() as u8),
            second: Some(naive.second() as u8),
            millisecond: Some((naive.and_utc().timestamp_subsec_millis()) as u16),
            timezone_offset: offset,
        }
    }

    /// Full-precision value built from a chrono instant.
    pub fn from_chrono(instant: chrono::DateTime<chrono::FixedOffset>) -> CqlDateTime {
        let offset_minutes = (instant.offset().local_minus_utc() / 60) as i16;
        Self::from_naive(instant.naive_local(), Some(offset_minutes))
    }

    pub fn low_boundary(&self) -> CqlDateTime {
        let date = self.date().low_boundary();
        CqlDateTime {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: Some(self.hour.unwrap_or(0)),
            minute: Some(self.minute.unwrap_or(0)),
            second: Some(self.second.unwrap_or(0)),
            millisecond: Some(self.millisecond.unwrap_or(0)),
            timezone_offset: self.timezone_offset,
        }
    }

    pub fn high_boundary(&self) -> CqlDateTime {
        let date = self.date().high_boundary();
        CqlDateTime {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: Some(self.hour.unwrap_or(23)),
            minute: Some(self.minute.unwrap_or(59)),
            second: Some(self.second.unwrap_or(59)),
            millisecond: Some(self.millisecond.unwrap_or(999)),
            timezone_offset: self.timezone_offset,
        }
    }

    pub fn truncate_to(&self, precision: DateTimePrecision) -> CqlDateTime {
        let keep = |p: DateTimePrecision| precision >= p;
        CqlDateTime {
            year: self.year,
            month: self.month.filter(|_| keep(DateTimePrecision::Month)),
            day: self.day.filter(|_| keep(DateTimePrecision::Day)),
            hour: self.hour.filter(|_| keep(DateTimePrecision::Hour)),
            minute: self.minute.filter(|_| keep(DateTimePrecision::Minute)),
            second: self.second.filter(|_| keep(DateTimePrecision::Second)),
            millisecond: self
                .millisecond
                .filter(|_| keep(DateTimePrecision::Millisecond)),
            timezone_offset: self.timezone_offset,
        }
    }

    /// Add `amount` units, computing on the low-boundary expansion and
    /// truncating back to this value's precision.
    pub fn add_units(
        &self,
        precision: DateTimePrecision,
        amount: i64,
    ) -> Result<Self, ValueError> {
        use DateTimePrecision::*;
        let result = match precision {
            Year => {
                let years = i32::try_from(amount)
                    .map_err(|_| ValueError::OutOfRange("DateTime".to_string()))?;
                let date = self.date().add_years(years)?;
                let mut out = *self;
                out.year = date.year;
                out.day = date.day;
                return Ok(out);
            }
            Month => {
                let date = self.date().add_months(amount)?;
                let mut out = *self;
                out.year = date.year;
                out.month = date.month;
                out.day = date.day;
                return Ok(out);
            }
            Day => chrono::Duration::days(amount),
            Hour => chrono::Duration::hours(amount),
            Minute => chrono::Duration::minutes(amount),
            Second => chrono::Duration::seconds(amount),
            Millisecond => chrono::Duration::milliseconds(amount),
        };
        let shifted = self
            .low_boundary()
            .to_naive_datetime()
            .checked_add_signed(result)
            .ok_or_else(|| ValueError::OutOfRange("DateTime".to_string()))?;
        use chrono::Datelike;
        if !(CqlDate::MIN_YEAR..=CqlDate::MAX_YEAR).contains(&shifted.year()) {
            return Err(ValueError::OutOfRange("DateTime".to_string()));
        }
        Ok(Self::from_naive(shifted, self.timezone_offset).truncate_to(self.precision()))
    }

    pub fn successor(&self) -> Result<Self, ValueError> {
        self.add_units(self.precision(), 1)
    }

    pub fn predecessor(&self) -> Result<Self, ValueError> {
        self.add_units(self.precision(), -1)
    }

    pub fn min_value() -> CqlDateTime {
        CqlDateTime {
            year: CqlDate::MIN_YEAR,
            month: Some(1),
            day: Some(1),
            hour: Some(0),
            minute: Some(0),
            second: Some(0),
            millisecond: Some(0),
            timezone_offset: None,
        }
    }

    pub fn max_value() -> CqlDateTime {
        CqlDateTime {
            year: CqlDate::MAX_YEAR,
            month: Some(12),
            day: Some(31),
            hour: Some(23),
            minute: Some(59),
            second: Some(59),
            millisecond: Some(999),
            timezone_offset: None,
        }
    }
}

impl fmt::Display for CqlDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date())?;
        if let Some(h) = self.hour {
            write!(f, "T{h:02}")?;
            if let Some(m) = self.minute {
                write!(f, ":{m:02}")?;
            }
            if let Some(s) = self.second {
                write!(f, ":{s:02}")?;
            }
            if let Some(ms) = self.millisecond {
                write!(f, ".{ms:03}")?;
            }
            if let Some(off) = self.timezone_offset {
                let sign = if off < 0 { '-' } else { '+' };
                let abs = off.unsigned_abs();
                write!(f, "{sign}{:02}:{:02}", abs / 60, abs % 60)?;
            }
        }
        Ok(())
    }
}

fn split_offset(input: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = input.strip_suffix('Z') {
        return (stripped, Some("Z"));
    }
    // The offset sign can only follow a time part
    if let Some(t_pos) = input.find('T') {
        let time = &input[t_pos..];
        if let Some(rel) = time.rfind(['+', '-']) {
            let pos = t_pos + rel;
            return (&input[..pos], Some(&input[pos..]));
        }
    }
    (input, None)
}

fn parse_offset(offset: &str) -> Option<i16> {
    if offset == "Z" {
        return Some(0);
    }
    let (sign, rest) = match offset.split_at_checked(1)? {
        ("+", rest) => (1i16, rest),
        ("-", rest) => (-1i16, rest),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i16>().ok()?, m.parse::<i16>().ok()?),
        None => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

// =============================================================================
// Time
// =============================================================================

/// A CQL Time: hour required, finer components optional in cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CqlTime {
    pub hour: u8,
    pub minute: Option<u8>,
    pub second: Option<u8>,
    pub millisecond: Option<u16>,
}

impl CqlTime {
    pub fn new(
        hour: u8,
        minute: Option<u8>,
        second: Option<u8>,
        millisecond: Option<u16>,
    ) -> Result<Self, ValueError> {
        if hour > 23 {
            return Err(ValueError::InvalidComponent(format!("hour {hour}")));
        }
        let cascade = [true, minute.is_some(), second.is_some(), millisecond.is_some()];
        if cascade.windows(2).any(|w| w[1] && !w[0]) {
            return Err(ValueError::InvalidComponent(
                "time component specified without its parent".to_string(),
            ));
        }
        for (name, v) in [("minute", minute), ("second", second)] {
            if let Some(v) = v {
                if v > 59 {
                    return Err(ValueError::InvalidComponent(format!("{name} {v}")));
                }
            }
        }
        if let Some(ms) = millisecond {
            if ms > 999 {
                return Err(ValueError::InvalidComponent(format!("millisecond {ms}")));
            }
        }
        Ok(Self {
            hour,
            minute,
            second,
            millisecond,
        })
    }

    /// Parse `10`, `10:30`, `10:30:00`, or `10:30:00.123`.
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let (clock, millis) = match input.split_once('.') {
            Some((c, ms)) => {
                let padded = format!("{ms:0<3}");
                let ms = padded[..3]
                    .parse::<u16>()
                    .map_err(|_| parse_err("Time", input))?;
                (c, Some(ms))
            }
            None => (input, None),
        };
        let mut parts = clock.splitn(3, ':');
        let hour = parts
            .next()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(|| parse_err("Time", input))?;
        let minute = match parts.next() {
            Some(s) => Some(s.parse::<u8>().map_err(|_| parse_err("Time", input))?),
            None => None,
        };
        let second = match parts.next() {
            Some(s) => Some(s.parse::<u8>().map_err(|_| parse_err("Time", input))?),
            None => None,
        };
        Self::new(hour, minute, second, millis).map_err(|_| parse_err("Time", input))
    }

    pub fn precision(&self) -> DateTimePrecision {
        if self.millisecond.is_some() {
            DateTimePrecision::Millisecond
        } else if self.second.is_some() {
            DateTimePrecision::Second
        } else if self.minute.is_some() {
            DateTimePrecision::Minute
        } else {
            DateTimePrecision::Hour
        }
    }

    fn components(&self) -> [Option<i64>; 4] {
        [
            Some(i64::from(self.hour)),
            self.minute.map(i64::from),
            self.second.map(i64::from),
            self.millisecond.map(i64::from),
        ]
    }

    pub fn compare_with_precision(
        &self,
        other: &CqlTime,
        max_precision: Option<DateTimePrecision>,
    ) -> TemporalCompare {
        let ceiling = match max_precision {
            Some(p) => p.max(DateTimePrecision::Hour),
            None => self.precision().min(other.precision()),
        };
        let a = self.components();
        let b = other.components();
        for p in DateTimePrecision::Hour.through(ceiling) {
            let i = (p as usize) - (DateTimePrecision::Hour as usize);
            match (a[i], b[i]) {
                (Some(x), Some(y)) if x < y => return TemporalCompare::Before,
                (Some(x), Some(y)) if x > y => return TemporalCompare::After,
                (Some(_), Some(_)) => {}
                _ => return TemporalCompare::InsufficientPrecision,
            }
        }
        TemporalCompare::Equal
    }

    pub fn low_boundary(&self) -> CqlTime {
        CqlTime {
            hour: self.hour,
            minute: Some(self.minute.unwrap_or(0)),
            second: Some(self.second.unwrap_or(0)),
            millisecond: Some(self.millisecond.unwrap_or(0)),
        }
    }

    pub fn high_boundary(&self) -> CqlTime {
        CqlTime {
            hour: self.hour,
            minute: Some(self.minute.unwrap_or(59)),
            second: Some(self.second.unwrap_or(59)),
            millisecond: Some(self.millisecond.unwrap_or(999)),
        }
    }

    /// Milliseconds since midnight of the low-boundary expansion.
    pub fn to_millis(&self) -> i64 {
        let low = self.low_boundary();
        (i64::from(low.hour) * 3600 + i64::from(low.minute.unwrap_or(0)) * 60
            + i64::from(low.second.unwrap_or(0)))
            * 1000
            + i64::from(low.millisecond.unwrap_or(0))
    }

    pub fn truncate_to(&self, precision: DateTimePrecision) -> CqlTime {
        let keep = |p: DateTimePrecision| precision >= p;
        CqlTime {
            hour: self.hour,
            minute: self.minute.filter(|_| keep(DateTimePrecision::Minute)),
            second: self.second.filter(|_| keep(DateTimePrecision::Second)),
            millisecond: self
                .millisecond
                .filter(|_| keep(DateTimePrecision::Millisecond)),
        }
    }

    /// Add `amount` units without wrapping past midnight.
    pub fn add_units(
        &self,
        precision: DateTimePrecision,
        amount: i64,
    ) -> Result<Self, ValueError> {
        use DateTimePrecision::*;
        let step_millis = match precision {
            Hour => 3_600_000,
            Minute => 60_000,
            Second => 1_000,
            Millisecond => 1,
            _ => {
                return Err(ValueError::InvalidComponent(format!(
                    "{precision} is not a time precision"
                )));
            }
        };
        let millis = self.to_millis() + amount * step_millis;
        if !(0..86_400_000).contains(&millis) {
            return Err(ValueError::OutOfRange("Time".to_string()));
        }
        let full = CqlTime {
            hour: (millis / 3_600_000) as u8,
            minute: Some(((millis / 60_000) % 60) as u8),
            second: Some(((millis / 1_000) % 60) as u8),
            millisecond: Some((millis % 1_000) as u16),
        };
        Ok(full.truncate_to(self.precision()))
    }

    pub fn successor(&self) -> Result<Self, ValueError> {
        self.add_units(self.precision(), 1)
    }

    pub fn predecessor(&self) -> Result<Self, ValueError> {
        self.add_units(self.precision(), -1)
    }

    pub fn min_value() -> CqlTime {
        CqlTime {
            hour: 0,
            minute: Some(0),
            second: Some(0),
            millisecond: Some(0),
        }
    }

    pub fn max_value() -> CqlTime {
        CqlTime {
            hour: 23,
            minute: Some(59),
            second: Some(59),
            millisecond: Some(999),
        }
    }
}

impl fmt::Display for CqlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.hour)?;
        if let Some(m) = self.minute {
            write!(f, ":{m:02}")?;
        }
        if let Some(s) = self.second {
            write!(f, ":{s:02}")?;
        }
        if let Some(ms) = self.millisecond {
            write!(f, ".{ms:03}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> CqlDate {
        CqlDate::parse(s).unwrap()
    }

    #[test]
    fn date_precision_from_components() {
        assert_eq!(date("2020").precision(), DateTimePrecision::Year);
        assert_eq!(date("2020-03").precision(), DateTimePrecision::Month);
        assert_eq!(date("2020-03-14").precision(), DateTimePrecision::Day);
    }

    #[test]
    fn date_comparison_decides_at_first_difference() {
        assert_eq!(
            date("2020-01").compare_with_precision(&date("2021-06"), None),
            TemporalCompare::Before
        );
        assert_eq!(
            date("2020-06").compare_with_precision(&date("2020-01"), None),
            TemporalCompare::After
        );
    }

    #[test]
    fn date_comparison_stops_at_coarser_precision() {
        // Year vs day precision: only the year is inspected
        assert_eq!(
            date("2020").compare_with_precision(&date("2020-06-15"), None),
            TemporalCompare::Equal
        );
        // An explicit finer ceiling exposes the missing components
        assert_eq!(
            date("2020").compare_with_precision(
                &date("2020-06-15"),
                Some(DateTimePrecision::Month)
            ),
            TemporalCompare::InsufficientPrecision
        );
    }

    #[test]
    fn date_boundaries() {
        assert_eq!(date("2020").low_boundary(), date("2020-01-01"));
        assert_eq!(date("2020").high_boundary(), date("2020-12-31"));
        assert_eq!(date("2020-02").high_boundary(), date("2020-02-29"));
        assert_eq!(date("2019-02").high_boundary(), date("2019-02-28"));
    }

    #[test]
    fn date_successor_at_own_precision() {
        assert_eq!(date("2020").successor().unwrap(), date("2021"));
        assert_eq!(date("2020-12").successor().unwrap(), date("2021-01"));
        assert_eq!(date("2020-02-29").successor().unwrap(), date("2020-03-01"));
        assert_eq!(date("2020-03-01").predecessor().unwrap(), date("2020-02-29"));
        assert!(CqlDate::max_value().successor().is_err());
        assert!(CqlDate::min_value().predecessor().is_err());
    }

    #[test]
    fn month_addition_clamps_days() {
        assert_eq!(
            date("2020-01-31").add_months(1).unwrap(),
            date("2020-02-29")
        );
        assert_eq!(
            date("2020-01-31").add_months(3).unwrap(),
            date("2020-04-30")
        );
    }

    #[test]
    fn datetime_parse_and_display() {
        let dt = CqlDateTime::parse("2020-01-15T10:30:00.123+01:00").unwrap();
        assert_eq!(dt.precision(), DateTimePrecision::Millisecond);
        assert_eq!(dt.timezone_offset, Some(60));
        assert_eq!(dt.to_string(), "2020-01-15T10:30:00.123+01:00");

        let partial = CqlDateTime::parse("2020-01-15T10").unwrap();
        assert_eq!(partial.precision(), DateTimePrecision::Hour);
        assert_eq!(partial.to_string(), "2020-01-15T10");

        let zulu = CqlDateTime::parse("2020-01-15T10:30Z").unwrap();
        assert_eq!(zulu.timezone_offset, Some(0));
    }

    #[test]
    fn datetime_offset_normalization() {
        let utc = CqlDateTime::parse("2020-01-15T12:00:00.000Z").unwrap();
        let plus2 = CqlDateTime::parse("2020-01-15T14:00:00.000+02:00").unwrap();
        assert_eq!(
            utc.compare_with_precision(&plus2, None, None),
            TemporalCompare::Equal
        );
        let plus1 = CqlDateTime::parse("2020-01-15T14:00:00.000+01:00").unwrap();
        assert_eq!(
            utc.compare_with_precision(&plus1, None, None),
            TemporalCompare::Before
        );
    }

    #[test]
    fn datetime_add_units_truncates_to_precision() {
        let hour = CqlDateTime::parse("2020-01-15T10").unwrap();
        let shifted = hour.add_units(DateTimePrecision::Minute, 90).unwrap();
        assert_eq!(shifted, CqlDateTime::parse("2020-01-15T11").unwrap());
        let rolled = hour.add_units(DateTimePrecision::Hour, 15).unwrap();
        assert_eq!(rolled, CqlDateTime::parse("2020-01-16T01").unwrap());
    }

    #[test]
    fn time_comparison_and_steps() {
        let t1 = CqlTime::parse("10:30").unwrap();
        let t2 = CqlTime::parse("10:45:12").unwrap();
        assert_eq!(
            t1.compare_with_precision(&t2, None),
            TemporalCompare::Before
        );
        assert_eq!(
            t1.compare_with_precision(&CqlTime::parse("10:30:59").unwrap(), None),
            TemporalCompare::Equal
        );
        assert_eq!(
            t1.successor().unwrap(),
            CqlTime::parse("10:31").unwrap()
        );
        assert!(CqlTime::max_value().successor().is_err());
    }

    #[test]
    fn precision_parsing() {
        assert_eq!(
            "years".parse::<DateTimePrecision>().unwrap(),
            DateTimePrecision::Year
        );
        assert_eq!(
            "Millisecond".parse::<DateTimePrecision>().unwrap(),
            DateTimePrecision::Millisecond
        );
        assert!("fortnight".parse::<DateTimePrecision>().is_err());
    }
}
