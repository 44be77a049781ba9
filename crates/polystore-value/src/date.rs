//! Civil date and time components.
//!
//! [`DateComponents`] represents SQL `DATE`, `TIME` and
//! `TIMESTAMP WITHOUT TIME ZONE` values, which are not instants: each field
//! is optional and an offset is only present when the source carried one.

use std::fmt;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
};

use crate::error::ValueError;

/// Formats accepted for a combined date and time without offset.
const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Formats accepted for a time of day.
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

/// A calendar date and/or time of day with optional UTC offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DateComponents {
    /// Proleptic Gregorian year.
    pub year: Option<i32>,
    /// Month of the year (1-12).
    pub month: Option<u32>,
    /// Day of the month (1-31).
    pub day: Option<u32>,
    /// Hour of the day (0-23).
    pub hour: Option<u32>,
    /// Minute of the hour (0-59).
    pub minute: Option<u32>,
    /// Second of the minute (0-59).
    pub second: Option<u32>,
    /// Sub-second part in nanoseconds.
    pub nanosecond: Option<u32>,
    /// Offset east of UTC in seconds.
    pub utc_offset_seconds: Option<i32>,
}

impl DateComponents {
    /// Components of a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: Some(date.year()),
            month: Some(date.month()),
            day: Some(date.day()),
            ..Self::default()
        }
    }

    /// Components of a time of day.
    pub fn from_time(time: NaiveTime) -> Self {
        Self {
            hour: Some(time.hour()),
            minute: Some(time.minute()),
            second: Some(time.second()),
            nanosecond: Some(time.nanosecond()),
            ..Self::default()
        }
    }

    /// Components of a date and time without offset.
    pub fn from_date_time(value: NaiveDateTime) -> Self {
        Self {
            hour: Some(value.hour()),
            minute: Some(value.minute()),
            second: Some(value.second()),
            nanosecond: Some(value.nanosecond()),
            ..Self::from_date(value.date())
        }
    }

    /// Components of a date and time with its offset.
    pub fn from_fixed(value: DateTime<FixedOffset>) -> Self {
        Self {
            utc_offset_seconds: Some(value.offset().local_minus_utc()),
            ..Self::from_date_time(value.naive_local())
        }
    }

    /// The date part, if year, month and day are all present and valid.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year?, self.month?, self.day?)
    }

    /// The time part, if hour and minute are present and valid.
    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_nano_opt(
            self.hour?,
            self.minute?,
            self.second.unwrap_or(0),
            self.nanosecond.unwrap_or(0),
        )
    }

    /// The combined date and time, if both parts are present.
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        Some(NaiveDateTime::new(self.date()?, self.time()?))
    }

    /// The instant described by these components, if a full date, time and
    /// offset are present.
    pub fn instant(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.utc_offset_seconds?)?;
        self.date_time()?.and_local_timezone(offset).single()
    }

    /// Parse an ISO-8601 style date, time, or date-time string.
    ///
    /// Accepts `YYYY-MM-DD`, `HH:MM[:SS[.fff]]`, and
    /// `YYYY-MM-DD[T| ]HH:MM[:SS[.fff]]` optionally followed by `Z` or an
    /// offset such as `+02:00`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidDateFormat`] if no accepted layout
    /// matches.
    pub fn parse(s: &str) -> Result<Self, ValueError> {
        let s = s.trim();
        if let Ok(value) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_fixed(value));
        }
        if let Ok(value) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
            return Ok(Self::from_fixed(value));
        }
        for format in DATE_TIME_FORMATS {
            if let Ok(value) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::from_date_time(value));
            }
        }
        if let Ok(value) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::from_date(value));
        }
        for format in TIME_FORMATS {
            if let Ok(value) = NaiveTime::parse_from_str(s, format) {
                return Ok(Self::from_time(value));
            }
        }
        Err(ValueError::InvalidDateFormat(s.to_owned()))
    }
}

impl fmt::Display for DateComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = self.date();
        let time = self.time();
        if let Some(date) = date {
            write!(f, "{}", date.format("%Y-%m-%d"))?;
        }
        if let Some(time) = time {
            if date.is_some() {
                f.write_str("T")?;
            }
            write!(f, "{}", time.format("%H:%M:%S%.f"))?;
        }
        if let Some(offset) = self.utc_offset_seconds.and_then(FixedOffset::east_opt) {
            write!(f, "{offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_date() {
        let parsed = DateComponents::parse("2024-02-29");
        assert_eq!(
            parsed.ok().and_then(|c| c.date()),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn parses_time_only() {
        let parsed = DateComponents::parse("13:45:10.5");
        let Ok(components) = parsed else {
            panic!("time should parse");
        };
        assert_eq!(components.year, None);
        assert_eq!(components.hour, Some(13));
        assert_eq!(components.nanosecond, Some(500_000_000));
    }

    #[test]
    fn parses_offset_date_time() {
        let parsed = DateComponents::parse("2024-01-02T03:04:05+02:00");
        let Ok(components) = parsed else {
            panic!("date time should parse");
        };
        assert_eq!(components.utc_offset_seconds, Some(7200));
        assert!(components.instant().is_some());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            DateComponents::parse("yesterday"),
            Err(ValueError::InvalidDateFormat("yesterday".to_owned()))
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let Ok(original) = DateComponents::parse("2023-12-31 23:59:58") else {
            panic!("should parse");
        };
        assert_eq!(DateComponents::parse(&original.to_string()), Ok(original));
    }
}
