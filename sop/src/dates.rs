use std::time::SystemTime;

use chrono::{DateTime, NaiveTime, SubsecRound, TimeZone, offset::Utc};

use crate::Result;

/// Parses the given string depicting a ISO 8601 timestamp, rounding down.
///
/// `-` denotes the beginning of time, and is returned as `None`.
pub fn parse_bound_round_down(s: &str) -> Result<Option<DateTime<Utc>>> {
    match s {
        "-" => Ok(None),
        "now" => Ok(Some(now())),
        _ => parse_iso8601(s, NaiveTime::from_hms_opt(0, 0, 0)).map(Some),
    }
}

/// Parses the given string depicting a ISO 8601 timestamp, rounding up.
///
/// `-` denotes the end of time, and is returned as `None`.
pub fn parse_bound_round_up(s: &str) -> Result<Option<DateTime<Utc>>> {
    match s {
        "-" => Ok(None),
        "now" => Ok(Some(now())),
        _ => parse_iso8601(s, NaiveTime::from_hms_opt(23, 59, 59)).map(Some),
    }
}

/// Returns the current time in whole seconds, the resolution of
/// signature creation times.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Parses the given string depicting a ISO 8601 timestamp.
fn parse_iso8601(s: &str, pad_date_with: Option<NaiveTime>)
                 -> Result<DateTime<Utc>>
{
    for f in &[
        "%Y-%m-%dT%H:%M:%S%#z",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M%#z",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H%#z",
        "%Y-%m-%dT%H",
        "%Y%m%dT%H%M%S%#z",
        "%Y%m%dT%H%M%S",
        "%Y%m%dT%H%M%#z",
        "%Y%m%dT%H%M",
        "%Y%m%dT%H%#z",
        "%Y%m%dT%H",
    ] {
        if f.ends_with("%#z") {
            if let Ok(d) = DateTime::parse_from_str(s, *f) {
                return Ok(d.into());
            }
        } else {
            if let Ok(d) = chrono::NaiveDateTime::parse_from_str(s, *f) {
                return Ok(Utc.from_utc_datetime(&d));
            }
        }
    }
    if let Some(pad_date_with) = pad_date_with {
        for f in &[
            "%Y-%m-%d",
            "%Y-%m",
            "%Y-%j",
            "%Y%m%d",
            "%Y%m",
            "%Y%j",
            "%Y",
        ] {
            if let Ok(d) = chrono::NaiveDate::parse_from_str(s, *f) {
                return Ok(Utc.from_utc_datetime(&d.and_time(pad_date_with)));
            }
        }
    }
    Err(anyhow::anyhow!("Malformed ISO8601 timestamp: {}", s))
}

/// An inclusive interval of time.
///
/// A missing bound extends the window to the beginning or the end of
/// time, respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    from: Option<SystemTime>,
    to: Option<SystemTime>,
}

impl TimeWindow {
    /// Returns the window between `from` and `to`, inclusive.
    pub fn new<F, T>(from: F, to: T) -> Self
        where F: Into<Option<SystemTime>>,
              T: Into<Option<SystemTime>>,
    {
        TimeWindow {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parses the "--not-before" and "--not-after" arguments.
    pub fn from_bounds(not_before: Option<&str>, not_after: Option<&str>)
                       -> Result<Self>
    {
        let from = match not_before {
            Some(s) => parse_bound_round_down(s)?,
            None => None,
        };
        let to = match not_after {
            Some(s) => parse_bound_round_up(s)?,
            None => None,
        };
        Ok(TimeWindow::new(from.map(SystemTime::from), to.map(SystemTime::from)))
    }

    /// Returns the lower bound, if any.
    pub fn not_before(&self) -> Option<SystemTime> {
        self.from
    }

    /// Returns the upper bound, if any.
    pub fn not_after(&self) -> Option<SystemTime> {
        self.to
    }

    /// Returns whether `t` lies in the window.
    pub fn contains(&self, t: SystemTime) -> bool {
        self.from.map(|from| from <= t).unwrap_or(true)
            && self.to.map(|to| t <= to).unwrap_or(true)
    }
}
