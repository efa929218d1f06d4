//! Partition-key representation and lag arithmetic.
//!
//! Every partition key value is carried as an `i64` "internal" value: integer
//! keys as themselves, time keys as microseconds since the Unix epoch.

use chrono::{DateTime, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PolicyError, Result};

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKeyType {
    SmallInt,
    Integer,
    BigInt,
    Date,
    Timestamp,
    TimestampTz,
}

impl PartitionKeyType {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::SmallInt | Self::Integer | Self::BigInt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
        }
    }

    /// Accepts both the short names and Postgres' `format_type` output.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "smallint" | "int2" => Some(Self::SmallInt),
            "integer" | "int" | "int4" => Some(Self::Integer),
            "bigint" | "int8" => Some(Self::BigInt),
            "date" => Some(Self::Date),
            "timestamp" | "timestamp without time zone" => Some(Self::Timestamp),
            "timestamptz" | "timestamp with time zone" => Some(Self::TimestampTz),
            _ => None,
        }
    }

    pub fn min_value(&self) -> i64 {
        match self {
            Self::SmallInt => i16::MIN as i64,
            Self::Integer => i32::MIN as i64,
            Self::BigInt | Self::Date | Self::Timestamp | Self::TimestampTz => i64::MIN,
        }
    }

    pub fn max_value(&self) -> i64 {
        match self {
            Self::SmallInt => i16::MAX as i64,
            Self::Integer => i32::MAX as i64,
            Self::BigInt | Self::Date | Self::Timestamp | Self::TimestampTz => i64::MAX,
        }
    }

    /// Render an internal value the way an operator would read it.
    pub fn format_value(&self, value: i64) -> String {
        if self.is_integer() {
            return value.to_string();
        }
        if value == i64::MIN {
            return "-infinity".to_string();
        }
        if value == i64::MAX {
            return "infinity".to_string();
        }
        match internal_to_datetime(value) {
            Some(ts) if *self == Self::Date => ts.date_naive().to_string(),
            Some(ts) => ts.to_rfc3339(),
            None => value.to_string(),
        }
    }
}

impl fmt::Display for PartitionKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn datetime_to_internal(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn internal_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    if value == i64::MIN || value == i64::MAX {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros(value)
}

/// A calendar interval, split the same way Postgres stores one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn days(days: i32) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.days == 0 && self.micros == 0
    }

    /// Approximate length with 30-day months, as Postgres' `EXTRACT(EPOCH ...)`.
    pub fn to_duration(&self) -> chrono::Duration {
        let days = self.months as i64 * 30 + self.days as i64;
        chrono::Duration::microseconds(
            days.saturating_mul(USECS_PER_DAY).saturating_add(self.micros),
        )
    }

    pub fn from_duration(d: chrono::Duration) -> Self {
        Self {
            micros: d.num_microseconds().unwrap_or(i64::MAX),
            ..Self::default()
        }
    }

    /// `ts - self`, months first (calendar aware), then days and micros.
    pub fn subtract_from(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ts = if self.months >= 0 {
            ts.checked_sub_months(Months::new(self.months as u32))?
        } else {
            ts.checked_add_months(Months::new(self.months.unsigned_abs()))?
        };
        ts.checked_sub_signed(chrono::Duration::days(self.days as i64))?
            .checked_sub_signed(chrono::Duration::microseconds(self.micros))
    }

    /// Parses Postgres-style interval text: `"7 days"`, `"1 day 02:00:00"`,
    /// `"2 weeks 3 hours"`, `"30min"`.
    pub fn parse(input: &str) -> Option<Self> {
        let text = input.trim().trim_start_matches('@').trim();
        if text.is_empty() {
            return None;
        }

        let mut out = Interval::default();
        let mut tokens = text.split_whitespace().peekable();
        let mut seen = false;

        while let Some(tok) = tokens.next() {
            if tok.contains(':') {
                out.micros = out.micros.checked_add(parse_clock(tok)?)?;
                seen = true;
                continue;
            }

            let split = tok
                .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.'))
                .unwrap_or(tok.len());
            let (num, unit) = tok.split_at(split);
            let num: f64 = num.parse().ok()?;
            let unit = if unit.is_empty() {
                tokens.next()?.to_string()
            } else {
                unit.to_string()
            };

            apply_unit(&mut out, num, &unit.to_lowercase())?;
            seen = true;
        }

        seen.then_some(out)
    }
}

/// Rounds to the nearest integer, `None` when the result does not fit.
fn round_to_i64(v: f64) -> Option<i64> {
    let r = v.round();
    (r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64).then_some(r as i64)
}

fn round_to_i32(v: f64) -> Option<i32> {
    let r = v.round();
    (r.is_finite() && r >= i32::MIN as f64 && r <= i32::MAX as f64).then_some(r as i32)
}

fn parse_clock(tok: &str) -> Option<i64> {
    let negative = tok.starts_with('-');
    let tok = tok.trim_start_matches(['-', '+']);
    let mut parts = tok.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let micros = h
        .checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_mul(USECS_PER_SEC)?
        .checked_add(round_to_i64(s * USECS_PER_SEC as f64)?)?;
    if negative {
        micros.checked_neg()
    } else {
        Some(micros)
    }
}

fn apply_unit(out: &mut Interval, num: f64, unit: &str) -> Option<()> {
    let unit = unit.trim_end_matches(',');
    let usecs = USECS_PER_SEC as f64;
    match unit {
        "y" | "yr" | "yrs" | "year" | "years" => {
            out.months = out.months.checked_add(round_to_i32(num * 12.0)?)?
        }
        "mon" | "mons" | "month" | "months" => {
            out.months = out.months.checked_add(round_to_i32(num)?)?
        }
        "w" | "week" | "weeks" => out.days = out.days.checked_add(round_to_i32(num * 7.0)?)?,
        "d" | "day" | "days" => out.days = out.days.checked_add(round_to_i32(num)?)?,
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            out.micros = out.micros.checked_add(round_to_i64(num * 3600.0 * usecs)?)?
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            out.micros = out.micros.checked_add(round_to_i64(num * 60.0 * usecs)?)?
        }
        "s" | "sec" | "secs" | "second" | "seconds" => {
            out.micros = out.micros.checked_add(round_to_i64(num * usecs)?)?
        }
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            out.micros = out.micros.checked_add(round_to_i64(num * 1000.0)?)?
        }
        "us" | "usec" | "usecs" | "microsecond" | "microseconds" => {
            out.micros = out.micros.checked_add(round_to_i64(num)?)?
        }
        _ => return None,
    }
    Some(())
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.months != 0 {
            parts.push(format!("{} mons", self.months));
        }
        if self.days != 0 {
            parts.push(format!("{} days", self.days));
        }
        if self.micros != 0 || parts.is_empty() {
            let secs = self.micros / USECS_PER_SEC;
            let frac = (self.micros % USECS_PER_SEC).abs();
            let sign = if self.micros < 0 { "-" } else { "" };
            let secs = secs.abs();
            let clock = format!(
                "{sign}{:02}:{:02}:{:02}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            );
            if frac == 0 {
                parts.push(clock);
            } else {
                parts.push(format!("{clock}.{frac:06}"));
            }
        }
        f.write_str(&parts.join(" "))
    }
}

/// How far behind "now" a policy boundary sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lag {
    Integer(i64),
    Interval(Interval),
}

impl Lag {
    /// Decodes a lag from a config value: a JSON integer or interval text.
    pub fn from_json(key: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Lag::Integer).ok_or_else(|| {
                PolicyError::config(format!("could not find valid integer value for \"{key}\""))
            }),
            serde_json::Value::String(s) => Interval::parse(s).map(Lag::Interval).ok_or_else(|| {
                PolicyError::config(format!("could not parse interval for \"{key}\""))
                    .with_detail(format!("invalid input syntax for type interval: \"{s}\""))
            }),
            _ => Err(PolicyError::config(format!(
                "invalid value for \"{key}\": expected integer or interval"
            ))),
        }
    }
}

impl fmt::Display for Lag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lag::Integer(v) => write!(f, "{v}"),
            Lag::Interval(i) => write!(f, "{i}"),
        }
    }
}

/// Midnight of the given instant's UTC date.
pub fn truncate_to_date(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_style_intervals() {
        assert_eq!(Interval::parse("7 days"), Some(Interval::days(7)));
        assert_eq!(
            Interval::parse("1 day 02:00:00"),
            Some(Interval {
                months: 0,
                days: 1,
                micros: 2 * 3600 * USECS_PER_SEC
            })
        );
        assert_eq!(
            Interval::parse("1 year 2 mons"),
            Some(Interval {
                months: 14,
                ..Interval::default()
            })
        );
        assert_eq!(
            Interval::parse("30min"),
            Some(Interval {
                micros: 30 * 60 * USECS_PER_SEC,
                ..Interval::default()
            })
        );
        assert_eq!(Interval::parse("2 weeks"), Some(Interval::days(14)));
    }

    #[test]
    fn rejects_garbage_intervals() {
        assert_eq!(Interval::parse(""), None);
        assert_eq!(Interval::parse("seven days"), None);
        assert_eq!(Interval::parse("7 fortnights"), None);
        assert_eq!(Interval::parse("7"), None);
    }

    #[test]
    fn out_of_range_intervals_are_rejected() {
        assert_eq!(Interval::parse("9999999999999999:00"), None);
        assert_eq!(Interval::parse("-9999999999999999:00"), None);
        assert_eq!(Interval::parse("1:9999999999999999999"), None);
        assert_eq!(Interval::parse("99999999999 days"), None);
        assert_eq!(Interval::parse("300000000 years"), None);
        assert_eq!(Interval::parse("9999999999999 hours"), None);
        let huge = format!("{} seconds", "9".repeat(400));
        assert_eq!(Interval::parse(&huge), None);
        assert_eq!(
            Interval::parse("-01:30"),
            Some(Interval {
                micros: -90 * 60 * USECS_PER_SEC,
                ..Interval::default()
            })
        );
    }

    #[test]
    fn out_of_range_lag_is_a_config_error() {
        let err = Lag::from_json("drop_after", &serde_json::json!("9999999999999999:00"))
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("drop_after"));
    }

    #[test]
    fn subtracts_months_by_calendar() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let one_month = Interval {
            months: 1,
            ..Interval::default()
        };
        let got = one_month.subtract_from(ts).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn formats_values_per_key_type() {
        assert_eq!(PartitionKeyType::BigInt.format_value(-5), "-5");
        assert_eq!(PartitionKeyType::TimestampTz.format_value(i64::MIN), "-infinity");
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            PartitionKeyType::Date.format_value(datetime_to_internal(ts)),
            "2024-01-02"
        );
    }

    #[test]
    fn lag_decodes_from_json() {
        assert_eq!(
            Lag::from_json("drop_after", &serde_json::json!(10)).unwrap(),
            Lag::Integer(10)
        );
        assert_eq!(
            Lag::from_json("drop_after", &serde_json::json!("7 days")).unwrap(),
            Lag::Interval(Interval::days(7))
        );
        assert!(Lag::from_json("drop_after", &serde_json::json!(true))
            .unwrap_err()
            .is_config());
    }
}
