use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{PolicyError, Result};
use crate::partitions::{Dimension, PartitionCatalog};
use crate::time::{
    datetime_to_internal, internal_to_datetime, truncate_to_date, Interval, Lag, PartitionKeyType,
};

/// A point in a dimension's key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub value: i64,
    pub key_type: PartitionKeyType,
}

impl Boundary {
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if self.key_type.is_integer() {
            None
        } else {
            internal_to_datetime(self.value)
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_type.format_value(self.value))
    }
}

/// `now - lag` in `dim`'s key space. Integer dimensions take "now" from their
/// integer-now function, time dimensions from `now`.
pub async fn window_boundary(
    partitions: &dyn PartitionCatalog,
    dim: &Dimension,
    lag: Lag,
    now: DateTime<Utc>,
) -> Result<Boundary> {
    let key_type = dim.key_type;

    if key_type.is_integer() {
        let Lag::Integer(lag) = lag else {
            return Err(PolicyError::config(format!(
                "invalid lag for dimension \"{}\": integer expected for type {key_type}",
                dim.column_name
            )));
        };
        if dim.integer_now_func.is_none() {
            return Err(PolicyError::config(format!(
                "integer_now function not set for dimension \"{}\"",
                dim.column_name
            ))
            .with_hint("Register an integer_now function for the hypertable."));
        }
        let now_value = partitions.integer_now(dim).await?;
        subtract_integer(key_type, now_value, lag).map(|value| Boundary { value, key_type })
    } else {
        let Lag::Interval(lag) = lag else {
            return Err(PolicyError::config(format!(
                "invalid lag for dimension \"{}\": interval expected for type {key_type}",
                dim.column_name
            )));
        };
        subtract_interval(key_type, now, lag).map(|value| Boundary { value, key_type })
    }
}

pub fn subtract_integer(key_type: PartitionKeyType, now: i64, lag: i64) -> Result<i64> {
    now.checked_sub(lag)
        .filter(|v| *v >= key_type.min_value() && *v <= key_type.max_value())
        .ok_or_else(|| {
            PolicyError::config(format!("integer time overflow: {now} - {lag} for type {key_type}"))
        })
}

pub fn subtract_interval(
    key_type: PartitionKeyType,
    now: DateTime<Utc>,
    lag: Interval,
) -> Result<i64> {
    let ts = lag
        .subtract_from(now)
        .ok_or_else(|| PolicyError::config(format!("timestamp out of range: {now} - {lag}")))?;
    let ts = if key_type == PartitionKeyType::Date {
        truncate_to_date(ts)
    } else {
        ts
    };
    Ok(datetime_to_internal(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn integer_subtraction_is_exact_and_unclamped() {
        assert_eq!(subtract_integer(PartitionKeyType::BigInt, 100, 30).unwrap(), 70);
        assert_eq!(subtract_integer(PartitionKeyType::BigInt, 10, 30).unwrap(), -20);
        assert_eq!(subtract_integer(PartitionKeyType::Integer, 0, 0).unwrap(), 0);
    }

    #[test]
    fn integer_subtraction_respects_key_range() {
        assert!(subtract_integer(PartitionKeyType::SmallInt, -32_000, 1_000)
            .unwrap_err()
            .is_config());
        assert!(subtract_integer(PartitionKeyType::BigInt, i64::MIN, 1)
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn interval_subtraction_truncates_dates() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 13, 45, 0).unwrap();
        let got = subtract_interval(PartitionKeyType::Date, now, Interval::days(1)).unwrap();
        let want = Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap();
        assert_eq!(got, datetime_to_internal(want));

        let got = subtract_interval(PartitionKeyType::TimestampTz, now, Interval::days(1)).unwrap();
        let want = Utc.with_ymd_and_hms(2024, 5, 9, 13, 45, 0).unwrap();
        assert_eq!(got, datetime_to_internal(want));
    }
}
