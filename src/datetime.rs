use chrono::{NaiveDate, NaiveDateTime};

use crate::{Result, SplicerError};

const ABSOLUTE_FORMATS: [&str; 4] = [
    "%Y/%m/%d-%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d-%H:%M",
    "%Y/%m/%d %H:%M",
];

/// Parses a user supplied time into epoch milliseconds.
///
/// Accepted forms:
/// * `now`
/// * epoch seconds (up to 10 digits), `seconds.millis`, or epoch milliseconds
/// * relative `<n><unit>-ago` with units `ms s m h d w n y`
/// * absolute `yyyy/MM/dd[-HH:mm[:ss]]`, read as UTC
pub fn parse_date_time(raw: &str, now_ms: i64) -> Result<i64> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(SplicerError::validation("Missing date time"));
    }

    if value.eq_ignore_ascii_case("now") {
        return Ok(now_ms);
    }

    if let Some(relative) = value.strip_suffix("-ago") {
        let offset = parse_duration_ms(relative)?;
        return Ok(now_ms - offset);
    }

    if value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return parse_epoch(value);
    }

    for format in ABSOLUTE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y/%m/%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    Err(SplicerError::validation(format!("Invalid date time: {}", raw)))
}

fn parse_epoch(value: &str) -> Result<i64> {
    let invalid = || SplicerError::validation(format!("Invalid timestamp: {}", value));

    match value.split_once('.') {
        Some((secs, millis)) => {
            if secs.is_empty() || secs.len() > 10 || millis.len() != 3 || millis.contains('.') {
                return Err(invalid());
            }
            let secs: i64 = secs.parse().map_err(|_| invalid())?;
            let millis: i64 = millis.parse().map_err(|_| invalid())?;
            Ok(secs * 1000 + millis)
        }
        None => {
            let parsed: i64 = value.parse().map_err(|_| invalid())?;
            if value.len() <= 10 {
                Ok(parsed * 1000)
            } else {
                Ok(parsed)
            }
        }
    }
}

/// Parses an interval such as `1h` or `30m` into milliseconds.
pub fn parse_duration_ms(interval: &str) -> Result<i64> {
    let interval = interval.trim();
    let split = interval
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| SplicerError::validation(format!("Missing duration unit: {}", interval)))?;
    if split == 0 {
        return Err(SplicerError::validation(format!(
            "Invalid duration: {}",
            interval
        )));
    }

    let (count, unit) = interval.split_at(split);
    let count: i64 = count
        .parse()
        .map_err(|_| SplicerError::validation(format!("Invalid duration: {}", interval)))?;
    if count <= 0 {
        return Err(SplicerError::validation(format!(
            "Duration must be positive: {}",
            interval
        )));
    }

    let unit_ms: i64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "n" => 30 * 86_400_000,
        "y" => 365 * 86_400_000,
        other => {
            return Err(SplicerError::validation(format!(
                "Unknown duration unit: {}",
                other
            )))
        }
    };

    count
        .checked_mul(unit_ms)
        .ok_or_else(|| SplicerError::validation(format!("Duration too large: {}", interval)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_420_070_400_000;

    #[test]
    fn test_now_and_relative() {
        assert_eq!(parse_date_time("now", NOW).unwrap(), NOW);
        assert_eq!(parse_date_time("1h-ago", NOW).unwrap(), NOW - 3_600_000);
        assert_eq!(parse_date_time("2d-ago", NOW).unwrap(), NOW - 2 * 86_400_000);
        assert_eq!(parse_date_time("500ms-ago", NOW).unwrap(), NOW - 500);
    }

    #[test]
    fn test_epoch_resolution() {
        assert_eq!(parse_date_time("1420070400", NOW).unwrap(), 1_420_070_400_000);
        assert_eq!(parse_date_time("1420070400123", NOW).unwrap(), 1_420_070_400_123);
        assert_eq!(parse_date_time("1420070400.250", NOW).unwrap(), 1_420_070_400_250);
        assert!(parse_date_time("1420070400.25", NOW).is_err());
    }

    #[test]
    fn test_absolute_formats() {
        assert_eq!(parse_date_time("2015/01/01", NOW).unwrap(), NOW);
        assert_eq!(parse_date_time("2015/01/01-00:00:00", NOW).unwrap(), NOW);
        assert_eq!(parse_date_time("2015/01/01 01:00", NOW).unwrap(), NOW + 3_600_000);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_date_time("", NOW).is_err());
        assert!(parse_date_time("yesterday", NOW).is_err());
        assert!(parse_date_time("3x-ago", NOW).is_err());
        assert!(parse_date_time("h-ago", NOW).is_err());
    }
}
