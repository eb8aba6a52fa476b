//! Wire renderings for numeric, boolean and time values.
//!
//! Everything on the wire is a string; each semantic field keeps one fixed
//! convention. Prices carry 5 decimals, money fields 2, times are epoch
//! seconds except the windowed history queries which use the terminal's
//! `YYYY/MM/DD/hh/mm/ss` layout.

use crate::error::ProtocolError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub fn format_price(value: f64) -> String {
    format!("{value:.5}")
}

pub fn format_money(value: f64) -> String {
    format!("{value:.2}")
}

pub fn format_int(value: i64) -> String {
    value.to_string()
}

/// Streaming records use `true`/`false`.
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Command replies that carry a flag use `YES`/`NO`.
pub fn format_yes_no(value: bool) -> &'static str {
    if value {
        "YES"
    } else {
        "NO"
    }
}

pub fn format_epoch(secs: i64) -> String {
    secs.to_string()
}

pub fn format_window_time(time: DateTime<Utc>) -> String {
    time.format("%Y/%m/%d/%H/%M/%S").to_string()
}

pub fn parse_window_time(value: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y/%m/%d/%H/%M/%S")
        .map_err(|e| ProtocolError::ParseFailure(format!("bad window time {value:?}: {e}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn parse_f64(value: &str) -> Result<f64, ProtocolError> {
    value
        .parse()
        .map_err(|e| ProtocolError::ParseFailure(format!("bad float {value:?}: {e}")))
}

pub fn parse_i64(value: &str) -> Result<i64, ProtocolError> {
    value
        .parse()
        .map_err(|e| ProtocolError::ParseFailure(format!("bad integer {value:?}: {e}")))
}

/// Accepts both wire conventions.
pub fn parse_bool(value: &str) -> Result<bool, ProtocolError> {
    match value {
        "true" | "YES" | "1" => Ok(true),
        "false" | "NO" | "0" => Ok(false),
        other => Err(ProtocolError::ParseFailure(format!("bad flag {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_and_money_precision() {
        assert_eq!(format_price(1.1), "1.10000");
        assert_eq!(format_price(0.123456789), "0.12346");
        assert_eq!(format_money(1234.5), "1234.50");
    }

    #[test]
    fn window_time_round_trip() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 13, 45, 10).unwrap();
        let rendered = format_window_time(time);
        assert_eq!(rendered, "2024/03/01/13/45/10");
        assert_eq!(parse_window_time(&rendered).unwrap(), time);
    }

    #[test]
    fn flags_accept_both_conventions() {
        assert!(parse_bool("YES").unwrap());
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("NO").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
