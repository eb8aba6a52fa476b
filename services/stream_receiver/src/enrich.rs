//! Timestamp enrichment for pushed records.
//!
//! Terminal records carry raw epoch seconds in `time` fields. Before a frame
//! is handed to consumers, every mapping that holds one, at any nesting
//! depth, gets a sibling `time_human` with the UTC calendar rendering.

use chrono::{TimeZone, Utc};
use serde_json::Value;

pub const HUMAN_TIME_KEY: &str = "time_human";
const EPOCH_TIME_KEY: &str = "time";

/// Depth-first walk appending `time_human` wherever a raw `time` is found.
pub fn enrich_timestamps(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(human) = map.get(EPOCH_TIME_KEY).and_then(epoch_seconds).and_then(render_utc)
            {
                map.insert(HUMAN_TIME_KEY.to_string(), Value::String(human));
            }
            for (_, nested) in map.iter_mut() {
                enrich_timestamps(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                enrich_timestamps(item);
            }
        }
        _ => {}
    }
}

fn epoch_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn render_utc(secs: i64) -> Option<String> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_time_gets_human_sibling() {
        let mut record = json!({"type": "tick", "time": 1_700_000_000});
        enrich_timestamps(&mut record);
        assert_eq!(record["time_human"], "2023-11-14 22:13:20");
        assert_eq!(record["time"], 1_700_000_000);
    }

    #[test]
    fn nested_occurrences_are_enriched_independently() {
        let mut record = json!({
            "symbol": "EURUSD",
            "bars": [
                {"time": 1_700_000_000, "close": 1.085},
                {"time": 1_700_000_060, "close": 1.086}
            ],
            "meta": {"server": {"time": 1_700_000_120}}
        });
        enrich_timestamps(&mut record);
        assert_eq!(record["bars"][0]["time_human"], "2023-11-14 22:13:20");
        assert_eq!(record["bars"][1]["time_human"], "2023-11-14 22:14:20");
        assert_eq!(record["meta"]["server"]["time_human"], "2023-11-14 22:15:20");
    }

    #[test]
    fn non_numeric_time_is_left_alone() {
        let mut record = json!({"time": "yesterday"});
        enrich_timestamps(&mut record);
        assert!(record.get("time_human").is_none());
    }

    #[test]
    fn scalars_and_arrays_pass_through() {
        let mut scalar = json!(42);
        enrich_timestamps(&mut scalar);
        assert_eq!(scalar, json!(42));

        let mut list = json!([{"time": 1_700_000_000}]);
        enrich_timestamps(&mut list);
        assert_eq!(list[0]["time_human"], "2023-11-14 22:13:20");
    }
}
