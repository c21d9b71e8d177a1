use crate::models::ProductionReading;
use chrono::{DateTime, MappedLocalTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

// ── Load curve payload ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoadCurveResponse {
    pub meter_reading: MeterReading,
}

#[derive(Debug, Deserialize)]
pub struct MeterReading {
    #[serde(default)]
    pub usage_point_id: Option<String>,
    #[serde(default)]
    pub interval_reading: Vec<IntervalReading>,
}

/// `value` arrives as a string on the v5 API, as a number on some mirrors.
#[derive(Debug, Deserialize)]
pub struct IntervalReading {
    pub value: serde_json::Value,
    pub date: String,
}

// ── Parsers ───────────────────────────────────────────────────────────────────

pub fn parse_value(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a gateway timestamp given in local time.
/// "2025-06-01 00:30:00" | "2025-06-01T00:30:00"
///
/// On the autumn DST fold a local time exists twice. The first occurrence is
/// taken unless `previous` (the instant of the preceding reading) already
/// reached it, in which case this is the second pass through the repeated hour.
pub fn parse_local_timestamp(
    s: &str,
    tz: Tz,
    previous: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;

    match tz.from_local_datetime(&naive) {
        MappedLocalTime::Single(dt) => Some(dt.with_timezone(&Utc)),
        MappedLocalTime::Ambiguous(first, second) => {
            let first = first.with_timezone(&Utc);
            if previous.is_some_and(|p| p >= first) {
                Some(second.with_timezone(&Utc))
            } else {
                Some(first)
            }
        }
        MappedLocalTime::None => None,
    }
}

pub fn wh_to_kwh(wh: f64) -> f64 {
    wh / 1000.0
}

/// Convert a load curve into readings sorted by timestamp. Malformed rows are skipped.
pub fn to_readings(resp: LoadCurveResponse, tz: Tz) -> Vec<ProductionReading> {
    // Rows arrive in chronological order; the previous instant disambiguates the DST fold.
    let mut previous: Option<DateTime<Utc>> = None;
    let mut readings: Vec<ProductionReading> = Vec::new();
    for r in &resp.meter_reading.interval_reading {
        let Some(timestamp) = parse_local_timestamp(&r.date, tz, previous) else {
            warn!("Unparseable reading date {:?}", r.date);
            continue;
        };
        previous = Some(timestamp);
        let Some(production_wh) = parse_value(&r.value) else {
            warn!("Unparseable reading value {:?} at {}", r.value, r.date);
            continue;
        };
        readings.push(ProductionReading {
            timestamp,
            production_wh,
        });
    }

    readings.sort_by_key(|r| r.timestamp);
    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Paris;
    use serde_json::json;

    #[test]
    fn test_parse_local_timestamp() {
        let t = parse_local_timestamp("2025-06-01 00:30:00", Paris, None).unwrap();
        assert_eq!(t.to_rfc3339(), "2025-05-31T22:30:00+00:00");

        let winter = parse_local_timestamp("2025-01-15T12:00:00", Paris, None).unwrap();
        assert_eq!(winter.to_rfc3339(), "2025-01-15T11:00:00+00:00");

        assert!(parse_local_timestamp("15/01/2025", Paris, None).is_none());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(&json!("1234")), Some(1234.0));
        assert_eq!(parse_value(&json!(12.5)), Some(12.5));
        assert_eq!(parse_value(&json!(null)), None);
    }

    #[test]
    fn test_to_readings_skips_bad_rows() {
        let resp: LoadCurveResponse = serde_json::from_value(json!({
            "meter_reading": {
                "usage_point_id": "30001234567890",
                "interval_reading": [
                    {"value": "800", "date": "2025-06-01 01:00:00", "interval_length": "PT30M"},
                    {"value": "400", "date": "2025-06-01 00:30:00", "interval_length": "PT30M"},
                    {"value": "oops", "date": "2025-06-01 01:30:00"},
                    {"value": "10", "date": "not a date"}
                ]
            }
        }))
        .unwrap();

        let readings = to_readings(resp, Paris);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].production_wh, 400.0);
        assert_eq!(readings[1].production_wh, 800.0);
        assert!((wh_to_kwh(readings[1].production_wh) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_autumn_fold_keeps_both_passes() {
        // 2025-10-26: Paris clocks go back from 03:00 CEST to 02:00 CET.
        let dates = [
            "2025-10-26 01:30:00",
            "2025-10-26 02:00:00",
            "2025-10-26 02:30:00",
            "2025-10-26 02:00:00",
            "2025-10-26 02:30:00",
            "2025-10-26 03:00:00",
        ];
        let rows: Vec<_> = dates
            .iter()
            .enumerate()
            .map(|(i, d)| json!({"value": (i * 100).to_string(), "date": d}))
            .collect();
        let resp: LoadCurveResponse =
            serde_json::from_value(json!({"meter_reading": {"interval_reading": rows}})).unwrap();

        let utc: Vec<String> = to_readings(resp, Paris)
            .iter()
            .map(|r| r.timestamp.format("%d %H:%M").to_string())
            .collect();
        assert_eq!(
            utc,
            vec!["25 23:30", "26 00:00", "26 00:30", "26 01:00", "26 01:30", "26 02:00"]
        );
    }
}
