//! Purpose: Typed crash record model with lenient coercion from portal JSON.
//! Exports: `CrashRecord`, `records_from_value`, `records_from_str`.
//! Role: Bridge between decoded portal payloads and the SQL emitter.
//! Invariants: Field coercion is per-record non-fatal; wrong types become `None`.
//! Invariants: A non-array payload or non-object record is a `Validation` error.
//! Notes: Source keys are the portal's PascalCase names and are never renamed.

use crate::core::error::{Error, ErrorKind};
use serde_json::Value;

/// One collision record as reported by the portal. Every field is optional;
/// absent or uncoercible fields render as SQL `NULL` downstream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrashRecord {
    pub report_number: Option<String>,
    pub jurisdiction: Option<String>,
    pub region: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
    pub full_date: Option<String>,
    pub full_time: Option<String>,
    pub injury_type: Option<String>,
    pub age_group: Option<String>,
    pub involved_persons: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CrashRecord {
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let Some(map) = value.as_object() else {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("record is not a JSON object")
                .with_hint("Each element of the payload array must be an object."));
        };
        Ok(Self {
            report_number: text_field(map.get("ColliRptNum")),
            jurisdiction: text_field(map.get("Jurisdiction")),
            region: text_field(map.get("RegionName")),
            county: text_field(map.get("CountyName")),
            city: text_field(map.get("CityName")),
            full_date: text_field(map.get("FullDate")),
            full_time: text_field(map.get("FullTime")),
            injury_type: text_field(map.get("MostSevereInjuryType")),
            age_group: text_field(map.get("AgeGroup")),
            involved_persons: count_field(map.get("InvolvedPersons")),
            latitude: float_field(map.get("Latitude")),
            longitude: float_field(map.get("Longitude")),
        })
    }
}

/// Parse a decoded payload into records. The payload must be an array of objects.
pub fn records_from_value(value: &Value) -> Result<Vec<CrashRecord>, Error> {
    let Some(items) = value.as_array() else {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("payload is not a JSON array of records")
            .with_hint("Run the payload through the dequoter first."));
    };
    items.iter().map(CrashRecord::from_value).collect()
}

/// Parse record text (already dequoted) into records.
pub fn records_from_str(text: &str) -> Result<Vec<CrashRecord>, Error> {
    let value: Value = serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("record payload is not valid JSON")
            .with_source(err)
    })?;
    records_from_value(&value)
}

fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn float_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
