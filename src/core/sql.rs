//! Purpose: Emit batched PostGIS insert scripts from crash records.
//! Exports: `DEFAULT_BATCH_SIZE`, `ScriptOptions`, `generate_sql`.
//! Role: Pure text emitter; callers execute the script elsewhere.
//! Invariants: Column set and order are fixed; conflicts are ignored, never merged.
//! Invariants: Absent or uncoercible values render as bare `NULL`.
//! Invariants: Generation calls share no state; records are never deduplicated.

use crate::core::error::{Error, ErrorKind};
use crate::core::record::CrashRecord;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const DEFAULT_BATCH_SIZE: usize = 500;

const TABLE: &str = "crashdata";
const CONFLICT_CLAUSE: &str = "ON CONFLICT (\"ColliRptNum\") DO NOTHING;";
const STATE_NAME: &str = "Washington";

/// Placeholder the portal emits for regions it could not resolve.
const REGION_PLACEHOLDER: &str = "'";

const COLUMNS: [&str; 16] = [
    "ColliRptNum",
    "Jurisdiction",
    "StateOrProvinceName",
    "RegionName",
    "CountyName",
    "CityName",
    "FullDate",
    "CrashDate",
    "FullTime",
    "MostSevereInjuryType",
    "AgeGroup",
    "InvolvedPersons",
    "Latitude",
    "Longitude",
    "Mode",
    "geom",
];

#[derive(Clone, Debug)]
pub struct ScriptOptions {
    pub batch_size: usize,
    /// Fixed header timestamp; `None` stamps the current UTC time.
    pub generated_at: Option<OffsetDateTime>,
}

impl ScriptOptions {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            generated_at: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_generated_at(mut self, generated_at: OffsetDateTime) -> Self {
        self.generated_at = Some(generated_at);
        self
    }
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Render records into one `INSERT` statement per `batch_size` chunk, all
/// stamped with the caller's mode label.
pub fn generate_sql(
    records: &[CrashRecord],
    mode: &str,
    options: &ScriptOptions,
) -> Result<String, Error> {
    if options.batch_size == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("batch size must be greater than zero")
            .with_hint("Use a positive value like 500."));
    }

    let generated_at = options.generated_at.unwrap_or_else(OffsetDateTime::now_utc);
    let mut script = format!(
        "-- Mode: {mode}\n-- Generated: {}\n-- Records: {}\n",
        format_timestamp(generated_at),
        records.len()
    );

    for chunk in records.chunks(options.batch_size) {
        script.push('\n');
        script.push_str(&format!("INSERT INTO {TABLE} ({})\nVALUES\n", column_list()));
        let rows = chunk
            .iter()
            .map(|record| format!("  {}", render_row(record, mode)))
            .collect::<Vec<_>>()
            .join(",\n");
        script.push_str(&rows);
        script.push('\n');
        script.push_str(CONFLICT_CLAUSE);
        script.push('\n');
    }

    Ok(script)
}

fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_row(record: &CrashRecord, mode: &str) -> String {
    let values = [
        text_literal(record.report_number.as_deref()),
        text_literal(record.jurisdiction.as_deref()),
        quote_literal(STATE_NAME),
        region_literal(record.region.as_deref()),
        text_literal(record.county.as_deref()),
        text_literal(record.city.as_deref()),
        text_literal(record.full_date.as_deref()),
        crash_date_literal(record.full_date.as_deref()),
        text_literal(record.full_time.as_deref()),
        text_literal(record.injury_type.as_deref()),
        age_group_literal(record.age_group.as_deref()),
        count_literal(record.involved_persons),
        float_literal(record.latitude),
        float_literal(record.longitude),
        quote_literal(mode),
        geom_literal(record.longitude, record.latitude),
    ];
    format!("({})", values.join(", "))
}

/// Single-quote a string, doubling embedded single quotes.
fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn text_literal(value: Option<&str>) -> String {
    match value {
        Some(text) => quote_literal(text),
        None => "NULL".to_string(),
    }
}

fn region_literal(value: Option<&str>) -> String {
    match value {
        Some(REGION_PLACEHOLDER) | None => "NULL".to_string(),
        Some(text) => quote_literal(text),
    }
}

fn age_group_literal(value: Option<&str>) -> String {
    match value {
        Some(text) if !text.trim().is_empty() => quote_literal(text),
        _ => "NULL".to_string(),
    }
}

/// Date portion of FullDate: the first 10 bytes, NULL when the slice is
/// unavailable (short value or a multibyte boundary).
fn crash_date_literal(full_date: Option<&str>) -> String {
    match full_date.and_then(|date| date.get(..10)) {
        Some(date) => quote_literal(date),
        None => "NULL".to_string(),
    }
}

fn count_literal(value: Option<i64>) -> String {
    match value {
        Some(count) => count.to_string(),
        None => "NULL".to_string(),
    }
}

fn float_literal(value: Option<f64>) -> String {
    match value {
        Some(number) if number.is_finite() => format!("{number:?}"),
        _ => "NULL".to_string(),
    }
}

/// PostGIS point literal, longitude first. Missing coordinates still occupy
/// their positions as NULL so the call shape stays fixed.
fn geom_literal(longitude: Option<f64>, latitude: Option<f64>) -> String {
    format!(
        "ST_SetSRID(ST_MakePoint({}, {}), 4326)",
        float_literal(longitude),
        float_literal(latitude)
    )
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}
