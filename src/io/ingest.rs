//! CSV ingest and grouping.
//!
//! Turns a long-format observation CSV into validated `ExperimentData`:
//!
//! ```text
//! experiment,temperature_k,initial_concentration,time_s,concentration
//! run-a,298.15,10.0,10,8.649
//! ```
//!
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic grouping**: experiments keep first-appearance order,
//!   observations are sorted by time within an experiment
//!
//! The `experiment` column is optional; without it rows are grouped by
//! `(temperature_k, initial_concentration)`.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::{debug, warn};

use crate::domain::ExperimentData;
use crate::error::AppError;

const REQUIRED_COLUMNS: [&str; 4] = ["temperature_k", "initial_concentration", "time_s", "concentration"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub experiment: Option<String>,
    pub message: String,
}

/// Ingest output: grouped experiments + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub experiments: Vec<ExperimentData>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

impl IngestedData {
    pub fn observation_count(&self) -> usize {
        self.experiments.iter().map(ExperimentData::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ObservationRow {
    experiment: String,
    temperature: f64,
    initial_concentration: f64,
    time: f64,
    concentration: f64,
}

#[derive(Debug)]
struct Group {
    label: String,
    temperature: f64,
    initial_concentration: f64,
    first_line: usize,
    observations: Vec<(f64, f64)>,
}

/// Load experiments from a CSV file.
pub fn load_experiments(path: &Path) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    let data = read_experiments(file)?;
    debug!(
        "ingested '{}': {} rows read, {} used, {} experiments",
        path.display(),
        data.rows_read,
        data.rows_used,
        data.experiments.len()
    );
    Ok(data)
}

/// Parse and group experiments from any CSV reader.
pub fn read_experiments<R: Read>(source: R) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map)?;

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_used = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    experiment: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let row = match parse_row(&record, &header_map) {
            Ok(row) => row,
            Err(message) => {
                row_errors.push(RowError {
                    line,
                    experiment: get_optional(&record, &header_map, "experiment").map(str::to_string),
                    message,
                });
                continue;
            }
        };

        let slot = match index.get(&row.experiment) {
            Some(&slot) => slot,
            None => {
                groups.push(Group {
                    label: row.experiment.clone(),
                    temperature: row.temperature,
                    initial_concentration: row.initial_concentration,
                    first_line: line,
                    observations: Vec::new(),
                });
                index.insert(row.experiment.clone(), groups.len() - 1);
                groups.len() - 1
            }
        };

        let group = &mut groups[slot];
        if row.temperature != group.temperature || row.initial_concentration != group.initial_concentration {
            return Err(AppError::new(
                2,
                format!(
                    "Experiment '{}' (line {line}): temperature/initial concentration differ from line {} ({} K, {} vs {} K, {}).",
                    group.label,
                    group.first_line,
                    row.temperature,
                    row.initial_concentration,
                    group.temperature,
                    group.initial_concentration
                ),
            ));
        }
        group.observations.push((row.time, row.concentration));
        rows_used += 1;
    }

    if !row_errors.is_empty() {
        warn!("skipped {} invalid CSV rows", row_errors.len());
    }
    if rows_used == 0 {
        return Err(AppError::new(2, "No valid observation rows in CSV."));
    }

    let experiments = groups
        .into_iter()
        .map(into_experiment)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IngestedData {
        experiments,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn into_experiment(mut group: Group) -> Result<ExperimentData, AppError> {
    group.observations.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (times, concentrations): (Vec<f64>, Vec<f64>) = group.observations.into_iter().unzip();
    ExperimentData::with_label(
        group.label,
        group.temperature,
        group.initial_concentration,
        times,
        concentrations,
    )
    .map_err(AppError::from)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Strip a UTF-8 BOM from the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    for name in REQUIRED_COLUMNS {
        if !header_map.contains_key(name) {
            return Err(AppError::new(2, format!("Missing required column: `{name}`")));
        }
    }
    Ok(())
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<ObservationRow, String> {
    let temperature = parse_f64(get_required(record, header_map, "temperature_k")?, "temperature_k")?;
    let initial_concentration = parse_f64(
        get_required(record, header_map, "initial_concentration")?,
        "initial_concentration",
    )?;
    let time = parse_f64(get_required(record, header_map, "time_s")?, "time_s")?;
    let concentration = parse_f64(get_required(record, header_map, "concentration")?, "concentration")?;

    if temperature <= 0.0 {
        return Err(format!("Invalid `temperature_k` {temperature} (must be > 0)."));
    }
    if initial_concentration < 0.0 {
        return Err(format!(
            "Invalid `initial_concentration` {initial_concentration} (must be >= 0)."
        ));
    }
    if time <= 0.0 {
        return Err(format!("Invalid `time_s` {time} (must be > 0)."));
    }
    if concentration < 0.0 {
        return Err(format!("Invalid `concentration` {concentration} (must be >= 0)."));
    }

    let experiment = match get_optional(record, header_map, "experiment") {
        Some(label) => label.to_string(),
        // `Display` of f64 round-trips, so distinct conditions never share a label.
        None => format!("{temperature} K / C0={initial_concentration}"),
    };

    Ok(ObservationRow {
        experiment,
        temperature,
        initial_concentration,
        time,
        concentration,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid `{name}` value '{s}'.")),
    }
}
