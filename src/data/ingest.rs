//! Delimited text ingestion
//!
//! Reads the normal and attack captures. Timestamp and label columns are
//! dropped from the feature set, decimal commas are rewritten to points and
//! every remaining field must parse as a number.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Series;
use crate::error::{Result, UsadError};

/// Options for reading one capture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Field separator
    pub delimiter: char,
    /// Columns removed before numeric parsing
    pub drop_columns: Vec<String>,
    /// Column holding the per-row ground truth, kept aside as labels
    pub label_column: Option<String>,
    /// Read at most this many data rows
    pub row_limit: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            drop_columns: vec!["Timestamp".to_string(), "Normal/Attack".to_string()],
            label_column: Some("Normal/Attack".to_string()),
            row_limit: None,
        }
    }
}

impl IngestOptions {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_row_limit(mut self, limit: Option<usize>) -> Self {
        self.row_limit = limit;
        self
    }
}

/// A parsed capture: numeric features plus optional per-row labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSeries {
    pub series: Series,
    /// 1 for rows marked as attack, 0 otherwise
    pub labels: Option<Vec<u8>>,
}

impl LabeledSeries {
    pub fn unlabeled(series: Series) -> Self {
        Self {
            series,
            labels: None,
        }
    }

    /// Check that `other` carries the same feature columns in the same order.
    pub fn ensure_same_features(&self, other: &LabeledSeries) -> Result<()> {
        let ours = self.series.columns();
        let theirs = other.series.columns();
        if ours.len() != theirs.len() {
            return Err(UsadError::data_format(format!(
                "feature count mismatch: {} columns vs {} columns",
                ours.len(),
                theirs.len()
            )));
        }
        if let Some((a, b)) = ours.iter().zip(theirs).find(|(a, b)| a != b) {
            return Err(UsadError::data_format(format!(
                "feature column mismatch: '{}' vs '{}'",
                a, b
            )));
        }
        Ok(())
    }
}

/// Read a capture file from disk.
pub fn load_series(path: &Path, options: &IngestOptions) -> Result<LabeledSeries> {
    let file = File::open(path).map_err(|e| UsadError::file(path, e))?;
    let parsed = parse_series(BufReader::new(file), options)?;
    info!(
        "Loaded {} rows x {} features from {}",
        parsed.series.len(),
        parsed.series.feature_count(),
        path.display()
    );
    Ok(parsed)
}

/// Parse delimited text with a header row.
pub fn parse_series<R: BufRead>(reader: R, options: &IngestOptions) -> Result<LabeledSeries> {
    let mut lines = reader.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line?;
                let line = line.trim_start_matches('\u{feff}');
                if !line.trim().is_empty() {
                    break line.to_string();
                }
            }
            None => return Err(UsadError::EmptyInput("file has no header row".into())),
        }
    };

    let names: Vec<String> = header
        .split(options.delimiter)
        .map(|name| clean_field(name).to_string())
        .collect();

    let dropped: Vec<bool> = names
        .iter()
        .map(|name| options.drop_columns.iter().any(|d| d.trim() == name))
        .collect();
    for column in &options.drop_columns {
        if !names.iter().any(|n| n == column.trim()) {
            debug!("Drop column '{}' not present in header", column);
        }
    }

    let label_index = options
        .label_column
        .as_ref()
        .and_then(|label| names.iter().position(|n| n == label.trim()));

    let columns: Vec<String> = names
        .iter()
        .zip(&dropped)
        .filter(|(_, &drop)| !drop)
        .map(|(name, _)| name.clone())
        .collect();
    if columns.is_empty() {
        return Err(UsadError::data_format("no feature columns left after dropping"));
    }

    let mut values = Vec::new();
    let mut labels = label_index.map(|_| Vec::new());
    let mut rows = 0usize;

    for (line_num, line) in lines {
        if options.row_limit.is_some_and(|limit| rows >= limit) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(options.delimiter).collect();
        if fields.len() != names.len() {
            return Err(UsadError::data_format(format!(
                "line {} has {} fields, header has {}",
                line_num + 1,
                fields.len(),
                names.len()
            )));
        }

        for (col, field) in fields.iter().enumerate() {
            if dropped[col] {
                continue;
            }
            values.push(parse_number(field).ok_or_else(|| {
                UsadError::data_format(format!(
                    "line {}, column '{}': '{}' is not numeric",
                    line_num + 1,
                    names[col],
                    field.trim()
                ))
            })?);
        }

        if let (Some(index), Some(labels)) = (label_index, labels.as_mut()) {
            labels.push(parse_label(fields[index]));
        }
        rows += 1;
    }

    if rows == 0 {
        return Err(UsadError::EmptyInput("file has no data rows".into()));
    }

    debug!(
        "Parsed {} rows, kept {} of {} columns",
        rows,
        columns.len(),
        names.len()
    );

    Ok(LabeledSeries {
        series: Series::new(columns, values)?,
        labels,
    })
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Parse a numeric field, accepting a comma as decimal separator.
/// `NaN` and infinities are not readings.
fn parse_number(field: &str) -> Option<f64> {
    let normalized = clean_field(field).replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Map a ground-truth field to 0/1. "Attack" (any case or spacing) and
/// non-zero numbers are anomalies.
fn parse_label(field: &str) -> u8 {
    let compact: String = clean_field(field)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if compact.contains("attack") {
        return 1;
    }
    match parse_number(&compact) {
        Some(v) if v != 0.0 => 1,
        _ => 0,
    }
}
