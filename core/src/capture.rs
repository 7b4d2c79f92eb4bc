//! Oscilloscope CSV capture parsing.
//!
//! An export starts with a fixed block of `Key: value` header lines describing
//! the acquisition, followed by headerless `time,voltage[,...]` rows.

use serde::Serialize;
use thiserror::Error;

/// Number of header lines preceding the sample rows.
pub const HEADER_LINES: usize = 11;

/// Largest share of unreadable rows that is silently dropped.
const MAX_INVALID_FRACTION: f64 = 0.2;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("header {key:?} has a non-numeric value {value:?}")]
    Header { key: String, value: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV must have at least two columns")]
    TooFewColumns,
    #[error("capture contains no data rows")]
    Empty,
    #[error("too many invalid values: {invalid}/{total} rows are unreadable")]
    TooManyInvalid { invalid: usize, total: usize },
}

/// Acquisition settings recovered from the header block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_scale: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub settings: CaptureSettings,
    /// Rows dropped because a cell was unreadable or time did not advance.
    pub dropped_rows: usize,
}

impl Capture {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

pub fn parse_capture(bytes: &[u8]) -> Result<Capture, CaptureError> {
    let text = std::str::from_utf8(bytes)?;
    let lines: Vec<&str> = text.split('\n').collect();
    let header_end = lines.len().min(HEADER_LINES);

    let settings = parse_settings(&lines[..header_end])?;
    let body = lines[header_end..].join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut time = Vec::new();
    let mut voltage = Vec::new();
    let mut widest = 0;
    let mut total = 0;

    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        total += 1;
        widest = widest.max(record.len());

        let t = record.get(0).and_then(parse_cell);
        let v = record.get(1).and_then(parse_cell);
        if let (Some(t), Some(v)) = (t, v) {
            if time.last().map_or(true, |&last| t > last) {
                time.push(t);
                voltage.push(v);
            }
        }
    }

    if total == 0 {
        return Err(CaptureError::Empty);
    }
    if widest < 2 {
        return Err(CaptureError::TooFewColumns);
    }

    let invalid = total - time.len();
    if invalid as f64 > total as f64 * MAX_INVALID_FRACTION {
        return Err(CaptureError::TooManyInvalid { invalid, total });
    }

    if let Some(offset) = settings.vertical_offset {
        voltage.iter_mut().for_each(|v| *v += offset);
    }

    Ok(Capture {
        time,
        voltage,
        settings,
        dropped_rows: invalid,
    })
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_settings(lines: &[&str]) -> Result<CaptureSettings, CaptureError> {
    let mut settings = CaptureSettings::default();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        let first_field = || {
            let field = value.split(',').next().unwrap_or("").trim();
            field.parse::<f64>().map_err(|_| CaptureError::Header {
                key: key.to_string(),
                value: value.to_string(),
            })
        };

        if key.contains("Sample Interval") {
            settings.sample_interval = Some(first_field()?);
        } else if key.contains("Vertical Scale") {
            settings.vertical_scale = Some(first_field()?);
        } else if key.contains("Vertical Offset") {
            settings.vertical_offset = Some(first_field()?);
        } else if key.contains("Horizontal Scale") {
            let parsed = value.parse::<f64>().map_err(|_| CaptureError::Header {
                key: key.to_string(),
                value: value.to_string(),
            })?;
            settings.horizontal_scale = Some(parsed);
        }
    }
    Ok(settings)
}
