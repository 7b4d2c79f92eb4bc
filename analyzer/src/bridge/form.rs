use futures_util::TryStreamExt;
use tdrcore::contract::request::DEFAULT_Z0_OHMS;
use tdrcore::contract::AnalysisParameters;
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};
use warp::Buf;

/// Raw multipart fields the service understands.
#[derive(Debug, Default)]
pub struct UploadFields {
    pub file: Option<(String, Vec<u8>)>,
    pub cable_length: Option<String>,
    pub z0_expected: Option<String>,
}

/// A validated analysis upload.
#[derive(Debug)]
pub struct AnalysisUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub parameters: AnalysisParameters,
}

/// Why an upload was refused before any processing ran.
#[derive(Debug, Clone, PartialEq)]
pub enum FormRejection {
    Missing(&'static str),
    Unreadable(String),
    Invalid(String),
}

impl FormRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            FormRejection::Missing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FormRejection::Unreadable(_) | FormRejection::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            FormRejection::Missing(field) => format!("Missing required field: {field}"),
            FormRejection::Unreadable(reason) => format!("Invalid multipart body: {reason}"),
            FormRejection::Invalid(reason) => reason.clone(),
        }
    }
}

async fn read_part(part: Part) -> Result<Vec<u8>, warp::Error> {
    part.stream()
        .try_fold(Vec::new(), |mut bytes, chunk| async move {
            bytes.extend_from_slice(chunk.chunk());
            Ok(bytes)
        })
        .await
}

/// Reads every part of the form in order. Unknown fields are skipped.
pub async fn collect_fields(mut form: FormData) -> Result<UploadFields, FormRejection> {
    let mut fields = UploadFields::default();
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|err| FormRejection::Unreadable(err.to_string()))?
    {
        let name = part.name().to_string();
        let file_name = part.filename().map(str::to_string);
        let bytes = read_part(part)
            .await
            .map_err(|err| FormRejection::Unreadable(err.to_string()))?;
        match name.as_str() {
            "file" => fields.file = Some((file_name.unwrap_or_default(), bytes)),
            "cable_length" => fields.cable_length = Some(text_value(&bytes)),
            "z0_expected" => fields.z0_expected = Some(text_value(&bytes)),
            other => log::debug!("ignoring form field {other:?}"),
        }
    }
    Ok(fields)
}

fn text_value(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn positive(field: &'static str, raw: &str) -> Result<f64, FormRejection> {
    let value: f64 = raw
        .parse()
        .map_err(|_| FormRejection::Invalid(format!("{field} must be a number, got {raw:?}")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(FormRejection::Invalid(format!("{field} must be positive")));
    }
    Ok(value)
}

/// Checks the uploaded file is a non-empty `.csv`.
pub fn require_csv(file: Option<(String, Vec<u8>)>) -> Result<(String, Vec<u8>), FormRejection> {
    let (file_name, bytes) = file.ok_or(FormRejection::Missing("file"))?;
    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(FormRejection::Invalid("File must be a CSV file".into()));
    }
    if bytes.is_empty() {
        return Err(FormRejection::Invalid("Uploaded file is empty".into()));
    }
    Ok((file_name, bytes))
}

impl UploadFields {
    pub fn into_analysis(self) -> Result<AnalysisUpload, FormRejection> {
        let (file_name, bytes) = require_csv(self.file)?;
        let cable_length = self
            .cable_length
            .ok_or(FormRejection::Missing("cable_length"))?;
        let cable_length_m = positive("cable_length", &cable_length)?;
        let z0_expected_ohms = match self.z0_expected.as_deref() {
            Some(raw) if !raw.is_empty() => positive("z0_expected", raw)?,
            _ => DEFAULT_Z0_OHMS,
        };
        Ok(AnalysisUpload {
            file_name,
            bytes,
            parameters: AnalysisParameters {
                cable_length_m,
                z0_expected_ohms,
            },
        })
    }
}
