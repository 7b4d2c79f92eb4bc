use crate::contract::error::AnalysisError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CABLE_LENGTH_M: f64 = 1.5;
pub const DEFAULT_Z0_OHMS: f64 = 50.0;

/// Numeric inputs that accompany every capture upload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParameters {
    pub cable_length_m: f64,
    pub z0_expected_ohms: f64,
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            cable_length_m: DEFAULT_CABLE_LENGTH_M,
            z0_expected_ohms: DEFAULT_Z0_OHMS,
        }
    }
}

/// A file picked by the user, before it becomes a request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSelection {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileSelection {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// One submission to the analysis service. Only constructible with a
/// non-empty file.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    file_name: String,
    file: Vec<u8>,
    parameters: AnalysisParameters,
}

impl AnalysisRequest {
    pub fn new(
        selection: Option<FileSelection>,
        parameters: AnalysisParameters,
    ) -> Result<Self, AnalysisError> {
        let selection = selection.ok_or_else(AnalysisError::no_file_selected)?;
        if selection.bytes.is_empty() {
            return Err(AnalysisError::Validation(format!(
                "{} is empty",
                selection.name
            )));
        }
        Ok(Self {
            file_name: selection.name,
            file: selection.bytes,
            parameters,
        })
    }

    pub fn with_defaults(selection: FileSelection) -> Result<Self, AnalysisError> {
        Self::new(Some(selection), AnalysisParameters::default())
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file(&self) -> &[u8] {
        &self.file
    }

    pub fn parameters(&self) -> AnalysisParameters {
        self.parameters
    }

    /// Text form fields sent next to the file, in wire order.
    pub fn form_fields(&self) -> [(&'static str, String); 2] {
        [
            ("cable_length", self.parameters.cable_length_m.to_string()),
            ("z0_expected", self.parameters.z0_expected_ohms.to_string()),
        ]
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            file_name: self.file_name.clone(),
            size_bytes: self.file.len(),
            parameters: self.parameters,
        }
    }

    pub fn into_parts(self) -> (String, Vec<u8>, AnalysisParameters) {
        (self.file_name, self.file, self.parameters)
    }
}

/// What the lifecycle remembers about an in-flight request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    pub file_name: String,
    pub size_bytes: usize,
    pub parameters: AnalysisParameters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sent_when_not_overridden() {
        let request =
            AnalysisRequest::with_defaults(FileSelection::new("a.csv", b"0,1\n".to_vec())).unwrap();
        let fields = request.form_fields();
        assert_eq!(fields[0], ("cable_length", "1.5".to_string()));
        assert_eq!(fields[1], ("z0_expected", "50".to_string()));
    }

    #[test]
    fn missing_file_is_a_validation_error() {
        let err = AnalysisRequest::new(None, AnalysisParameters::default()).unwrap_err();
        assert_eq!(err, AnalysisError::no_file_selected());
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = AnalysisRequest::with_defaults(FileSelection::new("blank.csv", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }
}
