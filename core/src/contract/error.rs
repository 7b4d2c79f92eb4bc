use thiserror::Error;

/// Failure taxonomy for one analysis submission.
///
/// `Display` yields the text shown to the user, so `Server` renders the
/// service's detail verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),
    #[error("could not reach the analysis service: {0}")]
    Network(String),
    #[error("{0}")]
    Server(String),
    #[error("the analysis service returned an unreadable response: {0}")]
    MalformedResponse(String),
}

impl AnalysisError {
    pub fn no_file_selected() -> Self {
        AnalysisError::Validation("no file selected".into())
    }

    /// Fallback message when a non-success response carries no usable detail.
    pub fn http_status(code: u16) -> Self {
        AnalysisError::Server(format!("HTTP error! status: {code}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Validation(_) => "validation",
            AnalysisError::Network(_) => "network",
            AnalysisError::Server(_) => "server",
            AnalysisError::MalformedResponse(_) => "malformed-response",
        }
    }
}
