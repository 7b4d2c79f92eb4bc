//! Wire contract between the analysis client and the analysis service.

pub mod error;
pub mod request;
pub mod result;

pub use error::AnalysisError;
pub use request::{AnalysisParameters, AnalysisRequest, FileSelection, RequestSummary};
pub use result::{AnalysisResult, LoadType, WaveformPoint};

use std::future::Future;

/// Relative path of the analysis endpoint.
pub const ANALYZE_PATH: &str = "/api/analyze-tdr";

/// Anything able to carry one analysis request to the service and back.
pub trait AnalysisTransport {
    fn submit(
        &self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send;
}
