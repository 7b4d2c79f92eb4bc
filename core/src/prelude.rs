use crate::processing::line::LineParameters;
use crate::processing::pulse::PulseEvents;
use serde::{Deserialize, Serialize};

/// Shared configuration for each processing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub cable_length_m: f64,
    pub z0_expected_ohms: f64,
    pub smoothing_window: usize,
    pub polynomial_order: usize,
    /// Shortest flat segment (seconds) accepted as a plateau.
    pub min_plateau_s: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            cable_length_m: 1.5,
            z0_expected_ohms: 50.0,
            smoothing_window: 51,
            polynomial_order: 3,
            min_plateau_s: 20e-9,
        }
    }
}

/// Input payload for a processing stage.
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub time: Vec<f64>,
    pub samples: Vec<f64>,
    pub sample_interval: Option<f64>,
    pub events: Option<PulseEvents>,
}

/// Output produced by each stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub samples: Vec<f64>,
    pub metadata: StageMetadata,
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub events: Option<PulseEvents>,
    pub line: Option<LineParameters>,
    pub notes: Vec<String>,
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("buffer exhaustion: {0}")]
    BufferExhaustion(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Analysis(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl StageError {
    /// Errors caused by the capture itself rather than by the service.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, StageError::InvalidInput(_) | StageError::Analysis(_))
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the chained TDR processing stages.
pub trait ProcessingStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()>;
    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}
