//! Core data contract and signal-processing stages for TDR capture analysis.
//!
//! The client side (request contract, error taxonomy, lifecycle controller)
//! and the service side (capture parsing, processing stages) share the types
//! defined here so both ends agree on the wire shape.

pub mod capture;
pub mod contract;
pub mod lifecycle;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use contract::{AnalysisError, AnalysisRequest, AnalysisResult};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use prelude::{ProcessingStage, StageInput, StageOutput};
