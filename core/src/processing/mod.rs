pub mod buffer_pool;
pub mod line;
pub mod pulse;
pub mod smoothing;

pub use buffer_pool::BufferPool;
pub use line::{LineParameters, LineStage};
pub use pulse::{PulseEvents, PulseStage};
pub use smoothing::SmoothingStage;
