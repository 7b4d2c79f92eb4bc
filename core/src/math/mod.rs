pub mod gradient;
pub mod matrix;
pub mod savgol;
pub mod stats;

pub use gradient::GradientHelper;
pub use matrix::MatrixHelper;
pub use savgol::SavitzkyGolay;
pub use stats::StatsHelper;
