use crate::math::savgol::SavitzkyGolay;
use crate::math::stats::StatsHelper;
use crate::prelude::{
    ProcessingStage, StageConfig, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::processing::buffer_pool::BufferPool;
use crate::telemetry::log::LogManager;

/// Savitzky-Golay smoothing of the raw capture voltage.
pub struct SmoothingStage {
    pool: BufferPool,
    config: Option<StageConfig>,
    filter: Option<SavitzkyGolay>,
    logger: LogManager,
}

impl SmoothingStage {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: BufferPool::with_capacity(pool_size),
            config: None,
            filter: None,
            logger: LogManager::new("smoothing"),
        }
    }

    /// Returns a buffer handed out by [`ProcessingStage::execute`] so the next
    /// run can reuse it.
    pub fn release(&mut self, buffer: Vec<f64>) {
        self.pool.release(buffer);
    }

    /// Largest odd window not exceeding either the configured window or the trace.
    fn effective_window(configured: usize, samples: usize) -> usize {
        let odd_fit = if samples % 2 == 0 {
            samples.saturating_sub(1)
        } else {
            samples
        };
        configured.min(odd_fit)
    }

    fn filter_for(&mut self, window: usize, order: usize) -> StageResult<&SavitzkyGolay> {
        let order = order.min(window - 1);
        let stale = self
            .filter
            .as_ref()
            .map_or(true, |f| f.window() != window || f.order() != order);
        if stale {
            let filter = SavitzkyGolay::new(window, order).ok_or_else(|| {
                StageError::Internal(format!("singular smoothing design {window}/{order}"))
            })?;
            self.filter = Some(filter);
        }
        self.filter
            .as_ref()
            .ok_or_else(|| StageError::Internal("smoothing filter missing".into()))
    }
}

impl ProcessingStage for SmoothingStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        if config.smoothing_window % 2 == 0 {
            return Err(StageError::InvalidInput(format!(
                "smoothing window must be odd, got {}",
                config.smoothing_window
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        if input.samples.is_empty() {
            return Err(StageError::InvalidInput("no samples to smooth".into()));
        }

        let n = input.samples.len();
        let window = Self::effective_window(config.smoothing_window, n);
        let mut buffer = self.pool.checkout(n)?;

        let note = if window > 2 {
            let filter = self.filter_for(window, config.polynomial_order)?;
            filter.apply_into(&input.samples, &mut buffer);
            format!("savgol window {} order {}", filter.window(), filter.order())
        } else {
            buffer.copy_from_slice(&input.samples);
            "trace too short to smooth".to_string()
        };

        let rms = StatsHelper::rms(&buffer);
        self.logger
            .detail(&format!("{} samples, {}, RMS {:.4}", n, note, rms));

        Ok(StageOutput {
            samples: buffer,
            metadata: StageMetadata {
                notes: vec![note],
                ..Default::default()
            },
        })
    }

    fn cleanup(&mut self) {
        self.pool.reset();
        self.config = None;
        self.filter = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> SmoothingStage {
        let mut stage = SmoothingStage::new(2);
        stage.initialize(&StageConfig::default()).unwrap();
        stage
    }

    #[test]
    fn window_shrinks_to_fit_trace() {
        assert_eq!(SmoothingStage::effective_window(51, 1000), 51);
        assert_eq!(SmoothingStage::effective_window(51, 20), 19);
        assert_eq!(SmoothingStage::effective_window(51, 7), 7);
        assert_eq!(SmoothingStage::effective_window(51, 2), 1);
    }

    #[test]
    fn short_trace_passes_through() {
        let mut stage = stage();
        let output = stage
            .execute(StageInput {
                samples: vec![1.0, 3.0],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(output.samples, vec![1.0, 3.0]);
        stage.cleanup();
    }

    #[test]
    fn flat_trace_is_preserved() {
        let mut stage = stage();
        let output = stage
            .execute(StageInput {
                samples: vec![0.75; 200],
                ..Default::default()
            })
            .unwrap();
        assert!(output.samples.iter().all(|v| (v - 0.75).abs() < 1e-9));
        assert!(output.metadata.notes[0].starts_with("savgol window 51"));
    }

    #[test]
    fn released_buffer_serves_the_next_run() {
        let mut stage = SmoothingStage::new(1);
        stage.initialize(&StageConfig::default()).unwrap();
        let input = || StageInput {
            samples: vec![0.5; 64],
            ..Default::default()
        };

        let first = stage.execute(input()).unwrap();
        assert!(matches!(
            stage.execute(input()),
            Err(StageError::BufferExhaustion(_))
        ));
        stage.release(first.samples);
        let second = stage.execute(input()).unwrap();
        assert_eq!(second.samples.len(), 64);
    }

    #[test]
    fn rejects_even_window() {
        let mut stage = SmoothingStage::new(1);
        let config = StageConfig {
            smoothing_window: 10,
            ..Default::default()
        };
        assert!(stage.initialize(&config).is_err());
    }

    #[test]
    fn uninitialized_stage_errors() {
        let mut stage = SmoothingStage::new(1);
        assert!(matches!(
            stage.execute(StageInput::default()),
            Err(StageError::Internal(_))
        ));
    }
}
