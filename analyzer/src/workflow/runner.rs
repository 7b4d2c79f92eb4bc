use crate::plot;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tdrcore::capture::Capture;
use tdrcore::contract::{AnalysisParameters, AnalysisResult, WaveformPoint};
use tdrcore::prelude::{ProcessingStage, StageInput};
use tdrcore::processing::{LineParameters, LineStage, PulseEvents, PulseStage, SmoothingStage};

/// One run needs one smoothing buffer.
const SMOOTHING_BUFFERS: usize = 1;

/// Wire result plus the intermediate figures it was derived from.
#[derive(Debug, Serialize)]
pub struct WorkflowResult {
    pub result: AnalysisResult,
    pub events: PulseEvents,
    pub line: LineParameters,
    pub notes: Vec<String>,
}

/// Runs the stage chain. The smoothing stage and its buffer pool live as long
/// as the runner, so analyses run one at a time and reuse the smoothing buffer.
pub struct Runner {
    config: WorkflowConfig,
    smoothing: Mutex<SmoothingStage>,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            smoothing: Mutex::new(SmoothingStage::new(SMOOTHING_BUFFERS)),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn smoothing(&self) -> MutexGuard<'_, SmoothingStage> {
        self.smoothing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn lock_smoothing(&self) -> MutexGuard<'_, SmoothingStage> {
        self.smoothing()
    }

    /// Smoothing only, for previews that skip the line analysis.
    pub fn smooth(&self, capture: &Capture) -> anyhow::Result<Vec<f64>> {
        let stage_config = self.config.to_stage_config(&self.config.default_parameters());
        let mut smoothing_stage = self.smoothing();
        smoothing_stage
            .initialize(&stage_config)
            .context("initializing smoothing stage")?;
        let output = smoothing_stage
            .execute(StageInput {
                time: capture.time.clone(),
                samples: capture.voltage.clone(),
                sample_interval: capture.settings.sample_interval,
                events: None,
            })
            .context("executing smoothing stage")?;
        let smoothed = output.samples.to_vec();
        smoothing_stage.release(output.samples);
        Ok(smoothed)
    }

    pub fn execute(
        &self,
        capture: &Capture,
        parameters: &AnalysisParameters,
    ) -> anyhow::Result<WorkflowResult> {
        let mut smoothing_stage = self.smoothing();
        let outcome = self.run_stages(&mut smoothing_stage, capture, parameters);
        if outcome.is_err() {
            // The smoothed buffer died with the failing stage.
            smoothing_stage.cleanup();
        }
        outcome
    }

    fn run_stages(
        &self,
        smoothing_stage: &mut SmoothingStage,
        capture: &Capture,
        parameters: &AnalysisParameters,
    ) -> anyhow::Result<WorkflowResult> {
        let stage_config = self.config.to_stage_config(parameters);
        let sample_interval = capture.settings.sample_interval;

        smoothing_stage
            .initialize(&stage_config)
            .context("initializing smoothing stage")?;
        let smoothing_output = smoothing_stage
            .execute(StageInput {
                time: capture.time.clone(),
                samples: capture.voltage.clone(),
                sample_interval,
                events: None,
            })
            .context("executing smoothing stage")?;

        let mut pulse_stage = PulseStage::new();
        pulse_stage
            .initialize(&stage_config)
            .context("initializing pulse stage")?;
        let pulse_output = pulse_stage
            .execute(StageInput {
                time: capture.time.clone(),
                samples: smoothing_output.samples,
                sample_interval,
                events: None,
            })
            .context("executing pulse stage")?;
        pulse_stage.cleanup();
        let events = pulse_output
            .metadata
            .events
            .clone()
            .context("pulse stage reported no events")?;

        let mut line_stage = LineStage::new();
        line_stage
            .initialize(&stage_config)
            .context("initializing line stage")?;
        let line_output = line_stage
            .execute(StageInput {
                time: capture.time.clone(),
                samples: pulse_output.samples,
                sample_interval,
                events: Some(events.clone()),
            })
            .context("executing line stage")?;
        line_stage.cleanup();
        let line = line_output
            .metadata
            .line
            .clone()
            .context("line stage reported no parameters")?;

        let smoothed = line_output.samples;
        let tdr_plot_base64 = plot::render_base64(
            &capture.time,
            &smoothed,
            self.config.plot_width,
            self.config.plot_height,
        )
        .context("rendering TDR plot")?;

        let waveform = capture
            .time
            .iter()
            .zip(&smoothed)
            .map(|(&time, &ch1)| WaveformPoint { time, ch1 })
            .collect();

        smoothing_stage.release(smoothed);

        let notes = smoothing_output
            .metadata
            .notes
            .into_iter()
            .chain(pulse_output.metadata.notes)
            .chain(line_output.metadata.notes)
            .collect();

        let result = AnalysisResult {
            length_meters: parameters.cable_length_m,
            error_percent: line.error_percent,
            velocity_factor: line.velocity_factor,
            vswr: line.vswr,
            reflection_coefficient: line.reflection_coefficient,
            beta: line.beta,
            alpha: line.alpha,
            z0: parameters.z0_expected_ohms,
            load_type: line.load_type.as_str().to_string(),
            load_value: line.load_value,
            tdr_plot_base64,
            waveform,
        };

        Ok(WorkflowResult {
            result,
            events,
            line,
            notes,
        })
    }
}
