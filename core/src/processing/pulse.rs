use crate::math::gradient::GradientHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{
    ProcessingStage, StageConfig, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use serde::Serialize;

/// Timing landmarks of the incident pulse and its reflection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulseEvents {
    /// First crossing of 10% of the peak voltage.
    pub t0: f64,
    pub rise_time: f64,
    /// Effective bandwidth of the edge, `0.35 / rise_time`.
    pub f_eff: f64,
    pub plateau_start: Option<f64>,
    pub plateau_end: Option<f64>,
    pub reflection_start: Option<f64>,
    pub v_max: f64,
}

/// Minimum number of samples after the plateau needed to look for a reflection.
const MIN_POST_PLATEAU_SAMPLES: usize = 10;

/// Detects incident edge, plateau and reflection on a smoothed trace.
pub struct PulseStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl PulseStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("pulse"),
        }
    }

    pub fn detect(time: &[f64], voltage: &[f64], min_plateau_s: f64) -> StageResult<PulseEvents> {
        let v_max = StatsHelper::max(voltage)
            .ok_or_else(|| StageError::InvalidInput("empty trace".into()))?;

        let threshold = 0.1 * v_max;
        let t0_idx = voltage
            .iter()
            .position(|&v| v > threshold)
            .ok_or_else(|| StageError::Analysis("no incident pulse detected".into()))?;
        let t0 = time[t0_idx];

        let idx_10 = voltage.iter().position(|&v| v >= 0.1 * v_max).unwrap_or(t0_idx);
        let idx_90 = voltage
            .iter()
            .position(|&v| v >= 0.9 * v_max)
            .ok_or_else(|| StageError::Analysis("pulse never reaches 90% of its peak".into()))?;
        let t_90 = time[idx_90];
        let rise_time = t_90 - time[idx_10];
        let f_eff = if rise_time > 0.0 { 0.35 / rise_time } else { 0.0 };

        let slope = GradientHelper::gradient(voltage, time);
        let flat_limit = (v_max / time.len() as f64) * 0.01;
        let plateau = flat_segments(time, &slope, flat_limit, min_plateau_s)
            .into_iter()
            .filter(|segment| time[segment.start] > t_90)
            .fold(None::<Segment>, |best, segment| match best {
                Some(b) if b.duration >= segment.duration => Some(b),
                _ => Some(segment),
            });

        let plateau_start = plateau.map(|s| time[s.start]);
        let plateau_end = plateau.map(|s| time[s.end]);
        let reflection_start = plateau_end.and_then(|end| find_reflection(time, voltage, end));

        Ok(PulseEvents {
            t0,
            rise_time,
            f_eff,
            plateau_start,
            plateau_end,
            reflection_start,
            v_max,
        })
    }
}

impl Default for PulseStage {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    duration: f64,
}

fn flat_segments(time: &[f64], slope: &[f64], flat_limit: f64, min_duration: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut start = None;

    let close = |from: usize, to: usize, segments: &mut Vec<Segment>| {
        let duration = time[to] - time[from];
        if duration >= min_duration {
            segments.push(Segment {
                start: from,
                end: to,
                duration,
            });
        }
    };

    for (i, s) in slope.iter().enumerate() {
        let flat = s.abs() < flat_limit;
        match (flat, start) {
            (true, None) => start = Some(i),
            (false, Some(from)) => {
                close(from, i - 1, &mut segments);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        close(from, slope.len() - 1, &mut segments);
    }
    segments
}

fn find_reflection(time: &[f64], voltage: &[f64], plateau_end: f64) -> Option<f64> {
    let first = time.iter().position(|&t| t > plateau_end)?;
    let (time_post, voltage_post) = (&time[first..], &voltage[first..]);
    if voltage_post.len() <= MIN_POST_PLATEAU_SAMPLES {
        return None;
    }

    let slope: Vec<f64> = GradientHelper::gradient(voltage_post, time_post)
        .into_iter()
        .map(f64::abs)
        .collect();
    let threshold = StatsHelper::max(&slope)? * 0.5;
    slope
        .iter()
        .position(|&s| s > threshold)
        .map(|idx| time_post[idx])
}

impl ProcessingStage for PulseStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;

        if input.samples.is_empty() {
            return Err(StageError::InvalidInput("no samples provided".into()));
        }
        if input.time.len() != input.samples.len() {
            return Err(StageError::InvalidInput(format!(
                "{} time points for {} samples",
                input.time.len(),
                input.samples.len()
            )));
        }

        let events = Self::detect(&input.time, &input.samples, config.min_plateau_s)?;
        let note = match (events.plateau_start, events.plateau_end) {
            (Some(start), Some(end)) => format!("plateau {:.3e}..{:.3e} s", start, end),
            _ => "no plateau".to_string(),
        };
        self.logger.detail(&format!(
            "t0 {:.3e} s, rise {:.3e} s, {}",
            events.t0, events.rise_time, note
        ));

        Ok(StageOutput {
            samples: input.samples,
            metadata: StageMetadata {
                events: Some(events),
                notes: vec![note],
                ..Default::default()
            },
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
