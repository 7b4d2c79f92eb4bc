use crate::contract::result::LoadType;
use crate::math::stats::StatsHelper;
use crate::prelude::{
    ProcessingStage, StageConfig, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::processing::pulse::PulseEvents;
use crate::telemetry::log::LogManager;
use serde::Serialize;
use std::f64::consts::PI;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Round trip assumed when neither a plateau nor a reflection was found:
/// the 90% point of a 1 us linear ramp sampled at 1000 points.
const FALLBACK_ROUND_TRIP_S: f64 = 1e-6 * 900.0 / 999.0;
const DEFAULT_SAMPLE_INTERVAL_S: f64 = 1e-9;
const DEFAULT_CONSTANT: f64 = 1e-3;
const MIN_CONSTANT: f64 = 1e-6;
const MATCHED_LIMIT: f64 = 0.1;
/// Stand-in for unbounded values (total reflection, division by zero).
const SATURATED: f64 = 1e10;
const LENGTH_TOLERANCE: f64 = 0.01;

/// Transmission-line figures derived from one capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineParameters {
    pub round_trip_s: f64,
    pub propagation_velocity: f64,
    pub velocity_factor: f64,
    pub epsilon_eff: f64,
    pub incident_v: f64,
    pub reflected_v: f64,
    pub reflection_coefficient: f64,
    pub vswr: f64,
    pub load_type: LoadType,
    pub load_value: f64,
    pub alpha: f64,
    pub beta: f64,
    pub round_trip_error_s: f64,
    pub error_percent: f64,
}

impl LineParameters {
    pub fn compute(
        time: &[f64],
        voltage: &[f64],
        events: &PulseEvents,
        config: &StageConfig,
        sample_interval: Option<f64>,
    ) -> StageResult<Self> {
        let round_trip_s = match (events.plateau_end, events.reflection_start) {
            (Some(end), _) => end - events.t0,
            (None, Some(reflection)) => reflection - events.t0,
            (None, None) => FALLBACK_ROUND_TRIP_S,
        };
        if !(round_trip_s > 0.0) {
            return Err(StageError::Analysis(
                "could not determine the round-trip time".into(),
            ));
        }

        let propagation_velocity = 2.0 * config.cable_length_m / round_trip_s;
        let velocity_factor = propagation_velocity / SPEED_OF_LIGHT;
        let epsilon_eff = (SPEED_OF_LIGHT / propagation_velocity).powi(2);

        let incident_v = incident_voltage(time, voltage, events, round_trip_s);
        let reflected_v = events
            .reflection_start
            .and_then(|start| time.iter().position(|&t| t >= start))
            .map_or(0.0, |idx| voltage[idx] - incident_v);
        let reflection_coefficient = if incident_v != 0.0 {
            reflected_v / incident_v
        } else {
            0.0
        };

        let gamma_abs = reflection_coefficient.abs();
        let vswr = if gamma_abs < 1.0 {
            (1.0 + gamma_abs) / (1.0 - gamma_abs)
        } else {
            SATURATED
        };
        let (load_type, load_value) =
            classify_load(reflection_coefficient, config.z0_expected_ohms);

        let alpha = attenuation(time, voltage, events, round_trip_s);
        let beta = phase_constant(events.f_eff, propagation_velocity);

        let interval = sample_interval.unwrap_or(DEFAULT_SAMPLE_INTERVAL_S);
        let round_trip_error_s = interval + 0.05 * round_trip_s;
        let relative =
            (LENGTH_TOLERANCE.powi(2) + (round_trip_error_s / round_trip_s).powi(2)).sqrt();

        Ok(Self {
            round_trip_s,
            propagation_velocity,
            velocity_factor,
            epsilon_eff,
            incident_v,
            reflected_v,
            reflection_coefficient,
            vswr,
            load_type,
            load_value,
            alpha,
            beta,
            round_trip_error_s,
            error_percent: relative * 100.0,
        }
        .sanitized())
    }

    /// Replaces values JSON cannot carry.
    fn sanitized(mut self) -> Self {
        for value in [
            &mut self.round_trip_s,
            &mut self.propagation_velocity,
            &mut self.velocity_factor,
            &mut self.epsilon_eff,
            &mut self.incident_v,
            &mut self.reflected_v,
            &mut self.reflection_coefficient,
            &mut self.vswr,
            &mut self.load_value,
            &mut self.alpha,
            &mut self.beta,
            &mut self.round_trip_error_s,
            &mut self.error_percent,
        ] {
            *value = finite_or_saturated(*value);
        }
        self
    }
}

pub fn finite_or_saturated(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value == f64::INFINITY {
        SATURATED
    } else if value == f64::NEG_INFINITY {
        -SATURATED
    } else {
        value
    }
}

/// Termination class and impedance implied by a reflection coefficient.
pub fn classify_load(gamma: f64, z0: f64) -> (LoadType, f64) {
    if gamma.abs() < MATCHED_LIMIT {
        return (LoadType::Matched, z0);
    }
    let value = z0 * (1.0 + gamma) / (1.0 - gamma);
    if gamma > 0.0 {
        (LoadType::Open, value)
    } else {
        (LoadType::Short, value)
    }
}

fn incident_voltage(time: &[f64], voltage: &[f64], events: &PulseEvents, round_trip_s: f64) -> f64 {
    let fallback = events.v_max * 0.8;
    if let (Some(start), Some(end)) = (events.plateau_start, events.plateau_end) {
        let plateau: Vec<f64> = time
            .iter()
            .zip(voltage)
            .filter(|(&t, _)| t >= start && t <= end)
            .map(|(_, &v)| v)
            .collect();
        return StatsHelper::mean(&plateau).unwrap_or(fallback);
    }

    let stable_time = events.t0 + round_trip_s;
    time.iter()
        .position(|&t| t >= stable_time)
        .and_then(|idx| {
            let end = (idx + 10).min(voltage.len());
            StatsHelper::mean(&voltage[idx..end])
        })
        .unwrap_or(fallback)
}

/// Decay rate of `ln(|v| / v_max)` after the first round trip.
fn attenuation(time: &[f64], voltage: &[f64], events: &PulseEvents, round_trip_s: f64) -> f64 {
    fit_decay(time, voltage, events, round_trip_s)
        .unwrap_or(DEFAULT_CONSTANT)
        .max(MIN_CONSTANT)
}

fn fit_decay(
    time: &[f64],
    voltage: &[f64],
    events: &PulseEvents,
    round_trip_s: f64,
) -> Option<f64> {
    if voltage.len() <= 50 {
        return None;
    }
    let cutoff = events.t0 + round_trip_s;
    let (decay_t, decay_v): (Vec<f64>, Vec<f64>) = time
        .iter()
        .zip(voltage)
        .filter(|(&t, _)| t > cutoff)
        .map(|(&t, &v)| (t, v.abs()))
        .unzip();
    if decay_v.len() <= 10 || decay_v.iter().any(|&v| v <= 0.0) {
        return None;
    }
    let log_v: Vec<f64> = decay_v.iter().map(|v| (v / events.v_max).ln()).collect();
    StatsHelper::linear_fit(&decay_t, &log_v).map(|(slope, _)| -slope)
}

fn phase_constant(f_eff: f64, propagation_velocity: f64) -> f64 {
    let beta = if propagation_velocity > 0.0 && f_eff > 0.0 {
        let wavelength = propagation_velocity / f_eff;
        if wavelength > 0.0 {
            2.0 * PI / wavelength
        } else {
            0.0
        }
    } else {
        DEFAULT_CONSTANT
    };
    beta.max(MIN_CONSTANT)
}

/// Final stage: turns pulse events into line parameters.
pub struct LineStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl LineStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("line"),
        }
    }
}

impl Default for LineStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for LineStage {
    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        if !(config.cable_length_m > 0.0) || !(config.z0_expected_ohms > 0.0) {
            return Err(StageError::InvalidInput(
                "cable length and Z0 must be positive".into(),
            ));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let events = input
            .events
            .as_ref()
            .ok_or_else(|| StageError::Internal("pulse events missing".into()))?;

        let line = LineParameters::compute(
            &input.time,
            &input.samples,
            events,
            config,
            input.sample_interval,
        )?;
        let note = format!(
            "gamma {:.4}, VSWR {:.3}, load {}",
            line.reflection_coefficient,
            line.vswr,
            line.load_type.as_str()
        );
        self.logger.record(&note);

        Ok(StageOutput {
            samples: input.samples,
            metadata: StageMetadata {
                line: Some(line),
                notes: vec![note],
                ..Default::default()
            },
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
