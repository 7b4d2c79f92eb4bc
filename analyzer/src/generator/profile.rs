use crate::generator::template::header_block;
use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Shape of a synthetic step-TDR capture.
///
/// The trace sits at zero until `edge_index`, ramps to `amplitude` over
/// `ramp_samples`, holds until `reflection_index` and then ramps to
/// `amplitude * (1 + gamma)`. The default is a shorted line (`gamma = -1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureProfile {
    pub samples: usize,
    pub sample_interval: f64,
    pub amplitude: f64,
    pub edge_index: usize,
    pub ramp_samples: usize,
    pub reflection_index: usize,
    pub gamma: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            samples: 600,
            sample_interval: 1e-9,
            amplitude: 1.0,
            edge_index: 100,
            ramp_samples: 10,
            reflection_index: 400,
            gamma: -1.0,
            noise: 0.0,
            seed: 0,
        }
    }
}

fn ramp(index: usize, start: usize, length: usize) -> f64 {
    if index < start {
        0.0
    } else if length == 0 || index >= start + length {
        1.0
    } else {
        (index - start) as f64 / length as f64
    }
}

/// Returns `(time, voltage)` for the profile.
pub fn build_waveform(profile: &CaptureProfile) -> anyhow::Result<(Vec<f64>, Vec<f64>)> {
    if profile.samples == 0 {
        anyhow::bail!("capture profile needs at least one sample");
    }
    if !(profile.sample_interval > 0.0) {
        anyhow::bail!(
            "sample interval must be positive, got {}",
            profile.sample_interval
        );
    }

    let mut rng = StdRng::seed_from_u64(profile.seed);
    let reflected = profile.amplitude * profile.gamma;
    let mut time = Vec::with_capacity(profile.samples);
    let mut voltage = Vec::with_capacity(profile.samples);

    for i in 0..profile.samples {
        let incident = profile.amplitude * ramp(i, profile.edge_index, profile.ramp_samples);
        let echo = reflected * ramp(i, profile.reflection_index, profile.ramp_samples);
        let jitter = if profile.noise > 0.0 {
            rng.gen_range(-profile.noise..profile.noise)
        } else {
            0.0
        };
        time.push(i as f64 * profile.sample_interval);
        voltage.push(incident + echo + jitter);
    }

    Ok((time, voltage))
}

/// Renders the profile as a complete oscilloscope CSV export.
pub fn build_capture_csv(profile: &CaptureProfile) -> anyhow::Result<String> {
    let (time, voltage) = build_waveform(profile).context("building synthetic waveform")?;
    let vertical_scale = (profile.amplitude.abs() / 4.0).max(1e-3);
    let mut csv = header_block(profile.samples, profile.sample_interval, vertical_scale);
    for (t, v) in time.iter().zip(&voltage) {
        writeln!(csv, "{t:e},{v:.6}").context("formatting capture row")?;
    }
    Ok(csv)
}
