use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tdrcore::contract::AnalysisParameters;
use tdrcore::prelude::StageConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Used when a request or CLI run does not supply its own.
    pub cable_length_m: f64,
    pub z0_expected_ohms: f64,
    pub smoothing_window: usize,
    pub polynomial_order: usize,
    pub min_plateau_s: f64,
    pub plot_width: u32,
    pub plot_height: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let stage = StageConfig::default();
        Self {
            cable_length_m: stage.cable_length_m,
            z0_expected_ohms: stage.z0_expected_ohms,
            smoothing_window: stage.smoothing_window,
            polynomial_order: stage.polynomial_order,
            min_plateau_s: stage.min_plateau_s,
            plot_width: 640,
            plot_height: 360,
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        if config.smoothing_window % 2 == 0 {
            anyhow::bail!(
                "smoothing_window must be odd in {}, got {}",
                path_ref.display(),
                config.smoothing_window
            );
        }
        Ok(config)
    }

    pub fn with_overrides(mut self, cable_length_m: Option<f64>, z0_expected_ohms: Option<f64>) -> Self {
        if let Some(length) = cable_length_m {
            self.cable_length_m = length;
        }
        if let Some(z0) = z0_expected_ohms {
            self.z0_expected_ohms = z0;
        }
        self
    }

    pub fn default_parameters(&self) -> AnalysisParameters {
        AnalysisParameters {
            cable_length_m: self.cable_length_m,
            z0_expected_ohms: self.z0_expected_ohms,
        }
    }

    pub fn to_stage_config(&self, parameters: &AnalysisParameters) -> StageConfig {
        StageConfig {
            cable_length_m: parameters.cable_length_m,
            z0_expected_ohms: parameters.z0_expected_ohms,
            smoothing_window: self.smoothing_window,
            polynomial_order: self.polynomial_order,
            min_plateau_s: self.min_plateau_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn request_parameters_flow_into_stage_config() {
        let cfg = WorkflowConfig::default();
        let stage = cfg.to_stage_config(&AnalysisParameters {
            cable_length_m: 10.0,
            z0_expected_ohms: 75.0,
        });
        assert_eq!(stage.cable_length_m, 10.0);
        assert_eq!(stage.z0_expected_ohms, 75.0);
        assert_eq!(stage.smoothing_window, 51);
    }

    #[test]
    fn config_load_reads_yaml_with_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"cable_length_m: 10.0\nsmoothing_window: 31\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.cable_length_m, 10.0);
        assert_eq!(cfg.smoothing_window, 31);
        assert_eq!(cfg.z0_expected_ohms, 50.0);
        assert_eq!(cfg.plot_width, 640);
    }

    #[test]
    fn config_load_rejects_even_window() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"smoothing_window: 50\n").unwrap();
        let path = temp.into_temp_path();
        assert!(WorkflowConfig::load(&path).is_err());
    }

    #[test]
    fn overrides_replace_defaults() {
        let cfg = WorkflowConfig::default().with_overrides(Some(3.0), None);
        assert_eq!(cfg.default_parameters().cable_length_m, 3.0);
        assert_eq!(cfg.default_parameters().z0_expected_ohms, 50.0);
    }
}
