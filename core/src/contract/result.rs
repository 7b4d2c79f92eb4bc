use serde::{Deserialize, Serialize};

/// One waveform sample as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPoint {
    pub time: f64,
    pub ch1: f64,
}

/// Metrics returned for one analyzed capture. Field names match the JSON
/// body exactly, including the upper-case `Z0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub length_meters: f64,
    pub error_percent: f64,
    pub velocity_factor: f64,
    pub vswr: f64,
    pub reflection_coefficient: f64,
    pub beta: f64,
    pub alpha: f64,
    #[serde(rename = "Z0")]
    pub z0: f64,
    pub load_type: String,
    pub load_value: f64,
    #[serde(default)]
    pub tdr_plot_base64: String,
    #[serde(default)]
    pub waveform: Vec<WaveformPoint>,
}

impl AnalysisResult {
    pub fn has_plot(&self) -> bool {
        !self.tdr_plot_base64.is_empty()
    }

    pub fn load_kind(&self) -> LoadType {
        LoadType::from_label(&self.load_type)
    }

    /// Checks the ordering guarantee consumers rely on: strictly increasing time.
    pub fn check_waveform(&self) -> Result<(), String> {
        for (idx, pair) in self.waveform.windows(2).enumerate() {
            if !(pair[1].time > pair[0].time) {
                return Err(format!(
                    "waveform time is not strictly increasing at sample {}",
                    idx + 1
                ));
            }
        }
        Ok(())
    }
}

/// Classified line termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Matched,
    Open,
    Short,
    Resistive,
    Capacitive,
    Inductive,
    #[serde(other)]
    Unknown,
}

impl LoadType {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "matched" => LoadType::Matched,
            "open" => LoadType::Open,
            "short" => LoadType::Short,
            "resistive" => LoadType::Resistive,
            "capacitive" => LoadType::Capacitive,
            "inductive" => LoadType::Inductive,
            _ => LoadType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Matched => "matched",
            LoadType::Open => "open",
            LoadType::Short => "short",
            LoadType::Resistive => "resistive",
            LoadType::Capacitive => "capacitive",
            LoadType::Inductive => "inductive",
            LoadType::Unknown => "unknown",
        }
    }
}
