use tdrcore::contract::AnalysisResult;

/// One labelled line of the metrics table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub label: &'static str,
    pub value: String,
    pub unit: &'static str,
}

impl MetricRow {
    fn new(label: &'static str, value: String, unit: &'static str) -> Self {
        Self { label, value, unit }
    }

    /// Value and unit as a single display string.
    pub fn display_value(&self) -> String {
        if self.unit.is_empty() {
            self.value.clone()
        } else {
            format!("{} {}", self.value, self.unit)
        }
    }
}

/// Fixed-point for ordinary magnitudes, scientific notation otherwise.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if !value.is_finite() {
        value.to_string()
    } else if value.abs() < 1e-3 || value.abs() >= 1e6 {
        format!("{value:.3e}")
    } else {
        format!("{value:.4}")
    }
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The ten scalar fields of a result, in display order.
pub fn metric_rows(result: &AnalysisResult) -> Vec<MetricRow> {
    vec![
        MetricRow::new("Cable length", format_value(result.length_meters), "m"),
        MetricRow::new("Length error", format_value(result.error_percent), "%"),
        MetricRow::new("Velocity factor", format_value(result.velocity_factor), ""),
        MetricRow::new("VSWR", format_value(result.vswr), ""),
        MetricRow::new(
            "Reflection coefficient",
            format_value(result.reflection_coefficient),
            "",
        ),
        MetricRow::new("Phase constant (beta)", format_value(result.beta), "rad/m"),
        MetricRow::new("Attenuation (alpha)", format_value(result.alpha), "Np/m"),
        MetricRow::new("Characteristic impedance (Z0)", format_value(result.z0), "ohm"),
        MetricRow::new("Load type", title_case(&result.load_type), ""),
        MetricRow::new("Load value", format_value(result.load_value), "ohm"),
    ]
}
