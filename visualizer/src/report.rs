//! Plain-text export of a completed analysis.

use crate::charts::plot_png;
use crate::table::metric_rows;
use anyhow::Context;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tdrcore::contract::AnalysisResult;

/// Files written by one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedReport {
    pub text: PathBuf,
    pub plot: Option<PathBuf>,
}

pub fn render_report(result: &AnalysisResult, source: Option<&str>) -> String {
    let mut out = String::from("TDR Analysis Report\n===================\n\n");
    if let Some(source) = source {
        let _ = writeln!(out, "Capture: {source}\n");
    }
    let rows = metric_rows(result);
    let width = rows.iter().map(|row| row.label.len()).max().unwrap_or(0);
    for row in rows {
        let _ = writeln!(out, "{:<width$}  {}", row.label, row.display_value());
    }
    let _ = writeln!(out, "\nWaveform samples: {}", result.waveform.len());
    out
}

/// Writes the report to `path` and the plot PNG, if any, beside it.
pub fn export_report(
    result: &AnalysisResult,
    source: Option<&str>,
    path: &Path,
) -> anyhow::Result<ExportedReport> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let mut text = render_report(result, source);

    let plot = match plot_png(result).context("decoding plot image")? {
        Some(png) => {
            let plot_path = path.with_extension("png");
            fs::write(&plot_path, png)
                .with_context(|| format!("writing plot {}", plot_path.display()))?;
            let _ = writeln!(text, "Plot: {}", plot_path.display());
            Some(plot_path)
        }
        None => None,
    };

    fs::write(path, text).with_context(|| format!("writing report {}", path.display()))?;
    log::info!("report exported to {}", path.display());
    Ok(ExportedReport {
        text: path.to_path_buf(),
        plot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn sample(plot: &str) -> AnalysisResult {
        let mut result: AnalysisResult = serde_json::from_str(
            r#"{"length_meters":1.5,"error_percent":2.0,"velocity_factor":0.66,
            "vswr":1.2,"reflection_coefficient":0.09,"beta":4.2,"alpha":0.01,"Z0":50.0,
            "load_type":"resistive","load_value":75.0,
            "waveform":[{"time":0,"ch1":0.0},{"time":0.02,"ch1":1.5}]}"#,
        )
        .unwrap();
        result.tdr_plot_base64 = plot.to_string();
        result
    }

    #[test]
    fn report_lists_every_metric() {
        let text = render_report(&sample(""), Some("trace.csv"));
        assert!(text.starts_with("TDR Analysis Report"));
        assert!(text.contains("Capture: trace.csv"));
        assert!(text.contains("VSWR"));
        assert!(text.contains("50.0000 ohm"));
        assert!(text.contains("Waveform samples: 2"));
    }

    #[test]
    fn export_writes_text_and_plot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.txt");
        let exported =
            export_report(&sample(&STANDARD.encode(b"png-bytes")), None, &path).unwrap();
        assert_eq!(exported.text, path);
        let plot = exported.plot.unwrap();
        assert_eq!(fs::read(&plot).unwrap(), b"png-bytes");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Plot: "));
    }

    #[test]
    fn export_without_plot_writes_only_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let exported = export_report(&sample(""), None, &path).unwrap();
        assert_eq!(exported.plot, None);
        assert!(!dir.path().join("report.png").exists());
    }

    #[test]
    fn undecodable_plot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        assert!(export_report(&sample("%%%"), None, &path).is_err());
    }
}
