use anyhow::Context;
use bridge::server::AnalysisBridge;
use clap::Parser;
use generator::profile::{build_capture_csv, CaptureProfile};
use log::info;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tdrcore::capture::parse_capture;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::{Runner, WorkflowResult};

mod bridge;
mod generator;
mod plot;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "TDR capture analysis service and offline driver")]
struct Args {
    /// Serve the HTTP analysis API until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Address for --serve
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    /// Analyze one oscilloscope CSV export and print a summary
    #[arg(long, value_name = "CSV")]
    offline: Option<PathBuf>,
    /// Analyze a synthetic capture from the built-in generator
    #[arg(long, default_value_t = false)]
    demo: bool,
    /// Write the full analysis as JSON
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Load a workflow config from YAML
    #[arg(long, alias = "workflow")]
    config: Option<PathBuf>,
    /// Cable length in meters
    #[arg(long)]
    cable_length: Option<f64>,
    /// Expected characteristic impedance in ohms
    #[arg(long)]
    z0: Option<f64>,
}

fn analyze_bytes(runner: &Runner, label: &str, bytes: &[u8]) -> anyhow::Result<WorkflowResult> {
    let capture = parse_capture(bytes).with_context(|| format!("parsing capture {label}"))?;
    let parameters = runner.config().default_parameters();
    let output = runner
        .execute(&capture, &parameters)
        .with_context(|| format!("analyzing {label}"))?;

    let result = &output.result;
    println!(
        "{label}: {} samples ({} dropped), load {} ~ {:.2} ohm",
        capture.len(),
        capture.dropped_rows,
        result.load_type,
        result.load_value
    );
    println!(
        "  gamma {:.4}  VSWR {:.3}  VF {:.4}  alpha {:.3e}  beta {:.3e}  error {:.2}%",
        result.reflection_coefficient,
        result.vswr,
        result.velocity_factor,
        result.alpha,
        result.beta,
        result.error_percent
    );
    for note in &output.notes {
        info!("{label}: {note}");
    }
    Ok(output)
}

fn write_report(path: &Path, output: &WorkflowResult) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(output).context("serializing analysis report")?;
    fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    info!("report written to {}", path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = match &args.config {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    }
    .with_overrides(args.cable_length, args.z0);

    let runner = Runner::new(workflow_config);
    let mut last_output = None;

    if let Some(path) = &args.offline {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        last_output = Some(analyze_bytes(&runner, &path.display().to_string(), &bytes)?);
    }
    if args.demo {
        let csv = build_capture_csv(&CaptureProfile::default())?;
        last_output = Some(analyze_bytes(&runner, "demo capture", csv.as_bytes())?);
    }
    if let (Some(path), Some(output)) = (&args.report, &last_output) {
        write_report(path, output)?;
    }

    if args.serve {
        let bridge = AnalysisBridge::new(Arc::new(runner));
        let bound = bridge.spawn(args.bind)?;
        println!("Analysis service on http://{bound} (Ctrl+C to stop)...");
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
        let counters = bridge.metrics();
        info!(
            "shutting down after {} analyzed, {} rejected, {} failed",
            counters.analyzed, counters.rejected, counters.failed
        );
    } else if last_output.is_none() {
        println!("Nothing to do: pass --offline <CSV>, --demo or --serve.");
    }

    Ok(())
}
