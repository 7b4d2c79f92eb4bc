use crate::bridge::form::{collect_fields, require_csv, FormRejection};
use crate::workflow::runner::Runner;
use anyhow::Context;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, PoisonError, RwLock};
use std::thread;
use tdrcore::capture::{parse_capture, CaptureSettings};
use tdrcore::contract::AnalysisResult;
use tdrcore::prelude::StageError;
use tdrcore::telemetry::{MetricsRecorder, MetricsSnapshot};
use tokio::runtime::Builder;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AnalysisBridge {
    runner: Arc<Runner>,
    last: Arc<RwLock<Option<AnalysisResult>>>,
    metrics: Arc<MetricsRecorder>,
}

#[derive(Serialize)]
struct CapturePreview<'a> {
    time: &'a [f64],
    magnitude: Vec<f64>,
    config: &'a CaptureSettings,
}

fn detail(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "detail": message })), status)
        .into_response()
}

impl AnalysisBridge {
    pub fn new(runner: Arc<Runner>) -> Self {
        Self {
            runner,
            last: Arc::new(RwLock::new(None)),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn last_result(&self) -> Option<AnalysisResult> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn reject(&self, rejection: &FormRejection) -> Response {
        self.metrics.record_rejected();
        warn!("request rejected: {}", rejection.detail());
        detail(rejection.status(), &rejection.detail())
    }

    fn log_counters(&self) {
        let counters = self.metrics.snapshot();
        info!(
            "requests: {} analyzed, {} rejected, {} failed",
            counters.analyzed, counters.rejected, counters.failed
        );
    }

    async fn analyze(self, form: FormData) -> Result<Response, Infallible> {
        let upload = match collect_fields(form)
            .await
            .and_then(|fields| fields.into_analysis())
        {
            Ok(upload) => upload,
            Err(rejection) => return Ok(self.reject(&rejection)),
        };
        info!(
            "analyzing {} ({} bytes), cable {} m, Z0 {} ohm",
            upload.file_name,
            upload.bytes.len(),
            upload.parameters.cable_length_m,
            upload.parameters.z0_expected_ohms
        );

        let capture = match parse_capture(&upload.bytes) {
            Ok(capture) => capture,
            Err(err) => return Ok(self.reject(&FormRejection::Invalid(err.to_string()))),
        };
        if capture.dropped_rows > 0 {
            warn!(
                "{}: dropped {} unreadable rows",
                upload.file_name, capture.dropped_rows
            );
        }

        let runner = Arc::clone(&self.runner);
        let parameters = upload.parameters;
        let outcome = tokio::task::spawn_blocking(move || runner.execute(&capture, &parameters))
            .await
            .context("analysis task stopped")
            .and_then(|outcome| outcome);
        let response = match outcome {
            Ok(output) => {
                self.metrics.record_analyzed();
                info!(
                    "{}: load {} ({:.2} ohm), VSWR {:.3}",
                    upload.file_name,
                    output.result.load_type,
                    output.result.load_value,
                    output.result.vswr
                );
                let reply = warp::reply::json(&output.result).into_response();
                *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(output.result);
                reply
            }
            Err(err) => match err.downcast_ref::<StageError>() {
                Some(stage) if stage.is_client_fault() => {
                    self.reject(&FormRejection::Invalid(stage.to_string()))
                }
                _ => {
                    self.metrics.record_failed();
                    error!("analysis of {} failed: {err:#}", upload.file_name);
                    detail(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("Processing error: {err:#}"),
                    )
                }
            },
        };
        self.log_counters();
        Ok(response)
    }

    async fn preview(self, form: FormData) -> Result<Response, Infallible> {
        let file = match collect_fields(form)
            .await
            .and_then(|fields| require_csv(fields.file))
        {
            Ok(file) => file,
            Err(rejection) => return Ok(self.reject(&rejection)),
        };
        let capture = match parse_capture(&file.1) {
            Ok(capture) => capture,
            Err(err) => return Ok(self.reject(&FormRejection::Invalid(err.to_string()))),
        };
        let runner = Arc::clone(&self.runner);
        let outcome = tokio::task::spawn_blocking(move || {
            runner.smooth(&capture).map(|magnitude| (capture, magnitude))
        })
        .await
        .context("preview task stopped")
        .and_then(|outcome| outcome);
        match outcome {
            Ok((capture, magnitude)) => Ok(warp::reply::json(&CapturePreview {
                time: &capture.time,
                magnitude,
                config: &capture.settings,
            })
            .into_response()),
            Err(err) => {
                self.metrics.record_failed();
                error!("preview of {} failed: {err:#}", file.0);
                Ok(detail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Processing error: {err:#}"),
                ))
            }
        }
    }

    /// Every route the service exposes, with rejections rendered as `{detail}`.
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let bridge = self.clone();
        let state = warp::any().map(move || bridge.clone());

        let analyze_route = warp::path!("api" / "analyze-tdr")
            .and(warp::post())
            .and(state.clone())
            .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
            .and_then(AnalysisBridge::analyze);

        let preview_route = warp::path!("api" / "upload-csv")
            .and(warp::post())
            .and(state.clone())
            .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
            .and_then(AnalysisBridge::preview);

        let health_route = warp::path!("api" / "health")
            .and(warp::get())
            .map(|| warp::reply::json(&json!({ "status": "ok" })));

        let last_route = warp::path!("api" / "last")
            .and(warp::get())
            .and(state)
            .map(|bridge: AnalysisBridge| match bridge.last_result() {
                Some(result) => warp::reply::json(&result).into_response(),
                None => detail(StatusCode::NOT_FOUND, "No analysis has completed yet"),
            });

        analyze_route
            .or(preview_route)
            .or(health_route)
            .or(last_route)
            .recover(handle_rejection)
    }

    /// Binds `addr` on a background thread and returns the bound address.
    pub fn spawn(&self, addr: SocketAddr) -> anyhow::Result<SocketAddr> {
        let routes = self.routes();
        let (bound_tx, bound_rx) = mpsc::channel();

        thread::spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = bound_tx.send(Err(format!("building runtime: {err}")));
                    return;
                }
            };
            runtime.block_on(async move {
                match warp::serve(routes).try_bind_ephemeral(addr) {
                    Ok((bound, server)) => {
                        let _ = bound_tx.send(Ok(bound));
                        server.await;
                    }
                    Err(err) => {
                        let _ = bound_tx.send(Err(format!("binding {addr}: {err}")));
                    }
                }
            });
        });

        let bound = bound_rx
            .recv()
            .context("analysis server thread exited before binding")?
            .map_err(anyhow::Error::msg)?;
        info!("analysis service listening on http://{bound}");
        Ok(bound)
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if rejection
        .find::<warp::reject::PayloadTooLarge>()
        .is_some()
    {
        (StatusCode::PAYLOAD_TOO_LARGE, "Upload is too large".to_string())
    } else if rejection
        .find::<warp::reject::MethodNotAllowed>()
        .is_some()
    {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
    } else {
        (StatusCode::BAD_REQUEST, format!("Invalid request: {rejection:?}"))
    };
    Ok(detail(status, &message))
}
