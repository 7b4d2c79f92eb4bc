//! HTTP transport for analysis requests.

use anyhow::Context;
use log::{info, warn};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tdrcore::contract::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisTransport, ANALYZE_PATH};

/// Environment variable overriding the service base URL.
pub const BASE_URL_ENV: &str = "TDR_ANALYZER_URL";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Sends one multipart POST per request; no retries, no caching.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ANALYZE_PATH)
    }

    pub async fn send(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let fields = request.form_fields();
        let (file_name, bytes, parameters) = request.into_parts();
        info!(
            "POST {} file={} ({} bytes) cable_length={} z0_expected={}",
            self.endpoint(),
            file_name,
            bytes.len(),
            parameters.cable_length_m,
            parameters.z0_expected_ohms
        );

        let file_part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("text/csv")
            .map_err(|err| AnalysisError::Validation(err.to_string()))?;
        let form = fields
            .into_iter()
            .fold(Form::new().part("file", file_part), |form, (name, value)| {
                form.text(name, value)
            });

        let response = self
            .http
            .post(self.endpoint())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            // A truncated error body still reports the status.
            let body = response.bytes().await.unwrap_or_default();
            info!("analysis service answered {status} ({} bytes)", body.len());
            return Err(server_error(status.as_u16(), &body));
        }
        let body = response.bytes().await.map_err(network_error)?;
        info!("analysis service answered {status} ({} bytes)", body.len());
        parse_result(&body)
    }
}

impl AnalysisTransport for AnalysisClient {
    fn submit(
        &self,
        request: AnalysisRequest,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send {
        self.send(request)
    }
}

fn network_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Network("request timed out".into())
    } else {
        AnalysisError::Network(err.to_string())
    }
}

/// `{detail}` from the body when it is a non-empty string, the status otherwise.
fn server_error(status: u16, body: &[u8]) -> AnalysisError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody { detail }) if !detail.is_empty() => AnalysisError::Server(detail),
        _ => AnalysisError::http_status(status),
    }
}

fn parse_result(body: &[u8]) -> Result<AnalysisResult, AnalysisError> {
    let result: AnalysisResult = serde_json::from_slice(body).map_err(|err| {
        warn!("malformed analysis response: {err}");
        AnalysisError::MalformedResponse(err.to_string())
    })?;
    result.check_waveform().map_err(|reason| {
        warn!("malformed analysis response: {reason}");
        AnalysisError::MalformedResponse(reason)
    })?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::io::{Read, Write};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tdrcore::contract::{AnalysisParameters, FileSelection};
    use tdrcore::lifecycle::{Completion, LifecycleController, LifecycleState};
    use warp::http::StatusCode;
    use warp::{Buf, Filter};

    const SAMPLE: &str = r#"{"length_meters":1.5,"error_percent":2.0,"velocity_factor":0.66,
        "vswr":1.2,"reflection_coefficient":0.09,"beta":4.2,"alpha":0.01,"Z0":50.0,
        "load_type":"resistive","load_value":75.0,"tdr_plot_base64":"",
        "waveform":[{"time":0,"ch1":0.0},{"time":0.02,"ch1":1.5}]}"#;

    /// Serves a fixed status and body on the analysis path.
    async fn canned(status: StatusCode, body: &'static str) -> SocketAddr {
        let route = warp::path!("api" / "analyze-tdr")
            .and(warp::post())
            .map(move || {
                warp::reply::with_status(
                    warp::reply::with_header(body, "content-type", "application/json"),
                    status,
                )
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    /// Answers one request with a 500 whose body stops short of its length.
    fn truncated_error_server() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            while !(request.ends_with(b"--\r\n") || request.ends_with(b"0\r\n\r\n")) {
                let read = stream.read(&mut chunk).unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            stream
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\n\
                      content-type: application/json\r\n\
                      content-length: 100\r\n\r\n{\"det",
                )
                .unwrap();
        });
        addr
    }

    fn client(addr: SocketAddr) -> AnalysisClient {
        AnalysisClient::new(format!("http://{addr}/"), Duration::from_secs(5)).unwrap()
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::with_defaults(FileSelection::new("trace.csv", b"0,0\n1,1\n".to_vec()))
            .unwrap()
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Received {
        accept: Option<String>,
        file_name: Option<String>,
        file: Vec<u8>,
        text: Vec<(String, String)>,
    }

    #[tokio::test]
    async fn sends_multipart_fields_and_parses_result() {
        let seen = Arc::new(Mutex::new(Received::default()));
        let seen_in_route = seen.clone();
        let route = warp::path!("api" / "analyze-tdr")
            .and(warp::post())
            .and(warp::header::optional::<String>("accept"))
            .and(warp::multipart::form())
            .and_then(move |accept: Option<String>, mut form: warp::multipart::FormData| {
                let seen = seen_in_route.clone();
                async move {
                    let mut received = Received {
                        accept,
                        ..Default::default()
                    };
                    while let Ok(Some(part)) = form.try_next().await {
                        let name = part.name().to_string();
                        let file_name = part.filename().map(str::to_string);
                        let bytes: Vec<u8> = part
                            .stream()
                            .try_fold(Vec::new(), |mut acc, chunk| async move {
                                acc.extend_from_slice(chunk.chunk());
                                Ok(acc)
                            })
                            .await
                            .unwrap_or_default();
                        if name == "file" {
                            received.file_name = file_name;
                            received.file = bytes;
                        } else {
                            received
                                .text
                                .push((name, String::from_utf8_lossy(&bytes).into_owned()));
                        }
                    }
                    *seen.lock().unwrap() = received;
                    Ok::<_, warp::Rejection>(warp::reply::with_header(
                        SAMPLE,
                        "content-type",
                        "application/json",
                    ))
                }
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let result = client(addr).send(request()).await.unwrap();
        assert_eq!(result.load_type, "resistive");
        assert_eq!(result.z0, 50.0);
        assert_eq!(result.waveform.len(), 2);

        let received = seen.lock().unwrap().clone();
        assert_eq!(received.accept.as_deref(), Some("application/json"));
        assert_eq!(received.file_name.as_deref(), Some("trace.csv"));
        assert_eq!(received.file, b"0,0\n1,1\n");
        assert_eq!(
            received.text,
            vec![
                ("cable_length".to_string(), "1.5".to_string()),
                ("z0_expected".to_string(), "50".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn detail_from_error_body_is_surfaced() {
        let addr = canned(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":"cable_length must be positive"}"#,
        )
        .await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Server("cable_length must be positive".into())
        );
    }

    #[tokio::test]
    async fn empty_error_body_falls_back_to_status() {
        let addr = canned(StatusCode::INTERNAL_SERVER_ERROR, "").await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 500");
    }

    #[tokio::test]
    async fn cut_off_error_body_still_reports_status() {
        let err = client(truncated_error_server())
            .send(request())
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::Server("HTTP error! status: 500".into()));
    }

    #[tokio::test]
    async fn structured_detail_falls_back_to_status() {
        let addr = canned(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":[{"loc":["body","file"],"msg":"field required"}]}"#,
        )
        .await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert_eq!(err, AnalysisError::http_status(422));
    }

    #[tokio::test]
    async fn unreadable_success_body_is_malformed() {
        let addr = canned(StatusCode::OK, "<html>gateway</html>").await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn missing_numeric_field_is_malformed() {
        let addr = canned(StatusCode::OK, r#"{"length_meters":1.5,"load_type":"open"}"#).await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unordered_waveform_is_malformed() {
        let addr = canned(
            StatusCode::OK,
            r#"{"length_meters":1.5,"error_percent":2.0,"velocity_factor":0.66,
            "vswr":1.2,"reflection_coefficient":0.09,"beta":4.2,"alpha":0.01,"Z0":50.0,
            "load_type":"open","load_value":75.0,
            "waveform":[{"time":1,"ch1":0.0},{"time":0,"ch1":1.5}]}"#,
        )
        .await;
        let err = client(addr).send(request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(addr).send(request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Network(_)));
    }

    #[tokio::test]
    async fn slow_service_times_out_as_network_error() {
        let route = warp::path!("api" / "analyze-tdr").and(warp::post()).then(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            warp::reply::with_header(SAMPLE, "content-type", "application/json")
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = AnalysisClient::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = client.send(request()).await.unwrap_err();
        assert_eq!(err, AnalysisError::Network("request timed out".into()));
    }

    #[tokio::test]
    async fn failure_after_success_keeps_previous_result() {
        let ok = client(canned(StatusCode::OK, SAMPLE).await);
        let failing = client(
            canned(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"detail":"cable_length must be positive"}"#,
            )
            .await,
        );
        let mut controller = LifecycleController::new(AnalysisParameters::default());
        let selection = || Some(FileSelection::new("trace.csv", b"0,0\n".to_vec()));

        let (ticket, request) = controller.begin(selection()).unwrap();
        let outcome = ok.submit(request).await;
        assert_eq!(controller.complete(ticket, outcome), Completion::Applied);
        assert!(matches!(controller.state(), LifecycleState::Succeeded(_)));

        let (ticket, request) = controller.begin(selection()).unwrap();
        let outcome = failing.submit(request).await;
        assert_eq!(controller.complete(ticket, outcome), Completion::Applied);
        assert_eq!(
            controller.state(),
            &LifecycleState::Failed("cable_length must be positive".into())
        );
        assert_eq!(controller.result().map(|r| r.load_value), Some(75.0));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = AnalysisClient::new("http://localhost:8000/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8000/api/analyze-tdr");
    }
}
