//! Request lifecycle for one client session.
//!
//! The controller is the only writer of the session state. Every submission
//! gets a [`Ticket`] carrying a generation number; a completion is applied
//! only if its ticket belongs to the most recently started submission, so a
//! slow early response can never overwrite a later one.

use crate::contract::{
    AnalysisError, AnalysisParameters, AnalysisRequest, AnalysisResult, FileSelection,
    RequestSummary,
};
use crate::telemetry::log::LogManager;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Idle,
    Pending(RequestSummary),
    Succeeded(Arc<AnalysisResult>),
    Failed(String),
}

/// Proof that a submission was started; handed back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    /// Last successful result; survives failed submissions.
    pub result: Option<Arc<AnalysisResult>>,
    pub parameters: AnalysisParameters,
    pub generation: u64,
}

impl LifecycleSnapshot {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, LifecycleState::Pending(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            LifecycleState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

pub struct LifecycleController {
    snapshot: LifecycleSnapshot,
    publisher: watch::Sender<LifecycleSnapshot>,
    logger: LogManager,
}

impl LifecycleController {
    pub fn new(parameters: AnalysisParameters) -> Self {
        let snapshot = LifecycleSnapshot {
            state: LifecycleState::Idle,
            result: None,
            parameters,
            generation: 0,
        };
        let (publisher, _) = watch::channel(snapshot.clone());
        Self {
            snapshot,
            publisher,
            logger: LogManager::new("lifecycle"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> &LifecycleSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> &LifecycleState {
        &self.snapshot.state
    }

    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        self.snapshot.result.as_ref()
    }

    pub fn parameters(&self) -> AnalysisParameters {
        self.snapshot.parameters
    }

    pub fn set_parameters(&mut self, parameters: AnalysisParameters) {
        self.snapshot.parameters = parameters;
        self.publish();
    }

    /// Starts a submission for `selection` with the current parameters.
    ///
    /// Any submission still in flight is superseded. Returns `None` when the
    /// selection does not make a valid request; the state is then `Failed`
    /// and nothing should be sent.
    pub fn begin(&mut self, selection: Option<FileSelection>) -> Option<(Ticket, AnalysisRequest)> {
        let file_name = selection
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let ticket = self.reserve(file_name);
        self.attach(ticket, selection).map(|request| (ticket, request))
    }

    /// Takes the ticket for a submission whose file is still being loaded.
    ///
    /// The state becomes `Pending` right away, so submission order is fixed
    /// here rather than when the file contents arrive.
    pub fn reserve(&mut self, file_name: impl Into<String>) -> Ticket {
        let ticket = self.advance();
        let file_name = file_name.into();
        self.logger
            .record(&format!("submission {} reserved for {}", ticket.0, file_name));
        self.snapshot.state = LifecycleState::Pending(RequestSummary {
            file_name,
            size_bytes: 0,
            parameters: self.snapshot.parameters,
        });
        self.publish();
        ticket
    }

    /// Supplies the file for a reserved submission and builds its request.
    ///
    /// Returns `None` for a stale ticket, leaving the state untouched, or for
    /// a selection that is not a valid request, which fails the submission.
    pub fn attach(
        &mut self,
        ticket: Ticket,
        selection: Option<FileSelection>,
    ) -> Option<AnalysisRequest> {
        if ticket.0 != self.snapshot.generation {
            self.logger.detail(&format!(
                "dropping file for stale submission {} (current {})",
                ticket.0, self.snapshot.generation
            ));
            return None;
        }
        match AnalysisRequest::new(selection, self.snapshot.parameters) {
            Ok(request) => {
                self.logger.record(&format!(
                    "submission {} started for {} ({} bytes)",
                    ticket.0,
                    request.file_name(),
                    request.file().len()
                ));
                self.snapshot.state = LifecycleState::Pending(request.summary());
                self.publish();
                Some(request)
            }
            Err(err) => {
                self.complete(ticket, Err(err));
                None
            }
        }
    }

    /// Records a failure that happened before anything was sent.
    pub fn reject(&mut self, error: AnalysisError) {
        let ticket = self.advance();
        self.logger
            .warn(&format!("submission {} rejected: {}", ticket.0, error));
        self.snapshot.state = LifecycleState::Failed(error.to_string());
        self.publish();
    }

    pub fn complete(
        &mut self,
        ticket: Ticket,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Completion {
        if ticket.0 != self.snapshot.generation {
            self.logger.detail(&format!(
                "discarding stale completion {} (current {})",
                ticket.0, self.snapshot.generation
            ));
            return Completion::Stale;
        }

        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                self.logger.record(&format!(
                    "submission {} succeeded: load {}, VSWR {:.3}",
                    ticket.0, result.load_type, result.vswr
                ));
                self.snapshot.result = Some(Arc::clone(&result));
                self.snapshot.state = LifecycleState::Succeeded(result);
            }
            Err(err) => {
                if matches!(err, AnalysisError::MalformedResponse(_)) {
                    self.logger
                        .warn(&format!("submission {} got a malformed response: {}", ticket.0, err));
                } else {
                    self.logger.warn(&format!(
                        "submission {} failed ({}): {}",
                        ticket.0,
                        err.kind(),
                        err
                    ));
                }
                self.snapshot.state = LifecycleState::Failed(err.to_string());
            }
        }
        self.publish();
        Completion::Applied
    }

    /// Back to the initial screen: the result is discarded and any in-flight
    /// submission becomes stale. Parameters are kept.
    pub fn reset(&mut self) {
        self.advance();
        self.snapshot.state = LifecycleState::Idle;
        self.snapshot.result = None;
        self.publish();
    }

    fn advance(&mut self) -> Ticket {
        self.snapshot.generation += 1;
        Ticket(self.snapshot.generation)
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot.clone());
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new(AnalysisParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{AnalysisTransport, WaveformPoint};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn result(load_value: f64) -> AnalysisResult {
        AnalysisResult {
            length_meters: 1.5,
            error_percent: 2.0,
            velocity_factor: 0.66,
            vswr: 1.2,
            reflection_coefficient: 0.09,
            beta: 4.2,
            alpha: 0.01,
            z0: 50.0,
            load_type: "resistive".into(),
            load_value,
            tdr_plot_base64: String::new(),
            waveform: vec![
                WaveformPoint { time: 0.0, ch1: 0.0 },
                WaveformPoint { time: 0.02, ch1: 1.5 },
            ],
        }
    }

    fn selection() -> Option<FileSelection> {
        Some(FileSelection::new("capture.csv", b"0,0\n1,1\n".to_vec()))
    }

    #[test]
    fn starts_idle() {
        let controller = LifecycleController::default();
        assert_eq!(controller.state(), &LifecycleState::Idle);
        assert!(controller.result().is_none());
    }

    #[test]
    fn success_replaces_result() {
        let mut controller = LifecycleController::default();
        let (ticket, _) = controller.begin(selection()).unwrap();
        assert!(controller.snapshot().is_pending());
        assert_eq!(controller.complete(ticket, Ok(result(75.0))), Completion::Applied);

        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.complete(ticket, Ok(result(90.0)));
        assert_eq!(controller.result().unwrap().load_value, 90.0);
        assert!(matches!(controller.state(), LifecycleState::Succeeded(r) if r.load_value == 90.0));
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut controller = LifecycleController::default();
        let (first, _) = controller.begin(selection()).unwrap();
        let (second, _) = controller.begin(selection()).unwrap();

        assert_eq!(controller.complete(second, Ok(result(2.0))), Completion::Applied);
        assert_eq!(controller.complete(first, Ok(result(1.0))), Completion::Stale);
        assert_eq!(controller.result().unwrap().load_value, 2.0);
    }

    #[test]
    fn failure_keeps_previous_result() {
        let mut controller = LifecycleController::default();
        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.complete(ticket, Ok(result(75.0)));

        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.complete(
            ticket,
            Err(AnalysisError::Server("cable_length must be positive".into())),
        );
        assert_eq!(
            controller.state(),
            &LifecycleState::Failed("cable_length must be positive".into())
        );
        assert_eq!(controller.result().unwrap().load_value, 75.0);
    }

    #[test]
    fn missing_file_fails_without_request() {
        let mut controller = LifecycleController::default();
        assert!(controller.begin(None).is_none());
        assert_eq!(
            controller.snapshot().error_message(),
            Some("no file selected")
        );
    }

    #[test]
    fn validation_failure_supersedes_in_flight_request() {
        let mut controller = LifecycleController::default();
        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.begin(None);
        assert_eq!(controller.complete(ticket, Ok(result(1.0))), Completion::Stale);
        assert!(controller.result().is_none());
    }

    #[test]
    fn reserve_fixes_submission_order_before_files_arrive() {
        let mut controller = LifecycleController::default();
        let first = controller.reserve("first.csv");
        let second = controller.reserve("second.csv");
        assert!(matches!(
            controller.state(),
            LifecycleState::Pending(summary) if summary.file_name == "second.csv"
        ));

        let request = controller
            .attach(second, Some(FileSelection::new("second.csv", b"0,1\n".to_vec())))
            .unwrap();
        assert_eq!(request.file_name(), "second.csv");
        assert!(controller
            .attach(first, Some(FileSelection::new("first.csv", b"0,1\n".to_vec())))
            .is_none());
        assert!(matches!(
            controller.state(),
            LifecycleState::Pending(summary) if summary.file_name == "second.csv" && summary.size_bytes == 4
        ));
    }

    #[test]
    fn stale_load_failure_leaves_newer_submission_pending() {
        let mut controller = LifecycleController::default();
        let first = controller.reserve("first.csv");
        let second = controller.reserve("second.csv");
        let outcome = controller.complete(
            first,
            Err(AnalysisError::Validation("could not read first.csv".into())),
        );
        assert_eq!(outcome, Completion::Stale);
        assert!(controller.snapshot().is_pending());

        let request = controller.attach(second, selection()).unwrap();
        assert_eq!(controller.complete(second, Ok(result(3.0))), Completion::Applied);
        assert_eq!(request.file_name(), "capture.csv");
    }

    #[test]
    fn attaching_an_empty_file_fails_the_submission() {
        let mut controller = LifecycleController::default();
        let ticket = controller.reserve("empty.csv");
        assert!(controller
            .attach(ticket, Some(FileSelection::new("empty.csv", Vec::new())))
            .is_none());
        assert!(controller.snapshot().error_message().is_some());
    }

    #[test]
    fn reset_discards_result_and_keeps_parameters() {
        let mut controller = LifecycleController::default();
        let parameters = AnalysisParameters {
            cable_length_m: 12.0,
            z0_expected_ohms: 75.0,
        };
        controller.set_parameters(parameters);
        let (ticket, request) = controller.begin(selection()).unwrap();
        assert_eq!(request.parameters(), parameters);
        controller.complete(ticket, Ok(result(75.0)));

        controller.reset();
        assert_eq!(controller.state(), &LifecycleState::Idle);
        assert!(controller.result().is_none());
        assert_eq!(controller.parameters(), parameters);
    }

    #[test]
    fn parameters_persist_after_failure() {
        let mut controller = LifecycleController::default();
        let parameters = AnalysisParameters {
            cable_length_m: -1.0,
            z0_expected_ohms: 50.0,
        };
        controller.set_parameters(parameters);
        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.complete(ticket, Err(AnalysisError::http_status(500)));
        assert_eq!(controller.parameters(), parameters);
    }

    #[test]
    fn subscribers_see_transitions() {
        let mut controller = LifecycleController::default();
        let receiver = controller.subscribe();
        let (ticket, _) = controller.begin(selection()).unwrap();
        assert!(receiver.borrow().is_pending());
        controller.complete(ticket, Err(AnalysisError::Network("refused".into())));
        assert!(receiver.borrow().error_message().is_some());
    }

    #[test]
    fn rendering_a_result_twice_is_identical() {
        let mut controller = LifecycleController::default();
        let (ticket, _) = controller.begin(selection()).unwrap();
        controller.complete(ticket, Ok(result(75.0)));
        let first = format!("{:?}", controller.snapshot());
        let second = format!("{:?}", controller.snapshot());
        assert_eq!(first, second);
    }

    /// Transport whose latency depends on the file name, to force
    /// out-of-order completions.
    struct DelayedTransport;

    impl AnalysisTransport for DelayedTransport {
        async fn submit(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            let delay = if request.file_name() == "slow.csv" { 80 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(result(request.parameters().cable_length_m))
        }
    }

    async fn run(
        controller: &Mutex<LifecycleController>,
        name: &str,
        cable_length_m: f64,
    ) -> Completion {
        let (ticket, request) = {
            let mut guard = controller.lock().await;
            guard.set_parameters(AnalysisParameters {
                cable_length_m,
                z0_expected_ohms: 50.0,
            });
            guard
                .begin(Some(FileSelection::new(name, b"0,1\n".to_vec())))
                .unwrap()
        };
        let outcome = DelayedTransport.submit(request).await;
        controller.lock().await.complete(ticket, outcome)
    }

    #[tokio::test]
    async fn late_response_from_earlier_submission_loses() {
        let controller = Mutex::new(LifecycleController::default());
        let slow = run(&controller, "slow.csv", 1.0);
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            run(&controller, "fast.csv", 2.0).await
        };
        let (slow_done, fast_done) = tokio::join!(slow, fast);

        assert_eq!(slow_done, Completion::Stale);
        assert_eq!(fast_done, Completion::Applied);
        let guard = controller.lock().await;
        assert_eq!(guard.result().unwrap().load_value, 2.0);
    }
}
