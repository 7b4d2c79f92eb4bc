use client::AnalysisClient;
use iced::{
    widget::{
        button, canvas::Canvas, column, image, row, scrollable, text, text_input, Column,
        Container,
    },
    Alignment, Element, Length, Task, Theme,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tdrcore::contract::request::{DEFAULT_CABLE_LENGTH_M, DEFAULT_Z0_OHMS};
use tdrcore::contract::{AnalysisError, AnalysisParameters, AnalysisResult, FileSelection};
use tdrcore::lifecycle::{LifecycleController, LifecycleSnapshot, LifecycleState, Ticket};
use tokio::sync::watch;

mod charts;
mod client;
mod report;
mod table;

const REPORT_PATH: &str = "tdr_report.txt";

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let client = AnalysisClient::from_env()?;
    log::info!("analysis endpoint {}", client.endpoint());

    iced::application(
        move || Visualizer::boot(client.clone()),
        Visualizer::update,
        Visualizer::view,
    )
    .title(application_title)
    .theme(application_theme)
    .run()
    .map_err(|err| anyhow::anyhow!("running the visualizer: {err}"))
}

fn application_title(_: &Visualizer) -> String {
    "TDR Analyzer".into()
}

fn application_theme(_: &Visualizer) -> Theme {
    Theme::Dark
}

struct Visualizer {
    client: AnalysisClient,
    controller: LifecycleController,
    /// The view renders only what arrives on this channel.
    updates: watch::Receiver<LifecycleSnapshot>,
    shown: LifecycleSnapshot,
    form: UploadForm,
    plot: Option<image::Handle>,
    notice: Option<String>,
}

#[derive(Debug, Clone)]
enum Message {
    FieldChanged(FormField, String),
    Submit,
    FileRead(Ticket, Result<FileSelection, String>),
    AnalysisFinished(Ticket, Result<AnalysisResult, AnalysisError>),
    Export,
    Reset,
}

#[derive(Debug, Clone, Copy)]
enum FormField {
    CsvPath,
    CableLength,
    Z0,
}

impl Visualizer {
    fn boot(client: AnalysisClient) -> (Self, Task<Message>) {
        let controller = LifecycleController::new(AnalysisParameters::default());
        let updates = controller.subscribe();
        let shown = updates.borrow().clone();
        (
            Visualizer {
                client,
                controller,
                updates,
                shown,
                form: UploadForm::default(),
                plot: None,
                notice: None,
            },
            Task::none(),
        )
    }

    fn update(state: &mut Self, message: Message) -> Task<Message> {
        let task = match message {
            Message::FieldChanged(field, value) => {
                state.form.update_field(field, value);
                Task::none()
            }
            Message::Submit => match state.start_submission() {
                Some((ticket, path)) => {
                    Task::perform(read_selection(path), move |read| Message::FileRead(ticket, read))
                }
                None => Task::none(),
            },
            Message::FileRead(ticket, Ok(selection)) => {
                match state.controller.attach(ticket, Some(selection)) {
                    Some(request) => {
                        let client = state.client.clone();
                        Task::perform(async move { client.send(request).await }, move |outcome| {
                            Message::AnalysisFinished(ticket, outcome)
                        })
                    }
                    None => Task::none(),
                }
            }
            Message::FileRead(ticket, Err(reason)) => {
                state
                    .controller
                    .complete(ticket, Err(AnalysisError::Validation(reason)));
                Task::none()
            }
            Message::AnalysisFinished(ticket, outcome) => {
                state.controller.complete(ticket, outcome);
                Task::none()
            }
            Message::Export => {
                if let Some(result) = state.shown.result.clone() {
                    let source = state.form.csv_path.trim().to_string();
                    state.notice = Some(
                        match report::export_report(&result, Some(&source), &PathBuf::from(REPORT_PATH)) {
                            Ok(exported) => match exported.plot {
                                Some(plot) => format!(
                                    "Report written to {} (plot {})",
                                    exported.text.display(),
                                    plot.display()
                                ),
                                None => format!("Report written to {}", exported.text.display()),
                            },
                            Err(err) => format!("Export failed: {err:#}"),
                        },
                    );
                }
                Task::none()
            }
            Message::Reset => {
                state.controller.reset();
                state.form.csv_path.clear();
                state.notice = None;
                Task::none()
            }
        };
        state.sync();
        task
    }

    /// Fixes the submission order at the moment the user presses Analyze.
    fn start_submission(&mut self) -> Option<(Ticket, PathBuf)> {
        self.notice = None;
        match self.form.parameters() {
            Ok(parameters) => self.controller.set_parameters(parameters),
            Err(err) => {
                self.controller.reject(err);
                return None;
            }
        }
        match self.form.selected_path() {
            Some(path) => {
                let ticket = self.controller.reserve(display_name(&path));
                Some((ticket, path))
            }
            None => {
                self.controller.begin(None);
                None
            }
        }
    }

    /// Pulls the latest published snapshot and redecodes the plot when the
    /// result changed.
    fn sync(&mut self) {
        if !self.updates.has_changed().unwrap_or(false) {
            return;
        }
        let latest = self.updates.borrow_and_update().clone();
        let same_result = match (&latest.result, &self.shown.result) {
            (Some(new), Some(old)) => Arc::ptr_eq(new, old),
            (None, None) => true,
            _ => false,
        };
        if !same_result {
            self.plot = latest.result.as_deref().and_then(|result| match charts::plot_png(result) {
                Ok(png) => png.map(image::Handle::from_bytes),
                Err(err) => {
                    log::warn!("plot image could not be decoded, drawing the waveform instead: {err}");
                    None
                }
            });
        }
        self.shown = latest;
    }

    fn status_line(&self) -> String {
        match &self.shown.state {
            LifecycleState::Idle => "Select a capture and press Analyze.".into(),
            LifecycleState::Pending(summary) => format!(
                "Analyzing {} ({} bytes)...",
                summary.file_name, summary.size_bytes
            ),
            LifecycleState::Succeeded(result) => {
                format!("Analysis complete: {} load", result.load_type)
            }
            LifecycleState::Failed(message) => format!("Error: {message}"),
        }
    }

    fn view(state: &Self) -> Element<'_, Message> {
        let form_column = column![
            text("Upload Capture").size(26),
            text_input("CSV file path", &state.form.csv_path)
                .on_input(|value| Message::FieldChanged(FormField::CsvPath, value))
                .padding(6),
            text_input("Cable length (m)", &state.form.cable_length)
                .on_input(|value| Message::FieldChanged(FormField::CableLength, value))
                .padding(6),
            text_input("Expected Z0 (ohm)", &state.form.z0)
                .on_input(|value| Message::FieldChanged(FormField::Z0, value))
                .padding(6),
            row![
                button("Analyze").on_press(Message::Submit).padding(10),
                button("Reset").on_press(Message::Reset).padding(10),
            ]
            .spacing(10),
            text(state.status_line()).size(14),
        ]
        .spacing(10)
        .padding(16)
        .width(Length::Fixed(360.0));

        let results_column = match &state.shown.result {
            Some(result) => {
                let metrics = table::metric_rows(result).into_iter().fold(
                    Column::new().spacing(4),
                    |col, metric| {
                        col.push(
                            row![
                                text(metric.label).size(14).width(Length::Fixed(240.0)),
                                text(metric.display_value()).size(14),
                            ]
                            .spacing(8),
                        )
                    },
                );

                let chart: Element<'_, Message> = match &state.plot {
                    Some(handle) => image(handle.clone()).width(Length::Fill).into(),
                    None => Canvas::new(charts::WaveformChart::new(&result.waveform))
                        .width(Length::Fill)
                        .height(Length::Fixed(280.0))
                        .into(),
                };

                let mut export = row![button("Export report").on_press(Message::Export).padding(8)]
                    .spacing(10)
                    .align_y(Alignment::Center);
                if let Some(notice) = &state.notice {
                    export = export.push(text(notice.clone()).size(12));
                }

                column![
                    text("Results").size(26),
                    Container::new(metrics).padding(6),
                    text("TDR trace").size(18),
                    chart,
                    export,
                ]
            }
            None => column![
                text("Results").size(26),
                text("No analysis yet").size(14)
            ],
        }
        .spacing(10)
        .padding(16)
        .width(Length::Fill);

        let layout = row![form_column, scrollable(results_column)]
            .spacing(20)
            .align_y(Alignment::Start)
            .padding(20);

        Container::new(layout)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn read_selection(path: PathBuf) -> Result<FileSelection, String> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| format!("could not read {}: {err}", path.display()))?;
    Ok(FileSelection::new(display_name(&path), bytes))
}

/// Text fields of the upload form, kept as typed.
#[derive(Debug, Clone)]
struct UploadForm {
    csv_path: String,
    cable_length: String,
    z0: String,
}

impl Default for UploadForm {
    fn default() -> Self {
        Self {
            csv_path: String::new(),
            cable_length: DEFAULT_CABLE_LENGTH_M.to_string(),
            z0: DEFAULT_Z0_OHMS.to_string(),
        }
    }
}

fn positive_field(raw: &str, default: f64, label: &str) -> Result<f64, AnalysisError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(AnalysisError::Validation(format!(
            "{label} must be a positive number"
        ))),
    }
}

impl UploadForm {
    fn update_field(&mut self, field: FormField, value: String) {
        match field {
            FormField::CsvPath => self.csv_path = value,
            FormField::CableLength => self.cable_length = value,
            FormField::Z0 => self.z0 = value,
        }
    }

    /// Blank fields fall back to the defaults.
    fn parameters(&self) -> Result<AnalysisParameters, AnalysisError> {
        Ok(AnalysisParameters {
            cable_length_m: positive_field(&self.cable_length, DEFAULT_CABLE_LENGTH_M, "cable length")?,
            z0_expected_ohms: positive_field(&self.z0, DEFAULT_Z0_OHMS, "Z0")?,
        })
    }

    fn selected_path(&self) -> Option<PathBuf> {
        let path = self.csv_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}
