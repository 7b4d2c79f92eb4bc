use base64::{engine::general_purpose::STANDARD, Engine as _};
use iced::{
    mouse,
    widget::canvas::{self, Frame, Geometry, Path, Stroke},
    Color, Point, Rectangle, Renderer, Theme,
};
use tdrcore::contract::{AnalysisResult, WaveformPoint};

/// PNG bytes of the pre-rendered plot, if the service sent one.
pub fn plot_png(result: &AnalysisResult) -> Result<Option<Vec<u8>>, base64::DecodeError> {
    if !result.has_plot() {
        return Ok(None);
    }
    STANDARD.decode(result.tdr_plot_base64.trim()).map(Some)
}

/// Maps samples onto a `width` x `height` box, time on x and voltage on y.
pub fn trace_points(samples: &[WaveformPoint], width: f32, height: f32) -> Vec<Point> {
    let Some((first, last)) = samples.first().zip(samples.last()) else {
        return Vec::new();
    };
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.ch1), hi.max(p.ch1))
        });
    let span_t = (last.time - first.time).max(f64::MIN_POSITIVE);
    let span_v = if max > min { max - min } else { 1.0 };

    samples
        .iter()
        .map(|p| {
            let x = ((p.time - first.time) / span_t) as f32 * width;
            let normalized = ((p.ch1 - min) / span_v) as f32;
            Point::new(x, height - normalized * height)
        })
        .collect()
}

/// Fallback chart drawn from the raw waveform when no plot image is present.
#[derive(Clone)]
pub struct WaveformChart {
    samples: Vec<WaveformPoint>,
}

impl WaveformChart {
    pub fn new(samples: &[WaveformPoint]) -> Self {
        Self {
            samples: samples.to_vec(),
        }
    }
}

impl<Message> canvas::Program<Message> for WaveformChart {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = Frame::new(renderer, bounds.size());
        frame.fill_rectangle(
            Point::ORIGIN,
            bounds.size(),
            Color::from_rgb(0.05, 0.05, 0.05),
        );

        let grid = Path::new(|builder| {
            for step in 1..10 {
                let x = bounds.width * step as f32 / 10.0;
                let y = bounds.height * step as f32 / 10.0;
                builder.move_to(Point::new(x, 0.0));
                builder.line_to(Point::new(x, bounds.height));
                builder.move_to(Point::new(0.0, y));
                builder.line_to(Point::new(bounds.width, y));
            }
        });
        frame.stroke(
            &grid,
            Stroke::default()
                .with_width(1.0)
                .with_color(Color::from_rgb(0.18, 0.18, 0.22)),
        );

        let points = trace_points(&self.samples, bounds.width, bounds.height);
        if points.len() > 1 {
            let path = Path::new(|builder| {
                builder.move_to(points[0]);
                for point in &points[1..] {
                    builder.line_to(*point);
                }
            });
            frame.stroke(
                &path,
                Stroke::default()
                    .with_width(2.0)
                    .with_color(Color::from_rgb(0.18, 0.72, 0.89)),
            );
        }

        vec![frame.into_geometry()]
    }
}
