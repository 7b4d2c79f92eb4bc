use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const FRAME: Rgb<u8> = Rgb([40, 40, 40]);
const TRACE: Rgb<u8> = Rgb([31, 119, 180]);

const MARGIN: u32 = 24;
const GRID_DIVISIONS: u32 = 10;
const MIN_WIDTH: u32 = 64;
const MIN_HEIGHT: u32 = 48;

/// Pixel rectangle the data is mapped into, plus the data ranges.
#[derive(Debug, Clone, Copy)]
pub struct PlotArea {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    t_range: (f64, f64),
    v_range: (f64, f64),
}

impl PlotArea {
    fn new(width: u32, height: u32, time: &[f64], voltage: &[f64]) -> Self {
        let t_range = bounds(time);
        let (v_lo, v_hi) = bounds(voltage);
        let pad = ((v_hi - v_lo) * 0.05).max(1e-12);
        Self {
            left: MARGIN,
            top: MARGIN,
            right: width - MARGIN,
            bottom: height - MARGIN,
            t_range,
            v_range: (v_lo - pad, v_hi + pad),
        }
    }

    /// Maps a data point to pixel coordinates inside the area.
    pub fn project(&self, t: f64, v: f64) -> (i64, i64) {
        let span_t = (self.t_range.1 - self.t_range.0).max(f64::MIN_POSITIVE);
        let span_v = self.v_range.1 - self.v_range.0;
        let fx = (t - self.t_range.0) / span_t;
        let fy = (v - self.v_range.0) / span_v;
        let x = self.left as f64 + fx * (self.right - self.left) as f64;
        let y = self.bottom as f64 - fy * (self.bottom - self.top) as f64;
        (x.round() as i64, y.round() as i64)
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line between two pixels.
fn line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(canvas, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_grid(canvas: &mut RgbImage, area: &PlotArea) {
    let (left, top, right, bottom) = (
        area.left as i64,
        area.top as i64,
        area.right as i64,
        area.bottom as i64,
    );
    for step in 1..GRID_DIVISIONS as i64 {
        let x = left + (right - left) * step / GRID_DIVISIONS as i64;
        let y = top + (bottom - top) * step / GRID_DIVISIONS as i64;
        line(canvas, (x, top), (x, bottom), GRID);
        line(canvas, (left, y), (right, y), GRID);
    }
    line(canvas, (left, top), (right, top), FRAME);
    line(canvas, (right, top), (right, bottom), FRAME);
    line(canvas, (right, bottom), (left, bottom), FRAME);
    line(canvas, (left, bottom), (left, top), FRAME);
}

/// Draws a framed, gridded voltage-vs-time trace.
pub fn draw_trace(time: &[f64], voltage: &[f64], width: u32, height: u32) -> anyhow::Result<RgbImage> {
    if time.is_empty() || time.len() != voltage.len() {
        anyhow::bail!(
            "cannot plot {} time points against {} samples",
            time.len(),
            voltage.len()
        );
    }
    let (width, height) = (width.max(MIN_WIDTH), height.max(MIN_HEIGHT));
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    let area = PlotArea::new(width, height, time, voltage);
    draw_grid(&mut canvas, &area);

    let mut points = time.iter().zip(voltage).map(|(&t, &v)| area.project(t, v));
    if let Some(mut previous) = points.next() {
        put(&mut canvas, previous.0, previous.1, TRACE);
        for point in points {
            line(&mut canvas, previous, point, TRACE);
            previous = point;
        }
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_pixels_are_drawn_inside_the_frame() {
        let time = [0.0, 1.0, 2.0];
        let voltage = [0.0, 1.0, 0.0];
        let canvas = draw_trace(&time, &voltage, 200, 100).unwrap();
        let traced = canvas.pixels().filter(|p| **p == TRACE).count();
        assert!(traced > 100);
        assert_eq!(*canvas.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*canvas.get_pixel(MARGIN, MARGIN), FRAME);
    }

    #[test]
    fn flat_trace_projects_to_the_middle() {
        let time = [0.0, 1.0];
        let voltage = [0.5, 0.5];
        let area = PlotArea::new(200, 100, &time, &voltage);
        let (_, y) = area.project(0.0, 0.5);
        assert_eq!(y, 50);
    }

    #[test]
    fn tiny_canvas_is_enlarged() {
        let canvas = draw_trace(&[0.0, 1.0], &[0.0, 1.0], 4, 4).unwrap();
        assert_eq!(canvas.dimensions(), (MIN_WIDTH, MIN_HEIGHT));
    }
}
