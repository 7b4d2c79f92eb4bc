//! Raster rendering of a TDR trace into the `tdr_plot_base64` field.

pub mod raster;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use raster::draw_trace;

/// Renders `voltage` against `time` as a PNG and returns it base64 encoded.
pub fn render_base64(time: &[f64], voltage: &[f64], width: u32, height: u32) -> anyhow::Result<String> {
    let png = render_png(time, voltage, width, height)?;
    Ok(STANDARD.encode(png))
}

pub fn render_png(time: &[f64], voltage: &[f64], width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let canvas = draw_trace(time, voltage, width, height)?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("encoding plot as PNG")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_plot_decodes_to_requested_size() {
        let time: Vec<f64> = (0..100).map(|i| i as f64 * 1e-9).collect();
        let voltage: Vec<f64> = (0..100).map(|i| if i < 30 { 0.0 } else { 1.0 }).collect();
        let encoded = render_base64(&time, &voltage, 320, 200).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 200);
    }

    #[test]
    fn empty_trace_is_an_error() {
        assert!(render_base64(&[], &[], 320, 200).is_err());
    }
}
