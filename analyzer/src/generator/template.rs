use std::fmt::Write;

/// Header block in the layout written by the bench oscilloscope export.
pub fn header_block(record_length: usize, sample_interval: f64, vertical_scale: f64) -> String {
    let mut out = String::new();
    let horizontal_scale = sample_interval * 100.0;
    let lines = [
        format!("Record Length:{record_length},"),
        format!("Sample Interval:{sample_interval:e},"),
        "Trigger Point:0,".to_string(),
        "Source:CH1,".to_string(),
        "Vertical Units:V,".to_string(),
        format!("Vertical Scale:{vertical_scale},"),
        "Vertical Offset:0,".to_string(),
        "Horizontal Units:s,".to_string(),
        format!("Horizontal Scale:{horizontal_scale:e}"),
        "Pt Size:0,".to_string(),
        "Second,Volt,".to_string(),
    ];
    for line in lines {
        // writing to a String cannot fail
        let _ = writeln!(out, "{line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdrcore::capture::HEADER_LINES;

    #[test]
    fn header_has_fixed_line_count() {
        let header = header_block(600, 1e-9, 0.2);
        assert_eq!(header.lines().count(), HEADER_LINES);
        assert!(header.starts_with("Record Length:600,"));
    }
}
