pub struct GradientHelper;

impl GradientHelper {
    /// Derivative of `values` against a possibly non-uniform `coords` axis.
    ///
    /// Interior points use second-order central differences, the two end
    /// points use one-sided first-order differences.
    pub fn gradient(values: &[f64], coords: &[f64]) -> Vec<f64> {
        let n = values.len().min(coords.len());
        if n < 2 {
            return vec![0.0; n];
        }

        let mut out = vec![0.0; n];
        out[0] = (values[1] - values[0]) / (coords[1] - coords[0]);
        out[n - 1] = (values[n - 1] - values[n - 2]) / (coords[n - 1] - coords[n - 2]);

        for i in 1..n - 1 {
            let hs = coords[i] - coords[i - 1];
            let hd = coords[i + 1] - coords[i];
            out[i] = (hs * hs * values[i + 1] + (hd * hd - hs * hs) * values[i]
                - hd * hd * values[i - 1])
                / (hs * hd * (hd + hs));
        }
        out
    }
}
