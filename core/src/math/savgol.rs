use crate::math::matrix::MatrixHelper;

/// Savitzky-Golay smoother with precomputed convolution weights.
///
/// Weights are built once per `(window, order)` pair and reused for every
/// trace. Points closer than half a window to either end are evaluated from
/// the polynomial fitted to the first or last full window.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
    // weights[offset + half][k]: weight of window sample k when evaluating
    // the fitted polynomial at `offset` from the window centre.
    weights: Vec<Vec<f64>>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> Option<Self> {
        if window % 2 == 0 || order >= window {
            return None;
        }
        let half = (window / 2) as f64;
        let terms = order + 1;
        let positions: Vec<f64> = (0..window).map(|k| k as f64 - half).collect();

        let normal: Vec<Vec<f64>> = (0..terms)
            .map(|i| {
                (0..terms)
                    .map(|j| positions.iter().map(|x| x.powi((i + j) as i32)).sum())
                    .collect()
            })
            .collect();
        let design_t: Vec<Vec<f64>> = (0..terms)
            .map(|j| positions.iter().map(|x| x.powi(j as i32)).collect())
            .collect();
        let projection = MatrixHelper::solve(normal, design_t)?;

        let weights: Vec<Vec<f64>> = positions
            .iter()
            .map(|&t| {
                (0..window)
                    .map(|k| {
                        (0..terms)
                            .map(|j| t.powi(j as i32) * projection[j][k])
                            .sum()
                    })
                    .collect()
            })
            .collect();

        Some(Self {
            window,
            order,
            weights,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Smooth `values` into `out`. Mismatched lengths leave `out` untouched.
    pub fn apply_into(&self, values: &[f64], out: &mut [f64]) {
        let n = values.len();
        if out.len() != n {
            return;
        }
        if n < self.window {
            out.copy_from_slice(values);
            return;
        }
        let half = self.window / 2;

        for (i, slot) in out.iter_mut().enumerate() {
            let (start, weight_row) = if i < half {
                (0, i)
            } else if i >= n - half {
                (n - self.window, i - (n - self.window))
            } else {
                (i - half, half)
            };
            *slot = self.weights[weight_row]
                .iter()
                .zip(&values[start..start + self.window])
                .map(|(w, v)| w * v)
                .sum();
        }
    }

    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; values.len()];
        self.apply_into(values, &mut out);
        out
    }
}
