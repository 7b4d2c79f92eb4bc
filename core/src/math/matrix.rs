pub struct MatrixHelper;

impl MatrixHelper {
    /// Solve `lhs * X = rhs` for a square `lhs` with Gaussian elimination and
    /// partial pivoting. Each row of `rhs` holds one row of right-hand sides.
    pub fn solve(mut lhs: Vec<Vec<f64>>, mut rhs: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
        let n = lhs.len();
        if rhs.len() != n || lhs.iter().any(|row| row.len() != n) {
            return None;
        }

        for col in 0..n {
            let pivot = (col..n).max_by(|&a, &b| {
                lhs[a][col]
                    .abs()
                    .partial_cmp(&lhs[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
            if lhs[pivot][col].abs() < f64::EPSILON {
                return None;
            }
            lhs.swap(col, pivot);
            rhs.swap(col, pivot);

            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = lhs[row][col] / lhs[col][col];
                if factor == 0.0 {
                    continue;
                }
                for k in col..n {
                    lhs[row][k] -= factor * lhs[col][k];
                }
                for k in 0..rhs[row].len() {
                    rhs[row][k] -= factor * rhs[col][k];
                }
            }
        }

        for (row, values) in rhs.iter_mut().enumerate() {
            let diag = lhs[row][row];
            values.iter_mut().for_each(|v| *v /= diag);
        }
        Some(rhs)
    }
}
