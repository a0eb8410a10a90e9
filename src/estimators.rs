//! Reference models behind the fit/predict seam used by the backtest.
//!
//! Any model family can be plugged in by implementing [`Estimator`]; these two
//! exist so the pipeline runs end to end without an external trainer.

use crate::error::FitError;

pub trait FittedModel: Send {
    /// One score per row: a probability for classifiers, a value for
    /// regressors.
    fn predict(&self, features: &[Vec<f64>]) -> Vec<f64>;
}

/// Shared read-only across parallel splits; every `fit` returns a fresh model.
pub trait Estimator: Sync {
    fn name(&self) -> &str;
    fn fit(&self, features: &[Vec<f64>], labels: &[f64]) -> Result<Box<dyn FittedModel>, FitError>;
}

#[derive(Debug, Clone)]
struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    fn fit(features: &[Vec<f64>], cols: usize) -> Self {
        let n = features.len() as f64;
        let mut mean = vec![0.0_f64; cols];
        for row in features {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let mut var = vec![0.0_f64; cols];
        for row in features {
            for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        let scale = var
            .into_iter()
            .map(|s| {
                let sd = (s / n).sqrt();
                if sd > 1e-12 { sd } else { 1.0 }
            })
            .collect();
        Self { mean, scale }
    }

    fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }
}

fn check_matrix(features: &[Vec<f64>], labels: &[f64]) -> Result<usize, FitError> {
    let Some(first) = features.first() else {
        return Err(FitError::EmptyTrainingSet);
    };
    let cols = first.len();
    for (row_idx, row) in features.iter().enumerate() {
        if row.len() != cols {
            return Err(FitError::Ragged {
                expected: cols,
                row: row_idx,
                actual: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }
    }
    if labels.len() != features.len() || labels.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(cols)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// L2-regularised logistic regression fitted by full-batch gradient descent
/// on standardised features. Labels must be 0.0 or 1.0.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub l2: f64,
    pub learning_rate: f64,
    pub epochs: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            l2: 1.0,
            learning_rate: 0.1,
            epochs: 400,
        }
    }
}

struct LogisticModel {
    scaler: Scaler,
    weights: Vec<f64>,
    bias: f64,
}

impl FittedModel for LogisticModel {
    fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        features
            .iter()
            .map(|row| {
                let x = self.scaler.apply(row);
                let z = self.bias + x.iter().zip(&self.weights).map(|(a, b)| a * b).sum::<f64>();
                sigmoid(z)
            })
            .collect()
    }
}

impl Estimator for LogisticRegression {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn fit(&self, features: &[Vec<f64>], labels: &[f64]) -> Result<Box<dyn FittedModel>, FitError> {
        let cols = check_matrix(features, labels)?;
        let first = labels[0];
        if labels.iter().all(|y| *y == first) {
            return Err(FitError::SingleClass(first));
        }

        let scaler = Scaler::fit(features, cols);
        let xs: Vec<Vec<f64>> = features.iter().map(|r| scaler.apply(r)).collect();
        let n = xs.len() as f64;
        let mut weights = vec![0.0_f64; cols];
        let mut bias = 0.0_f64;

        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0_f64; cols];
            let mut grad_b = 0.0_f64;
            for (x, y) in xs.iter().zip(labels) {
                let z = bias + x.iter().zip(&weights).map(|(a, b)| a * b).sum::<f64>();
                let err = sigmoid(z) - y;
                for (g, v) in grad_w.iter_mut().zip(x) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * (g / n + self.l2 * *w / n);
            }
            bias -= self.learning_rate * grad_b / n;
        }
        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return Err(FitError::NonFinite);
        }

        Ok(Box::new(LogisticModel {
            scaler,
            weights,
            bias,
        }))
    }
}

/// Ridge regression solved through the normal equations.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    pub l2: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self { l2: 1.0 }
    }
}

struct RidgeModel {
    scaler: Scaler,
    weights: Vec<f64>,
    intercept: f64,
}

impl FittedModel for RidgeModel {
    fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        features
            .iter()
            .map(|row| {
                let x = self.scaler.apply(row);
                self.intercept + x.iter().zip(&self.weights).map(|(a, b)| a * b).sum::<f64>()
            })
            .collect()
    }
}

impl Estimator for RidgeRegression {
    fn name(&self) -> &str {
        "ridge_regression"
    }

    fn fit(&self, features: &[Vec<f64>], labels: &[f64]) -> Result<Box<dyn FittedModel>, FitError> {
        let cols = check_matrix(features, labels)?;
        let scaler = Scaler::fit(features, cols);
        let intercept = labels.iter().sum::<f64>() / labels.len() as f64;

        let mut gram = vec![vec![0.0_f64; cols]; cols];
        let mut rhs = vec![0.0_f64; cols];
        for (row, y) in features.iter().zip(labels) {
            let x = scaler.apply(row);
            let centered = y - intercept;
            for i in 0..cols {
                rhs[i] += x[i] * centered;
                for j in 0..cols {
                    gram[i][j] += x[i] * x[j];
                }
            }
        }
        for (i, row) in gram.iter_mut().enumerate() {
            row[i] += self.l2.max(0.0);
        }
        let weights = solve(gram, rhs)?;

        Ok(Box::new(RidgeModel {
            scaler,
            weights,
            intercept,
        }))
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, FitError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(FitError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0_f64; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logistic_separates_a_clear_signal() {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 1.0]).collect();
        let labels: Vec<f64> = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        let model = LogisticRegression::default().fit(&features, &labels).unwrap();
        let p = model.predict(&[vec![2.0, 1.0], vec![38.0, 1.0]]);
        assert!(p[0] < 0.5 && p[1] > 0.5, "got {p:?}");
    }

    #[test]
    fn single_class_labels_fail_to_fit() {
        let features = vec![vec![1.0], vec![2.0]];
        let err = LogisticRegression::default()
            .fit(&features, &[1.0, 1.0])
            .err()
            .unwrap();
        assert_eq!(err, FitError::SingleClass(1.0));
    }

    #[test]
    fn ridge_recovers_a_line() {
        let features: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..50).map(|i| 3.0 * i as f64 + 2.0).collect();
        let model = RidgeRegression { l2: 1e-9 }.fit(&features, &labels).unwrap();
        let p = model.predict(&[vec![10.0]]);
        assert!((p[0] - 32.0).abs() < 1e-6, "got {p:?}");
    }

    #[test]
    fn bad_matrices_are_rejected() {
        let ridge = RidgeRegression::default();
        assert_eq!(ridge.fit(&[], &[]).err(), Some(FitError::EmptyTrainingSet));
        assert!(matches!(
            ridge.fit(&[vec![1.0, 2.0], vec![1.0]], &[0.0, 1.0]).err(),
            Some(FitError::Ragged { row: 1, .. })
        ));
        assert_eq!(
            ridge.fit(&[vec![f64::NAN]], &[0.0]).err(),
            Some(FitError::NonFinite)
        );
    }
}
