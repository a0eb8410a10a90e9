#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mae: f64,
    pub rmse: f64,
}

/// Binary metrics for predicted probabilities against 0/1 outcomes.
pub fn evaluate_binary(probs: &[f64], outcomes: &[f64]) -> ClassificationMetrics {
    if probs.is_empty() || probs.len() != outcomes.len() {
        return ClassificationMetrics {
            samples: 0,
            accuracy: 0.0,
            log_loss: 0.0,
            brier: 0.0,
        };
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;
    for (p, y) in probs.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        brier_sum += (p - y).powi(2);
        let actual_prob = if *y >= 0.5 { p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();
        if (p >= 0.5) == (*y >= 0.5) {
            correct += 1;
        }
    }

    let n = probs.len() as f64;
    ClassificationMetrics {
        samples: probs.len(),
        accuracy: correct as f64 / n,
        log_loss: log_loss_sum / n,
        brier: brier_sum / n,
    }
}

pub fn evaluate_regression(preds: &[f64], actual: &[f64]) -> RegressionMetrics {
    if preds.is_empty() || preds.len() != actual.len() {
        return RegressionMetrics {
            samples: 0,
            mae: 0.0,
            rmse: 0.0,
        };
    }
    let mut abs_sum = 0.0_f64;
    let mut sq_sum = 0.0_f64;
    for (p, y) in preds.iter().zip(actual) {
        abs_sum += (p - y).abs();
        sq_sum += (p - y).powi(2);
    }
    let n = preds.len() as f64;
    RegressionMetrics {
        samples: preds.len(),
        mae: abs_sum / n,
        rmse: (sq_sum / n).sqrt(),
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
