//! Per-epoch training metrics with health checks.

use serde::{Deserialize, Serialize};

/// Summary of one training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean loss over trained steps (NaN if none trained).
    pub mean_loss: f64,
    pub trained_steps: u64,
    /// Steps skipped because the label mask carried zero weight.
    pub skipped_steps: u64,
    pub elapsed_secs: f64,
}

impl EpochMetrics {
    /// Warnings about an unhealthy epoch. Empty when everything looks fine.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.trained_steps == 0 {
            warnings.push(format!("epoch {}: no step was trained", self.epoch));
        } else if !self.mean_loss.is_finite() {
            warnings.push(format!("epoch {}: mean loss is {}", self.epoch, self.mean_loss));
        }
        let total = self.trained_steps + self.skipped_steps;
        if total > 0 && self.skipped_steps * 2 > total {
            warnings.push(format!(
                "epoch {}: {}/{} steps skipped (zero label-mask weight)",
                self.epoch, self.skipped_steps, total
            ));
        }
        warnings
    }
}

/// Running mean of step losses.
#[derive(Debug, Clone, Default)]
pub struct RunningAvg {
    sum: f64,
    count: usize,
}

impl RunningAvg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    /// Mean so far, `None` before the first update.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn display(&self) -> String {
        match self.mean() {
            Some(mean) => format!("loss={mean:.4}"),
            None => "no data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(trained: u64, skipped: u64, loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch: 1,
            mean_loss: loss,
            trained_steps: trained,
            skipped_steps: skipped,
            elapsed_secs: 0.5,
        }
    }

    #[test]
    fn test_healthy_epoch() {
        assert!(metrics(10, 1, 3.2).health_check().is_empty());
    }

    #[test]
    fn test_health_warnings() {
        assert_eq!(metrics(0, 4, f64::NAN).health_check().len(), 2);
        assert_eq!(metrics(5, 0, f64::INFINITY).health_check().len(), 1);
        let w = metrics(2, 3, 1.0).health_check();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("3/5"));
    }

    #[test]
    fn test_running_avg() {
        let mut avg = RunningAvg::new();
        assert_eq!(avg.mean(), None);
        assert_eq!(avg.display(), "no data");

        avg.update(1.0);
        avg.update(2.0);
        assert_eq!(avg.mean(), Some(1.5));
        assert_eq!(avg.display(), "loss=1.5000");
    }
}
