use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

const RECENT_WINDOW: usize = 5;

#[derive(Debug, Default)]
struct TelemetryState {
    total_predictions: u64,
    total_inference_ms: f64,
    recent: VecDeque<f64>,
    by_class: BTreeMap<String, u64>,
}

/// Process-wide prediction counters.
#[derive(Debug, Default)]
pub struct Telemetry {
    state: Mutex<TelemetryState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub total_predictions: u64,
    pub total_inference_ms: f64,
    pub average_inference_ms: f64,
    /// Latencies of the most recent predictions, oldest first.
    pub recent_inference_ms: Vec<f64>,
    pub predictions_by_class: BTreeMap<String, u64>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &str, inference_ms: f64) {
        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Telemetry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        state.total_predictions += 1;
        state.total_inference_ms += inference_ms;
        if state.recent.len() == RECENT_WINDOW {
            state.recent.pop_front();
        }
        state.recent.push_back(inference_ms);
        *state.by_class.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Telemetry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let average = if state.total_predictions == 0 {
            0.0
        } else {
            state.total_inference_ms / state.total_predictions as f64
        };
        TelemetrySnapshot {
            total_predictions: state.total_predictions,
            total_inference_ms: state.total_inference_ms,
            average_inference_ms: average,
            recent_inference_ms: state.recent.iter().copied().collect(),
            predictions_by_class: state.by_class.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let telemetry = Telemetry::new();
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.total_predictions, 0);
        assert_eq!(snapshot.average_inference_ms, 0.0);
        assert!(snapshot.recent_inference_ms.is_empty());
    }

    #[test]
    fn test_recent_window_keeps_last_five() {
        let telemetry = Telemetry::new();
        for i in 1..=7 {
            telemetry.record("Glioma", i as f64);
        }
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.total_predictions, 7);
        assert_eq!(snapshot.recent_inference_ms, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(snapshot.average_inference_ms, 4.0);
    }

    #[test]
    fn test_counts_by_class() {
        let telemetry = Telemetry::new();
        telemetry.record("Glioma", 1.0);
        telemetry.record("No_Tumor", 1.0);
        telemetry.record("Glioma", 1.0);
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.predictions_by_class.get("Glioma"), Some(&2));
        assert_eq!(snapshot.predictions_by_class.get("No_Tumor"), Some(&1));
    }
}
