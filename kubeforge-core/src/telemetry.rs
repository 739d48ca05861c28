use std::{fmt, sync::Arc, time::Instant};

use kubeforge_model::ProvisioningState;
use tracing::info;

/// Sink for numeric signals. Implementations must not block.
pub trait MetricsEmitter: Send + Sync + fmt::Debug {
    fn emit_gauge(&self, name: &str, value: f64, dimensions: &[(&str, &str)]);
}

/// Writes each metric as a structured event on the `kubeforge::metrics`
/// target so any subscriber can forward them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsEmitter;

impl MetricsEmitter for TracingMetricsEmitter {
    fn emit_gauge(&self, name: &str, value: f64, dimensions: &[(&str, &str)]) {
        let dimensions = dimensions
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        info!(target: "kubeforge::metrics", metric = name, value, dimensions = %dimensions);
    }
}

/// Emits `backend.cluster.{operation}.duration` and `.count` when dropped,
/// tagged with whatever terminal state was recorded last.
pub struct CycleTelemetry {
    metrics: Arc<dyn MetricsEmitter>,
    operation: &'static str,
    started: Instant,
    state: Option<ProvisioningState>,
}

impl fmt::Debug for CycleTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleTelemetry")
            .field("operation", &self.operation)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CycleTelemetry {
    pub fn start(metrics: Arc<dyn MetricsEmitter>, operation: &'static str) -> Self {
        Self {
            metrics,
            operation,
            started: Instant::now(),
            state: None,
        }
    }

    pub fn record(&mut self, state: ProvisioningState) {
        self.state = Some(state);
    }
}

impl Drop for CycleTelemetry {
    fn drop(&mut self) {
        let state = self.state.map_or("Unknown", ProvisioningState::as_str);
        let dimensions = [("provisioningState", state)];
        let prefix = format!("backend.cluster.{}", self.operation);

        self.metrics.emit_gauge(
            &format!("{prefix}.duration"),
            self.started.elapsed().as_secs_f64(),
            &dimensions,
        );
        self.metrics.emit_gauge(&format!("{prefix}.count"), 1.0, &dimensions);
    }
}


#[cfg(test)]
mod tests {
    use super::{recording::RecordingMetrics, *};

    #[test]
    fn guard_emits_duration_and_count_on_drop() {
        let metrics = Arc::new(RecordingMetrics::default());
        {
            let mut guard = CycleTelemetry::start(metrics.clone(), "create");
            guard.record(ProvisioningState::Succeeded);
        }

        assert_eq!(
            metrics.names(),
            vec!["backend.cluster.create.duration", "backend.cluster.create.count"]
        );
        assert_eq!(metrics.states(), vec!["Succeeded", "Succeeded"]);
    }

    #[test]
    fn unrecorded_state_is_tagged_unknown() {
        let metrics = Arc::new(RecordingMetrics::default());
        drop(CycleTelemetry::start(metrics.clone(), "delete"));
        assert_eq!(metrics.states(), vec!["Unknown", "Unknown"]);
    }
}
