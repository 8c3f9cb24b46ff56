use crate::Error;
use kube::ResourceExt;
use prometheus::{
    histogram_opts, opts, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "pagerduty_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "pagerduty_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "instance", "error"],
        )
        .unwrap();
        let reconciliations =
            IntCounter::new("pagerduty_operator_reconciliations_total", "reconciliations")
                .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, rc: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                rc.name_any().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}

/// How a heartbeat attempt ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Success,
    SecretError,
    ApiError,
}

impl HeartbeatOutcome {
    fn label(self) -> &'static str {
        match self {
            HeartbeatOutcome::Success => "success",
            HeartbeatOutcome::SecretError => "secret_error",
            HeartbeatOutcome::ApiError => "api_error",
        }
    }
}

/// Health of the PagerDuty API as seen by the heartbeat task
#[derive(Clone)]
pub struct HeartbeatMetrics {
    pub duration: Histogram,
    pub total: IntCounterVec,
    pub api_up: IntGauge,
}

impl Default for HeartbeatMetrics {
    fn default() -> Self {
        let duration = Histogram::with_opts(
            histogram_opts!(
                "pagerduty_operator_heartbeat_duration_seconds",
                "Duration of successful PagerDuty heartbeat calls in seconds"
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10.]),
        )
        .unwrap();
        let total = IntCounterVec::new(
            opts!(
                "pagerduty_operator_heartbeat_total",
                "PagerDuty heartbeat attempts by outcome",
            ),
            &["outcome"],
        )
        .unwrap();
        let api_up = IntGauge::new(
            "pagerduty_operator_api_up",
            "Whether the last PagerDuty heartbeat succeeded",
        )
        .unwrap();
        HeartbeatMetrics {
            duration,
            total,
            api_up,
        }
    }
}

impl HeartbeatMetrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.total.clone()))?;
        registry.register(Box::new(self.api_up.clone()))?;
        Ok(self)
    }

    pub fn record(&self, outcome: HeartbeatOutcome, elapsed: Option<std::time::Duration>) {
        self.total.with_label_values(&[outcome.label()]).inc();
        match outcome {
            HeartbeatOutcome::Success => {
                if let Some(elapsed) = elapsed {
                    self.duration.observe(elapsed.as_secs_f64());
                }
                self.api_up.set(1);
            }
            HeartbeatOutcome::SecretError | HeartbeatOutcome::ApiError => self.api_up.set(0),
        }
    }
}
