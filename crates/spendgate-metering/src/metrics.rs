//! Prometheus metrics for admission and recording

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Metering counters, registered into one registry
#[derive(Clone)]
pub struct MeteringMetrics {
    registry: Registry,
    /// Quota checks by outcome (`allowed` / `denied`)
    pub quota_checks: IntCounterVec,
    /// Quota check latency
    pub quota_check_duration: Histogram,
    /// Usage writes by outcome (`recorded` / `failed`)
    pub usage_records: IntCounterVec,
    /// Violation audit rows that could not be written
    pub violation_write_failures: IntCounter,
}

impl MeteringMetrics {
    /// Create metrics in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered into `registry`
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let quota_checks = IntCounterVec::new(
            Opts::new("spendgate_quota_checks_total", "Quota admission checks"),
            &["outcome"],
        )?;
        let quota_check_duration = Histogram::with_opts(
            HistogramOpts::new(
                "spendgate_quota_check_duration_seconds",
                "Quota admission check latency",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]),
        )?;
        let usage_records = IntCounterVec::new(
            Opts::new("spendgate_usage_records_total", "Usage write-backs"),
            &["outcome"],
        )?;
        let violation_write_failures = IntCounter::new(
            "spendgate_quota_violation_write_failures_total",
            "Violation audit rows that failed to persist",
        )?;

        registry.register(Box::new(quota_checks.clone()))?;
        registry.register(Box::new(quota_check_duration.clone()))?;
        registry.register(Box::new(usage_records.clone()))?;
        registry.register(Box::new(violation_write_failures.clone()))?;

        Ok(Self {
            registry,
            quota_checks,
            quota_check_duration,
            usage_records,
            violation_write_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn observe_check(&self, allowed: bool, seconds: f64) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.quota_checks.with_label_values(&[outcome]).inc();
        self.quota_check_duration.observe(seconds);
    }

    pub(crate) fn observe_record(&self, recorded: bool) {
        let outcome = if recorded { "recorded" } else { "failed" };
        self.usage_records.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for MeteringMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringMetrics").finish_non_exhaustive()
    }
}
