/*!
Observability infrastructure for rehydrate.

This module provides:
- Structured logging setup (`tracing-subscriber` with `EnvFilter`)
- Prometheus metrics for persistence and hydration (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{HydrateError, Result};

/// Default filter directive when `RUST_LOG` does not say otherwise
pub const DEFAULT_DIRECTIVE: &str = "rehydrate=info";

/// Global metrics instance; `None` if registration failed
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<HydrationMetrics>> = OnceLock::new();

/// Metrics collection for hydration and persistence
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct HydrationMetrics {
    pub persist_writes_total: Counter,
    pub persist_skipped_total: Counter,
    pub persist_retries_total: Counter,
    pub persist_failures_total: Counter,

    pub hydrations_total: Counter,
    pub hydration_fallbacks_total: Counter,
    pub integrity_failures_total: Counter,

    pub state_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl HydrationMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter> {
            let counter = Counter::new(name, help).map_err(|e| {
                HydrateError::configuration(format!("Failed to create {name} metric: {e}"))
            })?;
            registry.register(Box::new(counter.clone())).map_err(|e| {
                HydrateError::configuration(format!("Failed to register {name}: {e}"))
            })?;
            Ok(counter)
        };

        let persist_writes_total = counter(
            "rehydrate_persist_writes_total",
            "Total records written by persist",
        )?;
        let persist_skipped_total = counter(
            "rehydrate_persist_skipped_total",
            "Persist calls skipped because the state hash was unchanged",
        )?;
        let persist_retries_total = counter(
            "rehydrate_persist_retries_total",
            "Total persist retry attempts",
        )?;
        let persist_failures_total = counter(
            "rehydrate_persist_failures_total",
            "Persist cycles that exhausted their retries",
        )?;
        let hydrations_total = counter("rehydrate_hydrations_total", "Total hydration cycles")?;
        let hydration_fallbacks_total = counter(
            "rehydrate_hydration_fallbacks_total",
            "Hydrations that fell back to the default state after a failure",
        )?;
        let integrity_failures_total = counter(
            "rehydrate_integrity_failures_total",
            "Records rejected by the integrity check",
        )?;

        let state_size_bytes = Histogram::with_opts(prometheus::HistogramOpts::new(
            "rehydrate_state_size_bytes",
            "Size of written records in bytes",
        ))
        .map_err(|e| {
            HydrateError::configuration(format!("Failed to create state_size_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(state_size_bytes.clone()))
            .map_err(|e| {
                HydrateError::configuration(format!("Failed to register state_size_bytes: {e}"))
            })?;

        Ok(Self {
            persist_writes_total,
            persist_skipped_total,
            persist_retries_total,
            persist_failures_total,
            hydrations_total,
            hydration_fallbacks_total,
            integrity_failures_total,
            state_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Option<&'static HydrationMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!("Metrics disabled: {e}");
                    None
                }
            })
            .as_ref()
    }

    /// Record the size of a written record
    pub fn record_state_size(&self, size_bytes: usize) {
        self.state_size_bytes.observe(size_bytes as f64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| HydrateError::configuration(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            HydrateError::configuration(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Run `f` against the global metrics, if they are available
#[cfg(feature = "metrics")]
pub fn with_metrics(f: impl FnOnce(&HydrationMetrics)) {
    if let Some(metrics) = HydrationMetrics::global() {
        f(metrics);
    }
}

/// Gather the global metrics in Prometheus text format
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    HydrationMetrics::global()
        .ok_or_else(|| HydrateError::configuration("metrics are not available"))?
        .gather_metrics()
}

/// Initialize the global tracing subscriber
///
/// # Arguments
/// * `json` - Emit JSON log lines instead of the human-readable format
///
/// # Returns
/// An error if a global subscriber was already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    HydrationMetrics::global();

    let directive = DEFAULT_DIRECTIVE
        .parse()
        .map_err(|e| HydrateError::configuration(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        HydrateError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("rehydrate observability initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
