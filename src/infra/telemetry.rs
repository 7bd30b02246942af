use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vitrine_asset_cache_hit_total",
            Unit::Count,
            "Asset requests answered from the store."
        );
        describe_counter!(
            "vitrine_asset_cache_miss_total",
            Unit::Count,
            "Asset requests that had to be resolved against origins."
        );
        describe_counter!(
            "vitrine_asset_store_error_total",
            Unit::Count,
            "Store reads or writes that failed and were skipped."
        );
        describe_counter!(
            "vitrine_memory_store_evict_total",
            Unit::Count,
            "Memory store entries evicted due to capacity."
        );
        describe_counter!(
            "vitrine_origin_fetch_total",
            Unit::Count,
            "Origin fetch attempts by outcome."
        );
        describe_counter!(
            "vitrine_placeholder_served_total",
            Unit::Count,
            "Placeholder images produced, by reason."
        );
        describe_histogram!(
            "vitrine_chain_ms",
            Unit::Milliseconds,
            "Fallback chain latency in milliseconds."
        );
    });
}
