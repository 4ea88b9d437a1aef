use std::sync::Once;

use metrics::{Unit, describe_counter};
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "spacetraveling_malformed_records_total",
            Unit::Count,
            "Repository records skipped because they could not be projected."
        );
        describe_counter!(
            "spacetraveling_page_cache_hit_total",
            Unit::Count,
            "Detail pages served fresh from the page store."
        );
        describe_counter!(
            "spacetraveling_page_cache_stale_total",
            Unit::Count,
            "Detail pages served stale while a regeneration ran."
        );
        describe_counter!(
            "spacetraveling_page_cache_miss_total",
            Unit::Count,
            "Detail requests with no generated page available."
        );
        describe_counter!(
            "spacetraveling_page_regeneration_failures_total",
            Unit::Count,
            "Background regenerations that failed and kept the previous page."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_metrics_twice_is_harmless() {
        describe_metrics();
        describe_metrics();
        assert!(METRIC_DESCRIPTIONS.is_completed());
    }
}
