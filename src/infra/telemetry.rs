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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "shutterbox_render_passthrough_total",
            Unit::Count,
            "Render requests served from the original without a transform."
        );
        describe_counter!(
            "shutterbox_render_cache_hit_total",
            Unit::Count,
            "Render requests served from a cached variant."
        );
        describe_counter!(
            "shutterbox_render_cache_miss_total",
            Unit::Count,
            "Render requests that found no cached variant."
        );
        describe_counter!(
            "shutterbox_render_coalesced_total",
            Unit::Count,
            "Render requests that joined a transform already in flight."
        );
        describe_counter!(
            "shutterbox_render_transform_error_total",
            Unit::Count,
            "Render requests whose transform or cache write failed."
        );
        describe_histogram!(
            "shutterbox_render_transform_ms",
            Unit::Milliseconds,
            "Engine transform latency in milliseconds."
        );
    });
}
