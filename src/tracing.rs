//! Logging setup, with optional OpenTelemetry export
//!
//! Console logs always go through a `tracing-subscriber` fmt layer. When an
//! OTLP endpoint is given, spans are also exported to an OTel collector:
//!
//! ```text
//! polgate → OTLP (gRPC) → OTel Collector → Tempo (traces)
//!                                       → Loki (logs)
//! ```
//!
//! Authorization checks log a `check_id` field (UUID v7) so that the bypass,
//! lookup and authority lines of one decision can be correlated.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,polgate=debug";

/// Environment variable holding the OTLP endpoint for the binary
pub const OTLP_ENDPOINT_ENV: &str = "POLGATE_OTLP_ENDPOINT";

/// Initialize the tracing subsystem
///
/// # Arguments
/// * `service_name` - Name for the service in traces
/// * `otlp_endpoint` - OTLP collector URL; `None` logs to the console only
///
/// # Example
/// ```ignore
/// init_tracing("polgate", std::env::var(OTLP_ENDPOINT_ENV).ok().as_deref())?;
/// ```
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let otel_layer = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![
                        KeyValue::new("service.name", service_name.to_string()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ],
                )))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        otlp = otlp_endpoint.unwrap_or("disabled"),
        "Tracing initialized"
    );

    Ok(())
}

/// Flush pending spans to the collector, if any
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
