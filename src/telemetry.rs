use opentelemetry::trace::TraceId;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _; // opentelemetry::Context -> opentelemetry::trace::Span
    use tracing_opentelemetry::OpenTelemetrySpanExt as _; // tracing::Span to opentelemetry::Context

    match tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
    {
        TraceId::INVALID => None,
        valid => Some(valid),
    }
}

#[cfg(feature = "telemetry")]
fn init_tracer() -> opentelemetry::sdk::trace::Tracer {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;

    let otlp_endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .expect("Need a otel tracing collector configured via OPENTELEMETRY_ENDPOINT_URL");

    let channel = tonic::transport::Channel::from_shared(otlp_endpoint)
        .expect("OPENTELEMETRY_ENDPOINT_URL is not a valid uri")
        .connect_lazy();

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_channel(channel),
        )
        .with_trace_config(opentelemetry::sdk::trace::config().with_resource(
            opentelemetry::sdk::Resource::new(vec![KeyValue::new(
                "service.name",
                "pagerduty-operator",
            )]),
        ))
        .install_batch(opentelemetry::runtime::Tokio)
        .expect("Failed to install the OTLP tracing pipeline")
}

/// Initialize tracing
pub fn init() {
    // Setup tracing layers
    #[cfg(feature = "telemetry")]
    let telemetry = tracing_opentelemetry::layer().with_tracer(init_tracer());

    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env()
        .or(EnvFilter::try_new("info"))
        .unwrap();

    // Decide on layers
    #[cfg(feature = "telemetry")]
    let collector = Registry::default()
        .with(telemetry)
        .with(logger)
        .with(env_filter);
    #[cfg(not(feature = "telemetry"))]
    let collector = Registry::default().with(logger).with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector).unwrap();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_trace_id_outside_a_span() {
        assert_eq!(get_trace_id(), None);
    }

    // Only works when telemetry is initialized fully
    // and requires OPENTELEMETRY_ENDPOINT_URL pointing to a valid server
    #[cfg(feature = "telemetry")]
    #[test]
    #[ignore = "requires a trace exporter"]
    fn get_trace_id_returns_valid_traces() {
        super::init();
        #[tracing::instrument(name = "test_span")] // need to be in an instrumented fn
        fn test_trace_id() -> Option<TraceId> {
            get_trace_id()
        }
        assert_ne!(test_trace_id(), None, "valid trace");
        assert_ne!(test_trace_id(), Some(TraceId::INVALID), "valid trace");
    }
}
