use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    logs::LoggerProvider as SdkLoggerProvider,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
};
use std::env;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "lookup_api=debug,key_resolver=debug,tower_http=info";

/// Install the global subscriber.
///
/// Console output is always on (`LOG_FORMAT=json` for structured lines).
/// OTLP trace and log export is added when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_output = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let json_layer = json_output.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!json_output).then(tracing_subscriber::fmt::layer);

    let (telemetry_layer, log_layer) = match env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(otlp_endpoint) if !otlp_endpoint.is_empty() => {
            let service_name =
                env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "lookup-api".to_string());

            global::set_text_map_propagator(TraceContextPropagator::new());

            let resource = Resource::new(vec![KeyValue::new(
                "service.name",
                service_name.clone(),
            )]);

            let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&otlp_endpoint)
                .build()?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter, runtime::Tokio)
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource.clone())
                .build();

            // Tracer must be taken before the provider becomes global
            let tracer = tracer_provider.tracer(service_name);
            global::set_tracer_provider(tracer_provider);

            let log_exporter = opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_endpoint(&otlp_endpoint)
                .build()?;

            let logger_provider = SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter, runtime::Tokio)
                .with_resource(resource)
                .build();

            (
                Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                Some(OpenTelemetryTracingBridge::new(&logger_provider)),
            )
        }
        _ => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .with(log_layer)
        .try_init()?;

    Ok(())
}
