use key_resolver::Strategy;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, MeterProvider},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
};
use std::time::Duration;

pub struct Metrics {
    pub resolve_counter: Counter<u64>,
    pub resolve_duration: Histogram<f64>,
    pub store_errors: Counter<u64>,
}

impl Metrics {
    pub fn new(provider: &SdkMeterProvider) -> Self {
        let meter = provider.meter("lookup_api");

        Self {
            resolve_counter: meter
                .u64_counter("lookup_resolve_total")
                .with_description("Key resolutions by winning probe")
                .build(),
            resolve_duration: meter
                .f64_histogram("lookup_resolve_duration_milliseconds")
                .with_description("Time spent resolving a key")
                .build(),
            store_errors: meter
                .u64_counter("lookup_store_errors_total")
                .with_description("Store failures surfaced to callers")
                .build(),
        }
    }

    /// Record one resolution; `None` strategy means every probe came back empty
    pub fn record_resolution(
        &self,
        route: &'static str,
        strategy: Option<Strategy>,
        elapsed: Duration,
    ) {
        let strategy = strategy.map(|s| s.as_str()).unwrap_or("exhausted");
        self.resolve_counter.add(
            1,
            &[
                KeyValue::new("route", route),
                KeyValue::new("strategy", strategy),
            ],
        );
        self.resolve_duration.record(
            elapsed.as_secs_f64() * 1000.0,
            &[KeyValue::new("route", route)],
        );
    }

    pub fn record_store_error(&self, operation: &'static str) {
        self.store_errors
            .add(1, &[KeyValue::new("operation", operation)]);
    }
}

fn resource() -> Resource {
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "lookup-api".to_string());
    Resource::new(vec![KeyValue::new("service.name", service_name)])
}

/// Build the meter provider, exporting over OTLP when an endpoint is configured.
pub fn init_metrics() -> Result<(SdkMeterProvider, Metrics), anyhow::Error> {
    let endpoint = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) if !endpoint.is_empty() => endpoint,
        _ => return Ok(local_metrics()),
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(15))
        .build();

    let provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .build();

    let metrics = Metrics::new(&provider);

    Ok((provider, metrics))
}

/// Meter provider without readers; instruments work but nothing is exported.
pub fn local_metrics() -> (SdkMeterProvider, Metrics) {
    let provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .build();
    let metrics = Metrics::new(&provider);
    (provider, metrics)
}
