//! Logging and trace export.
//!
//! Logs always go to stderr so that reports and fact files on stdout stay
//! machine readable. Spans are additionally exported over OTLP when an
//! exporter endpoint is configured in the environment.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::Level;
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Service name reported when `OTEL_SERVICE_NAME` is unset.
const SERVICE_NAME: &str = "kcompat";

/// Flushes exported spans when dropped. Keep it alive for the whole run.
pub struct TelemetryGuard {
	provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("failed to flush traces: {e}");
			}
		}
	}
}

fn otlp_configured() -> bool {
	[
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT,
		opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
	]
	.iter()
	.any(|var| std::env::var_os(var).is_some())
}

/// Install the global subscriber.
///
/// The filter comes from `log_level` when given, then `RUST_LOG`, then
/// defaults to `info`. Output is human readable on a terminal and JSON
/// lines otherwise.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	let fmt = if std::io::stderr().is_terminal() {
		fmt.pretty().boxed()
	} else {
		fmt.json().boxed()
	};

	let registry = tracing_subscriber::registry().with(filter).with(fmt);

	if !otlp_configured() {
		registry.init();
		return Ok(TelemetryGuard { provider: None });
	}

	let provider = tracer_provider()?;
	registry.with(otel_layer(&provider)).init();
	opentelemetry::global::set_tracer_provider(provider.clone());

	Ok(TelemetryGuard {
		provider: Some(provider),
	})
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	// The builder picks up OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES itself.
	let mut resource = Resource::builder();
	if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL)
		.unwrap_or_else(|_| opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT.to_string());
	let exporter = if protocol == "grpc" {
		opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.build()?
	} else {
		opentelemetry_otlp::SpanExporter::builder()
			.with_http()
			.build()?
	};

	Ok(SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(exporter)
		.build())
}

fn otel_layer<S>(provider: &SdkTracerProvider) -> impl Layer<S>
where
	S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
	tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(provider.tracer(SERVICE_NAME))
}
