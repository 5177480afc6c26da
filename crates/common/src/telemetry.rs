//! JSON logs for every service, with spans exported to a Jaeger agent when
//! `ENABLE_JAEGER=true`.

use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_JAEGER_AGENT: &str = "localhost:6831";

pub type TelemetryError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// `EnvFilter` directives, e.g. `info` or `commerce=debug,sqlx=warn`
    pub log_level: String,
    /// Agent address; `None` keeps tracing local
    pub jaeger_agent: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str, log_level: &str) -> Self {
        Self::from_lookup(service_name, log_level, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(service_name: &str, log_level: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("ENABLE_JAEGER")
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            service_name: service_name.to_string(),
            log_level: log_level.to_string(),
            jaeger_agent: enabled.then(|| {
                lookup("JAEGER_ENDPOINT").unwrap_or_else(|| DEFAULT_JAEGER_AGENT.to_string())
            }),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_thread_ids(true);

    let jaeger_layer = match &config.jaeger_agent {
        Some(agent) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_service_name(&config.service_name)
                .with_endpoint(agent.as_str())
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(jaeger_layer)
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        jaeger_agent = config.jaeger_agent.as_deref().unwrap_or("disabled"),
        "Telemetry initialized"
    );
    Ok(())
}

/// Flush buffered spans
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
