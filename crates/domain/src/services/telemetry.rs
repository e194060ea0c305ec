use std::{env, net::SocketAddr, sync::Arc};

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

const DEFAULT_LOG_FILTER: &str = "info";

/// Counters emitted by the engine, the admin console and the transport.
const COUNTERS: &[(&str, &str)] = &[
    ("keydrop_claims_total", "Claim requests by result"),
    ("keydrop_waitlist_total", "Waitlist enqueue attempts by result"),
    ("keydrop_replay_total", "Waitlist replay steps by result"),
    ("keydrop_keys_imported_total", "Imported key lines by result"),
    ("keydrop_deliveries_total", "Outbound messages by kind and result"),
    ("keydrop_admin_actions_total", "Admin panel actions by action"),
    ("keydrop_membership_lookups_total", "Failed channel membership lookups"),
    ("keydrop_sweep_flagged_total", "Sales flagged by the left-channel sweep"),
    ("keydrop_telegram_updates_total", "Bot API updates by kind"),
];

/// Observability knobs for the bot process.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    log_ansi: bool,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER`, `<PREFIX>_LOG_ANSI` and
    /// `<PREFIX>_METRICS_ADDRESS`. All three are optional.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let prefix = prefix.trim().to_ascii_uppercase();
        let read = |name: &str| {
            env::var(format!("{prefix}_{name}"))
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            log_filter: read("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_ansi: read("LOG_ANSI")
                .map(|value| !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            metrics_address: read("METRICS_ADDRESS"),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Colored log output, on unless `<PREFIX>_LOG_ANSI` is `0`, `false` or `no`.
    pub fn log_ansi(&self) -> bool {
        self.log_ansi
    }

    /// Optional standalone Prometheus listener in addition to `/metrics`.
    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle kept by the HTTP layer to render the Prometheus exposition.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Installs the tracing subscriber and the metrics recorder. Safe to call
/// more than once; later calls reuse what the first one installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;
    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;
    if SUBSCRIBER_INSTALLED.set(()).is_err() {
        return Ok(());
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(config.log_ansi());
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|err| TelemetryError::Tracing(err.to_string()))
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket = addr.parse::<SocketAddr>().map_err(|err| {
                    TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                })?;
                builder = builder.with_http_listener(socket);
            }

            let handle = builder
                .install_recorder()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            describe_counters();
            Ok(Arc::new(handle))
        })
        .cloned()
}

fn describe_counters() {
    for (name, help) in COUNTERS {
        describe_counter!(*name, Unit::Count, *help);
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn reset() {
        env::set_var("KEYDROP_SKIP_DOTENV", "1");
        for key in ["BOT_LOG_FILTER", "BOT_LOG_ANSI", "BOT_METRICS_ADDRESS"] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset();

        let cfg = TelemetryConfig::from_env("bot");
        assert_eq!(cfg.log_filter(), "info");
        assert!(cfg.log_ansi());
        assert_eq!(cfg.metrics_address(), None);
    }

    #[test]
    fn prefixed_variables_are_read() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset();
        env::set_var("BOT_LOG_FILTER", "keydrop_domain=debug");
        env::set_var("BOT_LOG_ANSI", "false");
        env::set_var("BOT_METRICS_ADDRESS", "127.0.0.1:9898");

        let cfg = TelemetryConfig::from_env(" BOT ");
        assert_eq!(cfg.log_filter(), "keydrop_domain=debug");
        assert!(!cfg.log_ansi());
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        reset();
    }

    #[test]
    fn blank_values_fall_back() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset();
        env::set_var("BOT_METRICS_ADDRESS", "  ");
        env::set_var("BOT_LOG_FILTER", "");

        let cfg = TelemetryConfig::from_env("BOT");
        assert_eq!(cfg.metrics_address(), None);
        assert_eq!(cfg.log_filter(), "info");
        reset();
    }

    #[test]
    fn every_counter_is_namespaced() {
        assert!(COUNTERS
            .iter()
            .all(|(name, _)| name.starts_with("keydrop_") && name.ends_with("_total")));
    }
}
