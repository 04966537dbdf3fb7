use std::future::Future;
use tokio::signal;
use tracing::{error, info, info_span, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE_NAME: &str = "zone-heating-controller";

/// Controller decisions at debug, HTTP client chatter kept quiet.
pub const DEFAULT_LOG_FILTER: &str = "info,zone_heating_controller=debug,reqwest=warn,hyper=warn,h2=warn";

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber: `RUST_LOG` filter, JSON lines on stdout
/// carrying the enclosing span's fields.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(log_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();
}

/// Root span for the process; every event inside it carries the service
/// name and version.
pub fn service_span() -> Span {
    info_span!("service", service = SERVICE_NAME, version = env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

async fn wait_for(name: &str, listener: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = listener.await {
        error!(signal = name, error = %e, "cannot listen for signal");
        std::future::pending::<()>().await;
    }
}

/// Resolve on Ctrl+C or, on unix, SIGTERM. A handler that cannot be
/// installed is logged and never fires.
pub async fn shutdown_signal() -> ShutdownSignal {
    #[cfg(unix)]
    let terminate = wait_for("SIGTERM", async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    });
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = wait_for("SIGINT", signal::ctrl_c()) => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    };
    info!(signal = %received, "shutdown signal received");
    received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn signal_names_are_lowercase() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "interrupt");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "terminate");
    }
}
