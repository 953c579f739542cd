//! Tracing subscriber setup.
//!
//! Logs always go to stderr; when a log directory is configured, a daily
//! rolling file gets the same stream. The guard returned from [`init`] must
//! stay alive for the duration of the process or buffered file output is
//! lost.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use crate::domain::models::LoggingConfig;

/// Initialize the global subscriber from config. `RUST_LOG` overrides the
/// configured level.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let json = config.format == "json";

    let registry = tracing_subscriber::registry().with(filter);

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    layers.push(if json {
        stderr_layer.json().boxed()
    } else {
        stderr_layer.boxed()
    });

    let guard = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "caseflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            layers.push(if json {
                file_layer.json().boxed()
            } else {
                file_layer.boxed()
            });
            Some(guard)
        }
        None => None,
    };

    registry.with(layers).init();

    guard
}
