use crate::config::LoggingConfig;
use crate::error::{CameraError, Result};
use tracing::Level;

/// Logging capability injected into the capture engine.
///
/// The engine never logs through globals; it reports through whatever sink
/// its owner hands in. Delivery is fire-and-forget.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn trace(&self, message: &str) {
        self.log(Level::TRACE, message);
    }
}

/// Forwards to the `tracing` subscriber under the `camdev` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "camdev", "{}", message),
            Level::WARN => tracing::warn!(target: "camdev", "{}", message),
            Level::INFO => tracing::info!(target: "camdev", "{}", message),
            Level::DEBUG => tracing::debug!(target: "camdev", "{}", message),
            _ => tracing::trace!(target: "camdev", "{}", message),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Install a global `tracing` subscriber for applications embedding the engine.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camdev={}", config.level)));

    let fmt_layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        "pretty" => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        other => {
            return Err(CameraError::invalid_argument(format!(
                "Unknown log format '{}'",
                other
            )))
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| CameraError::invalid_argument(format!("Logging already initialised: {}", e)))
}
