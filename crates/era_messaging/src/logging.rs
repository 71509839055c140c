//! Tracing setup for hosts embedding the messaging layer.
//!
//! The crate itself only emits `tracing` events (subscriptions and binds at
//! `debug`, per-dispatch detail at `trace`, declaration errors at `error`).
//! [`setup_logging`] is a convenience for hosts that have no subscriber of
//! their own.

use crate::config::LoggingSettings;
use crate::error::MessagingError;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG` overrides `config.level`. `force_json` is the CLI override
/// for `config.json_format`. Fails if a global subscriber already exists.
pub fn setup_logging(config: &LoggingSettings, force_json: bool) -> Result<(), MessagingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let json = force_json || config.json_format;

    // Exactly one of the two layers is present.
    let json_layer = json.then(|| fmt::layer().json().with_target(true).with_thread_names(true));
    let text_layer = (!json).then(|| fmt::layer().with_ansi(true).with_target(false).with_thread_names(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| MessagingError::Logging(e.to_string()))?;

    info!("🔧 Messaging log level: {} (json: {})", config.level, json);
    Ok(())
}
