//! Application wiring: configuration, logging and the scene run.

use crate::cli::CliArgs;
use crate::scene::{run_scene, SceneOptions, SceneSummary};
use era_messaging::{setup_logging, MessagingConfig, MessagingContext, MessagingError};
use tracing::{info, warn};

/// Loads the configuration file and applies CLI overrides.
///
/// A missing file is created with defaults; an unreadable one falls back
/// to defaults with a warning once logging is up.
pub fn load_config(args: &CliArgs) -> (MessagingConfig, Option<MessagingError>) {
    let (mut config, problem) = match MessagingConfig::load_from_file(&args.config_path) {
        Ok(config) => (config, None),
        Err(e) => (MessagingConfig::default(), Some(e.into())),
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    (config, problem)
}

/// Runs the demo end to end and returns its summary.
pub fn run(args: &CliArgs) -> Result<SceneSummary, MessagingError> {
    let (config, problem) = load_config(args);
    setup_logging(&config.logging, args.json_logs)?;

    if let Some(e) = problem {
        warn!("⚠️ Using default configuration: {}", e);
    }
    info!("🚀 Starting ERA demo scene (config: {})", args.config_path.display());

    let ctx = MessagingContext::new(config);
    let summary = run_scene(
        &ctx,
        &SceneOptions {
            persist_points: args.persist_points,
        },
    );

    info!("✅ Scene finished");
    Ok(summary)
}
