//! # ERA Demo
//!
//! Runs a scripted scene through the messaging layer and prints the
//! resulting statistics as JSON.
//!
//! ```bash
//! # Run with default configuration (creates era.toml if missing)
//! era_demo
//!
//! # Keep the temporary Points value across the scene change
//! era_demo --persist-points
//!
//! # Verbose, structured output
//! era_demo --log-level debug --json-logs
//! ```

pub mod app;
pub mod cli;
pub mod scene;

use cli::CliArgs;

/// Parses the command line, runs the scene and prints its summary.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let summary = app::run(&args)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
