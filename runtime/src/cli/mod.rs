//! CLI subcommand implementations for the schoolwatch binary.

pub mod check_cmd;
pub mod doctor;
pub mod login_cmd;
pub mod output;
pub mod start;
pub mod status;
pub mod token_cmd;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{resolve_config_path, Config};
use crate::renderer::chromium::ChromiumLauncher;
use crate::renderer::Launcher;

/// Install the global tracing subscriber.
pub fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "schoolwatch=debug,schoolwatch_runtime=debug"
    } else {
        "schoolwatch=info,schoolwatch_runtime=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second init (tests, embedding) is harmless.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Resolve and load the configuration file.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = resolve_config_path(explicit);
    Config::load(&path).with_context(|| format!("loading configuration from {}", path.display()))
}

/// The Chromium launcher described by the configuration.
pub fn launcher(config: &Config) -> Arc<dyn Launcher> {
    Arc::new(ChromiumLauncher {
        chromium_path: config.browser.chromium_path.clone(),
        locale: Some(config.browser.locale.clone()),
    })
}
