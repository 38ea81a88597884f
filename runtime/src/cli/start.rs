//! `schoolwatch run`: check now, then at every configured time of day.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tokio::sync::Notify;
use tracing::info;

use crate::cli::check_cmd::print_summary;
use crate::cli::output::{self, Styled};
use crate::coordinator::Coordinator;
use crate::schedule;

/// Run the scheduler until interrupted.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let s = Styled::new();
    let config = crate::cli::load_config(config_path)?;
    let mut coordinator = Coordinator::from_config(&config, crate::cli::launcher(&config))?;

    info!(
        "starting schoolwatch v{} ({} accounts, checks at {})",
        env!("CARGO_PKG_VERSION"),
        coordinator.accounts().len(),
        config
            .schedules
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !output::is_quiet() {
        eprintln!(
            "  {} schoolwatch v{} started, Ctrl-C to stop",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION")
        );
    }

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown_signal.notify_one();
    });

    let summary = coordinator.run_once().await;
    print_summary(&summary);

    loop {
        let Some((at, wait)) = schedule::until_next(&config.schedules, Local::now()) else {
            info!("no check times configured, exiting after the initial run");
            break;
        };
        info!("next check at {}", at.format("%Y-%m-%d %H:%M"));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let summary = coordinator.run_once().await;
                print_summary(&summary);
            }
            _ = shutdown.notified() => break,
        }
    }

    if !output::is_quiet() {
        eprintln!("  {} schoolwatch stopped.", s.ok_sym());
    }
    Ok(())
}
