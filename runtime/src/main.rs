// Copyright 2026 Schoolwatch Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use schoolwatch_runtime::cli;

#[derive(Parser)]
#[command(
    name = "schoolwatch",
    about = "schoolwatch: notifications for new SmartSchool homework",
    version,
    after_help = "Run 'schoolwatch <command> --help' for details on each command."
)]
struct Cli {
    /// Configuration file (default: $SCHOOLWATCH_CONFIG, ./config/config.yaml,
    /// ~/.schoolwatch/config.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check now, then at every scheduled time until interrupted
    Run,
    /// Run a single check over all students
    Check,
    /// Show tracked homework, token ages, and recent runs
    Status,
    /// Manage cached tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Log a student in through the browser and cache the token
    Login {
        /// Username from the configuration
        username: String,
        /// Show the browser window and wait for a human to solve the challenge
        #[arg(long)]
        headed: bool,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a manually obtained token (defaults to the manual token file)
    Set {
        /// Username from the configuration
        username: String,
        /// The token value
        #[arg(long, conflicts_with = "from_file")]
        token: Option<String>,
        /// Read the token from this file
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json {
        std::env::set_var(cli::output::JSON_ENV, "1");
    }
    if cli.quiet {
        std::env::set_var(cli::output::QUIET_ENV, "1");
    }
    cli::init_tracing(cli.verbose, cli.json_logs);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run => cli::start::run(config).await,
        Commands::Check => cli::check_cmd::run(config).await,
        Commands::Status => cli::status::run(config).await,
        Commands::Token { action } => match action {
            TokenAction::Set {
                username,
                token,
                from_file,
            } => {
                cli::token_cmd::run_set(config, &username, token.as_deref(), from_file.as_deref())
                    .await
            }
        },
        Commands::Login { username, headed } => {
            cli::login_cmd::run(config, &username, headed).await
        }
        Commands::Doctor => cli::doctor::run(config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "schoolwatch", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !cli::output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
