// Copyright 2026 Facsimile Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use facsimile::CloneError;
use facsimile_runtime::cli::{self, output};
use facsimile_runtime::config::RuntimeConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "facsimile",
    about = "Facsimile: capture a live web page and regenerate it as a static clone",
    version,
    after_help = "Run 'facsimile <command> --help' for details on each command."
)]
struct Cli {
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
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a live page into a single static HTML document
    Clone {
        /// Page URL (https:// is assumed when no scheme is given)
        url: String,
        /// Write the document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Capture a page and print its visual manifest
    Capture {
        /// Page URL
        url: String,
    },
    /// Apply a natural-language instruction to an existing clone
    Refine {
        /// HTML file to refine
        #[arg(long)]
        html: PathBuf,
        /// What to change
        #[arg(long)]
        instruction: String,
        /// Write the document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "warn,facsimile={level},facsimile_runtime={level}"
        ))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var(output::JSON_VAR, "1");
    }
    if cli.quiet {
        std::env::set_var(output::QUIET_VAR, "1");
    }
    if cli.verbose {
        std::env::set_var(output::VERBOSE_VAR, "1");
    }

    let config = RuntimeConfig::from_env();
    init_tracing(cli.verbose, cli.log_json || config.log_json);

    let result = match cli.command {
        Commands::Clone { url, output } => {
            cli::clone_cmd::run(&url, output.as_deref(), config).await
        }
        Commands::Capture { url } => cli::capture_cmd::run(&url, config).await,
        Commands::Refine {
            html,
            instruction,
            output,
        } => cli::refine_cmd::run(&html, &instruction, output.as_deref(), config).await,
        Commands::Serve { port, host } => cli::serve::run(&host, port, config).await,
        Commands::Doctor => cli::doctor::run(config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "facsimile", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !output::is_quiet() && !output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if output::is_json() {
            let code = e.downcast_ref::<CloneError>().map(CloneError::code);
            output::print_json(&serde_json::json!({
                "error": true,
                "code": code,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}
