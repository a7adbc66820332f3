//! kernel-shell - privileged backend for a notebook desktop shell
//!
//! Runs local notebook kernels (docker containers) on behalf of a web UI:
//! - `serve` (default): JSON-lines request/notification bridge over stdio
//! - one-shot subcommands (`start`, `get`, `list`, `stop`, `run`) for the terminal

mod bridge;
mod cli;
mod core;
mod dispatch;
mod docker;
mod host;
mod kernel;
mod logging;
mod router;
mod settings;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};
use settings::Settings;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    // Initialize logging
    if let Err(e) = logging::init(cli.verbose, cli.json_output) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    let settings = Settings::load(cli.config.as_deref());

    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::Config(args) = &command {
        return match cli::config(&settings, cli.config.clone(), args) {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                exit_codes::CONFIG_ERROR
            }
        };
    }

    let docker = docker::resolve_docker_path(cli.docker_path.clone(), settings.docker_path.clone());
    tracing::debug!("Using container runtime at {}", docker.display());

    // Create tokio runtime for async commands
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let exit_code = match command.to_request() {
        None => rt.block_on(async {
            match cli::serve(&settings, docker).await {
                Ok(()) => exit_codes::SUCCESS,
                Err(e) => {
                    tracing::error!("Bridge failed: {}", e);
                    exit_codes::UNEXPECTED_FAILURE
                }
            }
        }),
        Some(request) => rt.block_on(async {
            match cli::run_once(&settings, docker, request).await {
                Ok(true) => exit_codes::SUCCESS,
                Ok(false) => exit_codes::COMMAND_FAILED,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit_codes::UNEXPECTED_FAILURE
                }
            }
        }),
    };

    // Detached kernels keep running; do not wait on their pump tasks
    rt.shutdown_background();
    exit_code
}
