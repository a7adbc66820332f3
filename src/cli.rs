//! Command line interface

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::core::{IntentType, Request, ResultEnvelope, Status};
use crate::dispatch::{ChannelSink, DispatchContext, Dispatcher, StdoutSink};
use crate::router::IntentRouter;
use crate::settings::Settings;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const UNEXPECTED_FAILURE: i32 = 1;
    /// At least one error envelope was delivered
    pub const COMMAND_FAILED: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
}

#[derive(Debug, Parser)]
#[command(name = "kernel-shell", version, about = "Run and query local notebook kernels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Settings file to use instead of the default location
    #[arg(long, global = true, env = "KERNEL_SHELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, global = true, env = "KERNEL_SHELL_DOCKER")]
    pub docker_path: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read requests from stdin and write notifications to stdout (default)
    Serve,
    /// Start a kernel container
    Start(StartArgs),
    /// Show the latest kernel for an image
    Get(GetArgs),
    /// List kernels
    List(ListArgs),
    /// Stop a kernel
    Stop(StopArgs),
    /// Run a raw shell command
    Run(RunArgs),
    /// Show or initialize settings
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Stream container output and wait for it to exit
    #[arg(long)]
    pub attach: bool,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Container status filter
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Debug, Args)]
pub struct StopArgs {
    pub kernel_id: String,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Command text passed to the shell
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Write the effective settings to the settings file
    #[arg(long)]
    pub init: bool,
}

impl Commands {
    /// Build the request a one-shot subcommand stands for
    pub fn to_request(&self) -> Option<Request> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let request = match self {
            Commands::Start(args) => {
                let mut request =
                    Request::new(request_id, IntentType::StartKernel).with_param("attach", args.attach);
                if let Some(image) = &args.image {
                    request = request.with_param("image", image.as_str());
                }
                if let Some(port) = args.port {
                    request = request.with_param("port", port);
                }
                request
            }
            Commands::Get(args) => {
                let request = Request::new(request_id, IntentType::GetKernel);
                match &args.image {
                    Some(image) => request.with_param("image", image.as_str()),
                    None => request,
                }
            }
            Commands::List(args) => {
                let request = Request::new(request_id, IntentType::GetKernels);
                match &args.status {
                    Some(status) => request.with_param("status", status.as_str()),
                    None => request,
                }
            }
            Commands::Stop(args) => Request::new(request_id, IntentType::StopKernel)
                .with_param("kernelId", args.kernel_id.as_str()),
            Commands::Run(args) => {
                Request::new(request_id, IntentType::RunCommand).with_param("cmd", args.command.join(" "))
            }
            Commands::Serve | Commands::Config(_) => return None,
        };

        Some(request)
    }
}

/// Serve requests from stdin until it closes
pub async fn serve(settings: &Settings, docker: PathBuf) -> anyhow::Result<()> {
    let context = DispatchContext::with_sink(Arc::new(StdoutSink::new()));
    let router = IntentRouter::new(settings, docker, Dispatcher::new(context.clone()));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    crate::bridge::serve(stdin, router).await?;

    // Unreferenced kernels may still be running; they must not write to a closing stdout
    context.detach();
    Ok(())
}

/// Run one request, printing each envelope as a JSON line as it arrives.
///
/// Returns `true` when no error envelope was delivered.
pub async fn run_once(settings: &Settings, docker: PathBuf, request: Request) -> anyhow::Result<bool> {
    let (sink, mut rx) = ChannelSink::new();
    let context = DispatchContext::with_sink(Arc::new(sink));
    let mut router = IntentRouter::new(settings, docker, Dispatcher::new(context.clone()));

    let printer = tokio::spawn(async move {
        let mut all_ok = true;
        while let Some(notification) = rx.recv().await {
            match serde_json::from_str::<ResultEnvelope>(&notification.payload) {
                Ok(envelope) if envelope.status() == Status::Error => all_ok = false,
                Ok(_) => {}
                Err(e) => tracing::warn!("Undecodable envelope: {}", e),
            }
            println!("{}", notification.payload);
        }
        all_ok
    });

    tracing::debug!(request_id = request.request_id(), "Dispatching {}", request.intent());
    router.handle(request).await;
    router.shutdown().await;

    // Dropping the sink closes the channel and ends the printer
    context.detach();
    Ok(printer.await?)
}

/// Print settings, optionally writing them out first
pub fn config(settings: &Settings, path: Option<PathBuf>, args: &ConfigArgs) -> anyhow::Result<()> {
    let path = path.or_else(Settings::default_path);

    if args.init {
        let path = path.clone().ok_or_else(|| anyhow::anyhow!("No config directory available"))?;
        settings.save_to(&path)?;
        eprintln!("Wrote {}", path.display());
    }

    if let Some(path) = &path {
        println!("# {}", path.display());
    }
    print!("{}", settings.to_toml()?);
    Ok(())
}
