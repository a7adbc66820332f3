//! Intent router
//!
//! Maps each named intent to a concrete command, applies defaults, and hands
//! the work to the command runner or the process streamer. `runCommand` is the
//! only path that accepts free-form shell text; its caller is trusted like the
//! shell itself.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::core::{IntentType, Request, RequestError, ResultEnvelope};
use crate::dispatch::Dispatcher;
use crate::host::{
    CommandLine, CommandRunner, CommandSpec, ExitCodePolicy, ProcessStreamer, StdioPolicy,
    StreamSpec,
};
use crate::kernel::{OutputTransform, KERNEL_FORMAT, KERNEL_LIST_FORMAT};
use crate::settings::Settings;

/// Port the notebook server listens on inside the container
pub const CONTAINER_PORT: u16 = 8888;

/// Where a resolved request goes
#[derive(Debug)]
pub enum Route {
    Run {
        command: CommandLine,
        transform: OutputTransform,
        capture_output: bool,
    },
    Stream(StreamSpec),
}

/// Defaults applied to requests that omit a field
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDefaults {
    pub image: String,
    pub port: u16,
    pub status_filter: String,
    pub capture_start_output: bool,
}

impl From<&Settings> for RouteDefaults {
    fn from(settings: &Settings) -> Self {
        Self {
            image: settings.default_image.clone(),
            port: settings.default_port,
            status_filter: settings.default_status_filter.clone(),
            capture_start_output: settings.capture_start_output,
        }
    }
}

/// `docker run -p <port>:8888 <image>`
pub fn start_kernel_command(docker: &Path, image: &str, port: u16) -> CommandSpec {
    CommandSpec::for_binary(docker)
        .arg("run")
        .arg("-p")
        .arg(format!("{}:{}", port, CONTAINER_PORT))
        .arg(image)
}

/// Latest container started from `image`
pub fn get_kernel_command(docker: &Path, image: &str) -> CommandSpec {
    CommandSpec::for_binary(docker)
        .args(["ps", "-a", "-f"])
        .arg(format!("ancestor={}", image))
        .args(["-n", "1", "--format", KERNEL_FORMAT])
}

/// All containers in `status`
pub fn list_kernels_command(docker: &Path, status: &str) -> CommandSpec {
    CommandSpec::for_binary(docker)
        .args(["ps", "-a", "-f"])
        .arg(format!("status={}", status))
        .args(["--format", KERNEL_LIST_FORMAT])
}

pub fn stop_kernel_command(docker: &Path, kernel_id: &str) -> CommandSpec {
    CommandSpec::for_binary(docker).arg("stop").arg(kernel_id)
}

/// Routes requests and tracks the work they start
pub struct IntentRouter {
    docker: PathBuf,
    defaults: RouteDefaults,
    dispatcher: Dispatcher,
    runner: CommandRunner,
    streamer: ProcessStreamer,
    in_flight: Vec<JoinHandle<()>>,
}

impl IntentRouter {
    pub fn new(settings: &Settings, docker: PathBuf, dispatcher: Dispatcher) -> Self {
        Self::with_policy(
            RouteDefaults::from(settings),
            settings.exit_code_policy,
            docker,
            dispatcher,
        )
    }

    pub fn with_policy(
        defaults: RouteDefaults,
        exit_code_policy: ExitCodePolicy,
        docker: PathBuf,
        dispatcher: Dispatcher,
    ) -> Self {
        let runner = CommandRunner::new(dispatcher.clone())
            .with_exit_code_policy(exit_code_policy)
            .with_env("DOCKER_CLI_HINTS", "false");
        let streamer = ProcessStreamer::new(dispatcher.clone());

        Self {
            docker,
            defaults,
            dispatcher,
            runner,
            streamer,
            in_flight: Vec::new(),
        }
    }

    /// Resolve a request to a route. `Ok(None)` means the request is a no-op.
    pub fn resolve(&self, request: &Request) -> Result<Option<Route>, RequestError> {
        let route = match request.intent() {
            IntentType::StartKernel => {
                let image = request
                    .text_param("image")
                    .unwrap_or_else(|| self.defaults.image.clone());
                let port = request.port_param("port")?.unwrap_or(self.defaults.port);
                let attach = request.bool_param("attach").unwrap_or(false);
                let stdio = if attach || self.defaults.capture_start_output {
                    StdioPolicy::Captured
                } else {
                    StdioPolicy::Ignored
                };

                Route::Stream(
                    StreamSpec::new(start_kernel_command(&self.docker, &image, port))
                        .detached(true)
                        .stdio(stdio)
                        .unref(!attach),
                )
            }
            IntentType::GetKernel => {
                let image = request
                    .text_param("image")
                    .unwrap_or_else(|| self.defaults.image.clone());

                Route::Run {
                    command: get_kernel_command(&self.docker, &image).into(),
                    transform: OutputTransform::Kernel { image },
                    capture_output: true,
                }
            }
            IntentType::GetKernels => {
                let status = request
                    .text_param("status")
                    .unwrap_or_else(|| self.defaults.status_filter.clone());

                Route::Run {
                    command: list_kernels_command(&self.docker, &status).into(),
                    transform: OutputTransform::KernelList,
                    capture_output: true,
                }
            }
            IntentType::StopKernel => {
                let Some(kernel_id) = request.text_param("kernelId") else {
                    return Ok(None);
                };

                Route::Run {
                    command: stop_kernel_command(&self.docker, &kernel_id).into(),
                    transform: OutputTransform::Empty,
                    capture_output: true,
                }
            }
            IntentType::RunCommand => Route::Run {
                command: CommandLine::Shell(request.text_param("cmd").unwrap_or_default()),
                transform: OutputTransform::Text,
                capture_output: request.bool_param("captureOutput").unwrap_or(true),
            },
        };

        Ok(Some(route))
    }

    /// Handle a named inbound message. Messages that cannot be parsed carry no
    /// usable correlation id and are dropped.
    pub async fn handle_message(&mut self, name: &str, body: Value) {
        match Request::from_message(name, body) {
            Ok(request) => self.handle(request).await,
            Err(e) => tracing::warn!("Dropping '{}' message: {}", name, e),
        }
    }

    pub async fn handle(&mut self, request: Request) {
        self.reap();

        let route = match self.resolve(&request) {
            Ok(Some(route)) => route,
            Ok(None) => {
                tracing::debug!(request_id = request.request_id(), "{} is a no-op", request.intent());
                return;
            }
            Err(e) => {
                if !request.request_id().is_empty() {
                    self.dispatcher
                        .deliver(&ResultEnvelope::error(
                            request.request_id(),
                            request.intent(),
                            e.to_string(),
                        ))
                        .await;
                }
                return;
            }
        };

        tracing::info!(request_id = request.request_id(), "Handling {}", request.intent());

        match route {
            Route::Run {
                command,
                transform,
                capture_output,
            } => {
                if let Some(handle) = self.runner.run(
                    request.request_id(),
                    request.intent(),
                    command,
                    transform,
                    capture_output,
                ) {
                    self.in_flight.push(handle);
                }
            }
            Route::Stream(spec) => {
                let handle = self
                    .streamer
                    .run(request.request_id(), request.intent(), &spec);
                // Unreferenced processes are never waited on at shutdown
                if let Some(handle) = handle.filter(|_| !spec.unref) {
                    self.in_flight.push(handle);
                }
            }
        }
    }

    /// Number of tracked requests still running
    pub fn in_flight(&mut self) -> usize {
        self.reap();
        self.in_flight.len()
    }

    fn reap(&mut self) {
        self.in_flight.retain(|handle| !handle.is_finished());
    }

    /// Wait for every tracked request to deliver its last envelope
    pub async fn shutdown(mut self) {
        self.reap();
        if !self.in_flight.is_empty() {
            tracing::info!("Waiting for {} in-flight request(s)", self.in_flight.len());
        }
        for handle in self.in_flight.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Request task failed: {}", e);
            }
        }
    }
}
