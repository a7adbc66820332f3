//! Process Streamer
//!
//! Launches a long-lived or detached process and turns it into a finite stream
//! of [`ProcessEvent`]s: any number of output chunks, then exactly one terminal
//! event. The stream fuses after the terminal event, so nothing can follow it.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::CommandSpec;
use crate::core::{Channel, IntentType, ResultEnvelope};
use crate::dispatch::Dispatcher;

/// Read buffer size per output chunk
const CHUNK_SIZE: usize = 8 * 1024;

/// Chunks buffered between the pipe readers and the consumer. When full, the
/// readers stop draining the child's pipes until the consumer catches up.
const EVENT_BUFFER: usize = 64;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Whether the child's stdio is piped back or discarded by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioPolicy {
    #[default]
    Captured,
    Ignored,
}

/// How to launch a streamed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub command: CommandSpec,
    /// Start in a new process group so the child outlives its parent
    pub detached: bool,
    pub stdio: StdioPolicy,
    /// Do not wait for the child when the shell shuts down
    pub unref: bool,
}

impl StreamSpec {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            detached: false,
            stdio: StdioPolicy::Captured,
            unref: false,
        }
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn stdio(mut self, stdio: StdioPolicy) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn unref(mut self, unref: bool) -> Self {
        self.unref = unref;
        self
    }
}

/// One event in the life of a streamed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk read from stdout or stderr
    Output { channel: Channel, text: String },
    /// The process exited; `code` is `None` when killed by a signal
    Exited { code: Option<i32> },
    /// The process could not be started
    SpawnFailed { message: String },
}

impl ProcessEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessEvent::Output { .. })
    }
}

/// Events of a single process, ending with its terminal event
pub struct ProcessStream {
    rx: mpsc::Receiver<ProcessEvent>,
    terminated: bool,
}

impl ProcessStream {
    fn new(rx: mpsc::Receiver<ProcessEvent>) -> Self {
        Self {
            rx,
            terminated: false,
        }
    }
}

impl Stream for ProcessStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ProcessEvent>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.terminated = true;
                    self.rx.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for ProcessStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Launch a process and return its event stream.
///
/// Must be called from within a tokio runtime.
pub fn spawn(spec: &StreamSpec) -> ProcessStream {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let mut cmd = spec.command.to_command();
    match spec.stdio {
        StdioPolicy::Captured => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        StdioPolicy::Ignored => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }
    if spec.detached {
        detach(&mut cmd);
    }

    match cmd.spawn() {
        Ok(child) => {
            tracing::debug!(pid = child.id(), "Spawned: {}", spec.command);
            tokio::spawn(drive(child, tx));
        }
        Err(e) => {
            // Fresh channel, so there is always room for the single event
            let _ = tx.try_send(ProcessEvent::SpawnFailed {
                message: e.to_string(),
            });
        }
    }

    ProcessStream::new(rx)
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
}

/// Forward output until both pipes close, then report the exit
async fn drive(mut child: Child, tx: mpsc::Sender<ProcessEvent>) {
    let readers = [
        child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward(out, Channel::Stdout, tx.clone()))),
        child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward(err, Channel::Stderr, tx.clone()))),
    ];

    for reader in readers.into_iter().flatten() {
        let _ = reader.await;
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("Failed to wait for child: {}", e);
            None
        }
    };

    let _ = tx.send(ProcessEvent::Exited { code }).await;
}

async fn forward<R>(mut reader: R, channel: Channel, tx: mpsc::Sender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(ProcessEvent::Output { channel, text }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Read from {:?} failed: {}", channel, e);
                break;
            }
        }
    }
}

/// Streams processes into the dispatcher
#[derive(Clone)]
pub struct ProcessStreamer {
    dispatcher: Dispatcher,
}

impl ProcessStreamer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Launch `spec` and deliver one envelope per event.
    ///
    /// Returns `None` without launching anything when the request id or the
    /// command is empty.
    pub fn run(&self, request_id: &str, intent: IntentType, spec: &StreamSpec) -> Option<JoinHandle<()>> {
        if request_id.is_empty() || spec.command.is_empty() {
            tracing::debug!("Skipping {} request with empty id or command", intent);
            return None;
        }

        let mut stream = spawn(spec);
        let dispatcher = self.dispatcher.clone();
        let request_id = request_id.to_string();

        Some(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let envelope = match event {
                    ProcessEvent::Output { channel, text } => {
                        ResultEnvelope::output(&request_id, intent, channel, text)
                    }
                    ProcessEvent::Exited { code } => {
                        tracing::info!(request_id = %request_id, ?code, "{} process exited", intent);
                        ResultEnvelope::exited(&request_id, intent)
                    }
                    ProcessEvent::SpawnFailed { message } => {
                        tracing::warn!(request_id = %request_id, "{} failed to start: {}", intent, message);
                        ResultEnvelope::error(&request_id, intent, message)
                    }
                };
                dispatcher.deliver(&envelope).await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Payload, Status};
    use crate::dispatch::{ChannelSink, DispatchContext, Notification};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_streamer() -> (ProcessStreamer, UnboundedReceiver<Notification>) {
        let (sink, rx) = ChannelSink::new();
        let dispatcher = Dispatcher::new(DispatchContext::with_sink(Arc::new(sink)));
        (ProcessStreamer::new(dispatcher), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<ResultEnvelope> {
        let mut envelopes = Vec::new();
        while let Ok(n) = rx.try_recv() {
            envelopes.push(serde_json::from_str(&n.payload).unwrap());
        }
        envelopes
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProcessEvent::Exited { code: Some(0) }.is_terminal());
        assert!(ProcessEvent::SpawnFailed {
            message: "x".to_string()
        }
        .is_terminal());
        assert!(!ProcessEvent::Output {
            channel: Channel::Stdout,
            text: String::new()
        }
        .is_terminal());
    }

    #[tokio::test]
    async fn test_empty_request_is_silent() {
        let (streamer, mut rx) = test_streamer();

        assert!(streamer
            .run("", IntentType::StartKernel, &StreamSpec::new(sh("echo hi")))
            .is_none());
        assert!(streamer
            .run("r1", IntentType::StartKernel, &StreamSpec::new(CommandSpec::new("")))
            .is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_single_terminal_event() {
        let spec = StreamSpec::new(CommandSpec::new("/no/such/kernel-runtime"));
        let events: Vec<ProcessEvent> = spawn(&spec).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProcessEvent::SpawnFailed { message } if !message.is_empty()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captured_output_then_exit() {
        let spec = StreamSpec::new(sh("printf out; printf err >&2; exit 4"));
        let mut stream = spawn(&spec);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            assert!(terminal.is_none(), "event after terminal: {:?}", event);
            match event {
                ProcessEvent::Output { channel: Channel::Stdout, text } => stdout.push_str(&text),
                ProcessEvent::Output { channel: Channel::Stderr, text } => stderr.push_str(&text),
                other => terminal = Some(other),
            }
        }

        assert_eq!(stdout, "out");
        assert_eq!(stderr, "err");
        assert_eq!(terminal, Some(ProcessEvent::Exited { code: Some(4) }));
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ignored_stdio_yields_only_exit() {
        let spec = StreamSpec::new(sh("i=0; while [ $i -lt 50 ]; do echo noise; echo more >&2; i=$((i+1)); done"))
            .stdio(StdioPolicy::Ignored);
        let events: Vec<ProcessEvent> = spawn(&spec).collect().await;

        assert_eq!(events, vec![ProcessEvent::Exited { code: Some(0) }]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_delivers_data_before_exit() {
        let (streamer, mut rx) = test_streamer();

        streamer
            .run("r2", IntentType::StartKernel, &StreamSpec::new(sh("echo hello")))
            .unwrap()
            .await
            .unwrap();

        let envelopes = drain(&mut rx);
        let (last, data) = envelopes.split_last().unwrap();
        assert_eq!(last.status(), Status::Exited);
        assert!(!last.is_data());

        let text: String = data
            .iter()
            .map(|env| {
                assert_eq!(env.status(), Status::Ok);
                assert_eq!(env.channel(), Some(Channel::Stdout));
                match env.payload() {
                    Some(Payload::Text { text }) => text.clone(),
                    other => panic!("unexpected payload {:?}", other),
                }
            })
            .collect();
        assert_eq!(text, "hello\n");
        assert!(envelopes.iter().all(|env| env.request_id() == "r2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_spawn_failure_has_no_exit() {
        let (streamer, mut rx) = test_streamer();

        streamer
            .run(
                "r3",
                IntentType::StartKernel,
                &StreamSpec::new(CommandSpec::new("/no/such/docker").arg("run")).detached(true),
            )
            .unwrap()
            .await
            .unwrap();

        let envelopes = drain(&mut rx);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].status(), Status::Error);
        assert!(envelopes[0].error_message().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_consumer_gets_every_chunk_in_order() {
        // Far more output than the event buffer holds
        let spec = StreamSpec::new(sh("i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done"));
        let mut stream = spawn(&spec);

        let mut stdout = String::new();
        let mut events = 0;
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            assert!(terminal.is_none(), "event after terminal: {:?}", event);
            match event {
                ProcessEvent::Output { text, .. } => {
                    stdout.push_str(&text);
                    events += 1;
                    if events % 8 == 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    }
                }
                other => terminal = Some(other),
            }
        }

        let expected: String = (0..2000).map(|i| format!("line-{}\n", i)).collect();
        assert_eq!(stdout, expected);
        assert_eq!(terminal, Some(ProcessEvent::Exited { code: Some(0) }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_process_runs() {
        let spec = StreamSpec::new(sh("echo detached"))
            .detached(true)
            .unref(true);
        let events: Vec<ProcessEvent> = spawn(&spec).collect().await;

        assert_eq!(events.last(), Some(&ProcessEvent::Exited { code: Some(0) }));
    }
}
