//! Host module for process management and command execution

pub mod command_runner;
pub mod command_spec;
pub mod streamer;

#[allow(unused_imports)]
pub use command_runner::{CommandError, CommandResult, CommandRunner, ExitCodePolicy};
pub use command_spec::{CommandLine, CommandSpec};
#[allow(unused_imports)]
pub use streamer::{ProcessEvent, ProcessStream, ProcessStreamer, StdioPolicy, StreamSpec};
