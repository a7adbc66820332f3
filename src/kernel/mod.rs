//! Kernel records - notebook containers as reported by the container runtime

mod parse;

use serde::{Deserialize, Serialize};

pub use parse::*;

/// Normalized container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    #[default]
    Pending,
    Running,
    Exited,
}

/// One kernel as parsed from a line of `docker ps` output
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KernelRecord {
    /// Container id
    pub id: String,
    pub status: KernelStatus,
    /// Image the container was started from
    pub image: String,
    /// First published host port, if any
    pub port: Option<u16>,
}
