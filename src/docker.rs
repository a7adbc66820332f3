//! Container runtime discovery

use std::path::PathBuf;

/// Used when docker is neither configured nor on PATH
#[cfg(not(windows))]
pub const FALLBACK_DOCKER_PATH: &str = "/usr/local/bin/docker";
#[cfg(windows)]
pub const FALLBACK_DOCKER_PATH: &str = r"C:\Program Files\Docker\Docker\resources\bin\docker.exe";

/// Resolve the docker binary.
///
/// Order: explicit override, configured path, PATH lookup, fallback.
pub fn resolve_docker_path(explicit: Option<PathBuf>, configured: Option<PathBuf>) -> PathBuf {
    resolve_with(explicit, configured, || which::which("docker").ok())
}

fn resolve_with<F>(explicit: Option<PathBuf>, configured: Option<PathBuf>, lookup: F) -> PathBuf
where
    F: FnOnce() -> Option<PathBuf>,
{
    if let Some(path) = explicit.or(configured) {
        return path;
    }

    match lookup() {
        Some(path) => path,
        None => {
            tracing::warn!(
                "docker not found on PATH, falling back to {}",
                FALLBACK_DOCKER_PATH
            );
            PathBuf::from(FALLBACK_DOCKER_PATH)
        }
    }
}
