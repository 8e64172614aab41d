//! Locating external executables on `PATH`.

use std::path::PathBuf;

/// Resolve an executable by name, searching `PATH`.
///
/// Returns `None` when the program cannot be found or is not executable.
pub fn resolve_executable_path_blocking(name: &str) -> Option<PathBuf> {
    match which::which(name) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!("Could not resolve executable '{}': {}", name, e);
            None
        }
    }
}

/// Async variant of [`resolve_executable_path_blocking`].
///
/// The `PATH` scan touches the filesystem, so it runs on the blocking pool.
pub async fn resolve_executable_path(name: &str) -> Option<PathBuf> {
    let name = name.to_string();
    tokio::task::spawn_blocking(move || resolve_executable_path_blocking(&name))
        .await
        .ok()
        .flatten()
}
