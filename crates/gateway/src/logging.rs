//! File logging for embedded hosts.
//!
//! A native host has no terminal, so `initialize` points tracing at
//! `hostbridge.log` in a directory the host chooses. If the process already
//! has a subscriber (the CLI installs one on stderr) it is left in place.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hostbridge_core::error::BridgeError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log file name inside the log directory.
pub const LOG_FILE: &str = "hostbridge.log";

/// Open (or create) the log file in `dir` and install a JSON subscriber
/// writing to it. Returns the log file path.
pub fn install_file_logging(dir: &Path) -> Result<PathBuf, BridgeError> {
    std::fs::create_dir_all(dir).map_err(|e| BridgeError::InvalidParams {
        method: "initialize".into(),
        reason: format!("cannot create log directory {}: {e}", dir.display()),
    })?;

    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BridgeError::InvalidParams {
            method: "initialize".into(),
            reason: format!("cannot open {}: {e}", path.display()),
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .json()
        .try_init()
        .is_ok();

    if !installed {
        debug!(path = %path.display(), "Subscriber already installed; keeping it");
    }
    Ok(path)
}
