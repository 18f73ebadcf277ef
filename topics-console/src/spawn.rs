//! Launch scripts for the debuggee
//!
//! `--spawnjoin` runs a script to completion before the console listens
//! (a build step, say); `--spawn` starts one in the background once the
//! listener is bound, usually the JVM that carries the agent.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::{debug, info, warn};

use topics_utils::{Result, TopicsError};

/// How the console treats a launched script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Wait for the script to exit
    Join,
    /// Leave it running; its exit is only logged
    Background,
}

fn script_command(script: &Path) -> Command {
    if cfg!(windows) {
        Command::new(script)
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg(script);
        cmd
    }
}

/// Start `script` in the given mode.
///
/// Returns the exit status for [`SpawnMode::Join`], `None` otherwise.
pub async fn spawn_script(script: &Path, mode: SpawnMode) -> Result<Option<ExitStatus>> {
    if !script.is_file() {
        return Err(TopicsError::ScriptNotFound(script.to_path_buf()));
    }

    let spawn_error = |source| TopicsError::Spawn {
        path: script.to_path_buf(),
        source,
    };
    let mut child = script_command(script).spawn().map_err(spawn_error)?;
    info!(script = %script.display(), ?mode, pid = ?child.id(), "launch script started");

    match mode {
        SpawnMode::Join => {
            let status = child.wait().await.map_err(spawn_error)?;
            debug!(script = %script.display(), %status, "launch script finished");
            Ok(Some(status))
        }
        SpawnMode::Background => {
            let path: PathBuf = script.to_path_buf();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => info!(script = %path.display(), %status, "launch script exited"),
                    Err(e) => warn!(script = %path.display(), "launch script wait failed: {}", e),
                }
            });
            Ok(None)
        }
    }
}
