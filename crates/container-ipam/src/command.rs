//! External command execution

use crate::{Error, Result};
use tokio::process::Command;
use tracing::trace;

/// Execute a command and return stdout. A non-zero exit becomes an error
/// built by `kind` carrying the command line and stderr.
pub(crate) async fn exec_command(
    cmd: &str,
    args: &[&str],
    kind: fn(String) -> Error,
) -> Result<String> {
    trace!(cmd = cmd, args = ?args, "Executing command");

    let output = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| kind(format!("Failed to execute {}: {}", cmd, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(kind(format!(
            "Command {} {} failed: {}",
            cmd,
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
