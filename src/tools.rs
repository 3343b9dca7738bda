use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::WaphlError;

/// Captured output of an external tool that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// First regular file named `name` on `PATH`. Windows also accepts
/// `name.exe`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let candidates = if cfg!(windows) {
        vec![format!("{name}.exe"), name.to_string()]
    } else {
        vec![name.to_string()]
    };
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| candidates.iter().map(move |file| dir.join(file)))
        .find(|candidate| candidate.is_file())
}

pub fn require_tool(name: &str) -> Result<PathBuf, WaphlError> {
    find_in_path(name).ok_or_else(|| WaphlError::MissingTool(name.to_string()))
}

/// Runs `program` to completion and captures its output. Spawn failures and
/// non-zero exits are handed to `on_failure` with the best message available.
pub fn run_tool<F>(program: &Path, args: &[String], on_failure: F) -> Result<ToolOutput, WaphlError>
where
    F: Fn(String) -> WaphlError,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| on_failure(format!("{}: {err}", program.display())))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        return Ok(ToolOutput { stdout, stderr });
    }
    let trimmed = stderr.trim();
    let message = if trimmed.is_empty() {
        format!("command failed: {} ({})", program.display(), output.status)
    } else {
        trimmed.to_string()
    };
    Err(on_failure(message))
}
