//! Shell command execution utilities.
//!
//! This module provides shell command execution with proper quoting so
//! that port names and external ids read back from the bridge can never
//! inject additional commands.
//!
//! # Example
//!
//! ```ignore
//! use ovsnet_common::shell::{self, OVS_VSCTL_CMD, shellquote};
//!
//! let cmd = format!("{} --timeout=2 list-ports {}", OVS_VSCTL_CMD, shellquote("br-int"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{OvsNetError, OvsNetResult};

/// Path to the `ovs-vsctl` command for OVSDB configuration.
pub const OVS_VSCTL_CMD: &str = "ovs-vsctl";

/// Path to the `ovs-ofctl` command for OpenFlow table management.
pub const OVS_OFCTL_CMD: &str = "ovs-ofctl";

/// Path to the `ip` command, used for tunnel endpoint detection.
pub const IP_CMD: &str = "/sbin/ip";

/// Characters the shell still interprets inside double quotes: dollar,
/// backquote, double quote, backslash and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps `s` in double quotes, escaping whatever the shell would still
/// interpret inside them.
///
/// ```
/// use ovsnet_common::shell::shellquote;
///
/// assert_eq!(shellquote("tap0"), "\"tap0\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    format!("\"{}\"", SHELL_ESCAPE_RE.replace_all(s, r"\$1"))
}

/// Prefixes a command with the configured root helper (e.g. `sudo`).
///
/// An empty helper leaves the command untouched.
pub fn with_root_helper(root_helper: &str, cmd: &str) -> String {
    match root_helper.trim() {
        "" => cmd.to_string(),
        helper => format!("{} {}", helper, cmd),
    }
}

/// Trimmed output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status, -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text reported when the command failed: stderr if there is any,
    /// else stdout.
    pub fn failure_text(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs `cmd` through `/bin/sh -c`. A non-zero exit is not an error here.
pub async fn exec(cmd: &str) -> OvsNetResult<CommandOutput> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .args(["-c", cmd])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| OvsNetError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };
    if !result.success() {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }
    Ok(result)
}

/// Runs `cmd` and returns its stdout, failing on a non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> OvsNetResult<String> {
    let result = exec(cmd).await?;
    if !result.success() {
        return Err(OvsNetError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.failure_text().to_string(),
        });
    }
    Ok(result.stdout)
}

/// Like [`exec_or_throw`], bounded by a wall-clock timeout.
///
/// A command that does not finish in time is killed and reported as
/// `DataplaneUnavailable`.
pub async fn exec_with_timeout(cmd: &str, timeout: Duration) -> OvsNetResult<String> {
    match tokio::time::timeout(timeout, exec_or_throw(cmd)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(command = %cmd, timeout_ms = timeout.as_millis() as u64, "Command timed out");
            Err(OvsNetError::dataplane(
                cmd,
                format!("timed out after {}ms", timeout.as_millis()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_port_names() {
        assert_eq!(shellquote("br-int"), "\"br-int\"");
        assert_eq!(shellquote("gre0a000002-01"), "\"gre0a000002-01\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_with_root_helper() {
        assert_eq!(
            with_root_helper("sudo", "ovs-vsctl show"),
            "sudo ovs-vsctl show"
        );
        assert_eq!(with_root_helper("  ", "ovs-vsctl show"), "ovs-vsctl show");
    }

    #[test]
    fn test_failure_text_prefers_stderr() {
        let mut out = CommandOutput {
            exit_code: 1,
            stdout: "partial".to_string(),
            stderr: "ovs-vsctl: no bridge named br-x".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.failure_text(), "ovs-vsctl: no bridge named br-x");

        out.stderr.clear();
        assert_eq!(out.failure_text(), "partial");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("echo boom >&2; exit 3").await {
            Err(OvsNetError::ShellCommandFailed {
                exit_code, output, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(output, "boom");
            }
            other => panic!("Expected ShellCommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_with_timeout_expires() {
        let result = exec_with_timeout("sleep 5", Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(OvsNetError::DataplaneUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_exec_with_timeout_success() {
        let output = exec_with_timeout("echo ok", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output, "ok");
    }
}
