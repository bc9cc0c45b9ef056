//! Process utilities for worker child processes.

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Longest stderr excerpt carried in error messages
const STDERR_TAIL_CHARS: usize = 2000;

fn exit_status_code_parts(code: Option<i32>, _signal: Option<i32>) -> Option<i32> {
    if let Some(code) = code {
        return Some(code);
    }
    #[cfg(unix)]
    {
        if let Some(signal) = _signal {
            return Some(128 + signal);
        }
    }
    None
}

/// Extract exit code from ExitStatus, using 128+signal for signal-terminated processes on Unix.
pub(crate) fn exit_status_code(status: &std::process::ExitStatus) -> Option<i32> {
    let code = status.code();
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;
    exit_status_code_parts(code, signal)
}

/// Kill a child and reap it, returning whatever exit code it ended with.
pub(crate) async fn kill_and_reap(child: &mut Child) -> Option<i32> {
    let _ = child.kill().await;
    match child.try_wait() {
        Ok(Some(status)) => exit_status_code(&status),
        Ok(None) => child
            .wait()
            .await
            .ok()
            .and_then(|status| exit_status_code(&status)),
        Err(_) => None,
    }
}

/// Drain stderr in the background so a chatty worker never blocks on a full pipe.
pub(crate) fn drain_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut err) = stderr {
            if let Err(e) = err.read_to_string(&mut buf).await {
                tracing::debug!(error = %e, "stderr read ended early");
            }
        }
        buf
    })
}

/// Keep the last part of a long output for error messages
pub(crate) fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    let skipped: String = trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("...{}", skipped)
}

/// Shorten text for log previews
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_passthrough() {
        assert_eq!(exit_status_code_parts(Some(0), None), Some(0));
        assert_eq!(exit_status_code_parts(Some(1), None), Some(1));
        assert_eq!(exit_status_code_parts(Some(42), None), Some(42));
    }

    #[cfg(unix)]
    #[test]
    fn signal_exit_code() {
        // SIGKILL (9) -> 128 + 9 = 137
        assert_eq!(exit_status_code_parts(None, Some(9)), Some(137));
        // SIGTERM (15) -> 128 + 15 = 143
        assert_eq!(exit_status_code_parts(None, Some(15)), Some(143));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_and_reap() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("10")
            .spawn()
            .expect("failed to spawn");

        let code = kill_and_reap(&mut child).await;
        assert_eq!(code, Some(137));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_stderr() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("printf 'oops' >&2")
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("failed to spawn");

        let stderr = drain_stderr(child.stderr.take()).await.unwrap();
        child.wait().await.unwrap();
        assert_eq!(stderr, "oops");
    }

    #[test]
    fn test_tail_and_preview() {
        assert_eq!(tail("  short  "), "short");

        let long = "x".repeat(STDERR_TAIL_CHARS + 10);
        let tailed = tail(&long);
        assert!(tailed.starts_with("..."));
        assert_eq!(tailed.len(), STDERR_TAIL_CHARS + 3);

        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
