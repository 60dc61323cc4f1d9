//! Timeout-bounded, hidden subprocess execution.
//!
//! Lookup utilities are external collaborators that can hang or flood
//! stdout. Every run is killed on timeout or drop and its output is capped.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::DnsError;

/// Windows CREATE_NO_WINDOW flag to prevent console windows from appearing.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Default cap on captured stdout.
pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024;

/// Create a command that won't show a console window on Windows.
pub fn hidden_command(program: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new(program);
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }

    #[cfg(not(windows))]
    {
        Command::new(program)
    }
}

/// Run `program` with `args`, returning at most `max_output` bytes of stdout.
///
/// A non-zero exit status is not an error: lookup tools report NXDOMAIN that
/// way while still printing parseable output. Spawn failures and processes
/// killed by a signal are reported as [`DnsError::Subprocess`].
pub async fn run_hidden(
    program: &str,
    args: &[&str],
    timeout: Duration,
    max_output: usize,
) -> Result<String, DnsError> {
    let mut child = hidden_command(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DnsError::Subprocess(format!("failed to spawn {program}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DnsError::Subprocess(format!("{program}: stdout not captured")))?;

    let run = async {
        let mut buf = Vec::with_capacity(1024);
        let mut reader = stdout.take(max_output as u64);
        reader.read_to_end(&mut buf).await?;
        // Closing the pipe unblocks a child that is still writing past the cap.
        drop(reader);
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, buf))
    };

    let outcome = tokio::time::timeout(timeout, run).await;
    match outcome {
        Ok(Ok((status, buf))) => {
            // SIGPIPE after hitting the cap still leaves usable output.
            if status.code().is_none() && buf.len() < max_output {
                return Err(DnsError::Subprocess(format!(
                    "{program} terminated abnormally: {status}"
                )));
            }
            if !status.success() {
                debug!("{} exited with {}", program, status);
            }
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }
        Ok(Err(e)) => Err(DnsError::Subprocess(format!("{program}: {e}"))),
        Err(_) => {
            let _ = child.start_kill();
            Err(DnsError::Timeout(timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_subprocess_error() {
        let result = run_hidden(
            "netsentry-definitely-not-a-command",
            &[],
            Duration::from_secs(1),
            DEFAULT_MAX_OUTPUT,
        )
        .await;
        assert!(matches!(result, Err(DnsError::Subprocess(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_captured_and_capped() {
        let out = run_hidden("echo", &["hello world"], Duration::from_secs(5), 5)
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_program_times_out() {
        let result = run_hidden("sleep", &["5"], Duration::from_millis(100), DEFAULT_MAX_OUTPUT).await;
        assert_eq!(result, Err(DnsError::Timeout(100)));
    }
}
