//! Child-process execution for local tools and remote shells.

use std::process::Stdio;

use netassert_core::script::is_transport_noise;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::sink::SinkWriter;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// First non-empty stderr line, or the exit code if stderr was silent.
    pub fn reason(&self) -> String {
        self.stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !is_transport_noise(l))
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with code {}", self.exit_code))
    }
}

/// Run a command to completion and capture its output.
///
/// Does NOT fail on non-zero exit; inspect [`CommandOutput::success`].
pub async fn run_captured(mut command: Command) -> std::io::Result<CommandOutput> {
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Run a command, streaming stdout and stderr into a sink line by line.
///
/// Transport teardown chatter is dropped. The child is killed if this
/// future is dropped, which tears down the remote session and fires the
/// far side's `EXIT` trap.
pub async fn stream_to_sink(mut command: Command, sink: &mut SinkWriter) -> std::io::Result<i32> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("child stderr not captured"))?;

    let mut out = BufReader::new(stdout);
    let mut err = BufReader::new(stderr);
    // Partial reads stay in these buffers across select! iterations.
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let line = tokio::select! {
            read = out.read_until(b'\n', &mut out_buf), if out_open => {
                if read? == 0 {
                    out_open = false;
                    None
                } else {
                    Some(take_line(&mut out_buf))
                }
            }
            read = err.read_until(b'\n', &mut err_buf), if err_open => {
                if read? == 0 {
                    err_open = false;
                    None
                } else {
                    Some(take_line(&mut err_buf))
                }
            }
        };
        if let Some(line) = line {
            if is_transport_noise(&line) {
                continue;
            }
            sink.write_line(&line).await?;
        }
    }

    let status = child.wait().await?;
    Ok(status.code().unwrap_or(-1))
}

/// Drain one line from a read buffer. Invalid UTF-8 is replaced, not
/// rejected: banners and motds are not always UTF-8.
fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    line
}
