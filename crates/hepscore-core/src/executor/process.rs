//! Child process launching and output capture.

use super::command::Invocation;
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{error, warn};

const NO_SPACE_SUFFIX: &str = "no space left on device.";

/// Launches one container process per attempt.
///
/// `Err` means the process could not be spawned. `Ok(code)` is the exit
/// status; a process killed by a signal reports `-1`.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, invocation: &Invocation, run_dir: &Path, sink: &mut OutputSink) -> io::Result<i32>;
}

/// Receives a child's output line by line.
///
/// Every line is appended to the shared suite log as it arrives and kept in
/// memory for the per-run log. Lines are kept oldest first.
pub struct OutputSink {
    suite_log: Option<File>,
    lines: Vec<String>,
}

impl OutputSink {
    /// Open (append) the shared suite log.
    pub async fn open(suite_log: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(suite_log)
            .await?;
        Ok(Self {
            suite_log: Some(file),
            lines: Vec::new(),
        })
    }

    /// A sink that only buffers.
    pub fn in_memory() -> Self {
        Self {
            suite_log: None,
            lines: Vec::new(),
        }
    }

    pub async fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim_end().ends_with(NO_SPACE_SUFFIX) {
            error!("container engine: no space left on device");
        }
        if let Some(log) = self.suite_log.as_mut() {
            let res = async {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
                log.flush().await
            }
            .await;
            if let Err(e) = res {
                warn!("failed to append to suite log: {}", e);
            }
        }
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> &[String] {
        let start = self.lines.len().saturating_sub(n);
        &self.lines[start..]
    }

    /// Hand over the lines of the attempt that just ended.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    pub async fn close(mut self) {
        if let Some(log) = self.suite_log.as_mut() {
            let _ = log.flush().await;
        }
    }
}

/// Runs invocations as real child processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ContainerLauncher;

#[async_trait]
impl ProcessLauncher for ContainerLauncher {
    async fn launch(&self, invocation: &Invocation, _run_dir: &Path, sink: &mut OutputSink) -> io::Result<i32> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &invocation.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stderr not captured"))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_open = true;
        let mut err_open = true;

        // Partial reads stay in the buffers across select! iterations.
        while out_open || err_open {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut out_buf), if out_open => {
                    match read {
                        Ok(0) | Err(_) => out_open = false,
                        Ok(_) => sink.push(decode_line(&mut out_buf)).await,
                    }
                }
                read = stderr.read_until(b'\n', &mut err_buf), if err_open => {
                    match read {
                        Ok(0) | Err(_) => err_open = false,
                        Ok(_) => sink.push(decode_line(&mut err_buf)).await,
                    }
                }
            }
        }

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Lossy UTF-8 decode of one line, without its newline. Clears `buf`.
fn decode_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    line
}
