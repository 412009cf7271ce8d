//! Device bridge
//!
//! The capture server and the fallback grabber both live on the device. They
//! are deployed, launched and torn down through a remote shell / push / port
//! forward capability addressed by device serial. [`DeviceBridge`] is that
//! capability; [`AdbBridge`] implements it with the `adb` command line tool.

mod adb;

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::Result;

pub use adb::AdbBridge;

/// Remote device operations used by the capture and fallback sessions
#[async_trait]
pub trait DeviceBridge: Send + Sync + 'static {
    /// Copy a local file to the device
    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()>;

    /// Run a shell command to completion and return its output
    async fn shell(&self, serial: &str, command: &str) -> Result<String>;

    /// Start a long-running shell command, streaming its output lines
    async fn spawn_shell(&self, serial: &str, command: &str) -> Result<ShellProcess>;

    /// Forward `tcp:<local_port>` on this host to `remote` on the device
    async fn forward(&self, serial: &str, local_port: u16, remote: &str) -> Result<()>;

    /// Remove a forward created by [`DeviceBridge::forward`]
    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()>;
}

/// A running remote command
///
/// Output lines from stdout and stderr are merged in arrival order.
#[derive(Debug)]
pub struct ShellProcess {
    lines: mpsc::Receiver<String>,
    child: Option<Child>,
}

impl ShellProcess {
    /// Spawn a local process (typically `adb shell ...`)
    pub fn spawn(mut command: Command) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(Self {
            lines: rx,
            child: Some(child),
        })
    }

    /// Wrap an existing line source with no local process behind it
    pub fn from_lines(lines: mpsc::Receiver<String>) -> Self {
        Self { lines, child: None }
    }

    /// Next output line; `None` once the process closed its output
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Local process id, if any
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Kill the local process and stop reading its output
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Shell process already gone");
            }
        }
        self.child = None;
        self.lines.close();
    }

    /// A process that prints `lines` and then either exits or stays alive
    #[cfg(test)]
    pub(crate) fn scripted(lines: Vec<&str>, stay_alive: bool) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let lines: Vec<String> = lines.into_iter().map(String::from).collect();
        tokio::spawn(async move {
            for line in lines {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            if stay_alive {
                tx.closed().await;
            }
        });
        Self::from_lines(rx)
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Error reading process output");
                break;
            }
        }
    }
}
