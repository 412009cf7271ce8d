//! `adb` command line bridge

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{DeviceBridge, ShellProcess};
use crate::error::{Error, Result};

/// Bridge that shells out to the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: PathBuf,
    command_timeout: Duration,
}

impl AdbBridge {
    /// Use `adb` from `PATH`
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: path.into(),
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Upper bound for one-shot commands (push, shell, forward)
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn command(&self, serial: &str) -> Command {
        let mut command = Command::new(&self.adb_path);
        command.arg("-s").arg(serial);
        command
    }

    async fn run(&self, serial: &str, args: &[&str]) -> Result<String> {
        let mut command = self.command(serial);
        command.args(args).kill_on_drop(true);

        tracing::debug!(device = %serial, args = ?args, "Running adb");

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| Error::Timeout("adb command"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Bridge(format!(
                "adb {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.run(serial, &["push", &local, remote]).await?;
        Ok(())
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.run(serial, &["shell", command]).await
    }

    async fn spawn_shell(&self, serial: &str, command: &str) -> Result<ShellProcess> {
        let mut adb = self.command(serial);
        adb.arg("shell").arg(command);
        tracing::debug!(device = %serial, command = %command, "Spawning remote process");
        Ok(ShellProcess::spawn(adb)?)
    }

    async fn forward(&self, serial: &str, local_port: u16, remote: &str) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.run(serial, &["forward", &local, remote]).await?;
        Ok(())
    }

    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.run(serial, &["forward", "--remove", &local]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let bridge = AdbBridge::with_path("/nonexistent/adb-binary");
        let result = bridge.shell("emulator-5554", "true").await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_failed_command_is_bridge_error() {
        // `false` ignores its arguments and exits 1
        let bridge = AdbBridge::with_path("false");
        let result = bridge.forward("emulator-5554", 8099, "localabstract:scrcpy").await;
        assert!(matches!(result, Err(Error::Bridge(_))));
    }

    #[tokio::test]
    async fn test_output_captured() {
        // `echo` prints its arguments: "-s <serial> shell <command>"
        let bridge = AdbBridge::with_path("echo");
        let out = bridge.shell("abc123", "wm size").await.unwrap();
        assert_eq!(out.trim(), "-s abc123 shell wm size");
    }
}
