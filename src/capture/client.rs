//! Capture server session
//!
//! Start sequence:
//!
//! ```text
//! push jar -> launch server -> forward tcp:<port> -> settle -> connect (retry)
//!          -> handshake (timeout) -> reader task
//! ```
//!
//! Every resource is recorded as soon as it is acquired, so a failed or
//! abandoned start can be torn down by the same `stop` used for a live
//! session.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::{CaptureConfig, KILL_COMMAND};
use super::handshake::{DeviceInfo, Handshake};
use super::payload::PayloadProcessor;
use crate::bridge::{DeviceBridge, ShellProcess};
use crate::error::{HandshakeError, Result};
use crate::net::{any_error, connect_with_retry, loopback, reserve_local_port};
use crate::relay::source::{SourceEvent, StreamSource};

/// One capture server session on one device
pub struct CaptureClient {
    serial: String,
    config: CaptureConfig,
    bridge: Arc<dyn DeviceBridge>,
    process: Option<ShellProcess>,
    forward_port: Option<u16>,
    reader: Option<JoinHandle<()>>,
}

impl CaptureClient {
    pub fn new(serial: impl Into<String>, config: CaptureConfig, bridge: Arc<dyn DeviceBridge>) -> Self {
        Self {
            serial: serial.into(),
            config,
            bridge,
            process: None,
            forward_port: None,
            reader: None,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether a reader task is running
    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }

    async fn try_start(&mut self) -> Result<(DeviceInfo, mpsc::Receiver<SourceEvent>)> {
        let serial = self.serial.clone();

        self.bridge
            .push(&serial, &self.config.server_jar, &self.config.remote_path)
            .await?;

        let command = self.config.launch_command();
        tracing::debug!(device = %serial, command = %command, "Launching capture server");
        self.process = Some(self.bridge.spawn_shell(&serial, &command).await?);

        let port = match self.config.local_port {
            Some(port) => port,
            None => reserve_local_port().await?,
        };
        let remote = format!("localabstract:{}", self.config.socket_name);
        self.bridge.forward(&serial, port, &remote).await?;
        self.forward_port = Some(port);

        tokio::time::sleep(self.config.settle_delay).await;

        let mut stream = connect_with_retry(
            loopback(port),
            self.config.connect_attempts,
            self.config.connect_delay,
            any_error,
        )
        .await?;

        let mut handshake = Handshake::for_config(&self.config, &serial);
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let info = tokio::time::timeout(
            self.config.handshake_timeout,
            read_handshake(&mut stream, &mut handshake, &mut buf),
        )
        .await
        .map_err(|_| HandshakeError::Timeout(self.config.handshake_timeout))??;

        tracing::info!(
            device = %serial,
            name = %info.name,
            width = info.width,
            height = info.height,
            port = port,
            "Capture session started"
        );

        let (tx, rx) = mpsc::channel(self.config.event_capacity);
        self.reader = Some(tokio::spawn(read_stream(
            serial,
            stream,
            buf,
            self.config.read_buffer_size,
            tx,
        )));

        Ok((info, rx))
    }
}

#[async_trait]
impl StreamSource for CaptureClient {
    type Info = DeviceInfo;

    async fn start(&mut self) -> Result<(DeviceInfo, mpsc::Receiver<SourceEvent>)> {
        match self.try_start().await {
            Ok(started) => Ok(started),
            Err(e) => {
                tracing::warn!(device = %self.serial, error = %e, "Capture session failed to start");
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(port) = self.forward_port.take() {
            if let Err(e) = self.bridge.remove_forward(&self.serial, port).await {
                tracing::debug!(device = %self.serial, port = port, error = %e, "Forward removal failed");
            }
        }

        if let Some(mut process) = self.process.take() {
            process.kill().await;
            if let Err(e) = self.bridge.shell(&self.serial, KILL_COMMAND).await {
                tracing::debug!(device = %self.serial, error = %e, "Remote kill failed");
            }
            tracing::info!(device = %self.serial, "Capture session stopped");
        }
    }
}

async fn read_handshake(
    stream: &mut TcpStream,
    handshake: &mut Handshake,
    buf: &mut BytesMut,
) -> Result<DeviceInfo> {
    loop {
        if let Some(info) = handshake.process(buf) {
            return Ok(info);
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(HandshakeError::ConnectionClosed {
                received: handshake.received() + buf.len(),
            }
            .into());
        }
    }
}

/// Reader task: socket bytes in, payloads out
///
/// `buf` may already hold video bytes that arrived with the handshake.
async fn read_stream(
    serial: String,
    mut stream: TcpStream,
    mut buf: BytesMut,
    buffer_size: usize,
    tx: mpsc::Sender<SourceEvent>,
) {
    let mut processor = PayloadProcessor::new();

    let reason = loop {
        if !buf.is_empty() {
            for payload in processor.feed(&buf) {
                if tx.send(SourceEvent::Data(payload)).await.is_err() {
                    return;
                }
            }
            buf.clear();
        }

        buf.reserve(buffer_size);
        match stream.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => {}
            Err(e) => break Some(e.to_string()),
        }
    };

    if let Some(payload) = processor.finish() {
        let _ = tx.send(SourceEvent::Data(payload)).await;
    }

    match &reason {
        Some(e) => tracing::warn!(device = %serial, error = %e, "Capture stream failed"),
        None => tracing::info!(device = %serial, "Capture stream ended"),
    }
    let _ = tx.send(SourceEvent::Ended(reason)).await;
}
