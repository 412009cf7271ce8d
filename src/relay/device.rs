//! Per-device relay actor
//!
//! One task per device owns the keyframe cache, both sessions and their
//! subscriber sets. Viewers talk to it through a cloneable [`RelayHandle`];
//! every subscribe, unsubscribe, start result and source event is handled
//! in turn on the actor task, so lifecycle transitions never race.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::cache::{CacheStats, KeyframeCache};
use super::session::{Session, SessionInput, SessionStats};
use super::source::{SourceEvent, StreamSource};
use super::viewer::{StreamFormat, ViewerId, ViewerSink};
use crate::capture::DeviceInfo;
use crate::error::{Error, Result};
use crate::fallback::Banner;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Commands queued for the actor
    pub command_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }
}

/// Snapshot of one device relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub serial: String,
    pub h264: SessionStats,
    pub jpeg: SessionStats,
    pub cache: CacheStats,
}

enum Command {
    Subscribe {
        viewer: ViewerSink,
        format: StreamFormat,
    },
    Unsubscribe {
        id: ViewerId,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a device relay
#[derive(Clone)]
pub struct RelayHandle {
    serial: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl RelayHandle {
    /// Spawn the actor for `serial`
    pub fn spawn<P, F>(serial: &str, primary: P, fallback: F, config: &RelayConfig) -> Self
    where
        P: StreamSource<Info = DeviceInfo>,
        F: StreamSource<Info = Banner>,
    {
        let serial: Arc<str> = Arc::from(serial);
        let (tx, rx) = mpsc::channel(config.command_capacity);

        let relay = DeviceRelay {
            serial: serial.clone(),
            commands: rx,
            cache: KeyframeCache::new(),
            h264: Session::new(serial.clone(), StreamFormat::H264, primary, false),
            jpeg: Session::new(serial.clone(), StreamFormat::Jpeg, fallback, true),
        };
        tokio::spawn(relay.run());

        Self { serial, tx }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Whether the actor has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Subscribe `viewer` to `format`
    ///
    /// A viewer subscribed to the other format is moved over.
    pub async fn subscribe(&self, viewer: ViewerSink, format: StreamFormat) -> Result<()> {
        self.send(Command::Subscribe { viewer, format }).await
    }

    /// Remove the viewer from whichever format it is subscribed to
    pub async fn unsubscribe(&self, id: ViewerId) -> Result<()> {
        self.send(Command::Unsubscribe { id }).await
    }

    pub async fn stats(&self) -> Result<RelayStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| Error::RelayClosed)
    }

    /// Stop both sources and end the actor
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::RelayClosed)
    }
}

struct DeviceRelay<P: StreamSource, F: StreamSource> {
    serial: Arc<str>,
    commands: mpsc::Receiver<Command>,
    cache: KeyframeCache,
    h264: Session<P>,
    jpeg: Session<F>,
}

impl<P, F> DeviceRelay<P, F>
where
    P: StreamSource<Info = DeviceInfo>,
    F: StreamSource<Info = Banner>,
{
    async fn run(mut self) {
        tracing::debug!(device = %self.serial, "Relay started");

        let done = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => break Some(done),
                    Some(command) => self.handle_command(command).await,
                    None => break None,
                },
                input = self.h264.next_input() => match input {
                    SessionInput::Started(outcome) => {
                        self.cache.clear();
                        self.h264.on_started(outcome).await;
                    }
                    SessionInput::Event(SourceEvent::Data(payload)) => {
                        self.cache.observe(&payload);
                        if self.h264.relay(payload).await {
                            self.cache.clear();
                        }
                    }
                    SessionInput::Event(SourceEvent::Ended(reason)) => {
                        self.h264.on_ended(reason).await;
                        self.cache.clear();
                    }
                },
                input = self.jpeg.next_input() => match input {
                    SessionInput::Started(outcome) => {
                        self.jpeg.on_started(outcome).await;
                    }
                    SessionInput::Event(SourceEvent::Data(image)) => {
                        self.jpeg.relay(image).await;
                    }
                    SessionInput::Event(SourceEvent::Ended(reason)) => {
                        self.jpeg.on_ended(reason).await;
                    }
                },
            }
        };

        self.h264.shutdown().await;
        self.jpeg.shutdown().await;
        tracing::debug!(device = %self.serial, "Relay stopped");
        // Close the command queue before acknowledging
        drop(self);

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { viewer, format } => {
                let id = viewer.id();
                match format {
                    StreamFormat::H264 => {
                        if self.jpeg.contains(&id) {
                            self.jpeg.unsubscribe(&id).await;
                        }
                        let catch_up = self.cache.snapshot();
                        self.h264.subscribe(viewer, &catch_up);
                    }
                    StreamFormat::Jpeg => {
                        if self.h264.contains(&id) && self.h264.unsubscribe(&id).await {
                            self.cache.clear();
                        }
                        self.jpeg.subscribe(viewer, &[]);
                    }
                }
            }
            Command::Unsubscribe { id } => {
                if self.h264.unsubscribe(&id).await {
                    self.cache.clear();
                }
                self.jpeg.unsubscribe(&id).await;
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            // Handled by the run loop
            Command::Shutdown { .. } => {}
        }
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            serial: self.serial.to_string(),
            h264: self.h264.stats(),
            jpeg: self.jpeg.stats(),
            cache: self.cache.stats(),
        }
    }
}
