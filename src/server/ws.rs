//! Websocket viewer session
//!
//! One task per connected viewer. It forwards the viewer's `on`/`off`
//! commands to the device relay and drains the viewer queue onto the socket.
//! A closed or failed socket is an implicit `off`.
//!
//! Keepalive is a text `ping` for the viewer script plus a protocol-level
//! ping; browsers answer the latter on their own, so a viewer that only
//! watches still counts as alive.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};

use super::config::ServerConfig;
use super::protocol::{error_message, start_message, ViewerCommand, PING};
use crate::relay::{RelayHandle, StreamFormat, ViewerId, ViewerMessage, ViewerSink};

struct ViewerSession {
    relay: RelayHandle,
    sink: ViewerSink,
    format: Option<StreamFormat>,
    last_seen_alive: Instant,
}

impl ViewerSession {
    fn id(&self) -> ViewerId {
        self.sink.id()
    }

    async fn handle_text(&mut self, text: &str) {
        let Some(command) = ViewerCommand::parse(text) else {
            tracing::debug!(viewer = %self.id(), message = %text, "Ignoring viewer message");
            return;
        };

        let result = match command {
            ViewerCommand::On(format) => {
                self.format = Some(format);
                self.relay.subscribe(self.sink.clone(), format).await
            }
            ViewerCommand::Off => {
                self.format = None;
                self.relay.unsubscribe(self.id()).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(viewer = %self.id(), error = %e, "Relay rejected viewer command");
        }
    }
}

/// Run one viewer connection to completion
pub(crate) async fn run_viewer(socket: WebSocket, relay: RelayHandle, config: Arc<ServerConfig>) {
    let (sink, mut queue) = ViewerSink::channel(config.viewer_queue_capacity);
    let mut session = ViewerSession {
        relay,
        sink,
        format: None,
        last_seen_alive: Instant::now(),
    };
    let (mut sender, mut receiver) = socket.split();

    tracing::info!(device = %session.relay.serial(), viewer = %session.id(), "Viewer connected");

    let start = tokio::time::Instant::now() + config.ping_interval;
    let mut ping = tokio::time::interval_at(start, config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.last_seen_alive = Instant::now();
                        session.handle_text(&text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => session.last_seen_alive = Instant::now(),
                    Some(Err(e)) => {
                        tracing::debug!(viewer = %session.id(), error = %e, "Viewer socket error");
                        break;
                    }
                }
            }

            Some(message) = queue.recv() => {
                if send(&mut sender, message).await.is_err() {
                    tracing::debug!(viewer = %session.id(), "Failed to send, viewer gone");
                    break;
                }
            }

            _ = ping.tick() => {
                if session.last_seen_alive.elapsed() > config.idle_timeout {
                    tracing::info!(viewer = %session.id(), "Viewer idle, disconnecting");
                    break;
                }
                if sender.send(Message::Text(PING.to_string())).await.is_err()
                    || sender.send(Message::Ping(Vec::new())).await.is_err()
                {
                    break;
                }
            }
        }
    }

    if let Err(e) = session.relay.unsubscribe(session.id()).await {
        tracing::debug!(viewer = %session.id(), error = %e, "Relay already gone");
    }
    let _ = sender.send(Message::Close(None)).await;

    tracing::info!(
        device = %session.relay.serial(),
        viewer = %session.id(),
        format = session.format.map(|f| f.as_str()).unwrap_or("none"),
        "Viewer disconnected"
    );
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, message: ViewerMessage) -> Result<(), axum::Error> {
    let message = match message {
        // axum 0.7 binary messages own a Vec, so each viewer pays one copy
        ViewerMessage::Frame(payload) => Message::Binary(payload.to_vec()),
        ViewerMessage::Start(info) => match start_message(&info) {
            Ok(text) => Message::Text(text),
            Err(e) => {
                tracing::error!(error = %e, "Could not encode start message");
                return Ok(());
            }
        },
        ViewerMessage::Error(message) => Message::Text(error_message(&message)),
    };
    sender.send(message).await
}
