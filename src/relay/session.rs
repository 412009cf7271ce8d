//! One upstream source and its subscriber set, as driven by the relay actor
//!
//! ```text
//!            subscribe (first)              start ok
//!   Idle ─────────────────────────► Starting ─────────► Live
//!    ▲                                  │                 │
//!    │   start failed / cancelled       │                 │ last unsubscribe,
//!    └──────────────────────────────────┘                 │ stream ended
//!    └────────────────────────────────────────────────────┘
//! ```
//!
//! The source is moved into a task while starting so the actor keeps serving
//! commands; the task hands it back through `outcomes`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::source::{SourceEvent, StreamSource};
use super::viewer::{Delivery, StartInfo, StreamFormat, ViewerId, ViewerMessage, ViewerSink};
use crate::error::{Error, Result};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Live,
}

/// Per-session counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub state: SessionState,
    pub viewers: usize,
    /// Start attempts
    pub starts: u64,
    /// Stops of a started (or starting) source
    pub stops: u64,
    /// Payloads relayed
    pub relayed: u64,
    /// Deliveries discarded because a viewer queue was full
    pub dropped: u64,
}

pub(crate) struct StartOutcome<S: StreamSource> {
    source: S,
    result: Result<(S::Info, mpsc::Receiver<SourceEvent>)>,
}

pub(crate) enum SessionInput<S: StreamSource> {
    Started(StartOutcome<S>),
    Event(SourceEvent),
}

struct Subscriber {
    sink: ViewerSink,
    /// Start message (and catch-up) already queued
    announced: bool,
}

pub(crate) struct Session<S: StreamSource> {
    serial: Arc<str>,
    format: StreamFormat,
    state: SessionState,
    source: Option<S>,
    start_info: Option<StartInfo>,
    events: Option<mpsc::Receiver<SourceEvent>>,
    cancel: Option<CancellationToken>,
    subscribers: HashMap<ViewerId, Subscriber>,
    outcomes_tx: mpsc::UnboundedSender<StartOutcome<S>>,
    outcomes: mpsc::UnboundedReceiver<StartOutcome<S>>,
    /// Tell subscribers when a start fails
    report_failures: bool,
    starts: u64,
    stops: u64,
    relayed: u64,
    dropped: u64,
}

impl<S> Session<S>
where
    S: StreamSource,
    S::Info: Into<StartInfo>,
{
    pub(crate) fn new(serial: Arc<str>, format: StreamFormat, source: S, report_failures: bool) -> Self {
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        Self {
            serial,
            format,
            state: SessionState::Idle,
            source: Some(source),
            start_info: None,
            events: None,
            cancel: None,
            subscribers: HashMap::new(),
            outcomes_tx,
            outcomes,
            report_failures,
            starts: 0,
            stops: 0,
            relayed: 0,
            dropped: 0,
        }
    }

    pub(crate) fn contains(&self, id: &ViewerId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            viewers: self.subscribers.len(),
            starts: self.starts,
            stops: self.stops,
            relayed: self.relayed,
            dropped: self.dropped,
        }
    }

    /// Add a viewer, starting the source if it is idle
    ///
    /// A live session announces itself to the newcomer right away, followed
    /// by `catch_up`.
    pub(crate) fn subscribe(&mut self, sink: ViewerSink, catch_up: &[Bytes]) {
        let id = sink.id();
        self.subscribers.entry(id).or_insert(Subscriber {
            sink,
            announced: false,
        });

        tracing::info!(
            device = %self.serial,
            format = %self.format,
            viewer = %id,
            viewers = self.subscribers.len(),
            "Viewer subscribed"
        );

        match self.state {
            SessionState::Live => {
                if let Some(subscriber) = self.subscribers.get_mut(&id) {
                    if !subscriber.announced {
                        announce(subscriber, self.start_info.as_ref(), catch_up);
                    }
                }
            }
            SessionState::Starting => {}
            SessionState::Idle => self.start(),
        }
    }

    /// Remove a viewer; returns `true` when this stopped a live source
    pub(crate) async fn unsubscribe(&mut self, id: &ViewerId) -> bool {
        if self.subscribers.remove(id).is_none() {
            return false;
        }

        tracing::info!(
            device = %self.serial,
            format = %self.format,
            viewer = %id,
            viewers = self.subscribers.len(),
            "Viewer unsubscribed"
        );

        if !self.subscribers.is_empty() {
            return false;
        }

        match self.state {
            SessionState::Live => {
                self.stop_live().await;
                true
            }
            SessionState::Starting => {
                if let Some(cancel) = &self.cancel {
                    tracing::debug!(device = %self.serial, format = %self.format, "Cancelling start");
                    cancel.cancel();
                }
                false
            }
            SessionState::Idle => false,
        }
    }

    fn start(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let outcomes = self.outcomes_tx.clone();

        self.cancel = Some(cancel);
        self.state = SessionState::Starting;
        self.starts += 1;

        tracing::info!(device = %self.serial, format = %self.format, "Starting source");

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                result = source.start() => result,
                _ = token.cancelled() => Err(Error::Cancelled),
            };
            if result.is_err() {
                // Release whatever a failed or interrupted start acquired
                source.stop().await;
            }
            if let Err(mpsc::error::SendError(mut outcome)) =
                outcomes.send(StartOutcome { source, result })
            {
                // Relay is gone
                if outcome.result.is_ok() {
                    outcome.source.stop().await;
                }
            }
        });
    }

    /// Handle a finished start attempt; returns `true` when the session went live
    pub(crate) async fn on_started(&mut self, outcome: StartOutcome<S>) -> bool {
        let StartOutcome { source, result } = outcome;
        self.source = Some(source);
        self.cancel = None;
        self.state = SessionState::Idle;

        match result {
            Ok((info, events)) => {
                if self.subscribers.is_empty() {
                    tracing::debug!(device = %self.serial, format = %self.format, "Started with no viewers left");
                    self.stop_source().await;
                    return false;
                }

                self.state = SessionState::Live;
                self.events = Some(events);
                let start_info: StartInfo = info.into();
                for subscriber in self.subscribers.values_mut() {
                    announce(subscriber, Some(&start_info), &[]);
                }
                self.start_info = Some(start_info);
                true
            }
            Err(Error::Cancelled) => {
                self.stops += 1;
                if !self.subscribers.is_empty() {
                    self.start();
                }
                false
            }
            Err(e) => {
                tracing::warn!(
                    device = %self.serial,
                    format = %self.format,
                    error = %e,
                    viewers = self.subscribers.len(),
                    "Source failed to start"
                );
                if self.report_failures {
                    let message = e.to_string();
                    self.deliver_all(|| ViewerMessage::Error(message.clone()), false)
                        .await;
                }
                false
            }
        }
    }

    /// Wait for a start result or a source event
    ///
    /// Pends on events while the session is not live.
    pub(crate) async fn next_input(&mut self) -> SessionInput<S> {
        let events = self.events.as_mut();
        tokio::select! {
            Some(outcome) = self.outcomes.recv() => SessionInput::Started(outcome),
            event = next_event(events) => SessionInput::Event(event),
        }
    }

    /// The live source ended on its own
    pub(crate) async fn on_ended(&mut self, reason: Option<String>) {
        tracing::info!(
            device = %self.serial,
            format = %self.format,
            reason = reason.as_deref().unwrap_or("end of stream"),
            viewers = self.subscribers.len(),
            "Source ended"
        );
        self.stop_live().await;
        // Viewers stay subscribed; a later subscribe restarts the source
        for subscriber in self.subscribers.values_mut() {
            subscriber.announced = false;
        }
    }

    /// Relay one payload to every announced viewer
    ///
    /// Returns `true` when closed viewers were pruned and that stopped the
    /// source.
    pub(crate) async fn relay(&mut self, payload: Bytes) -> bool {
        self.relayed += 1;
        self.deliver_all(|| ViewerMessage::Frame(payload.clone()), true)
            .await
    }

    async fn deliver_all(&mut self, message: impl Fn() -> ViewerMessage, announced_only: bool) -> bool {
        let mut closed = Vec::new();

        for (id, subscriber) in &self.subscribers {
            if announced_only && !subscriber.announced {
                continue;
            }
            match subscriber.sink.deliver(message()) {
                Delivery::Sent => {}
                Delivery::Dropped => {
                    self.dropped += 1;
                    tracing::warn!(device = %self.serial, viewer = %id, "Viewer queue full, dropping");
                }
                Delivery::Closed => closed.push(*id),
            }
        }

        let mut stopped = false;
        for id in closed {
            stopped |= self.unsubscribe(&id).await;
        }
        stopped
    }

    async fn stop_live(&mut self) {
        self.events = None;
        self.start_info = None;
        self.state = SessionState::Idle;
        self.stop_source().await;
    }

    async fn stop_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.stop().await;
        }
        self.stops += 1;
        tracing::info!(device = %self.serial, format = %self.format, "Source stopped");
    }

    /// Stop everything on relay shutdown
    pub(crate) async fn shutdown(&mut self) {
        self.subscribers.clear();

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            // The start task always reports back once cancelled
            if let Some(outcome) = self.outcomes.recv().await {
                self.on_started(outcome).await;
            }
        }

        if self.state == SessionState::Live {
            self.stop_live().await;
        }
    }
}

async fn next_event(events: Option<&mut mpsc::Receiver<SourceEvent>>) -> SourceEvent {
    match events {
        Some(events) => events.recv().await.unwrap_or(SourceEvent::Ended(None)),
        None => std::future::pending().await,
    }
}

fn announce(subscriber: &mut Subscriber, start_info: Option<&StartInfo>, catch_up: &[Bytes]) {
    let Some(start_info) = start_info else {
        return;
    };
    subscriber.announced = true;
    subscriber.sink.deliver(ViewerMessage::Start(start_info.clone()));
    for frame in catch_up {
        subscriber.sink.deliver(ViewerMessage::Frame(frame.clone()));
    }
}
