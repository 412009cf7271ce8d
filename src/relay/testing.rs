//! Scriptable sources for relay tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::registry::SourceFactory;
use super::source::{SourceEvent, StreamSource};
use crate::capture::DeviceInfo;
use crate::error::{Error, Result};
use crate::fallback::{Banner, Quirks};

/// Shared view into a [`MockSource`]
#[derive(Default)]
pub struct MockControl {
    starts: AtomicUsize,
    stops: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<SourceEvent>>>,
    fail_with: Mutex<Option<String>>,
    start_delay: Mutex<Duration>,
}

impl MockControl {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make every following start fail with `message`
    pub fn fail_starts(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    /// Push a payload out of the running source
    pub async fn emit(&self, payload: &[u8]) {
        let tx = self.sender.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(SourceEvent::Data(Bytes::copy_from_slice(payload))).await;
        }
    }

    /// End the running stream
    pub async fn end(&self, reason: Option<&str>) {
        let tx = self.sender.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(SourceEvent::Ended(reason.map(String::from))).await;
        }
    }
}

pub struct MockSource<I> {
    info: I,
    control: Arc<MockControl>,
}

impl<I> MockSource<I> {
    pub fn new(info: I) -> (Self, Arc<MockControl>) {
        let control = Arc::new(MockControl::default());
        (
            Self {
                info,
                control: control.clone(),
            },
            control,
        )
    }
}

#[async_trait]
impl<I: Clone + Send + Sync + 'static> StreamSource for MockSource<I> {
    type Info = I;

    async fn start(&mut self) -> Result<(I, mpsc::Receiver<SourceEvent>)> {
        self.control.starts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.control.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.control.fail_with.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(Error::Bridge(message));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.control.sender.lock().unwrap() = Some(tx);
        Ok((self.info.clone(), rx))
    }

    async fn stop(&mut self) {
        self.control.stops.fetch_add(1, Ordering::SeqCst);
        self.control.sender.lock().unwrap().take();
    }
}

/// Mock sources per device, with their controls kept for inspection
#[derive(Default)]
pub struct MockFactory {
    primary: Mutex<HashMap<String, Arc<MockControl>>>,
    fallback: Mutex<HashMap<String, Arc<MockControl>>>,
    fallback_error: Option<String>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every fallback source fails to start with `message`
    pub fn failing_fallback(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fallback_error: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn primary_control(&self, serial: &str) -> Option<Arc<MockControl>> {
        self.primary.lock().unwrap().get(serial).cloned()
    }

    pub fn fallback_control(&self, serial: &str) -> Option<Arc<MockControl>> {
        self.fallback.lock().unwrap().get(serial).cloned()
    }
}

impl SourceFactory for Arc<MockFactory> {
    type Primary = MockSource<DeviceInfo>;
    type Fallback = MockSource<Banner>;

    fn primary(&self, serial: &str) -> Self::Primary {
        let (source, control) = MockSource::new(device_info());
        self.primary.lock().unwrap().insert(serial.to_string(), control);
        source
    }

    fn fallback(&self, serial: &str) -> Self::Fallback {
        let (source, control) = MockSource::new(banner());
        if let Some(message) = &self.fallback_error {
            control.fail_starts(message);
        }
        self.fallback.lock().unwrap().insert(serial.to_string(), control);
        source
    }
}

pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        name: "Pixel".to_string(),
        codec_id: 0x6832_3634,
        width: 720,
        height: 1280,
    }
}

pub fn banner() -> Banner {
    Banner {
        version: 1,
        pid: 1,
        real_width: 720,
        real_height: 1280,
        virtual_width: 360,
        virtual_height: 640,
        orientation: 0,
        quirks: Quirks::default(),
    }
}
