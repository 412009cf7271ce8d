//! Device serial -> relay lookup
//!
//! Relays are spawned on first use and live until shut down. Each device
//! gets its own actor, cache and sources, so nothing is shared between
//! devices.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::device::{RelayConfig, RelayHandle, RelayStats};
use super::source::StreamSource;
use crate::bridge::DeviceBridge;
use crate::capture::{CaptureClient, CaptureConfig, DeviceInfo};
use crate::fallback::{Banner, FallbackConfig, FallbackSource};

/// Builds the two sources of a device relay
pub trait SourceFactory: Send + Sync + 'static {
    type Primary: StreamSource<Info = DeviceInfo>;
    type Fallback: StreamSource<Info = Banner>;

    fn primary(&self, serial: &str) -> Self::Primary;

    fn fallback(&self, serial: &str) -> Self::Fallback;
}

/// Capture server and grabber sessions over a device bridge
pub struct BridgeSourceFactory {
    bridge: Arc<dyn DeviceBridge>,
    capture: CaptureConfig,
    fallback: FallbackConfig,
}

impl BridgeSourceFactory {
    pub fn new(bridge: Arc<dyn DeviceBridge>, capture: CaptureConfig, fallback: FallbackConfig) -> Self {
        Self {
            bridge,
            capture,
            fallback,
        }
    }
}

impl SourceFactory for BridgeSourceFactory {
    type Primary = CaptureClient;
    type Fallback = FallbackSource;

    fn primary(&self, serial: &str) -> CaptureClient {
        CaptureClient::new(serial, self.capture.clone(), self.bridge.clone())
    }

    fn fallback(&self, serial: &str) -> FallbackSource {
        FallbackSource::new(serial, self.fallback.clone(), self.bridge.clone())
    }
}

type SpawnFn = Box<dyn Fn(&str) -> RelayHandle + Send + Sync>;

/// All device relays of this process
pub struct RelayRegistry {
    relays: RwLock<HashMap<String, RelayHandle>>,
    spawn: SpawnFn,
}

impl RelayRegistry {
    pub fn new<F: SourceFactory>(factory: F, config: RelayConfig) -> Self {
        let factory = Arc::new(factory);
        Self {
            relays: RwLock::new(HashMap::new()),
            spawn: Box::new(move |serial| {
                RelayHandle::spawn(
                    serial,
                    factory.primary(serial),
                    factory.fallback(serial),
                    &config,
                )
            }),
        }
    }

    /// Relay for `serial`, spawning it if needed
    pub async fn get_or_spawn(&self, serial: &str) -> RelayHandle {
        {
            let relays = self.relays.read().await;
            if let Some(handle) = relays.get(serial) {
                if !handle.is_closed() {
                    return handle.clone();
                }
            }
        }

        let mut relays = self.relays.write().await;
        // Another caller may have spawned it while we waited for the lock
        if let Some(handle) = relays.get(serial) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        tracing::info!(device = %serial, "Spawning relay");
        let handle = (self.spawn)(serial);
        relays.insert(serial.to_string(), handle.clone());
        handle
    }

    /// Existing relay for `serial`
    pub async fn get(&self, serial: &str) -> Option<RelayHandle> {
        self.relays.read().await.get(serial).cloned()
    }

    /// Serials with a relay
    pub async fn serials(&self) -> Vec<String> {
        let mut serials: Vec<_> = self.relays.read().await.keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Stats of every running relay, sorted by serial
    pub async fn stats(&self) -> Vec<RelayStats> {
        let handles: Vec<_> = self.relays.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(s) = handle.stats().await {
                stats.push(s);
            }
        }
        stats.sort_by(|a, b| a.serial.cmp(&b.serial));
        stats
    }

    /// Shut down and forget the relay for `serial`
    pub async fn remove(&self, serial: &str) -> bool {
        let handle = self.relays.write().await.remove(serial);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Shut down every relay
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.relays.write().await.drain().map(|(_, h)| h).collect();
        tracing::info!(relays = handles.len(), "Shutting down relays");
        futures::future::join_all(handles.iter().map(|h| h.shutdown())).await;
    }
}
