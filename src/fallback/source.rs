//! Fallback session: one grabber connection per device

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::LengthDelimitedCodecError;

use super::banner::{image_framer, read_banner, Banner, ImageFramer};
use super::config::FallbackConfig;
use super::grabber::{grabber_args, parse_display_size, wait_ready, GrabberKind, Projection};
use crate::bridge::{DeviceBridge, ShellProcess};
use crate::error::{Error, GrabberError, Result};
use crate::net::{connect_with_retry, loopback, not_listening, reserve_local_port};
use crate::relay::source::{SourceEvent, StreamSource};

/// Degraded JPEG source for one device
pub struct FallbackSource {
    serial: String,
    config: FallbackConfig,
    bridge: Arc<dyn DeviceBridge>,
    /// Launched grabber, kept until stop even if it never became ready
    process: Option<(GrabberKind, ShellProcess)>,
    forward_port: Option<u16>,
    reader: Option<JoinHandle<()>>,
    active: Option<GrabberKind>,
}

impl FallbackSource {
    pub fn new(serial: impl Into<String>, config: FallbackConfig, bridge: Arc<dyn DeviceBridge>) -> Self {
        Self {
            serial: serial.into(),
            config,
            bridge,
            process: None,
            forward_port: None,
            reader: None,
            active: None,
        }
    }

    /// Grabber currently serving frames
    pub fn active_grabber(&self) -> Option<GrabberKind> {
        self.active
    }

    async fn projection(&self) -> Result<Projection> {
        let output = self.bridge.shell(&self.serial, "wm size").await?;
        let (real_width, real_height) = parse_display_size(&output)?;
        let (virtual_width, virtual_height) =
            self.config.projection_size.unwrap_or((real_width, real_height));
        Ok(Projection {
            real_width,
            real_height,
            virtual_width,
            virtual_height,
            rotation: self.config.rotation,
        })
    }

    async fn try_grabber(
        &mut self,
        kind: GrabberKind,
        projection: &Projection,
    ) -> Result<(Banner, mpsc::Receiver<SourceEvent>)> {
        let serial = self.serial.clone();
        let args = grabber_args(projection, self.config.quality, self.config.frame_rate);
        let command = kind.command(&args);

        tracing::debug!(device = %serial, grabber = kind.name(), command = %command, "Launching grabber");
        let process = self.bridge.spawn_shell(&serial, &command).await?;
        let (_, process) = self.process.insert((kind, process));
        wait_ready(process, kind, self.config.ready_timeout).await?;

        let port = match self.config.local_port {
            Some(port) => port,
            None => reserve_local_port().await?,
        };
        let remote = format!("localabstract:{}", self.config.socket_name);
        self.bridge.forward(&serial, port, &remote).await?;
        self.forward_port = Some(port);

        let mut stream = connect_with_retry(
            loopback(port),
            self.config.connect_attempts,
            self.config.connect_delay,
            not_listening,
        )
        .await?;

        let banner = tokio::time::timeout(self.config.banner_timeout, read_banner(&mut stream))
            .await
            .map_err(|_| Error::Timeout("grabber banner"))??;

        tracing::info!(
            device = %serial,
            grabber = kind.name(),
            width = banner.virtual_width,
            height = banner.virtual_height,
            orientation = banner.orientation,
            "Fallback session started"
        );

        let (tx, rx) = mpsc::channel(self.config.event_capacity);
        let framer = image_framer(stream, self.config.max_frame_size);
        self.reader = Some(tokio::spawn(read_images(
            serial,
            framer,
            self.config.max_frame_size,
            tx,
        )));
        self.active = Some(kind);

        Ok((banner, rx))
    }
}

#[async_trait]
impl StreamSource for FallbackSource {
    type Info = Banner;

    async fn start(&mut self) -> Result<(Banner, mpsc::Receiver<SourceEvent>)> {
        let projection = self.projection().await?;
        let mut attempted = Vec::new();

        for kind in self.config.grabbers.clone() {
            attempted.push(kind.name());
            match self.try_grabber(kind, &projection).await {
                Ok(started) => return Ok(started),
                Err(e) => {
                    tracing::warn!(
                        device = %self.serial,
                        grabber = kind.name(),
                        error = %e,
                        "Grabber failed, trying next"
                    );
                    self.stop().await;
                }
            }
        }

        Err(GrabberError::Exhausted {
            attempted: attempted.join(", "),
        }
        .into())
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

        if let Some((kind, mut process)) = self.process.take() {
            process.kill().await;
            // Killing the local shell does not always reach the device side
            if let Err(e) = self.bridge.shell(&self.serial, kind.kill_command()).await {
                tracing::debug!(device = %self.serial, grabber = kind.name(), error = %e, "Remote kill failed");
            }
        }

        if let Some(kind) = self.active.take() {
            tracing::info!(device = %self.serial, grabber = kind.name(), "Fallback session stopped");
        }
    }
}

async fn read_images(
    serial: String,
    mut framer: ImageFramer<TcpStream>,
    max_frame_size: usize,
    tx: mpsc::Sender<SourceEvent>,
) {
    let reason = loop {
        match framer.next().await {
            Some(Ok(image)) => {
                if tx.send(SourceEvent::Data(image.freeze())).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                let is_oversized = e
                    .get_ref()
                    .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
                let err: Error = if is_oversized {
                    GrabberError::FrameTooLarge(max_frame_size).into()
                } else {
                    e.into()
                };
                break Some(err.to_string());
            }
            None => break None,
        }
    };

    match &reason {
        Some(e) => tracing::warn!(device = %serial, error = %e, "Fallback stream failed"),
        None => tracing::info!(device = %serial, "Fallback stream ended"),
    }
    let _ = tx.send(SourceEvent::Ended(reason)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::bridge::testing::MockBridge;
    use crate::fallback::banner::{encode_banner, encode_frame, Quirks};

    const JPEG_A: &[u8] = &[0xFF, 0xD8, 0x01, 0xFF, 0xD9];
    const JPEG_B: &[u8] = &[0xFF, 0xD8, 0x02, 0xFF, 0xD9];

    fn banner() -> Banner {
        Banner {
            version: 1,
            pid: 77,
            real_width: 1080,
            real_height: 2400,
            virtual_width: 1080,
            virtual_height: 2400,
            orientation: 0,
            quirks: Quirks {
                dumb: false,
                always_upright: false,
                tear: true,
            },
        }
    }

    async fn fake_grabber(payload: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&payload).await.unwrap();
        });
        port
    }

    /// Only the apk build ever becomes ready
    fn apk_only_bridge() -> Arc<MockBridge> {
        Arc::new(
            MockBridge::new(|command| {
                if command.contains("minicap.apk") {
                    ShellProcess::scripted(vec!["PID: 4242"], true)
                } else {
                    ShellProcess::scripted(vec!["INFO: loading"], true)
                }
            })
            .with_shell_output("wm size", "Physical size: 1080x2400\n"),
        )
    }

    fn test_config(port: u16) -> FallbackConfig {
        FallbackConfig::default()
            .local_port(port)
            .ready_timeout(Duration::from_millis(100))
            .connect_retry(3, Duration::from_millis(10))
            .banner_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_falls_through_to_next_grabber() {
        let mut payload = encode_banner(&banner());
        payload.extend_from_slice(&encode_frame(JPEG_A));
        payload.extend_from_slice(&encode_frame(JPEG_B));
        let port = fake_grabber(payload).await;

        let bridge = apk_only_bridge();
        let mut source = FallbackSource::new("dev1", test_config(port), bridge.clone());

        let (info, mut events) = source.start().await.unwrap();
        assert_eq!(info, banner());
        assert_eq!(source.active_grabber(), Some(GrabberKind::MinicapApk));

        // Exactly one launch per grabber tried
        let spawns = bridge.calls_starting_with("spawn");
        assert_eq!(spawns.len(), 2);
        assert!(spawns[0].contains("/minicap -P 1080x2400@1080x2400/0 -Q 80 -S"));
        assert!(spawns[1].contains("minicap.apk"));
        // The first grabber never got as far as a forward
        assert_eq!(bridge.calls_starting_with("forward").len(), 1);

        assert_eq!(events.recv().await.unwrap(), SourceEvent::Data(Bytes::from_static(JPEG_A)));
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Data(Bytes::from_static(JPEG_B)));
        assert_eq!(events.recv().await.unwrap(), SourceEvent::Ended(None));

        source.stop().await;
        assert_eq!(bridge.calls_starting_with("remove_forward").len(), 1);
        assert_eq!(source.active_grabber(), None);
    }

    #[tokio::test]
    async fn test_stop_kills_grabber_on_device() {
        let mut payload = encode_banner(&banner());
        payload.extend_from_slice(&encode_frame(JPEG_A));
        let port = fake_grabber(payload).await;

        let bridge = apk_only_bridge();
        let mut source = FallbackSource::new("dev1", test_config(port), bridge.clone());
        source.start().await.unwrap();

        // The native grabber that never became ready was killed on fallthrough
        let kills = bridge.calls_starting_with("shell dev1 pkill");
        assert_eq!(
            kills,
            vec![format!("shell dev1 {}", GrabberKind::Minicap.kill_command())]
        );

        source.stop().await;
        let kills = bridge.calls_starting_with("shell dev1 pkill");
        assert_eq!(kills.len(), 2);
        assert_eq!(
            kills[1],
            format!("shell dev1 {}", GrabberKind::MinicapApk.kill_command())
        );

        // Stop is idempotent and kills only once
        source.stop().await;
        assert_eq!(bridge.calls_starting_with("shell dev1 pkill").len(), 2);
    }

    #[tokio::test]
    async fn test_all_grabbers_exhausted() {
        let bridge = Arc::new(
            MockBridge::new(|_| ShellProcess::scripted(vec![], false))
                .with_shell_output("wm size", "Physical size: 720x1280"),
        );
        let mut source = FallbackSource::new("dev1", test_config(1), bridge.clone());

        match source.start().await {
            Err(Error::Grabber(GrabberError::Exhausted { attempted })) => {
                assert_eq!(attempted, "minicap, minicap-apk")
            }
            other => panic!("unexpected result: {:?}", other.map(|(b, _)| b)),
        }
        assert_eq!(bridge.calls_starting_with("spawn").len(), 2);
        assert!(bridge.calls_starting_with("forward").is_empty());
    }

    #[tokio::test]
    async fn test_preferred_grabber_first() {
        let mut payload = encode_banner(&banner());
        payload.extend_from_slice(&encode_frame(JPEG_A));
        let port = fake_grabber(payload).await;

        let bridge = apk_only_bridge();
        let config = test_config(port).prefer(GrabberKind::MinicapApk);
        let mut source = FallbackSource::new("dev1", config, bridge.clone());

        source.start().await.unwrap();
        assert_eq!(bridge.calls_starting_with("spawn").len(), 1);
        source.stop().await;
    }

    #[tokio::test]
    async fn test_projection_override() {
        let mut payload = encode_banner(&banner());
        payload.extend_from_slice(&encode_frame(JPEG_A));
        let port = fake_grabber(payload).await;

        let bridge = apk_only_bridge();
        let config = test_config(port)
            .prefer(GrabberKind::MinicapApk)
            .projection_size(540, 1200)
            .quality(60)
            .frame_rate(10);
        let mut source = FallbackSource::new("dev1", config, bridge.clone());

        source.start().await.unwrap();
        let spawns = bridge.calls_starting_with("spawn");
        assert!(spawns[0].ends_with("-P 1080x2400@540x1200/0 -Q 60 -r 10 -S"));
        source.stop().await;
    }

    #[tokio::test]
    async fn test_display_size_failure() {
        let bridge = Arc::new(MockBridge::new(|_| ShellProcess::scripted(vec![], false)));
        let mut source = FallbackSource::new("dev1", test_config(1), bridge.clone());

        assert!(matches!(
            source.start().await,
            Err(Error::Grabber(GrabberError::DisplaySize(_)))
        ));
        assert!(bridge.calls_starting_with("spawn").is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_stream() {
        let mut payload = encode_banner(&banner());
        payload.extend_from_slice(&encode_frame(&[0xAB; 64]));
        let port = fake_grabber(payload).await;

        let bridge = apk_only_bridge();
        let mut config = test_config(port).prefer(GrabberKind::MinicapApk);
        config.max_frame_size = 16;
        let mut source = FallbackSource::new("dev1", config, bridge);

        let (_, mut events) = source.start().await.unwrap();
        match events.recv().await.unwrap() {
            SourceEvent::Ended(Some(reason)) => assert!(reason.contains("16 byte limit")),
            other => panic!("unexpected event: {:?}", other),
        }
        source.stop().await;
    }
}
