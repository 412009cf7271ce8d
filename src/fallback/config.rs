//! Fallback session configuration

use std::time::Duration;

use super::grabber::GrabberKind;

/// Fallback session configuration
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Grabbers to try, in order
    pub grabbers: Vec<GrabberKind>,

    /// JPEG quality (0-100)
    pub quality: u8,

    /// Fixed frame rate (`None` lets the grabber decide)
    pub frame_rate: Option<u32>,

    /// Requested rotation in degrees
    pub rotation: u32,

    /// Output size (`None` uses the display size)
    pub projection_size: Option<(u32, u32)>,

    /// Abstract socket the grabber listens on
    pub socket_name: String,

    /// Fixed local port for the forward (`None` picks a free one)
    pub local_port: Option<u16>,

    /// Grabber must announce itself within this time
    pub ready_timeout: Duration,

    /// Connection attempts against the forwarded port
    pub connect_attempts: u32,

    /// First retry delay; doubles per attempt
    pub connect_delay: Duration,

    /// Banner must arrive within this time
    pub banner_timeout: Duration,

    /// Largest accepted image
    pub max_frame_size: usize,

    /// Images buffered between the reader task and the relay
    pub event_capacity: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            grabbers: GrabberKind::DEFAULT_ORDER.to_vec(),
            quality: 80,
            frame_rate: None,
            rotation: 0,
            projection_size: None,
            socket_name: "minicap".to_string(),
            local_port: None,
            ready_timeout: Duration::from_secs(10),
            connect_attempts: 5,
            connect_delay: Duration::from_millis(100),
            banner_timeout: Duration::from_secs(5),
            max_frame_size: 16 * 1024 * 1024, // 16MB
            event_capacity: 64,
        }
    }
}

impl FallbackConfig {
    /// Try `kind` first, then the remaining defaults in their usual order
    pub fn prefer(mut self, kind: GrabberKind) -> Self {
        self.grabbers = std::iter::once(kind)
            .chain(GrabberKind::DEFAULT_ORDER.into_iter().filter(|k| *k != kind))
            .collect();
        self
    }

    /// Replace the attempt order entirely
    pub fn grabbers(mut self, grabbers: Vec<GrabberKind>) -> Self {
        self.grabbers = grabbers;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn rotation(mut self, degrees: u32) -> Self {
        self.rotation = degrees % 360;
        self
    }

    pub fn projection_size(mut self, width: u32, height: u32) -> Self {
        self.projection_size = Some((width, height));
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set connection attempts and the initial back-off
    pub fn connect_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_delay = delay;
        self
    }

    pub fn banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }
}
