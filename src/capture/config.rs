//! Capture session configuration

use std::path::PathBuf;
use std::time::Duration;

/// Fully qualified server entry point
pub const SERVER_CLASS: &str = "com.genymobile.scrcpy.Server";

/// Where the server jar is pushed on the device
pub const DEFAULT_REMOTE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

/// Server release the versioned launch line is written for
pub const DEFAULT_SERVER_VERSION: &str = "3.3.3";

/// Server release the legacy positional launch line is written for
pub const DEFAULT_LEGACY_VERSION: &str = "1.24";

/// Best-effort remote cleanup run on stop
pub const KILL_COMMAND: &str = "pkill -f com.genymobile.scrcpy.Server";

/// Which server generation is deployed
///
/// The two generations differ in launch arguments and handshake layout, and
/// nothing on the wire distinguishes them, so this is configured rather than
/// probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVariant {
    /// Positional arguments, fixed 77-byte header
    Legacy,
    /// `key=value` arguments, queued optional handshake parts
    #[default]
    Versioned,
}

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Server generation
    pub protocol: ProtocolVariant,

    /// Local server jar to deploy
    pub server_jar: PathBuf,

    /// Device path the jar is pushed to
    pub remote_path: String,

    /// Version string passed as the first server argument
    pub server_version: String,

    /// Abstract socket the server listens on
    pub socket_name: String,

    /// Fixed local port for the forward (`None` picks a free one)
    pub local_port: Option<u16>,

    /// Longest screen side in pixels (0 = native)
    pub max_size: u32,

    /// Encoder bit rate in bits per second
    pub bit_rate: u32,

    /// Frame rate cap (0 = uncapped)
    pub max_fps: u32,

    /// Server log level
    pub log_level: String,

    /// Versioned handshake: leading dummy byte
    pub send_dummy_byte: bool,

    /// Versioned handshake: 64-byte device name
    pub send_device_meta: bool,

    /// Versioned handshake: codec id, width, height
    pub send_codec_meta: bool,

    /// Wait between creating the forward and connecting
    pub settle_delay: Duration,

    /// Connection attempts against the forwarded port
    pub connect_attempts: u32,

    /// First retry delay; doubles per attempt
    pub connect_delay: Duration,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Payloads buffered between the reader task and the relay
    pub event_capacity: usize,

    /// Socket read buffer size
    pub read_buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVariant::default(),
            server_jar: PathBuf::from("scrcpy-server.jar"),
            remote_path: DEFAULT_REMOTE_PATH.to_string(),
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            socket_name: "scrcpy".to_string(),
            local_port: None,
            max_size: 0,
            bit_rate: 8_000_000,
            max_fps: 0,
            log_level: "info".to_string(),
            send_dummy_byte: true,
            send_device_meta: true,
            send_codec_meta: true,
            settle_delay: Duration::from_secs(3),
            connect_attempts: 5,
            connect_delay: Duration::from_millis(200),
            handshake_timeout: Duration::from_secs(10),
            event_capacity: 256,
            read_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl CaptureConfig {
    /// Select the server generation
    ///
    /// Also switches the version string to that generation's default.
    pub fn protocol(mut self, protocol: ProtocolVariant) -> Self {
        self.protocol = protocol;
        self.server_version = match protocol {
            ProtocolVariant::Legacy => DEFAULT_LEGACY_VERSION,
            ProtocolVariant::Versioned => DEFAULT_SERVER_VERSION,
        }
        .to_string();
        self
    }

    pub fn server_jar(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_jar = path.into();
        self
    }

    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Use a fixed local port for the forward
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn max_fps(mut self, max_fps: u32) -> Self {
        self.max_fps = max_fps;
        self
    }

    pub fn send_dummy_byte(mut self, enabled: bool) -> Self {
        self.send_dummy_byte = enabled;
        self
    }

    pub fn send_device_meta(mut self, enabled: bool) -> Self {
        self.send_device_meta = enabled;
        self
    }

    pub fn send_codec_meta(mut self, enabled: bool) -> Self {
        self.send_codec_meta = enabled;
        self
    }

    /// Set the delay before the first connection attempt
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set connection attempts and the initial back-off
    pub fn connect_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_delay = delay;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Remote shell command that launches the server
    pub fn launch_command(&self) -> String {
        let mut args = vec![
            format!("CLASSPATH={}", self.remote_path),
            "app_process".to_string(),
            "/".to_string(),
            SERVER_CLASS.to_string(),
            self.server_version.clone(),
        ];

        match self.protocol {
            ProtocolVariant::Versioned => {
                args.push("tunnel_forward=true".to_string());
                args.push(format!("max_size={}", self.max_size));
                args.push(format!("video_bit_rate={}", self.bit_rate));
                if self.max_fps > 0 {
                    args.push(format!("max_fps={}", self.max_fps));
                }
                args.push("audio=false".to_string());
                args.push("control=false".to_string());
                args.push(format!("send_device_meta={}", self.send_device_meta));
                args.push("send_frame_meta=false".to_string());
                args.push(format!("send_codec_meta={}", self.send_codec_meta));
                args.push(format!("send_dummy_byte={}", self.send_dummy_byte));
                args.push(format!("log_level={}", self.log_level));
            }
            ProtocolVariant::Legacy => {
                // Order is fixed by the server's argument parser
                args.push(self.log_level.clone());
                args.push(self.max_size.to_string());
                args.push(self.bit_rate.to_string());
                args.push(self.max_fps.to_string());
                args.extend(
                    [
                        "-1",    // lock_video_orientation
                        "true",  // tunnel_forward
                        "-",     // crop
                        "false", // send_frame_meta
                        "false", // control
                        "0",     // display_id
                        "false", // show_touches
                        "false", // stay_awake
                        "-",     // codec_options
                        "-",     // encoder_name
                        "false", // power_off_on_close
                    ]
                    .map(String::from),
                );
            }
        }

        args.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();

        assert_eq!(config.protocol, ProtocolVariant::Versioned);
        assert_eq!(config.remote_path, DEFAULT_REMOTE_PATH);
        assert_eq!(config.local_port, None);
        assert_eq!(config.settle_delay, Duration::from_secs(3));
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert!(config.send_dummy_byte && config.send_device_meta && config.send_codec_meta);
    }

    #[test]
    fn test_versioned_launch_command() {
        let config = CaptureConfig::default().max_size(800).bit_rate(4_000_000);

        assert_eq!(
            config.launch_command(),
            "CLASSPATH=/data/local/tmp/scrcpy-server.jar app_process / \
             com.genymobile.scrcpy.Server 3.3.3 tunnel_forward=true max_size=800 \
             video_bit_rate=4000000 audio=false control=false send_device_meta=true \
             send_frame_meta=false send_codec_meta=true send_dummy_byte=true log_level=info"
        );
    }

    #[test]
    fn test_versioned_flags_follow_config() {
        let command = CaptureConfig::default()
            .max_fps(30)
            .send_dummy_byte(false)
            .send_device_meta(false)
            .launch_command();

        assert!(command.contains(" max_fps=30 "));
        assert!(command.contains(" send_dummy_byte=false "));
        assert!(command.contains(" send_device_meta=false "));
        assert!(command.contains(" send_codec_meta=true "));
    }

    #[test]
    fn test_legacy_launch_command() {
        let config = CaptureConfig::default()
            .protocol(ProtocolVariant::Legacy)
            .max_size(1024)
            .bit_rate(8_000_000);

        assert_eq!(
            config.launch_command(),
            "CLASSPATH=/data/local/tmp/scrcpy-server.jar app_process / \
             com.genymobile.scrcpy.Server 1.24 info 1024 8000000 0 -1 true - false false \
             0 false false - - false"
        );
        assert!(!config.launch_command().contains("max_size="));
    }

    #[test]
    fn test_builder() {
        let config = CaptureConfig::default()
            .local_port(8099)
            .server_version("3.1")
            .connect_retry(0, Duration::from_millis(50))
            .settle_delay(Duration::ZERO);

        assert_eq!(config.local_port, Some(8099));
        assert_eq!(config.server_version, "3.1");
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.settle_delay, Duration::ZERO);
    }
}
