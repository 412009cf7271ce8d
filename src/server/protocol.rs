//! Viewer text protocol
//!
//! ```text
//! viewer -> server   on | on:h264 | on:jpeg | off
//! server -> viewer   start {"type":"h264",...}
//!                    ping
//!                    {"error":"..."}
//!                    <binary frame, relayed verbatim>
//! ```

use crate::error::Result;
use crate::relay::{StartInfo, StreamFormat};

/// Sent periodically to every viewer
pub const PING: &str = "ping";

/// Command sent by a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    /// Subscribe; plain `on` means H.264
    On(StreamFormat),
    Off,
}

impl ViewerCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "on" => Some(ViewerCommand::On(StreamFormat::H264)),
            "off" => Some(ViewerCommand::Off),
            other => {
                let format = other.strip_prefix("on:")?;
                format.parse().ok().map(ViewerCommand::On)
            }
        }
    }
}

/// `start <json>`
pub fn start_message(info: &StartInfo) -> Result<String> {
    Ok(format!("start {}", serde_json::to_string(info)?))
}

/// `{"error":"<message>"}`
pub fn error_message(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Quirks;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ViewerCommand::parse("on"), Some(ViewerCommand::On(StreamFormat::H264)));
        assert_eq!(ViewerCommand::parse("on:h264"), Some(ViewerCommand::On(StreamFormat::H264)));
        assert_eq!(ViewerCommand::parse("on:jpeg\n"), Some(ViewerCommand::On(StreamFormat::Jpeg)));
        assert_eq!(ViewerCommand::parse("off"), Some(ViewerCommand::Off));
        assert_eq!(ViewerCommand::parse("on:vp9"), None);
        assert_eq!(ViewerCommand::parse("ping"), None);
        assert_eq!(ViewerCommand::parse(""), None);
    }

    #[test]
    fn test_start_message() {
        let info = StartInfo::Jpeg {
            width: 360,
            height: 640,
            quirks: Quirks::default(),
        };
        assert_eq!(
            start_message(&info).unwrap(),
            r#"start {"type":"jpeg","width":360,"height":640,"quirks":{"dumb":false,"alwaysUpright":false,"tear":false}}"#
        );
    }

    #[test]
    fn test_error_message_escapes() {
        assert_eq!(
            error_message(r#"grabber "minicap" failed"#),
            r#"{"error":"grabber \"minicap\" failed"}"#
        );
    }
}
