//! Grabber variants and their launch details

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::bridge::ShellProcess;
use crate::error::GrabberError;

/// A device-side JPEG grabber build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabberKind {
    /// Native binary with its shared library
    Minicap,
    /// Java build run through `app_process`, for devices the native one fails on
    MinicapApk,
}

impl GrabberKind {
    /// Default attempt order
    pub const DEFAULT_ORDER: [GrabberKind; 2] = [GrabberKind::Minicap, GrabberKind::MinicapApk];

    pub fn name(&self) -> &'static str {
        match self {
            GrabberKind::Minicap => "minicap",
            GrabberKind::MinicapApk => "minicap-apk",
        }
    }

    /// Remote command launching this grabber with `args`
    pub fn command(&self, args: &str) -> String {
        match self {
            GrabberKind::Minicap => format!(
                "LD_LIBRARY_PATH=/data/local/tmp/minicap-devel \
                 /data/local/tmp/minicap-devel/minicap {}",
                args
            ),
            GrabberKind::MinicapApk => format!(
                "CLASSPATH=/data/local/tmp/minicap.apk app_process /system/bin \
                 io.devicefarmer.minicap.Main {}",
                args
            ),
        }
    }
}

impl GrabberKind {
    /// Remote command ending any running instance of this grabber
    pub fn kill_command(&self) -> &'static str {
        match self {
            GrabberKind::Minicap => "pkill -f /data/local/tmp/minicap-devel/minicap",
            GrabberKind::MinicapApk => "pkill -f io.devicefarmer.minicap.Main",
        }
    }
}

impl fmt::Display for GrabberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GrabberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minicap" => Ok(GrabberKind::Minicap),
            "minicap-apk" => Ok(GrabberKind::MinicapApk),
            other => Err(format!("unknown grabber {:?}", other)),
        }
    }
}

/// Requested frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    /// Degrees, one of 0 / 90 / 180 / 270
    pub rotation: u32,
}

impl Projection {
    /// `RWxRH@VWxVH/R`
    pub fn descriptor(&self) -> String {
        format!(
            "{}x{}@{}x{}/{}",
            self.real_width, self.real_height, self.virtual_width, self.virtual_height, self.rotation
        )
    }
}

/// Grabber command line arguments
pub fn grabber_args(projection: &Projection, quality: u8, frame_rate: Option<u32>) -> String {
    let mut args = format!("-P {} -Q {}", projection.descriptor(), quality.min(100));
    if let Some(fps) = frame_rate {
        args.push_str(&format!(" -r {}", fps));
    }
    args.push_str(" -S");
    args
}

/// Screen size from `wm size` output
///
/// ```text
/// Physical size: 1080x2400
/// Override size: 720x1600
/// ```
///
/// The override size wins when present.
pub fn parse_display_size(output: &str) -> Result<(u32, u32), GrabberError> {
    let mut physical = None;
    let mut overridden = None;

    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some(size) = parse_size(value.trim()) else {
            continue;
        };
        match label.trim() {
            "Physical size" => physical = Some(size),
            "Override size" => overridden = Some(size),
            _ => {}
        }
    }

    overridden
        .or(physical)
        .ok_or_else(|| GrabberError::DisplaySize(output.trim().to_string()))
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Whether a grabber output line signals that its socket is up
pub fn is_ready_line(line: &str) -> bool {
    line.starts_with("PID:") || line.to_ascii_lowercase().contains("ready")
}

/// Wait for the grabber to announce itself
pub async fn wait_ready(
    process: &mut ShellProcess,
    kind: GrabberKind,
    timeout: Duration,
) -> Result<(), GrabberError> {
    let wait = async {
        while let Some(line) = process.next_line().await {
            tracing::debug!(grabber = kind.name(), line = %line, "Grabber output");
            if is_ready_line(&line) {
                return Ok(());
            }
        }
        Err(GrabberError::Exited(kind.name()))
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| GrabberError::NotReady(kind.name()))?
}
