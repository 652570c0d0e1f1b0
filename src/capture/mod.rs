//! Frame capture sources.
//!
//! A capture source hands raw frames to exactly one camera worker. Sources
//! may be unavailable or mid-reconnect at any time; `read` failures are
//! recoverable and the worker backs off instead of treating them as fatal.
//!
//! Provided sources:
//! - `SyntheticSource`: deterministic frames with a moving block, plus
//!   scriptable open/read failures (tests, demos)
//! - `RtspSource` (feature `rtsp-gstreamer`): GStreamer appsink decode

mod synthetic;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;

pub use synthetic::SyntheticSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;

use anyhow::Result;

use crate::frame::Frame;

/// Where a camera's frames come from.
///
/// A bare integer selects a local device index; anything else is treated as
/// a stream URI (`rtsp://...`) or a synthetic descriptor (`synthetic://...`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Device(u32),
    Uri(String),
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u32>() {
            Ok(index) => SourceSpec::Device(index),
            Err(_) => SourceSpec::Uri(trimmed.to_string()),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, SourceSpec::Uri(uri) if uri.starts_with("synthetic://"))
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "device:{}", index),
            SourceSpec::Uri(uri) => write!(f, "{}", uri),
        }
    }
}

/// One camera's frame supply.
///
/// `read` must not block indefinitely: implementations use bounded waits so
/// the owning worker can observe its stop flag between cycles.
pub trait CaptureSource: Send {
    /// Open (or reopen) the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Read the next frame. Errors are recoverable; the caller backs off.
    fn read(&mut self) -> Result<Frame>;

    /// Release the capture resource. Called before the worker loop exits.
    fn close(&mut self);
}

/// Build a source for a spec.
///
/// Device indices and non-synthetic URIs need a real decode backend; without
/// the `rtsp-gstreamer` feature only synthetic descriptors are available.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn CaptureSource>> {
    if spec.is_synthetic() {
        return Ok(Box::new(SyntheticSource::from_spec(spec)));
    }
    match spec {
        SourceSpec::Uri(_uri) => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                return Ok(Box::new(RtspSource::new(_uri.clone())?));
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            anyhow::bail!(
                "stream capture requires the rtsp-gstreamer feature (source: {})",
                spec
            )
        }
        SourceSpec::Device(index) => {
            anyhow::bail!("local device capture is not built in (device index {})", index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_source_is_device_index() {
        assert_eq!(SourceSpec::parse("0"), SourceSpec::Device(0));
        assert_eq!(SourceSpec::parse(" 3 "), SourceSpec::Device(3));
    }

    #[test]
    fn non_numeric_source_is_uri() {
        assert_eq!(
            SourceSpec::parse("rtsp://cam.local/stream"),
            SourceSpec::Uri("rtsp://cam.local/stream".to_string())
        );
    }

    #[test]
    fn synthetic_descriptor_is_recognized() {
        assert!(SourceSpec::parse("synthetic://lobby").is_synthetic());
        assert!(!SourceSpec::parse("rtsp://cam.local/stream").is_synthetic());
    }
}
