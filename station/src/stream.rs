//! Stream controller: owns the single live camera source.
//!
//! The controller is pure bookkeeping. It decides which source URL is
//! attached and which reader events still count; the engine does the actual
//! spawning, cancelling and timer scheduling.
//!
//! Every attach bumps an attachment generation. Reader events carry the
//! generation they were started with, so a late frame or error from a
//! detached reader is ignored instead of reviving a stopped session.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use station_shared::remote::device_base_url;
use station_shared::ResourceError;
use tokio::time::Instant;

use crate::error::StationError;

/// Raw JPEG frames from a camera source.
pub type FrameStream = BoxStream<'static, Result<Bytes, ResourceError>>;

/// Opens a live frame stream for a URL.
pub trait FrameSource: Send + Sync + 'static {
    fn open(&self, url: &str) -> FrameStream;
}

/// One decoded-enough frame: the JPEG plus its natural dimensions.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Read the dimensions from the JPEG header. Unreadable headers give 0x0.
    pub fn from_jpeg(jpeg: Bytes) -> Self {
        let (width, height) = image::ImageReader::new(Cursor::new(jpeg.as_ref()))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .unwrap_or((0, 0));
        Self {
            jpeg,
            width,
            height,
        }
    }

    /// False when the header could not be read.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Build a stream URL that defeats caching of the live feed.
pub fn cache_busted_url(camera: &str) -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "{}/stream?t={}&r={}",
        device_base_url(camera),
        chrono::Utc::now().timestamp_millis(),
        token
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Sensor lost the object and the grace period ran out
    ObjectLeft,
    /// Session hit the maximum duration
    Timeout,
    /// Scheduled stop after a sort command
    Sorted,
    Operator,
    MonitoringStopped,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::ObjectLeft => "object left",
            StopReason::Timeout => "timeout",
            StopReason::Sorted => "sorted",
            StopReason::Operator => "operator",
            StopReason::MonitoringStopped => "monitoring stopped",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One start-to-stop streaming session. Reconnects keep the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSession {
    pub id: u64,
    pub started_at: Instant,
}

impl StreamSession {
    /// Whole seconds since the session started.
    pub fn duration_seconds(&self, now: Instant) -> u64 {
        now.duration_since(self.started_at).as_secs()
    }
}

/// What the frame slot currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSlot {
    Empty,
    /// Blank stand-in between a stop and the final release
    Placeholder,
    Live { url: String, generation: u64 },
}

/// Owns the single live video source.
///
/// Every attach bumps a generation counter. Frames and failures from the
/// reader carry the generation they were started with, so events from a
/// replaced source are dropped.
#[derive(Debug)]
pub struct StreamController {
    session: Option<StreamSession>,
    slot: FrameSlot,
    next_session_id: u64,
    generation: u64,
    latest: Option<Frame>,
    frames_received: u64,
    reconnects: u64,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    /// No session and an empty slot.
    pub fn new() -> Self {
        Self {
            session: None,
            slot: FrameSlot::Empty,
            next_session_id: 1,
            generation: 0,
            latest: None,
            frames_received: 0,
            reconnects: 0,
        }
    }

    /// True from `begin` until `end`, including while reconnecting.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    /// Frames accepted across all sessions.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Open a new session. The source is cleared and attached later.
    pub fn begin(&mut self, camera: Option<&str>, now: Instant) -> Result<u64, StationError> {
        if camera.map(str::trim).unwrap_or("").is_empty() {
            return Err(StationError::NoCameraConfigured);
        }
        if self.session.is_some() {
            return Err(StationError::AlreadyStreaming);
        }

        self.generation += 1;
        self.slot = FrameSlot::Empty;
        self.latest = None;

        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session = Some(StreamSession {
            id,
            started_at: now,
        });
        Ok(id)
    }

    /// Attach a fresh cache-busted source. Returns the generation and URL
    /// the reader should be started with, or `None` if the session is gone.
    pub fn attach(&mut self, camera: &str) -> Option<(u64, String)> {
        self.session?;
        self.generation += 1;
        self.latest = None;
        let url = cache_busted_url(camera);
        self.slot = FrameSlot::Live {
            url: url.clone(),
            generation: self.generation,
        };
        Some((self.generation, url))
    }

    /// Reattach after an error, if the session is still nominally active.
    pub fn reconnect(&mut self, camera: &str) -> Option<(u64, String)> {
        let attached = self.attach(camera)?;
        self.reconnects += 1;
        Some(attached)
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.slot, FrameSlot::Live { generation: g, .. } if g == generation)
    }

    /// Record a frame from the reader. Stale frames return false.
    pub fn on_frame(&mut self, generation: u64, frame: Frame) -> bool {
        if self.session.is_none() || !self.is_current(generation) {
            return false;
        }
        self.frames_received += 1;
        self.latest = Some(frame);
        true
    }

    /// Record a reader failure. Returns true when a reconnect should be
    /// scheduled.
    pub fn on_failure(&mut self, generation: u64) -> bool {
        if self.session.is_none() || !self.is_current(generation) {
            return false;
        }
        self.latest = None;
        true
    }

    /// The frame detection may sample: attached, loaded and sized.
    pub fn current_frame(&self) -> Option<&Frame> {
        match self.slot {
            FrameSlot::Live { .. } => self.latest.as_ref(),
            _ => None,
        }
    }

    /// Detach the source and end the session. Stopping with no session is a
    /// no-op and returns `None`.
    pub fn end(&mut self) -> Option<StreamSession> {
        let session = self.session.take()?;
        // Detach first so late reader events no longer match
        self.generation += 1;
        self.slot = FrameSlot::Placeholder;
        self.latest = None;
        Some(session)
    }

    /// Clear the placeholder once the stop has settled.
    pub fn release(&mut self) {
        if self.slot == FrameSlot::Placeholder {
            self.slot = FrameSlot::Empty;
        }
    }

    /// True once the session has run for at least `limit`.
    pub fn timed_out(&self, now: Instant, limit: Duration) -> bool {
        self.session
            .map(|s| now.duration_since(s.started_at) >= limit)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{GrayImage, ImageBuffer};

    fn tiny_jpeg(width: u32, height: u32) -> Bytes {
        let img: GrayImage = ImageBuffer::from_pixel(width, height, image::Luma([128u8]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&img)
            .unwrap();
        Bytes::from(out)
    }

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::from_jpeg(tiny_jpeg(16, 8));
        assert_eq!((frame.width, frame.height), (16, 8));
        assert!(frame.has_dimensions());

        let broken = Frame::from_jpeg(Bytes::from_static(&[0xFF, 0xD8, 0x00]));
        assert!(!broken.has_dimensions());
    }

    #[test]
    fn test_cache_busted_urls_differ() {
        let a = cache_busted_url("192.168.1.40");
        let b = cache_busted_url("192.168.1.40");
        assert!(a.starts_with("http://192.168.1.40/stream?t="));
        assert!(a.contains("&r="));
        assert_ne!(a, b);
    }

    #[test]
    fn test_begin_requires_camera() {
        let mut stream = StreamController::new();
        let now = Instant::now();
        assert!(matches!(
            stream.begin(None, now),
            Err(StationError::NoCameraConfigured)
        ));
        assert!(matches!(
            stream.begin(Some(" "), now),
            Err(StationError::NoCameraConfigured)
        ));
        assert!(!stream.is_active());
    }

    #[test]
    fn test_single_session() {
        let mut stream = StreamController::new();
        let now = Instant::now();
        let id = stream.begin(Some("cam"), now).unwrap();
        let err = stream.begin(Some("cam"), now).unwrap_err();
        assert!(err.is_benign());
        assert_eq!(stream.session().unwrap().id, id);
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let mut stream = StreamController::new();
        assert!(stream.end().is_none());
        assert_eq!(&stream.slot, &FrameSlot::Empty);
    }

    #[test]
    fn test_stale_events_ignored_after_reattach() {
        let mut stream = StreamController::new();
        stream.begin(Some("cam"), Instant::now()).unwrap();
        let (first, _) = stream.attach("cam").unwrap();
        let (second, _) = stream.reconnect("cam").unwrap();
        assert_ne!(first, second);
        assert_eq!(stream.reconnects(), 1);

        assert!(!stream.on_frame(first, Frame::from_jpeg(tiny_jpeg(4, 4))));
        assert!(!stream.on_failure(first));
        assert!(stream.on_frame(second, Frame::from_jpeg(tiny_jpeg(4, 4))));
        assert!(stream.current_frame().is_some());
    }

    #[test]
    fn test_end_detaches_and_releases() {
        let mut stream = StreamController::new();
        stream.begin(Some("cam"), Instant::now()).unwrap();
        let (generation, _) = stream.attach("cam").unwrap();
        stream.on_frame(generation, Frame::from_jpeg(tiny_jpeg(4, 4)));

        assert!(stream.end().is_some());
        assert_eq!(&stream.slot, &FrameSlot::Placeholder);
        assert!(stream.current_frame().is_none());
        assert!(!stream.on_failure(generation));
        assert!(stream.attach("cam").is_none());

        stream.release();
        assert_eq!(&stream.slot, &FrameSlot::Empty);
    }

    #[test]
    fn test_timeout_boundary() {
        let mut stream = StreamController::new();
        let start = Instant::now();
        stream.begin(Some("cam"), start).unwrap();
        let limit = Duration::from_secs(30);
        assert!(!stream.timed_out(start + Duration::from_millis(29_999), limit));
        assert!(stream.timed_out(start + limit, limit));
        assert_eq!(
            stream
                .session()
                .unwrap()
                .duration_seconds(start + Duration::from_millis(12_500)),
            12
        );
    }
}
