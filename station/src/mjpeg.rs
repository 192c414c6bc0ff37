//! MJPEG in both directions.
//!
//! Reading: the camera serves `multipart/x-mixed-replace` JPEG frames.
//! [`MjpegParser`] cuts complete JPEGs out of the byte stream by their
//! start/end markers, ignoring part headers and boundaries, and
//! [`MjpegHttpSource`] wires it to a streaming HTTP response.
//!
//! Serving: [`MjpegBroadcaster`] fans annotated frames out to any number of
//! operator clients. Slow clients skip frames instead of buffering them.
//! Closing the broadcaster ends every client response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use station_shared::ResourceError;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::stream::{FrameSource, FrameStream};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes without a complete frame.
const MAX_PENDING: usize = 4 * 1024 * 1024;

const MJPEG_BOUNDARY: &str = "sortframe";

fn find_marker(buffer: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|pos| pos + from)
}

/// Incremental JPEG extractor for an MJPEG byte stream.
#[derive(Debug, Default)]
pub struct MjpegParser {
    buffer: Vec<u8>,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete JPEG, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, &SOI, 0) else {
            // Keep a trailing 0xFF in case the marker is split across chunks
            let keep = usize::from(self.buffer.last() == Some(&0xFF));
            let drop_to = self.buffer.len() - keep;
            self.buffer.drain(..drop_to);
            return None;
        };
        if start > 0 {
            self.buffer.drain(..start);
        }

        let Some(end) = find_marker(&self.buffer, &EOI, SOI.len()) else {
            if self.buffer.len() > MAX_PENDING {
                debug!("Dropping {} bytes of unterminated JPEG", self.buffer.len());
                self.buffer.clear();
            }
            return None;
        };

        let frame_end = end + EOI.len();
        let frame: Vec<u8> = self.buffer.drain(..frame_end).collect();
        Some(Bytes::from(frame))
    }
}

/// Live camera source read over HTTP.
#[derive(Debug, Clone)]
pub struct MjpegHttpSource {
    http: reqwest::Client,
    /// Limit on waiting for the response headers; the body itself is endless
    connect_timeout: Duration,
}

impl MjpegHttpSource {
    pub fn new(http: reqwest::Client, connect_timeout: Duration) -> Self {
        Self {
            http,
            connect_timeout,
        }
    }
}

impl FrameSource for MjpegHttpSource {
    fn open(&self, url: &str) -> FrameStream {
        let http = self.http.clone();
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async_stream::stream! {
            let request = http.get(&url).send();
            let response = match tokio::time::timeout(connect_timeout, request).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    yield Err(ResourceError::from(e));
                    return;
                }
                Err(_) => {
                    yield Err(ResourceError::Timeout);
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                yield Err(ResourceError::Http {
                    status: status.as_u16(),
                    body: String::new(),
                });
                return;
            }

            let mut parser = MjpegParser::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        parser.push(&chunk);
                        while let Some(frame) = parser.next_frame() {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        yield Err(ResourceError::from(e));
                        return;
                    }
                }
            }
        })
    }
}

/// Fan-out of JPEG frames to HTTP clients.
#[derive(Debug, Clone)]
pub struct MjpegBroadcaster {
    tx: broadcast::Sender<Bytes>,
    closed: Arc<watch::Sender<bool>>,
}

impl MjpegBroadcaster {
    /// Clients more than `capacity` frames behind skip ahead.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            closed: Arc::new(closed),
        }
    }

    /// Returns the number of clients that will see the frame.
    pub fn publish(&self, jpeg: Bytes) -> usize {
        self.tx.send(jpeg).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A client response. Subscribing after [`close`](Self::close) gives an
    /// empty one.
    pub fn subscribe(&self) -> MjpegSubscriber {
        MjpegSubscriber {
            rx: self.tx.subscribe(),
            closed: self.closed.subscribe(),
        }
    }

    /// End every current and future client response.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Default for MjpegBroadcaster {
    fn default() -> Self {
        Self::new(4)
    }
}

pub struct MjpegSubscriber {
    rx: broadcast::Receiver<Bytes>,
    closed: watch::Receiver<bool>,
}

impl IntoResponse for MjpegSubscriber {
    fn into_response(self) -> Response {
        let mut closed = self.closed;
        let shutdown = async move {
            // A dropped sender also ends the response
            let _ = closed.wait_for(|closed| *closed).await;
        };
        let parts = BroadcastStream::new(self.rx).filter_map(|frame| async move {
            // Lagged receivers just skip ahead
            let jpeg = frame.ok()?;
            let head = format!(
                "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            );
            let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
            part.extend_from_slice(head.as_bytes());
            part.extend_from_slice(&jpeg);
            part.extend_from_slice(b"\r\n");
            Some(Ok::<_, Infallible>(Bytes::from(part)))
        });
        let parts = parts.take_until(shutdown);

        (
            [
                (
                    header::CONTENT_TYPE,
                    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
                ),
                (
                    header::CACHE_CONTROL,
                    "no-cache, no-store, must-revalidate".to_string(),
                ),
            ],
            Body::from_stream(parts),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(payload);
        out.extend_from_slice(&EOI);
        out
    }

    #[test]
    fn test_extracts_frames_between_parts() {
        let mut parser = MjpegParser::new();
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        data.extend(jpeg(b"one"));
        data.extend_from_slice(b"\r\n--frame\r\n\r\n");
        data.extend(jpeg(b"two"));
        parser.push(&data);

        assert_eq!(parser.next_frame().unwrap().as_ref(), jpeg(b"one").as_slice());
        assert_eq!(parser.next_frame().unwrap().as_ref(), jpeg(b"two").as_slice());
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut parser = MjpegParser::new();
        let frame = jpeg(b"split-payload");
        let (a, b) = frame.split_at(1);

        parser.push(b"junk");
        parser.push(a);
        assert!(parser.next_frame().is_none());
        parser.push(b);
        assert_eq!(parser.next_frame().unwrap().as_ref(), frame.as_slice());
    }

    #[test]
    fn test_garbage_is_discarded() {
        let mut parser = MjpegParser::new();
        parser.push(b"no markers here at all");
        assert!(parser.next_frame().is_none());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let broadcaster = MjpegBroadcaster::default();
        assert_eq!(broadcaster.publish(Bytes::from_static(b"x")), 0);

        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(broadcaster.publish(Bytes::from_static(b"x")), 1);
        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_open_responses() {
        let broadcaster = MjpegBroadcaster::default();
        let response = broadcaster.subscribe().into_response();
        // The sender stays alive, as it does inside the server state
        let _keep = broadcaster.clone();
        broadcaster.close();

        let body = tokio::time::timeout(
            Duration::from_secs(1),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("response ended")
        .unwrap();
        assert!(body.is_empty());

        let late = broadcaster.subscribe().into_response();
        let body = axum::body::to_bytes(late.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }
}
