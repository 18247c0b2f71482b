//! Bounded, one-shot capture of engine output streams.
//!
//! Exec and log reads both funnel through [`capture_stream`]: chunks are
//! concatenated until the stream ends, yields an error, runs past the
//! wall-clock deadline, or fills the byte budget. The stream is owned by the
//! capture call and dropped on every exit path, which releases the engine
//! connection behind it.

use crate::error::Result;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPTURE_MAX_BYTES: usize = 1024 * 1024;

// Roughly 30 years; used when a configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Bounds applied to a single capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            max_bytes: DEFAULT_CAPTURE_MAX_BYTES,
        }
    }
}

impl CaptureLimits {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self { timeout, max_bytes }
    }

    /// Deadline for a capture starting at `start`. Saturates instead of
    /// overflowing for very large timeouts.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        start
            .checked_add(self.timeout)
            .or_else(|| start.checked_add(FAR_FUTURE))
            .unwrap_or(start)
    }
}

/// Why a capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// The engine closed the stream.
    Eof,
    /// The wall-clock bound elapsed first.
    TimedOut,
    /// The byte budget was exhausted; output is truncated.
    LimitReached,
}

impl CaptureEnd {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub output: String,
    pub end: CaptureEnd,
}

/// Byte buffer that refuses to grow past its budget.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    max_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            max_bytes,
        }
    }

    /// Append a chunk. Returns `true` once the budget has been exceeded, in
    /// which case only the bytes that fit were kept.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.max_bytes.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.data.extend_from_slice(&chunk[..room]);
            return true;
        }
        self.data.extend_from_slice(chunk);
        false
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn finish(self, end: CaptureEnd) -> Captured {
        Captured {
            output: String::from_utf8_lossy(&self.data).into_owned(),
            end,
        }
    }
}

/// Drain `stream` under `limits`.
///
/// A stream error ends the capture and is returned as-is; reaching a bound is
/// not an error at this level and is reported through [`Captured::end`].
pub async fn capture_stream<S>(stream: S, limits: &CaptureLimits) -> Result<Captured>
where
    S: Stream<Item = Result<Bytes>>,
{
    capture_stream_until(stream, limits.deadline_from(Instant::now()), limits).await
}

/// Like [`capture_stream`], but against a deadline shared with earlier steps
/// of the same operation.
pub async fn capture_stream_until<S>(
    stream: S,
    deadline: Instant,
    limits: &CaptureLimits,
) -> Result<Captured>
where
    S: Stream<Item = Result<Bytes>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = OutputBuffer::new(limits.max_bytes);

    loop {
        let next = match timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!(
                    captured = buffer.len(),
                    timeout_ms = limits.timeout.as_millis() as u64,
                    "Capture deadline elapsed"
                );
                return Ok(buffer.finish(CaptureEnd::TimedOut));
            }
        };

        match next {
            None => return Ok(buffer.finish(CaptureEnd::Eof)),
            Some(Ok(chunk)) => {
                if buffer.push(&chunk) {
                    debug!(max_bytes = limits.max_bytes, "Capture byte budget exhausted");
                    return Ok(buffer.finish(CaptureEnd::LimitReached));
                }
            }
            Some(Err(err)) => {
                warn!(captured = buffer.len(), error = %err, "Output stream failed");
                return Err(err);
            }
        }
    }
}

/// Keep only the last `tail` lines of `text`.
pub fn tail_lines(text: &str, tail: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(tail);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() && text.ends_with('\n') {
        out.push('\n');
    }
    out
}
