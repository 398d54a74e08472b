//! Classification of candidate frames.
//!
//! Every frame the scanner produces is judged independently: a single
//! bad frame never discards the rest of its file. Usable frames yield a
//! [`ValidatedPayload`] carrying the message bytes verbatim, with no
//! content transformation or encoding assumption; payload bytes are
//! opaque to this layer.

use crate::scanner::CandidateFrame;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Default floor on plausible payload length.
///
/// Zero-length spans are always marker false positives.
pub const DEFAULT_MIN_PAYLOAD_LEN: usize = 1;

/// Default ceiling on plausible payload length
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 8 * 1024 * 1024;

/// A message payload extracted from a usable frame, with provenance
/// for diagnostics
#[derive(Debug, Clone)]
pub struct ValidatedPayload {
    /// The message body bytes, verbatim
    pub bytes: Bytes,
    /// Segment file the frame was found in
    pub source: Arc<PathBuf>,
    /// Absolute file offset of the frame's start marker
    pub offset: u64,
}

impl ValidatedPayload {
    /// Returns the payload as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short hex preview of the payload head for diagnostic logs
    pub fn preview(&self) -> String {
        const PREVIEW_LEN: usize = 16;
        let head = &self.bytes[..self.bytes.len().min(PREVIEW_LEN)];
        let hex = head
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        if self.bytes.len() > PREVIEW_LEN {
            format!("{hex} ..")
        } else {
            hex
        }
    }
}

/// Outcome of classifying a single candidate frame
#[derive(Debug, Clone)]
pub enum FrameClass {
    /// The frame is plausible; its payload can be replayed
    Usable(ValidatedPayload),
    /// The stream ended (or another start marker appeared) before an
    /// end marker; the payload cannot be trusted
    Truncated,
    /// The payload span is implausible (too short or too long),
    /// indicating a marker false positive
    Malformed,
}

impl FrameClass {
    /// Returns true for [`FrameClass::Usable`]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable(_))
    }
}

/// Configuration for frame classification
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Minimum plausible payload length (shorter frames are malformed)
    pub min_payload_len: usize,
    /// Maximum plausible payload length (longer frames are malformed)
    pub max_payload_len: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_payload_len: DEFAULT_MIN_PAYLOAD_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl ValidatorConfig {
    /// Creates a new validator config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum plausible payload length
    pub fn min_payload_len(mut self, len: usize) -> Self {
        self.min_payload_len = len;
        self
    }

    /// Sets the maximum plausible payload length
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }
}

/// Classifies candidate frames as usable, truncated, or malformed
#[derive(Debug, Clone, Default)]
pub struct FrameValidator {
    config: ValidatorConfig,
}

impl FrameValidator {
    /// Creates a validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator with custom configuration
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Classifies a single candidate frame.
    ///
    /// `source` is the segment file the frame came from, attached to the
    /// payload as provenance.
    pub fn classify(&self, frame: CandidateFrame, source: &Arc<PathBuf>) -> FrameClass {
        if !frame.terminated {
            trace!(offset = frame.start_offset, "frame truncated");
            return FrameClass::Truncated;
        }

        let len = frame.payload.len();
        if len < self.config.min_payload_len || len > self.config.max_payload_len {
            trace!(
                offset = frame.start_offset,
                len,
                "frame malformed (implausible payload length)"
            );
            return FrameClass::Malformed;
        }

        FrameClass::Usable(ValidatedPayload {
            bytes: frame.payload,
            source: Arc::clone(source),
            offset: frame.start_offset,
        })
    }
}
