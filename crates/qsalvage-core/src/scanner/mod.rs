//! Marker-based frame scanning over raw segment file bytes.
//!
//! This module locates candidate message frames inside a broker
//! message-store segment file by searching for the exact byte patterns
//! that delimit individual records.
//!
//! ## Algorithm Overview
//!
//! 1. Skip the fixed segment header at the front of the file
//! 2. Search forward for the start-marker byte pattern
//! 3. From the start marker, search forward for the nearest end marker
//! 4. Emit the span between the two as a candidate frame and resume
//!    strictly after the end marker
//!
//! The scanner deliberately treats the markers as heuristic delimiters
//! rather than parsing the store's full record structure (length
//! prefixes, checksums, flags), which is not reliably documented across
//! broker versions. A bad match costs one frame, not the file: the
//! scanner resynchronizes at the next start marker. Payload bytes that
//! coincidentally contain a marker pattern are caught downstream by the
//! validator's size sanity checks.
//!
//! Frames are produced lazily in strictly increasing offset order, and
//! the file is read through a bounded [`SlidingWindow`], so arbitrarily
//! large segments never reside wholly in memory.

pub mod window;

use crate::error::{Error, Result};
use bytes::Bytes;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

pub use window::SlidingWindow;

/// Default start-of-record marker.
///
/// Empirically, message records in `.qs` segment files are preceded by
/// an Erlang external-term binary tag (`0x6d`) followed by the high
/// bytes of its 32-bit length prefix.
pub const DEFAULT_START_MARKER: &[u8] = &[0x6d, 0x00, 0x00, 0x00];

/// Default end-of-record marker, observed directly after record bodies
pub const DEFAULT_END_MARKER: &[u8] = &[0x74, 0x00, 0x00, 0x00];

/// Length of the fixed per-segment ("RCQS") header skipped before
/// scanning begins
pub const DEFAULT_SEGMENT_HEADER_LEN: usize = 64;

/// Default ceiling on how far past a start marker the scanner searches
/// for an end marker before giving up on that frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A candidate message frame located between two markers.
///
/// Candidates are purely structural: classification (usable, truncated,
/// malformed) happens in [`crate::validator`].
#[derive(Debug, Clone)]
pub struct CandidateFrame {
    /// Absolute file offset of the detected start marker
    pub start_offset: u64,
    /// The raw byte span of the frame (markers excluded by default,
    /// see [`ScannerConfig::include_markers`])
    pub payload: Bytes,
    /// False when the stream ended, or another start marker appeared,
    /// before any end marker was found
    pub terminated: bool,
}

impl CandidateFrame {
    /// Returns the frame payload as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Configuration for the frame scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Byte pattern that opens a record
    pub start_marker: Vec<u8>,
    /// Byte pattern that closes a record
    pub end_marker: Vec<u8>,
    /// Fixed header length skipped at the front of every segment file
    pub segment_header_len: usize,
    /// Whether the emitted payload span includes the delimiting markers.
    ///
    /// Fixed for the whole session, never inferred per frame.
    pub include_markers: bool,
    /// Maximum distance past a start marker searched for an end marker.
    ///
    /// Bounds the sliding window and cuts short runaway frames caused
    /// by a start-marker false positive near the head of a large file.
    pub max_frame_len: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            start_marker: DEFAULT_START_MARKER.to_vec(),
            end_marker: DEFAULT_END_MARKER.to_vec(),
            segment_header_len: DEFAULT_SEGMENT_HEADER_LEN,
            include_markers: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the start-marker byte pattern
    pub fn start_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.start_marker = marker.into();
        self
    }

    /// Sets the end-marker byte pattern
    pub fn end_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.end_marker = marker.into();
        self
    }

    /// Sets the fixed segment header length
    pub fn segment_header_len(mut self, len: usize) -> Self {
        self.segment_header_len = len;
        self
    }

    /// Sets whether payload spans include the delimiting markers
    pub fn include_markers(mut self, include: bool) -> Self {
        self.include_markers = include;
        self
    }

    /// Sets the end-marker search ceiling
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.start_marker.is_empty() {
            return Err(Error::invalid_scanner_config("start marker is empty"));
        }
        if self.end_marker.is_empty() {
            return Err(Error::invalid_scanner_config("end marker is empty"));
        }
        if self.max_frame_len == 0 {
            return Err(Error::invalid_scanner_config("max frame length is zero"));
        }
        Ok(())
    }
}

/// Lazy frame scanner over a byte stream.
///
/// Yields `Result<CandidateFrame>` in strictly increasing offset order.
/// A scanner owns exactly one file's stream; it is discarded when the
/// scan completes or is aborted.
#[derive(Debug)]
pub struct FrameScanner<R> {
    window: SlidingWindow<R>,
    config: ScannerConfig,
    source: Arc<PathBuf>,
    header_skipped: bool,
    done: bool,
}

impl FrameScanner<std::fs::File> {
    /// Opens a segment file for scanning
    pub fn open(path: impl AsRef<Path>, config: ScannerConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::file_read(path, e))?;
        let mut scanner = Self::new(file, config)?;
        scanner.source = Arc::new(path.to_path_buf());
        Ok(scanner)
    }
}

impl<R: Read> FrameScanner<R> {
    /// Creates a scanner over an arbitrary byte stream
    pub fn new(reader: R, config: ScannerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: SlidingWindow::new(reader),
            config,
            source: Arc::new(PathBuf::from("<stream>")),
            header_skipped: false,
            done: false,
        })
    }

    /// Provenance label used for diagnostics (the source file path)
    pub fn source(&self) -> &Arc<PathBuf> {
        &self.source
    }

    fn io_error(&self, e: std::io::Error) -> Error {
        Error::file_read(self.source.as_ref().clone(), e)
    }

    fn skip_header(&mut self) -> Result<()> {
        if self.header_skipped {
            return Ok(());
        }
        self.header_skipped = true;

        let len = self.config.segment_header_len;
        self.window.fill_to(len).map_err(|e| self.io_error(e))?;
        let available = self.window.len().min(len);
        self.window.consume(available);
        trace!("skipped {} header bytes", available);
        Ok(())
    }

    /// Advances the window until a start marker sits at the front.
    ///
    /// Returns false if the stream ended without another start marker.
    fn seek_start_marker(&mut self) -> Result<bool> {
        let marker_len = self.config.start_marker.len();
        loop {
            if let Some(pos) = find_subsequence(self.window.data(), &self.config.start_marker) {
                self.window.consume(pos);
                return Ok(true);
            }

            // Keep a marker-sized tail so a pattern split across two
            // refills is still matched.
            let keep = marker_len.saturating_sub(1);
            let drop = self.window.len().saturating_sub(keep);
            self.window.consume(drop);

            if self.window.refill().map_err(|e| self.io_error(e))? == 0 {
                return Ok(false);
            }
        }
    }

    /// Builds a frame from the front of the window.
    ///
    /// `span_end` is the window index where the frame span stops: the
    /// end-marker position for terminated frames, the cut point for
    /// unterminated ones.
    fn make_frame(&self, start_offset: u64, span_end: usize, terminated: bool) -> CandidateFrame {
        let start_len = self.config.start_marker.len();
        let data = self.window.data();
        let payload = if self.config.include_markers {
            let end = if terminated {
                span_end + self.config.end_marker.len()
            } else {
                span_end
            };
            Bytes::copy_from_slice(&data[..end.min(data.len())])
        } else {
            let from = start_len.min(span_end);
            Bytes::copy_from_slice(&data[from..span_end])
        };
        CandidateFrame {
            start_offset,
            payload,
            terminated,
        }
    }

    fn next_frame(&mut self) -> Result<Option<CandidateFrame>> {
        self.skip_header()?;

        if !self.seek_start_marker()? {
            return Ok(None);
        }

        // The start marker now sits at the front of the window.
        let start_len = self.config.start_marker.len();
        let end_len = self.config.end_marker.len();
        let frame_start = self.window.base();

        loop {
            let data = self.window.data();

            // A second start marker before any end marker means the
            // current frame never terminates; search from index 1 so the
            // marker at the front does not match itself.
            let next_start =
                find_subsequence(&data[1.min(data.len())..], &self.config.start_marker)
                    .map(|p| p + 1);
            let end = if data.len() > start_len {
                find_subsequence(&data[start_len..], &self.config.end_marker)
                    .map(|p| p + start_len)
            } else {
                None
            };

            // An end marker terminates the frame only if no second start
            // marker precedes it.
            let terminating_end = match (end, next_start) {
                (Some(end_pos), None) => Some(end_pos),
                (Some(end_pos), Some(second_start)) if end_pos < second_start => Some(end_pos),
                _ => None,
            };

            if let Some(end_pos) = terminating_end {
                let frame = self.make_frame(frame_start, end_pos, true);
                // No overlap: the next scan begins strictly after the
                // consumed end marker.
                self.window.consume(end_pos + end_len);
                trace!(
                    offset = frame_start,
                    len = frame.payload.len(),
                    "found terminated frame"
                );
                return Ok(Some(frame));
            }

            if let Some(second_start) = next_start {
                // Unterminated: resume exactly at the second start
                // marker, which may begin a valid frame.
                let span_end = second_start.max(start_len.min(data.len()));
                let frame = self.make_frame(frame_start, span_end, false);
                self.window.consume(second_start);
                trace!(
                    offset = frame_start,
                    "unterminated frame, resynchronizing at next start marker"
                );
                return Ok(Some(frame));
            }

            if data.len().saturating_sub(start_len) >= self.config.max_frame_len {
                // Search ceiling reached without either marker: give up
                // on this start marker. The searched region is known to
                // be marker-free, so skipping it cannot lose a viable
                // frame.
                let span_end = start_len + self.config.max_frame_len;
                let frame = self.make_frame(frame_start, span_end, false);
                let drop = self
                    .window
                    .len()
                    .saturating_sub(start_len.max(end_len).saturating_sub(1));
                self.window.consume(drop);
                debug!(
                    offset = frame_start,
                    "no end marker within max frame length"
                );
                return Ok(Some(frame));
            }

            if self.window.is_eof() {
                // End of file is terminal for this file: emit the tail
                // as an unterminated frame and finish.
                let span_end = self.window.len();
                let frame = self.make_frame(frame_start, span_end, false);
                self.window.consume(span_end);
                trace!(offset = frame_start, "unterminated frame at end of file");
                return Ok(Some(frame));
            }

            self.window.refill().map_err(|e| self.io_error(e))?;
        }
    }
}

impl<R: Read> Iterator for FrameScanner<R> {
    type Item = Result<CandidateFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scan a whole file and collect all candidate frames.
///
/// This is a convenience wrapper over [`FrameScanner::open`].
pub fn scan_file(path: impl AsRef<Path>, config: ScannerConfig) -> Result<Vec<CandidateFrame>> {
    FrameScanner::open(path, config)?.collect()
}
