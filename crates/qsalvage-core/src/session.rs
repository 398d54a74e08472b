//! Recovery session orchestration.
//!
//! A session drives the whole pipeline: segment files are scanned one
//! at a time, each frame is validated and handed to the publisher as it
//! is discovered (streaming, never two-pass), and statistics accumulate
//! under a single owner. Memory is bounded to one file's in-flight
//! frames.
//!
//! Limits and cancellation are cooperative: they are checked between
//! iterations, never mid-frame, so a payload is never split across a
//! stop boundary.

use crate::error::Result;
use crate::publish::{BrokerTransport, PublishOutcome, ReplayPublisher};
use crate::scanner::{FrameScanner, ScannerConfig};
use crate::validator::{FrameClass, FrameValidator, ValidatorConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Session-level configuration, fixed at session start
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Simulate publishes instead of performing them
    pub dry_run: bool,
    /// Maximum number of files to scan (0 = unlimited)
    pub file_limit: usize,
    /// Maximum number of messages to publish, or in dry-run mode to
    /// count as would-publish (0 = unlimited)
    pub message_limit: usize,
    /// Frame scanner configuration
    pub scanner: ScannerConfig,
    /// Frame validator configuration
    pub validator: ValidatorConfig,
}

impl SessionConfig {
    /// Creates a new session config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets dry-run mode
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the file limit (0 = unlimited)
    pub fn file_limit(mut self, limit: usize) -> Self {
        self.file_limit = limit;
        self
    }

    /// Sets the message limit (0 = unlimited)
    pub fn message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit;
        self
    }

    /// Sets the scanner configuration
    pub fn scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// Sets the validator configuration
    pub fn validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }
}

/// Monotonic session counters.
///
/// Single writer (the session loop); read at session end. The final
/// report keeps "found but not published" (limits, dry-run), "found but
/// unusable" (corruption), and "usable but delivery failed" strictly
/// apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Segment files opened for scanning
    pub files_scanned: u64,
    /// Candidate frames found across all files
    pub frames_found: u64,
    /// Frames rejected for an implausible payload span
    pub frames_malformed: u64,
    /// Frames whose end marker never arrived
    pub frames_truncated: u64,
    /// Payloads acknowledged by the broker
    pub published: u64,
    /// Payloads that would have been published (dry-run)
    pub skipped_dry_run: u64,
    /// Usable payloads whose delivery kept failing
    pub publish_failures: u64,
}

impl SessionStats {
    /// Messages counted against the message limit
    pub fn delivered(&self) -> u64 {
        self.published + self.skipped_dry_run
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files scanned, {} frames found ({} malformed, {} truncated), \
             {} published, {} skipped (dry run), {} failed",
            self.files_scanned,
            self.frames_found,
            self.frames_malformed,
            self.frames_truncated,
            self.published,
            self.skipped_dry_run,
            self.publish_failures
        )
    }
}

/// Terminal state of a recovery session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Every file was scanned and every usable payload handled
    Completed,
    /// A file or message limit stopped the session early (success)
    LimitReached,
    /// A session-fatal condition or operator cancellation stopped the
    /// session; statistics are partial
    Aborted,
}

/// Final (or early-termination) session report
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Terminal session state
    pub status: SessionStatus,
    /// Accumulated counters
    pub stats: SessionStats,
}

/// Cooperative cancellation flag, checked between frames.
///
/// Clone it into a signal handler; the session flushes its statistics
/// and stops cleanly at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a new, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Orchestrates source → scanner → validator → publisher.
///
/// `Idle → Scanning(file) → Publishing → {Completed, LimitReached,
/// Aborted}`; a session is one-shot.
#[derive(Debug)]
pub struct RecoverySession<T> {
    config: SessionConfig,
    publisher: ReplayPublisher<T>,
    validator: FrameValidator,
    cancel: CancelToken,
    stats: SessionStats,
}

impl<T: BrokerTransport> RecoverySession<T> {
    /// Creates a session over the given publisher.
    ///
    /// The session's dry-run setting is authoritative: it overrides
    /// whatever the publisher was constructed with, so the limit
    /// accounting and the transport behavior cannot disagree.
    pub fn new(config: SessionConfig, mut publisher: ReplayPublisher<T>) -> Self {
        publisher.set_dry_run(config.dry_run);
        let validator = FrameValidator::with_config(config.validator.clone());
        Self {
            config,
            publisher,
            validator,
            cancel: CancelToken::new(),
            stats: SessionStats::default(),
        }
    }

    /// Installs a cancellation token shared with the caller
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Borrow the publisher (and through it the transport)
    pub fn publisher(&self) -> &ReplayPublisher<T> {
        &self.publisher
    }

    /// Runs the session over the given files, in order.
    ///
    /// Returns `Err` only for configuration errors detected before any
    /// file is scanned. Connection failures abort the session but still
    /// produce a report with partial statistics.
    pub fn run(&mut self, files: impl IntoIterator<Item = PathBuf>) -> Result<SessionReport> {
        self.publisher.target().validate()?;
        self.config.scanner.validate()?;

        if let Err(e) = self.publisher.connect() {
            error!("unable to establish broker connection: {}", e);
            return Ok(self.report(SessionStatus::Aborted));
        }

        let status = self.pump(files);

        self.publisher.close();
        let report = self.report(status);
        info!(status = ?report.status, "session finished: {}", report.stats);
        Ok(report)
    }

    fn report(&self, status: SessionStatus) -> SessionReport {
        SessionReport {
            status,
            stats: self.stats.clone(),
        }
    }

    fn message_limit_reached(&self) -> bool {
        self.config.message_limit > 0 && self.stats.delivered() >= self.config.message_limit as u64
    }

    fn pump(&mut self, files: impl IntoIterator<Item = PathBuf>) -> SessionStatus {
        for (index, path) in files.into_iter().enumerate() {
            if self.config.file_limit > 0 && index >= self.config.file_limit {
                info!("file limit ({}) reached", self.config.file_limit);
                return SessionStatus::LimitReached;
            }
            if self.cancel.is_cancelled() {
                info!("cancellation requested; stopping before {}", path.display());
                return SessionStatus::Aborted;
            }

            let scanner = match FrameScanner::open(&path, self.config.scanner.clone()) {
                Ok(scanner) => scanner,
                Err(e) => {
                    // One unreadable file does not end the recovery run.
                    warn!("skipping segment file: {}", e);
                    continue;
                }
            };

            debug!("scanning {}", path.display());
            self.stats.files_scanned += 1;

            if let Some(status) = self.pump_file(scanner) {
                return status;
            }
        }

        SessionStatus::Completed
    }

    /// Scans one file to completion; `Some(status)` ends the session
    fn pump_file(&mut self, scanner: FrameScanner<std::fs::File>) -> Option<SessionStatus> {
        let source = Arc::clone(scanner.source());

        for frame in scanner {
            if self.cancel.is_cancelled() {
                info!("cancellation requested; stopping between frames");
                return Some(SessionStatus::Aborted);
            }

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("abandoning {}: {}", source.display(), e);
                    return None;
                }
            };

            self.stats.frames_found += 1;
            match self.validator.classify(frame, &source) {
                FrameClass::Truncated => self.stats.frames_truncated += 1,
                FrameClass::Malformed => self.stats.frames_malformed += 1,
                FrameClass::Usable(payload) => {
                    debug!(
                        offset = payload.offset,
                        len = payload.len(),
                        preview = %payload.preview(),
                        "usable frame"
                    );
                    match self.publisher.publish(&payload) {
                        PublishOutcome::Published => self.stats.published += 1,
                        PublishOutcome::SkippedDryRun => self.stats.skipped_dry_run += 1,
                        PublishOutcome::FailedRetryable => self.stats.publish_failures += 1,
                        PublishOutcome::FailedFatal => {
                            self.stats.publish_failures += 1;
                            error!("broker connection could not be re-established");
                            return Some(SessionStatus::Aborted);
                        }
                    }

                    if self.message_limit_reached() {
                        info!("message limit ({}) reached", self.config.message_limit);
                        return Some(SessionStatus::LimitReached);
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::publish::mock::MockTransport;
    use crate::publish::{Credentials, Destination, PublishTarget, RetryPolicy};
    use crate::scanner::{DEFAULT_END_MARKER, DEFAULT_SEGMENT_HEADER_LEN, DEFAULT_START_MARKER};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn target() -> PublishTarget {
        PublishTarget {
            host: "localhost".into(),
            port: 5672,
            vhost: "/".into(),
            credentials: Credentials::default(),
            destination: Destination::Queue("orders".into()),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Writes a synthetic segment: 64-byte header, then one record per
    /// payload. A `None` entry emits a start marker with no end marker.
    fn write_segment(dir: &Path, name: &str, records: &[Option<&[u8]>]) -> PathBuf {
        let mut data = vec![0u8; DEFAULT_SEGMENT_HEADER_LEN];
        for record in records {
            data.extend_from_slice(DEFAULT_START_MARKER);
            match record {
                Some(payload) => {
                    data.extend_from_slice(payload);
                    data.extend_from_slice(DEFAULT_END_MARKER);
                }
                None => data.extend_from_slice(b"interrupted"),
            }
        }
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        path
    }

    fn session(
        transport: MockTransport,
        config: SessionConfig,
    ) -> RecoverySession<MockTransport> {
        let publisher = ReplayPublisher::new(transport, target(), fast_retry(), config.dry_run);
        RecoverySession::new(config, publisher)
    }

    fn check_invariant(stats: &SessionStats) {
        assert_eq!(
            stats.published + stats.skipped_dry_run + stats.publish_failures,
            stats.frames_found - stats.frames_malformed - stats.frames_truncated
        );
    }

    #[test]
    fn test_clean_run_publishes_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"one"), Some(b"two")]);
        let b = write_segment(dir.path(), "2.qs", &[Some(b"three")]);

        let mut session = session(MockTransport::default(), SessionConfig::new());
        let report = session.run(vec![a, b]).unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stats.files_scanned, 2);
        assert_eq!(report.stats.frames_found, 3);
        assert_eq!(report.stats.published, 3);
        assert_eq!(
            session.publisher().transport().published,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        check_invariant(&report.stats);
    }

    #[test]
    fn test_malformed_frame_does_not_block_later_frames() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(
            dir.path(),
            "1.qs",
            &[Some(b"good-1"), Some(b""), Some(b"good-2")],
        );

        let mut session = session(MockTransport::default(), SessionConfig::new());
        let report = session.run(vec![path]).unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stats.frames_found, 3);
        assert_eq!(report.stats.frames_malformed, 1);
        assert_eq!(report.stats.published, 2);
        assert_eq!(
            session.publisher().transport().published,
            vec![b"good-1".to_vec(), b"good-2".to_vec()]
        );
        check_invariant(&report.stats);
    }

    #[test]
    fn test_truncated_tail_is_counted_not_published() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(dir.path(), "1.qs", &[Some(b"whole"), None]);

        let mut session = session(MockTransport::default(), SessionConfig::new());
        let report = session.run(vec![path]).unwrap();

        assert_eq!(report.stats.frames_found, 2);
        assert_eq!(report.stats.frames_truncated, 1);
        assert_eq!(report.stats.published, 1);
        check_invariant(&report.stats);
    }

    #[test]
    fn test_message_limit_stops_scanning() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1"), Some(b"m2")]);
        let b = write_segment(dir.path(), "2.qs", &[Some(b"m3"), Some(b"m4")]);
        let c = write_segment(dir.path(), "3.qs", &[Some(b"m5")]);

        let mut session = session(
            MockTransport::default(),
            SessionConfig::new().message_limit(3),
        );
        let report = session.run(vec![a, b, c]).unwrap();

        assert_eq!(report.status, SessionStatus::LimitReached);
        assert_eq!(report.stats.published, 3);
        // The third file is never opened.
        assert_eq!(report.stats.files_scanned, 2);
        assert_eq!(session.publisher().transport().publish_calls, 3);
        check_invariant(&report.stats);
    }

    #[test]
    fn test_file_limit_scans_only_first_file() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1")]);
        let b = write_segment(dir.path(), "2.qs", &[Some(b"m2")]);

        let mut session = session(MockTransport::default(), SessionConfig::new().file_limit(1));
        let report = session.run(vec![a, b]).unwrap();

        assert_eq!(report.status, SessionStatus::LimitReached);
        assert_eq!(report.stats.files_scanned, 1);
        assert_eq!(report.stats.published, 1);
        check_invariant(&report.stats);
    }

    #[test]
    fn test_dry_run_matches_live_run_counts() {
        let dir = TempDir::new().unwrap();
        let records: &[Option<&[u8]>] = &[Some(b"a"), Some(b""), None, Some(b"b")];
        let path = write_segment(dir.path(), "1.qs", records);

        let mut live = session(MockTransport::default(), SessionConfig::new());
        let live_report = live.run(vec![path.clone()]).unwrap();

        let mut dry = session(
            MockTransport::default(),
            SessionConfig::new().dry_run(true),
        );
        let dry_report = dry.run(vec![path]).unwrap();

        assert_eq!(dry.publisher().transport().connects, 0);
        assert_eq!(dry.publisher().transport().publish_calls, 0);

        assert_eq!(dry_report.stats.skipped_dry_run, live_report.stats.published);
        assert_eq!(dry_report.stats.published, 0);
        assert_eq!(dry_report.stats.frames_found, live_report.stats.frames_found);
        assert_eq!(
            dry_report.stats.frames_malformed,
            live_report.stats.frames_malformed
        );
        assert_eq!(
            dry_report.stats.frames_truncated,
            live_report.stats.frames_truncated
        );
        check_invariant(&dry_report.stats);
    }

    #[test]
    fn test_session_dry_run_overrides_publisher_flag() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1")]);

        // Publisher built live, session configured dry: the session
        // setting wins and no transport call is made.
        let publisher =
            ReplayPublisher::new(MockTransport::default(), target(), fast_retry(), false);
        let mut session = RecoverySession::new(SessionConfig::new().dry_run(true), publisher);
        let report = session.run(vec![a]).unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stats.skipped_dry_run, 1);
        assert_eq!(report.stats.published, 0);
        assert_eq!(session.publisher().transport().connects, 0);
        assert_eq!(session.publisher().transport().publish_calls, 0);
    }

    #[test]
    fn test_dry_run_respects_message_limit() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1"), Some(b"m2"), Some(b"m3")]);

        let mut session = session(
            MockTransport::default(),
            SessionConfig::new().dry_run(true).message_limit(2),
        );
        let report = session.run(vec![a]).unwrap();

        assert_eq!(report.status, SessionStatus::LimitReached);
        assert_eq!(report.stats.skipped_dry_run, 2);
    }

    #[test]
    fn test_fatal_connection_loss_aborts_with_partial_stats() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1"), Some(b"m2"), Some(b"m3")]);

        let mut transport = MockTransport::default();
        transport.connect_results.push_back(Ok(()));
        transport.publish_results.push_back(Ok(()));
        transport
            .publish_results
            .push_back(Err(TransportError::connection("reset")));
        for _ in 0..3 {
            transport
                .connect_results
                .push_back(Err(TransportError::connection("refused")));
        }

        let mut session = session(transport, SessionConfig::new());
        let report = session.run(vec![a]).unwrap();

        assert_eq!(report.status, SessionStatus::Aborted);
        assert_eq!(report.stats.published, 1);
        assert_eq!(report.stats.publish_failures, 1);
        assert_eq!(report.stats.frames_found, 2);
        check_invariant(&report.stats);
    }

    #[test]
    fn test_initial_connection_failure_aborts_before_scanning() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1")]);

        let mut transport = MockTransport::default();
        for _ in 0..3 {
            transport
                .connect_results
                .push_back(Err(TransportError::connection("refused")));
        }

        let mut session = session(transport, SessionConfig::new());
        let report = session.run(vec![a]).unwrap();

        assert_eq!(report.status, SessionStatus::Aborted);
        assert_eq!(report.stats, SessionStats::default());
    }

    #[test]
    fn test_invalid_target_never_starts_session() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1")]);

        let publisher = ReplayPublisher::new(
            MockTransport::default(),
            PublishTarget {
                destination: Destination::Queue(String::new()),
                ..target()
            },
            fast_retry(),
            false,
        );
        let mut session = RecoverySession::new(SessionConfig::new(), publisher);

        assert!(session.run(vec![a]).is_err());
        assert_eq!(session.publisher().transport().connects, 0);
        assert_eq!(session.publisher().transport().publish_calls, 0);
    }

    #[test]
    fn test_cancellation_stops_between_files() {
        let dir = TempDir::new().unwrap();
        let a = write_segment(dir.path(), "1.qs", &[Some(b"m1")]);

        let cancel = CancelToken::new();
        cancel.cancel();

        let mut session = session(MockTransport::default(), SessionConfig::new())
            .with_cancel_token(cancel);
        let report = session.run(vec![a]).unwrap();

        assert_eq!(report.status, SessionStatus::Aborted);
        assert_eq!(report.stats.files_scanned, 0);
        assert_eq!(session.publisher().transport().publish_calls, 0);
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("0.qs");
        let real = write_segment(dir.path(), "1.qs", &[Some(b"survivor")]);

        let mut session = session(MockTransport::default(), SessionConfig::new());
        let report = session.run(vec![missing, real]).unwrap();

        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.stats.files_scanned, 1);
        assert_eq!(report.stats.published, 1);
    }

    #[test]
    fn test_stats_display() {
        let stats = SessionStats {
            files_scanned: 2,
            frames_found: 5,
            frames_malformed: 1,
            frames_truncated: 1,
            published: 3,
            ..Default::default()
        };
        let rendered = stats.to_string();
        assert!(rendered.contains("2 files scanned"));
        assert!(rendered.contains("5 frames found"));
        assert!(rendered.contains("3 published"));
    }
}
