//! # qsalvage-core
//!
//! A library for salvaging messages from broker message-store segment
//! files and replaying them into a live broker.
//!
//! After an unclean broker shutdown, messages in a non-durable-safe
//! queue may be discarded even though their bytes still sit in the
//! on-disk segment files. This crate scans those files offline for the
//! byte markers that delimit individual records, reconstructs the
//! message payloads, and republishes them — with strict accounting of
//! what was found versus what was actually delivered.
//!
//! The segment files must be read offline: never run a recovery while
//! the broker that owns them is running, or it may reclaim the very
//! data being recovered.
//!
//! ## Architecture
//!
//! - [`scanner`]: marker-based frame extraction over a bounded window
//! - [`validator`]: frame classification and payload extraction
//! - [`publish`]: confirmed replay with bounded retry, behind the
//!   [`BrokerTransport`] capability trait
//! - [`session`]: orchestration, limits, cancellation, statistics
//! - [`source`]: segment file enumeration
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use qsalvage_core::{
//!     list_segment_files, Credentials, Destination, PublishTarget,
//!     RecoverySession, ReplayPublisher, RetryPolicy, SessionConfig,
//! };
//! # use qsalvage_core::{BrokerTransport, Destination as D, TransportError};
//! # struct MyTransport;
//! # impl BrokerTransport for MyTransport {
//! #     fn connect(&mut self, _: &PublishTarget) -> Result<(), TransportError> { Ok(()) }
//! #     fn publish(&mut self, _: &D, _: &[u8]) -> Result<(), TransportError> { Ok(()) }
//! #     fn close(&mut self) {}
//! # }
//!
//! let files = list_segment_files("/var/lib/broker/msg_store", "qs")?;
//!
//! let target = PublishTarget {
//!     host: "localhost".into(),
//!     port: 5672,
//!     vhost: "/".into(),
//!     credentials: Credentials::default(),
//!     destination: Destination::Queue("orders".into()),
//! };
//!
//! let publisher = ReplayPublisher::new(MyTransport, target, RetryPolicy::default(), false);
//! let mut session = RecoverySession::new(SessionConfig::new(), publisher);
//! let report = session.run(files)?;
//! println!("{}", report.stats);
//! # Ok::<(), qsalvage_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod publish;
pub mod scanner;
pub mod session;
pub mod source;
pub mod validator;

// Re-export primary types for convenience
pub use error::{Error, Result, TransportError};
pub use publish::{
    BrokerTransport, Credentials, Destination, PublishOutcome, PublishTarget, ReplayPublisher,
    RetryPolicy,
};
pub use scanner::{CandidateFrame, FrameScanner, ScannerConfig};
pub use session::{
    CancelToken, RecoverySession, SessionConfig, SessionReport, SessionStats, SessionStatus,
};
pub use source::list_segment_files;
pub use validator::{FrameClass, FrameValidator, ValidatedPayload, ValidatorConfig};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
