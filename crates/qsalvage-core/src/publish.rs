//! Replaying validated payloads into a live broker.
//!
//! The core never speaks a wire protocol itself: it drives a
//! [`BrokerTransport`] capability object supplied by the caller. The
//! transport's `publish` must only return `Ok` once the broker has
//! acknowledged receipt (confirmed-publish semantics), so "published"
//! in the session statistics means acknowledged, not merely sent.
//!
//! A transient delivery failure is retried a bounded number of times for
//! that specific payload; a lost connection triggers a bounded reconnect
//! before the session gives up. A single bad message never aborts the
//! whole recovery run.

use crate::error::{Error, Result, TransportError};
use crate::validator::ValidatedPayload;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Broker connection credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username for the broker login
    pub username: String,
    /// Password for the broker login
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "guest".into(),
            password: "guest".into(),
        }
    }
}

/// Where recovered messages are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Publish directly to a queue via the default exchange.
    ///
    /// The queue is declared durable before the first publish.
    Queue(String),
    /// Publish to a named exchange with an explicit routing key
    Exchange {
        /// Exchange name
        exchange: String,
        /// Routing key
        routing_key: String,
    },
}

impl Destination {
    /// The exchange messages are published to (empty for the default
    /// exchange)
    pub fn exchange(&self) -> &str {
        match self {
            Self::Queue(_) => "",
            Self::Exchange { exchange, .. } => exchange,
        }
    }

    /// The routing key messages are published with
    pub fn routing_key(&self) -> &str {
        match self {
            Self::Queue(queue) => queue,
            Self::Exchange { routing_key, .. } => routing_key,
        }
    }

    /// The queue to declare before publishing, if any
    pub fn queue_to_declare(&self) -> Option<&str> {
        match self {
            Self::Queue(queue) => Some(queue),
            Self::Exchange { .. } => None,
        }
    }
}

/// Broker connection coordinates and destination.
///
/// Immutable for the session's lifetime.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    /// Broker hostname
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Virtual host
    pub vhost: String,
    /// Login credentials
    pub credentials: Credentials,
    /// Delivery destination
    pub destination: Destination,
}

impl PublishTarget {
    /// Validates the target before a session starts
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::invalid_target("host is empty"));
        }
        if self.port == 0 {
            return Err(Error::invalid_target("port is zero"));
        }
        match &self.destination {
            Destination::Queue(queue) if queue.is_empty() => {
                Err(Error::invalid_target("queue name is empty"))
            }
            Destination::Exchange { exchange, .. } if exchange.is_empty() => {
                Err(Error::invalid_target("exchange name is empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Capability object for talking to the broker.
///
/// Implementations own the underlying connection; `connect` may be
/// called again after a failure to re-establish it.
pub trait BrokerTransport {
    /// Establishes (or re-establishes) the broker connection
    fn connect(&mut self, target: &PublishTarget) -> std::result::Result<(), TransportError>;

    /// Publishes one payload and waits for the broker's acknowledgement
    fn publish(
        &mut self,
        destination: &Destination,
        payload: &[u8],
    ) -> std::result::Result<(), TransportError>;

    /// Closes the connection; errors during close are ignored
    fn close(&mut self);
}

/// Bounded retry with exponential backoff.
///
/// Applied independently to per-payload transient failures and to
/// connection (re-)establishment. There is no implicit infinite retry
/// anywhere in the pipeline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per operation
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt
    pub initial_backoff: Duration,
    /// Upper bound on the backoff delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based failed attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Outcome of attempting to deliver one validated payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker acknowledged the message
    Published,
    /// Dry-run mode: the message would have been published
    SkippedDryRun,
    /// Delivery kept failing transiently; the session moves on
    FailedRetryable,
    /// The broker connection could not be re-established; session-fatal
    FailedFatal,
}

/// Delivers validated payloads to a broker target, or simulates
/// delivery in dry-run mode.
///
/// Holds the session's single logical broker connection; no concurrent
/// publishers exist, so ordering follows the order payloads are handed
/// in.
#[derive(Debug)]
pub struct ReplayPublisher<T> {
    transport: T,
    target: PublishTarget,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<T: BrokerTransport> ReplayPublisher<T> {
    /// Creates a publisher over the given transport
    pub fn new(transport: T, target: PublishTarget, retry: RetryPolicy, dry_run: bool) -> Self {
        Self {
            transport,
            target,
            retry,
            dry_run,
        }
    }

    /// The target this publisher delivers to
    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    /// Enables or disables dry-run mode
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Establishes the broker connection with bounded retry.
    ///
    /// In dry-run mode this is a no-op: no network activity of any kind.
    pub fn connect(&mut self) -> Result<()> {
        if self.dry_run {
            debug!("dry run: skipping broker connection");
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transport.connect(&self.target) {
                Ok(()) => {
                    info!(
                        host = %self.target.host,
                        port = self.target.port,
                        vhost = %self.target.vhost,
                        "connected to broker"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        attempt,
                        "broker connection failed: {}; retrying in {:?}", e, backoff
                    );
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(Error::Transport(e)),
            }
        }
    }

    /// Delivers one payload, retrying transient failures and surviving
    /// a single reconnect cycle.
    pub fn publish(&mut self, payload: &ValidatedPayload) -> PublishOutcome {
        if self.dry_run {
            debug!(
                source = %payload.source.display(),
                offset = payload.offset,
                len = payload.len(),
                "dry run: would publish"
            );
            return PublishOutcome::SkippedDryRun;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .transport
                .publish(&self.target.destination, payload.as_bytes())
            {
                Ok(()) => return PublishOutcome::Published,
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            source = %payload.source.display(),
                            offset = payload.offset,
                            "giving up on payload after {} attempts: {}", attempt, e
                        );
                        return PublishOutcome::FailedRetryable;
                    }
                    let backoff = self.retry.backoff_for(attempt);
                    debug!(attempt, "transient publish failure: {}; retrying in {:?}", e, backoff);
                    std::thread::sleep(backoff);
                }
                Err(e) => {
                    // Connection losses count against the same per-payload
                    // attempt budget, so a broker that drops the channel
                    // on every publish cannot loop forever.
                    warn!("broker connection lost during publish: {}", e);
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            source = %payload.source.display(),
                            offset = payload.offset,
                            "giving up on payload after {} attempts: {}", attempt, e
                        );
                        return PublishOutcome::FailedRetryable;
                    }
                    if self.connect().is_err() {
                        return PublishOutcome::FailedFatal;
                    }
                }
            }
        }
    }

    /// Closes the broker connection
    pub fn close(&mut self) {
        if !self.dry_run {
            self.transport.close();
        }
    }
}
