//! qsalvage - Salvage messages from broker message-store segment files
//!
//! This tool scans a directory of `.qs` segment files left behind by an
//! uncleanly stopped broker, extracts the message payloads delimited by
//! known byte markers, and republishes them into a live broker.
//!
//! The broker that owns the segment files must NOT be running while
//! they are scanned, or it may reclaim the data being recovered. Point
//! the tool at a copy, or at the store of a stopped instance, and
//! publish to a different (or restarted) broker.

mod transport;

use anyhow::{bail, Context, Result};
use clap::Parser;
use qsalvage_core::{
    list_segment_files, CancelToken, Credentials, Destination, PublishTarget, RecoverySession,
    ReplayPublisher, RetryPolicy, SessionConfig, SessionStatus,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use transport::AmqpTransport;

/// Salvage messages from broker message-store segment files
#[derive(Parser, Debug)]
#[command(name = "qsalvage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory containing the segment files
    #[arg(short, long)]
    dir: PathBuf,

    /// Target queue name (declared durable before publishing)
    #[arg(short, long)]
    queue: Option<String>,

    /// Target exchange name (default exchange when omitted)
    #[arg(long)]
    exchange: Option<String>,

    /// Routing key for publishing (defaults to the queue name)
    #[arg(long)]
    routing_key: Option<String>,

    /// Broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, default_value = "5672")]
    port: u16,

    /// Broker virtual host
    #[arg(long, default_value = "/")]
    vhost: String,

    /// Broker username
    #[arg(long, default_value = "guest")]
    username: String,

    /// Broker password
    #[arg(long, default_value = "guest", env = "QSALVAGE_PASSWORD")]
    password: String,

    /// Process files but do not publish messages
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of files to process (0 = unlimited)
    #[arg(long, default_value = "0")]
    file_limit: usize,

    /// Maximum number of messages to publish (0 = unlimited)
    #[arg(long, default_value = "0")]
    message_limit: usize,

    /// Segment file extension to scan for
    #[arg(long, default_value = "qs")]
    extension: String,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Resolves the delivery destination from the queue/exchange flags
    fn destination(&self) -> Result<Destination> {
        match (&self.exchange, &self.queue, &self.routing_key) {
            (Some(exchange), queue, routing_key) => {
                let routing_key = routing_key
                    .clone()
                    .or_else(|| queue.clone())
                    .context("--exchange requires --routing-key (or --queue as a fallback)")?;
                Ok(Destination::Exchange {
                    exchange: exchange.clone(),
                    routing_key,
                })
            }
            (None, Some(queue), _) => Ok(Destination::Queue(queue.clone())),
            (None, None, _) => bail!("either --queue or --exchange must be specified"),
        }
    }

    fn target(&self) -> Result<PublishTarget> {
        Ok(PublishTarget {
            host: self.host.clone(),
            port: self.port,
            vhost: self.vhost.clone(),
            credentials: Credentials {
                username: self.username.clone(),
                password: self.password.clone(),
            },
            destination: self.destination()?,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let target = cli.target()?;

    let files = list_segment_files(&cli.dir, &cli.extension)
        .with_context(|| format!("cannot enumerate segment files in {}", cli.dir.display()))?;
    if files.is_empty() {
        println!(
            "No .{} segment files found in {}",
            cli.extension,
            cli.dir.display()
        );
        return Ok(());
    }
    info!("found {} segment files in {}", files.len(), cli.dir.display());

    // Stop cleanly between frames on Ctrl-C, flushing statistics.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .context("failed to install interrupt handler")?;
    }

    let config = SessionConfig::new()
        .dry_run(cli.dry_run)
        .file_limit(cli.file_limit)
        .message_limit(cli.message_limit);
    let publisher = ReplayPublisher::new(
        AmqpTransport::new(),
        target,
        RetryPolicy::default(),
        cli.dry_run,
    );
    let mut session = RecoverySession::new(config, publisher).with_cancel_token(cancel);

    let report = session.run(files)?;

    println!("{}", report.stats);
    match report.status {
        SessionStatus::Completed => {
            println!("Recovery completed.");
            Ok(())
        }
        SessionStatus::LimitReached => {
            println!("Recovery stopped at the configured limit.");
            Ok(())
        }
        SessionStatus::Aborted => {
            bail!("recovery aborted; statistics above are partial")
        }
    }
}
