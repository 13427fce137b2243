//! anneal - local cache and sync layer for a terminal mail client
//!
//! The UI renders from a local SQLite cache while background cycles
//! reconcile that cache with a JMAP server using state tokens.
//!
//! ## Module Organization
//!
//! - `types/`: Domain model, errors and result types
//! - `adapters/`: SQLite persistent store
//! - `backend/`: Remote mail protocol (JMAP)
//! - `sync/`: State-token sync between store and server
//! - `services/`: Cache-first loader and logging setup
//! - `config/`: Configuration management

pub mod adapters;
pub mod backend;
pub mod config;
pub mod services;
pub mod sync;
pub mod types;

use chrono::Duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use adapters::sqlite::Store;
use backend::jmap::JmapBackend;
use config::AppConfig;
use services::logger::fmt_ms;
use services::{Loader, LoaderEvent, LoaderSettings};
use sync::Syncer;
use types::error::{AnnealError, Result};
use types::responses::SyncReport;
use types::MailboxRole;

/// Maintenance commands over the local mail cache
#[derive(Debug, Parser)]
#[command(name = "anneal", version, about)]
pub struct Cli {
    /// Config file to use instead of the default locations
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Account name or email (default: the configured default account)
    #[arg(short, long, global = true, value_name = "NAME")]
    pub account: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Load mailboxes and run one sync cycle
    Sync,
    /// Show sync state of every cached account
    Status,
    /// Drop cached bodies older than DAYS (default: sync.body_max_age_days)
    PurgeBodies { days: Option<u32> },
    /// Delete every cached row
    ClearCache,
}

/// Entry point of the `anneal` binary
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    let store = Arc::new(Store::open(config.cache_path()?)?);

    let result = match cli.command {
        Command::Sync => run_sync(&config, cli.account.as_deref(), store.clone()).await,
        Command::Status => status_lines(&store, &config).map(|lines| {
            for line in lines {
                println!("{}", line);
            }
        }),
        Command::PurgeBodies { days } => {
            let days = days.unwrap_or(config.sync.body_max_age_days);
            store
                .purge_old_bodies(Duration::days(i64::from(days)))
                .map(|purged| println!("Purged {} bodies older than {} days", purged, days))
        }
        Command::ClearCache => store.clear_cache().map(|_| println!("Cache cleared")),
    };

    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => warn!("Store still shared at shutdown, skipping checkpoint"),
    }
    result
}

/// Cache-first mailbox load followed by one sync cycle
async fn run_sync(config: &AppConfig, account: Option<&str>, store: Arc<Store>) -> Result<()> {
    let account = match account {
        Some(name) => config.get_account(name),
        None => config.default_account(),
    }
    .ok_or_else(|| AnnealError::Config("No matching account configured".to_string()))?;

    let token = account.token.resolve()?;
    let backend = JmapBackend::connect(
        &account.session_url,
        &token,
        std::time::Duration::from_secs(config.sync.request_timeout_secs),
    )
    .await?;
    let account_id = backend.account_id().to_string();
    info!("Connected as {} (account {})", backend.username(), account_id);

    let syncer = Arc::new(Syncer::new(store, Arc::new(backend)));
    let (loader, events) = Loader::new(syncer.clone(), LoaderSettings::from(config));

    let started = Instant::now();
    let mailboxes = loader.load_mailboxes(&account_id).await?;
    println!(
        "{} mailboxes ({})",
        mailboxes.data.len(),
        if mailboxes.from_cache { "cached" } else { "fetched" }
    );

    // A cache hit scheduled a background cycle; wait for it instead of
    // running a second one
    let report = if loader.join_background_sync(&account_id).await? {
        cycle_outcome(&events)?
    } else {
        let inbox = mailboxes
            .data
            .iter()
            .find(|m| m.role == Some(MailboxRole::Inbox))
            .map(|m| m.id.clone());
        syncer
            .sync(&account_id, inbox.as_deref(), config.sync.background_email_limit)
            .await?
    };

    // Release the store so the caller can checkpoint and close it
    drop(loader);
    drop(syncer);

    println!("{}", describe_report(&report));
    info!("Sync of {} took {}", account_id, fmt_ms(started.elapsed()));
    Ok(())
}

/// Outcome of a finished background cycle, taken from its events
fn cycle_outcome(events: &flume::Receiver<LoaderEvent>) -> Result<SyncReport> {
    for event in events.try_iter() {
        match event {
            LoaderEvent::SyncFinished { report, .. } => return Ok(report),
            LoaderEvent::SyncFailed { error, .. } => {
                return Err(AnnealError::Io(format!("Sync cycle failed: {}", error)))
            }
            _ => {}
        }
    }
    Err(AnnealError::Io("Sync cycle ended without a result".to_string()))
}

fn describe_report(report: &SyncReport) -> String {
    let mut line = format!(
        "mailboxes: +{} ~{} -{}",
        report.mailboxes.created, report.mailboxes.updated, report.mailboxes.destroyed
    );
    if let Some(emails) = report.emails {
        line.push_str(&format!(
            ", emails: +{} ~{} -{}",
            emails.created, emails.updated, emails.destroyed
        ));
    }
    if let Some(error) = &report.error {
        line.push_str(&format!(" (remote error: {})", error));
    }
    line
}

/// One line per cached account
fn status_lines(store: &Store, config: &AppConfig) -> Result<Vec<String>> {
    let max_age = Duration::seconds(config.sync.max_age_secs as i64);
    let states = store.list_sync_states()?;
    if states.is_empty() {
        return Ok(vec!["No account has been synced yet".to_string()]);
    }

    let mut lines = Vec::with_capacity(states.len());
    for state in states {
        let stale = chrono::Utc::now() - state.last_sync > max_age;
        lines.push(format!(
            "{}: {} mailboxes, last sync {}{}, mailbox state {}, email state {}",
            state.account_id,
            store.get_mailboxes(&state.account_id)?.len(),
            state.last_sync.format("%Y-%m-%d %H:%M:%S UTC"),
            if stale { " (stale)" } else { "" },
            display_token(&state.mailbox_state),
            display_token(&state.email_state),
        ));
    }
    Ok(lines)
}

fn display_token(token: &str) -> &str {
    if token.is_empty() {
        "-"
    } else {
        token
    }
}
