//! Cache-first loading
//!
//! Every load answers from the store when it can and schedules a background
//! sync cycle; results of that cycle arrive later as [`LoaderEvent`]s. A
//! cache miss goes to the network and writes through before returning.
//!
//! User actions are applied to the store immediately, sent to the server,
//! and then the current mailbox is re-fetched so server truth overwrites
//! the optimistic state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::sync::Syncer;
use crate::types::error::{AnnealError, Result};
use crate::types::responses::{Loaded, SyncReport};
use crate::types::{Email, EmailSummary, Keyword, Mailbox, MailboxRole};

/// Tunables of the load policy
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Emails per mailbox listing
    pub page_size: usize,
    /// Emails fetched by a background cycle
    pub background_email_limit: usize,
    /// Minimum gap between two background cycles of one account
    pub cooldown: Duration,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            background_email_limit: 100,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for LoaderSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            page_size: config.page_size,
            background_email_limit: config.sync.background_email_limit,
            cooldown: Duration::from_secs(config.sync.cooldown_secs),
        }
    }
}

/// Results delivered to the UI event loop
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    MailboxesRefreshed {
        account_id: String,
        mailboxes: Loaded<Vec<Mailbox>>,
    },
    EmailsRefreshed {
        account_id: String,
        mailbox_id: String,
        emails: Loaded<Vec<EmailSummary>>,
    },
    SyncFinished {
        account_id: String,
        report: SyncReport,
    },
    SyncFailed {
        account_id: String,
        error: String,
    },
}

#[derive(Debug, Default)]
struct AccountSync {
    in_flight: bool,
    last_finished: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// Cache-first loader. Cheap to clone; clones share the in-flight table
/// and the event channel.
#[derive(Clone)]
pub struct Loader {
    syncer: Arc<Syncer>,
    settings: LoaderSettings,
    events: flume::Sender<LoaderEvent>,
    accounts: Arc<Mutex<HashMap<String, AccountSync>>>,
}

impl Loader {
    pub fn new(syncer: Arc<Syncer>, settings: LoaderSettings) -> (Self, flume::Receiver<LoaderEvent>) {
        let (tx, rx) = flume::unbounded();
        let loader = Self {
            syncer,
            settings,
            events: tx,
            accounts: Arc::new(Mutex::new(HashMap::new())),
        };
        (loader, rx)
    }

    pub fn syncer(&self) -> &Arc<Syncer> {
        &self.syncer
    }

    // ========== Loads ==========

    /// Cached mailboxes if any (plus a background cycle), else a network
    /// fetch written through to the store.
    pub async fn load_mailboxes(&self, account_id: &str) -> Result<Loaded<Vec<Mailbox>>> {
        let cached = self.syncer.get_cached_mailboxes(account_id)?;
        if !cached.is_empty() {
            debug!("Serving {} cached mailboxes for {}", cached.len(), account_id);
            self.schedule_background_sync(account_id, None);
            return Ok(Loaded::cached(cached));
        }

        info!("No cached mailboxes for {}, fetching", account_id);
        let mailboxes = self.syncer.refresh_mailboxes(account_id).await?;
        Ok(Loaded::network(mailboxes))
    }

    /// Same policy as [`Loader::load_mailboxes`], scoped to one mailbox
    pub async fn load_emails(&self, account_id: &str, mailbox_id: &str) -> Result<Loaded<Vec<EmailSummary>>> {
        let cached = self
            .syncer
            .get_cached_emails(mailbox_id, self.settings.page_size)?;
        if !cached.is_empty() {
            debug!("Serving {} cached emails of {}", cached.len(), mailbox_id);
            self.schedule_background_sync(account_id, Some(mailbox_id));
            return Ok(Loaded::cached(cached));
        }

        info!("No cached emails in {}, fetching", mailbox_id);
        let emails = self
            .syncer
            .refresh_emails(account_id, mailbox_id, self.settings.page_size)
            .await?;
        Ok(Loaded::network(emails))
    }

    /// One message with its body. A cached summary without a body counts
    /// as a miss. `None` when the server does not know the message either.
    pub async fn load_email(&self, account_id: &str, email_id: &str) -> Result<Option<Loaded<Email>>> {
        if let Some(email) = self.syncer.get_cached_email_body(email_id)? {
            if email.has_body() {
                return Ok(Some(Loaded::cached(email)));
            }
        }

        let fetched = self
            .syncer
            .fetch_and_cache_email_body(account_id, email_id)
            .await?;
        Ok(fetched.map(Loaded::network))
    }

    /// Load a message for reading and mark it read if it was unread
    pub async fn open_email(
        &self,
        account_id: &str,
        email_id: &str,
        current_mailbox_id: &str,
    ) -> Result<Option<Loaded<Email>>> {
        let loaded = self.load_email(account_id, email_id).await?;
        if let Some(email) = &loaded {
            if email.data.summary.is_unread {
                if let Err(e) = self.mark_read(account_id, email_id, current_mailbox_id).await {
                    warn!("Failed to mark {} as read: {}", email_id, e);
                }
            }
        }
        Ok(loaded)
    }

    /// Network fetch of the mailbox set, bypassing the cache
    pub async fn force_refresh_mailboxes(&self, account_id: &str) -> Result<Loaded<Vec<Mailbox>>> {
        Ok(Loaded::network(self.syncer.refresh_mailboxes(account_id).await?))
    }

    /// Network fetch of one mailbox listing, bypassing the cache
    pub async fn force_refresh_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
    ) -> Result<Loaded<Vec<EmailSummary>>> {
        let emails = self
            .syncer
            .refresh_emails(account_id, mailbox_id, self.settings.page_size)
            .await?;
        Ok(Loaded::network(emails))
    }

    // ========== Background sync ==========

    /// Start a sync cycle for the account on the runtime.
    ///
    /// Refused (returns false) while a cycle for the account is running or
    /// within the cooldown after the last one. Without a mailbox, the
    /// cached inbox is synced.
    pub fn schedule_background_sync(&self, account_id: &str, mailbox_id: Option<&str>) -> bool {
        {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            let entry = accounts.entry(account_id.to_string()).or_default();
            if entry.in_flight {
                debug!("Sync for {} already in flight, skipping", account_id);
                return false;
            }
            if let Some(finished) = entry.last_finished {
                if finished.elapsed() < self.settings.cooldown {
                    debug!("Sync for {} ran {:?} ago, skipping", account_id, finished.elapsed());
                    return false;
                }
            }
            entry.in_flight = true;
        }

        let loader = self.clone();
        let account_id = account_id.to_string();
        let mailbox_id = mailbox_id.map(str::to_string);
        let key = account_id.clone();
        let task = tokio::spawn(async move {
            loader.run_background_sync(account_id, mailbox_id).await;
        });
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .task = Some(task);
        true
    }

    /// Wait for the last scheduled cycle of the account to finish, including
    /// the release of everything the task held. Returns false when no cycle
    /// was scheduled since the previous join.
    pub async fn join_background_sync(&self, account_id: &str) -> Result<bool> {
        let task = self
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(account_id)
            .and_then(|entry| entry.task.take());

        match task {
            Some(task) => {
                task.await
                    .map_err(|e| AnnealError::Io(format!("Background sync task failed: {}", e)))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_sync_in_flight(&self, account_id: &str) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .map(|entry| entry.in_flight)
            .unwrap_or(false)
    }

    async fn run_background_sync(&self, account_id: String, mailbox_id: Option<String>) {
        let mailbox_id = match mailbox_id {
            Some(id) => Some(id),
            None => self.default_mailbox(&account_id),
        };

        let result = self
            .syncer
            .sync(&account_id, mailbox_id.as_deref(), self.settings.background_email_limit)
            .await;

        {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            let entry = accounts.entry(account_id.clone()).or_default();
            entry.in_flight = false;
            entry.last_finished = Some(Instant::now());
        }

        match result {
            Ok(report) => {
                if let Err(e) = self.emit_refreshed(&account_id, mailbox_id.as_deref(), &report) {
                    warn!("Failed to re-read cache after sync: {}", e);
                }
                self.emit(LoaderEvent::SyncFinished {
                    account_id,
                    report,
                });
            }
            Err(e) => {
                warn!("Background sync for {} failed: {}", account_id, e);
                self.emit(LoaderEvent::SyncFailed {
                    account_id,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Inbox by role, else the first cached mailbox
    fn default_mailbox(&self, account_id: &str) -> Option<String> {
        let mailboxes = self.syncer.get_cached_mailboxes(account_id).ok()?;
        mailboxes
            .iter()
            .find(|m| m.role == Some(MailboxRole::Inbox))
            .or_else(|| mailboxes.first())
            .map(|m| m.id.clone())
    }

    /// Re-read whatever the cycle changed and hand it to the UI
    fn emit_refreshed(&self, account_id: &str, mailbox_id: Option<&str>, report: &SyncReport) -> Result<()> {
        if report.mailboxes_changed() {
            let mailboxes = self.syncer.get_cached_mailboxes(account_id)?;
            self.emit(LoaderEvent::MailboxesRefreshed {
                account_id: account_id.to_string(),
                mailboxes: Loaded::cached(mailboxes),
            });
        }
        if let (true, Some(mailbox_id)) = (report.emails_changed(), mailbox_id) {
            let emails = self
                .syncer
                .get_cached_emails(mailbox_id, self.settings.page_size)?;
            self.emit(LoaderEvent::EmailsRefreshed {
                account_id: account_id.to_string(),
                mailbox_id: mailbox_id.to_string(),
                emails: Loaded::cached(emails),
            });
        }
        Ok(())
    }

    fn emit(&self, event: LoaderEvent) {
        if let Err(e) = self.events.send(event) {
            warn!("Failed to emit loader event: {}", e);
        }
    }

    // ========== Optimistic actions ==========

    pub async fn mark_read(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        let email = self.cached_summary(email_id)?;
        self.syncer
            .apply_local_flags(email_id, false, email.is_flagged)?;
        self.reconcile(
            account_id,
            current_mailbox_id,
            self.syncer
                .send_keywords(account_id, email_id, &[(Keyword::Seen, true)]),
        )
        .await
    }

    pub async fn toggle_unread(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        let email = self.cached_summary(email_id)?;
        let unread = !email.is_unread;
        self.syncer
            .apply_local_flags(email_id, unread, email.is_flagged)?;
        self.reconcile(
            account_id,
            current_mailbox_id,
            self.syncer
                .send_keywords(account_id, email_id, &[(Keyword::Seen, !unread)]),
        )
        .await
    }

    pub async fn toggle_flagged(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        let email = self.cached_summary(email_id)?;
        let flagged = !email.is_flagged;
        self.syncer
            .apply_local_flags(email_id, email.is_unread, flagged)?;
        self.reconcile(
            account_id,
            current_mailbox_id,
            self.syncer
                .send_keywords(account_id, email_id, &[(Keyword::Flagged, flagged)]),
        )
        .await
    }

    pub async fn archive(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        self.move_to_role(account_id, email_id, current_mailbox_id, MailboxRole::Archive)
            .await
    }

    pub async fn trash(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        self.move_to_role(account_id, email_id, current_mailbox_id, MailboxRole::Trash)
            .await
    }

    /// Move back to the inbox
    pub async fn restore(&self, account_id: &str, email_id: &str, current_mailbox_id: &str) -> Result<()> {
        self.move_to_role(account_id, email_id, current_mailbox_id, MailboxRole::Inbox)
            .await
    }

    async fn move_to_role(
        &self,
        account_id: &str,
        email_id: &str,
        current_mailbox_id: &str,
        role: MailboxRole,
    ) -> Result<()> {
        self.cached_summary(email_id)?;
        let target = self.mailbox_by_role(account_id, role)?;
        self.syncer.apply_local_move(email_id, &target.id)?;
        self.reconcile(
            account_id,
            current_mailbox_id,
            self.syncer.send_move(account_id, email_id, &target.id),
        )
        .await
    }

    /// Run the remote half of an action, then overwrite the current listing
    /// with server truth. The remote error wins over a refresh error.
    async fn reconcile<F>(&self, account_id: &str, current_mailbox_id: &str, remote: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let remote_result = remote.await;
        if let Err(e) = &remote_result {
            warn!("Remote action failed for {}: {}", account_id, e);
        }

        let refresh_result = match self.force_refresh_emails(account_id, current_mailbox_id).await {
            Ok(emails) => {
                self.emit(LoaderEvent::EmailsRefreshed {
                    account_id: account_id.to_string(),
                    mailbox_id: current_mailbox_id.to_string(),
                    emails,
                });
                Ok(())
            }
            Err(e) => {
                warn!("Refresh after action failed for {}: {}", current_mailbox_id, e);
                Err(e)
            }
        };

        remote_result?;
        refresh_result
    }

    fn cached_summary(&self, email_id: &str) -> Result<EmailSummary> {
        self.syncer
            .store()
            .get_email(email_id)?
            .ok_or_else(|| AnnealError::InvalidInput(format!("Email {} is not cached", email_id)))
    }

    fn mailbox_by_role(&self, account_id: &str, role: MailboxRole) -> Result<Mailbox> {
        self.syncer
            .get_cached_mailboxes(account_id)?
            .into_iter()
            .find(|m| m.role == Some(role))
            .ok_or_else(|| {
                AnnealError::InvalidInput(format!("No {} mailbox for {}", role.as_str(), account_id))
            })
    }
}
