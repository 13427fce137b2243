//! State-token sync
//!
//! Per entity type (mailboxes, emails):
//! - no stored token: full sync, replace the local set, store the new token
//! - stored token: delta since the token; destructions are applied before
//!   the created/updated records are fetched and upserted
//! - the delta call fails: full sync instead, within the same cycle
//!
//! Remote failures are reported in the [`SyncReport`]. Store failures abort
//! the cycle and leave the stored tokens and timestamp untouched.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::sqlite::Store;
use crate::backend::{Changes, MailBackend};
use crate::types::error::{AnnealError, Result};
use crate::types::responses::{SyncCounts, SyncReport};
use crate::types::{Email, EmailSummary, Keyword, Mailbox, SyncState};

#[derive(Debug, Clone, Copy)]
enum Entity {
    Mailboxes,
    Emails,
}

/// Sync orchestrator. Holds no per-account state: the account is passed on
/// every call.
pub struct Syncer {
    store: Arc<Store>,
    backend: Arc<dyn MailBackend>,
}

impl Syncer {
    pub fn new(store: Arc<Store>, backend: Arc<dyn MailBackend>) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ========== Sync cycles ==========

    /// One sync cycle: mailboxes, then the emails of `mailbox_id` if given.
    ///
    /// Remote failures land in [`SyncReport::error`] with zero counts for
    /// the failed type. Only store failures are returned as `Err`.
    pub async fn sync(
        &self,
        account_id: &str,
        mailbox_id: Option<&str>,
        limit: usize,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::new(account_id);
        let mut errors = Vec::new();

        match self.sync_mailboxes(account_id).await {
            Ok(counts) => report.mailboxes = counts,
            Err(e) if e.is_local() => {
                error!("Mailbox sync for {} failed on the store: {}", account_id, e);
                return Err(e);
            }
            Err(e) => {
                log_remote_failure("Mailbox", account_id, &e);
                errors.push(e.to_string());
            }
        }

        if let Some(mailbox_id) = mailbox_id {
            match self.sync_emails(account_id, mailbox_id, limit).await {
                Ok(counts) => report.emails = Some(counts),
                Err(e) if e.is_local() => {
                    error!("Email sync for {} failed on the store: {}", account_id, e);
                    return Err(e);
                }
                Err(e) => {
                    log_remote_failure("Email", account_id, &e);
                    report.emails = Some(SyncCounts::default());
                    errors.push(e.to_string());
                }
            }
        }

        if !errors.is_empty() {
            report.error = Some(errors.join("; "));
        }

        info!(
            "Sync cycle for {} done: mailboxes {:?}, emails {:?}",
            account_id, report.mailboxes, report.emails
        );
        Ok(report)
    }

    /// Sync the mailbox set of an account. Any error is returned as is.
    pub async fn sync_mailboxes(&self, account_id: &str) -> Result<SyncCounts> {
        let token = self.stored_token(account_id, Entity::Mailboxes)?;
        if token.is_empty() {
            info!("No mailbox state for {}, running full mailbox sync", account_id);
            return self.full_mailbox_sync(account_id).await;
        }

        debug!("Incremental mailbox sync for {} since {}", account_id, token);
        match self.backend.fetch_mailbox_changes(account_id, &token).await {
            Ok(changes) => self.apply_mailbox_changes(account_id, changes).await,
            Err(e) if e.is_stale_state() => {
                warn!("Mailbox state {} is stale, falling back to full sync", token);
                self.full_mailbox_sync(account_id).await
            }
            Err(e) => {
                warn!(
                    "Mailbox changes since {} unavailable ({}), falling back to full sync",
                    token, e
                );
                self.full_mailbox_sync(account_id).await
            }
        }
    }

    /// Sync emails: incremental across the account when a token is stored,
    /// otherwise a full listing of `mailbox_id`.
    pub async fn sync_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
        limit: usize,
    ) -> Result<SyncCounts> {
        let token = self.stored_token(account_id, Entity::Emails)?;
        if token.is_empty() {
            info!("No email state for {}, running full email sync of {}", account_id, mailbox_id);
            return self.full_email_sync(account_id, mailbox_id, limit).await;
        }

        debug!("Incremental email sync for {} since {}", account_id, token);
        match self.backend.fetch_email_changes(account_id, &token).await {
            Ok(changes) => self.apply_email_changes(account_id, changes).await,
            Err(e) if e.is_stale_state() => {
                warn!("Email state {} is stale, falling back to full sync", token);
                self.full_email_sync(account_id, mailbox_id, limit).await
            }
            Err(e) => {
                warn!(
                    "Email changes since {} unavailable ({}), falling back to full sync",
                    token, e
                );
                self.full_email_sync(account_id, mailbox_id, limit).await
            }
        }
    }

    async fn full_mailbox_sync(&self, account_id: &str) -> Result<SyncCounts> {
        let (mailboxes, new_state) = self.backend.fetch_all_mailboxes(account_id).await?;
        self.store.save_mailboxes(account_id, &mailboxes)?;
        self.save_token(account_id, Entity::Mailboxes, new_state)?;

        info!("Full mailbox sync for {}: {} mailboxes", account_id, mailboxes.len());
        Ok(SyncCounts {
            created: mailboxes.len(),
            ..Default::default()
        })
    }

    async fn apply_mailbox_changes(&self, account_id: &str, changes: Changes) -> Result<SyncCounts> {
        for id in &changes.destroyed {
            self.store.delete_mailbox(id)?;
        }

        let changed = changes.changed_ids();
        if !changed.is_empty() {
            let mailboxes = self.backend.fetch_mailboxes_by_ids(account_id, &changed).await?;
            for mailbox in &mailboxes {
                self.store.update_mailbox(account_id, mailbox)?;
            }
        }

        self.save_token(account_id, Entity::Mailboxes, changes.new_state)?;

        let counts = SyncCounts {
            created: changes.created.len(),
            updated: changes.updated.len(),
            destroyed: changes.destroyed.len(),
        };
        info!("Incremental mailbox sync for {}: {:?}", account_id, counts);
        Ok(counts)
    }

    async fn full_email_sync(&self, account_id: &str, mailbox_id: &str, limit: usize) -> Result<SyncCounts> {
        let (emails, new_state) = self
            .backend
            .fetch_all_emails(account_id, mailbox_id, limit)
            .await?;
        self.store
            .replace_mailbox_emails(account_id, mailbox_id, &emails, emails.len() < limit)?;
        self.save_token(account_id, Entity::Emails, new_state)?;

        info!("Full email sync for {} / {}: {} emails", account_id, mailbox_id, emails.len());
        Ok(SyncCounts {
            created: emails.len(),
            ..Default::default()
        })
    }

    async fn apply_email_changes(&self, account_id: &str, changes: Changes) -> Result<SyncCounts> {
        if !changes.destroyed.is_empty() {
            self.store.delete_emails(&changes.destroyed)?;
        }

        let changed = changes.changed_ids();
        if !changed.is_empty() {
            let emails = self.backend.fetch_emails_by_ids(account_id, &changed).await?;
            self.store.save_synced_emails(account_id, &emails)?;
        }

        self.save_token(account_id, Entity::Emails, changes.new_state)?;

        let counts = SyncCounts {
            created: changes.created.len(),
            updated: changes.updated.len(),
            destroyed: changes.destroyed.len(),
        };
        info!("Incremental email sync for {}: {:?}", account_id, counts);
        Ok(counts)
    }

    fn stored_token(&self, account_id: &str, entity: Entity) -> Result<String> {
        Ok(self
            .store
            .get_sync_state(account_id)?
            .map(|state| match entity {
                Entity::Mailboxes => state.mailbox_state,
                Entity::Emails => state.email_state,
            })
            .unwrap_or_default())
    }

    fn save_token(&self, account_id: &str, entity: Entity, token: String) -> Result<()> {
        let mut state = self
            .store
            .get_sync_state(account_id)?
            .unwrap_or_else(|| SyncState::new(account_id));
        match entity {
            Entity::Mailboxes => state.mailbox_state = token,
            Entity::Emails => state.email_state = token,
        }
        state.last_sync = Utc::now();
        self.store.save_sync_state(&state)
    }

    // ========== Direct fetches (write-through) ==========

    /// Full mailbox fetch, bypassing the cache. The result is a complete
    /// set, so the mailbox token is stored too.
    pub async fn refresh_mailboxes(&self, account_id: &str) -> Result<Vec<Mailbox>> {
        self.full_mailbox_sync(account_id).await?;
        self.store.get_mailboxes(account_id)
    }

    /// Fetch the newest `limit` emails of a mailbox and overwrite the cached
    /// listing. The email token is left alone: the fetch covers one mailbox
    /// and must not hide changes elsewhere from the next incremental sync.
    pub async fn refresh_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
        limit: usize,
    ) -> Result<Vec<EmailSummary>> {
        let (emails, _state) = self
            .backend
            .fetch_all_emails(account_id, mailbox_id, limit)
            .await?;
        self.store
            .replace_mailbox_emails(account_id, mailbox_id, &emails, emails.len() < limit)?;
        debug!("Refreshed {} emails of {}", emails.len(), mailbox_id);
        self.store.get_emails(mailbox_id, limit)
    }

    /// Fetch one message with its body and cache both
    pub async fn fetch_and_cache_email_body(&self, account_id: &str, email_id: &str) -> Result<Option<Email>> {
        let email = match self.backend.fetch_email(account_id, email_id).await? {
            Some(email) => email,
            None => {
                debug!("Email {} not found on server", email_id);
                return Ok(None);
            }
        };

        self.store
            .save_synced_emails(account_id, std::slice::from_ref(&email.summary))?;
        self.store.save_email_body(&email.body())?;
        Ok(Some(email))
    }

    // ========== Cache reads ==========

    pub fn get_cached_mailboxes(&self, account_id: &str) -> Result<Vec<Mailbox>> {
        self.store.get_mailboxes(account_id)
    }

    pub fn get_cached_emails(&self, mailbox_id: &str, limit: usize) -> Result<Vec<EmailSummary>> {
        self.store.get_emails(mailbox_id, limit)
    }

    pub fn get_cached_email_body(&self, email_id: &str) -> Result<Option<Email>> {
        self.store.get_email_body(email_id)
    }

    pub fn get_cached_thread(&self, thread_id: &str) -> Result<Vec<EmailSummary>> {
        self.store.get_emails_by_thread(thread_id)
    }

    pub fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        self.store.get_sync_state(account_id)
    }

    /// Whether the account has never synced or last synced over `max_age` ago
    pub fn needs_sync(&self, account_id: &str, max_age: Duration) -> Result<bool> {
        Ok(match self.store.get_sync_state(account_id)? {
            Some(state) => Utc::now() - state.last_sync > max_age,
            None => true,
        })
    }

    pub fn has_cached_data(&self, account_id: &str) -> Result<bool> {
        Ok(!self.store.get_mailboxes(account_id)?.is_empty())
    }

    pub fn purge_bodies(&self, max_age: Duration) -> Result<usize> {
        self.store.purge_old_bodies(max_age)
    }

    // ========== Local mutations and their remote counterparts ==========

    /// Optimistic flag update. Returns false if the email is not cached.
    pub fn apply_local_flags(&self, email_id: &str, is_unread: bool, is_flagged: bool) -> Result<bool> {
        self.store.update_email_flags(email_id, is_unread, is_flagged)
    }

    /// Optimistic move: the email's membership becomes `to_mailbox_id` alone
    pub fn apply_local_move(&self, email_id: &str, to_mailbox_id: &str) -> Result<()> {
        self.store
            .update_email_mailboxes(email_id, &[to_mailbox_id.to_string()])
    }

    pub async fn send_keywords(&self, account_id: &str, email_id: &str, keywords: &[(Keyword, bool)]) -> Result<()> {
        self.backend.set_keywords(account_id, email_id, keywords).await
    }

    pub async fn send_move(&self, account_id: &str, email_id: &str, to_mailbox_id: &str) -> Result<()> {
        self.backend.move_email(account_id, email_id, to_mailbox_id).await
    }
}

fn log_remote_failure(entity: &str, account_id: &str, err: &AnnealError) {
    if err.is_transient() {
        warn!("{} sync for {} unreachable, will retry from the stored token: {}", entity, account_id, err);
    } else {
        warn!("{} sync for {} failed: {}", entity, account_id, err);
    }
}
