//! Scripted in-memory backend for syncer and loader tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Changes, MailBackend};
use crate::types::error::{AnnealError, Result};
use crate::types::{Email, EmailSummary, Keyword, Mailbox};

#[derive(Default)]
struct FakeState {
    mailboxes: Vec<Mailbox>,
    mailbox_state: String,
    emails: Vec<EmailSummary>,
    email_state: String,
    bodies: HashMap<String, String>,
    mailbox_changes: HashMap<String, Changes>,
    email_changes: HashMap<String, Changes>,
    failures: HashMap<&'static str, AnnealError>,
    calls: HashMap<&'static str, usize>,
}

/// Server double. Delta calls answer only for scripted tokens and report
/// every other token as unusable.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mailboxes(&self, mailboxes: Vec<Mailbox>, state: &str) {
        let mut inner = self.state.lock().unwrap();
        inner.mailboxes = mailboxes;
        inner.mailbox_state = state.to_string();
    }

    pub fn set_emails(&self, emails: Vec<EmailSummary>, state: &str) {
        let mut inner = self.state.lock().unwrap();
        inner.emails = emails;
        inner.email_state = state.to_string();
    }

    pub fn set_body(&self, email_id: &str, text: &str) {
        let mut inner = self.state.lock().unwrap();
        inner.bodies.insert(email_id.to_string(), text.to_string());
    }

    pub fn script_mailbox_changes(&self, since: &str, changes: Changes) {
        let mut inner = self.state.lock().unwrap();
        inner.mailbox_changes.insert(since.to_string(), changes);
    }

    pub fn script_email_changes(&self, since: &str, changes: Changes) {
        let mut inner = self.state.lock().unwrap();
        inner.email_changes.insert(since.to_string(), changes);
    }

    /// Make every call to `method` fail with `err`
    pub fn fail(&self, method: &'static str, err: AnnealError) {
        self.state.lock().unwrap().failures.insert(method, err);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn email(&self, email_id: &str) -> Option<EmailSummary> {
        let inner = self.state.lock().unwrap();
        inner.emails.iter().find(|e| e.id == email_id).cloned()
    }

    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let mut inner = self.state.lock().unwrap();
        *inner.calls.entry(method).or_insert(0) += 1;
        if let Some(err) = inner.failures.get(method) {
            return Err(err.clone());
        }
        Ok(inner)
    }
}

#[async_trait]
impl MailBackend for FakeBackend {
    async fn fetch_all_mailboxes(&self, _account_id: &str) -> Result<(Vec<Mailbox>, String)> {
        let inner = self.enter("fetch_all_mailboxes")?;
        Ok((inner.mailboxes.clone(), inner.mailbox_state.clone()))
    }

    async fn fetch_mailbox_changes(&self, _account_id: &str, since_state: &str) -> Result<Changes> {
        let inner = self.enter("fetch_mailbox_changes")?;
        inner
            .mailbox_changes
            .get(since_state)
            .cloned()
            .ok_or_else(|| AnnealError::CannotCalculateChanges(since_state.to_string()))
    }

    async fn fetch_mailboxes_by_ids(&self, _account_id: &str, ids: &[String]) -> Result<Vec<Mailbox>> {
        let inner = self.enter("fetch_mailboxes_by_ids")?;
        Ok(inner
            .mailboxes
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn fetch_all_emails(
        &self,
        _account_id: &str,
        mailbox_id: &str,
        limit: usize,
    ) -> Result<(Vec<EmailSummary>, String)> {
        let inner = self.enter("fetch_all_emails")?;
        let mut emails: Vec<EmailSummary> = inner
            .emails
            .iter()
            .filter(|e| e.in_mailbox(mailbox_id))
            .cloned()
            .collect();
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        emails.truncate(limit);
        Ok((emails, inner.email_state.clone()))
    }

    async fn fetch_email_changes(&self, _account_id: &str, since_state: &str) -> Result<Changes> {
        let inner = self.enter("fetch_email_changes")?;
        inner
            .email_changes
            .get(since_state)
            .cloned()
            .ok_or_else(|| AnnealError::CannotCalculateChanges(since_state.to_string()))
    }

    async fn fetch_emails_by_ids(&self, _account_id: &str, ids: &[String]) -> Result<Vec<EmailSummary>> {
        let inner = self.enter("fetch_emails_by_ids")?;
        Ok(inner
            .emails
            .iter()
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect())
    }

    async fn fetch_email(&self, _account_id: &str, email_id: &str) -> Result<Option<Email>> {
        let inner = self.enter("fetch_email")?;
        Ok(inner.emails.iter().find(|e| e.id == email_id).map(|summary| Email {
            summary: summary.clone(),
            text_body: inner.bodies.get(email_id).cloned().unwrap_or_default(),
            html_body: String::new(),
            attachments: vec![],
        }))
    }

    async fn set_keywords(
        &self,
        _account_id: &str,
        email_id: &str,
        keywords: &[(Keyword, bool)],
    ) -> Result<()> {
        let mut inner = self.enter("set_keywords")?;
        let email = inner
            .emails
            .iter_mut()
            .find(|e| e.id == email_id)
            .ok_or_else(|| AnnealError::Remote(format!("notUpdated: {}", email_id)))?;
        for (keyword, value) in keywords {
            match keyword {
                Keyword::Seen => email.is_unread = !value,
                Keyword::Flagged => email.is_flagged = *value,
                Keyword::Draft => email.is_draft = *value,
            }
        }
        Ok(())
    }

    async fn move_email(&self, _account_id: &str, email_id: &str, to_mailbox_id: &str) -> Result<()> {
        let mut inner = self.enter("move_email")?;
        let email = inner
            .emails
            .iter_mut()
            .find(|e| e.id == email_id)
            .ok_or_else(|| AnnealError::Remote(format!("notUpdated: {}", email_id)))?;
        email.mailbox_ids = vec![to_mailbox_id.to_string()];
        Ok(())
    }
}
