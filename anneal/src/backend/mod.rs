//! Remote mail protocol surface consumed by the syncer
//!
//! The syncer only sees [`MailBackend`]: full fetches that return a state
//! token, delta fetches since a token, and fetches by id. The concrete
//! JMAP client lives in [`jmap`].

pub mod jmap;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;

use crate::types::error::Result;
use crate::types::{Email, EmailSummary, Keyword, Mailbox};

/// Delta between a state token and the server's current state.
///
/// The three id sets are disjoint except that an id may appear in both
/// `destroyed` and `created` when the server recreated it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub destroyed: Vec<String>,
    pub new_state: String,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }

    /// `created ∪ updated`, first occurrence order, no duplicates
    pub fn changed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.created.len() + self.updated.len());
        for id in self.created.iter().chain(self.updated.iter()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Fold a later page of changes into this one.
    ///
    /// An id destroyed after being created or updated in an earlier page is
    /// reported only as destroyed. An id created after being destroyed keeps
    /// both entries so destroy-then-create restores it.
    pub fn merge(&mut self, page: Changes) {
        for id in page.destroyed {
            self.created.retain(|c| c != &id);
            self.updated.retain(|u| u != &id);
            if !self.destroyed.contains(&id) {
                self.destroyed.push(id);
            }
        }
        for id in page.created {
            self.updated.retain(|u| u != &id);
            if !self.created.contains(&id) {
                self.created.push(id);
            }
        }
        for id in page.updated {
            if !self.created.contains(&id) && !self.updated.contains(&id) {
                self.updated.push(id);
            }
        }
        self.new_state = page.new_state;
    }
}

/// Remote mail client.
///
/// Every call names the account explicitly; implementations keep no notion
/// of a "current" account. Any call may fail. The delta calls fail with
/// [`crate::types::error::AnnealError::CannotCalculateChanges`] when the
/// token is no longer usable.
#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Every mailbox plus the current mailbox state token
    async fn fetch_all_mailboxes(&self, account_id: &str) -> Result<(Vec<Mailbox>, String)>;

    async fn fetch_mailbox_changes(&self, account_id: &str, since_state: &str) -> Result<Changes>;

    /// Mailboxes by id; ids the server no longer knows are skipped
    async fn fetch_mailboxes_by_ids(&self, account_id: &str, ids: &[String]) -> Result<Vec<Mailbox>>;

    /// Newest `limit` summaries of a mailbox plus the current email state token
    async fn fetch_all_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
        limit: usize,
    ) -> Result<(Vec<EmailSummary>, String)>;

    async fn fetch_email_changes(&self, account_id: &str, since_state: &str) -> Result<Changes>;

    /// Summaries by id; ids the server no longer knows are skipped
    async fn fetch_emails_by_ids(&self, account_id: &str, ids: &[String]) -> Result<Vec<EmailSummary>>;

    /// One message with body values and attachment descriptors
    async fn fetch_email(&self, account_id: &str, email_id: &str) -> Result<Option<Email>>;

    async fn set_keywords(
        &self,
        account_id: &str,
        email_id: &str,
        keywords: &[(Keyword, bool)],
    ) -> Result<()>;

    /// Replace the email's mailbox set with `to_mailbox_id`
    async fn move_email(&self, account_id: &str, email_id: &str, to_mailbox_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_changed_ids_dedup() {
        let changes = Changes {
            created: ids(&["a", "b"]),
            updated: ids(&["b", "c"]),
            destroyed: ids(&["d"]),
            new_state: "S2".to_string(),
        };
        assert_eq!(changes.changed_ids(), ids(&["a", "b", "c"]));
        assert!(!changes.is_empty());
        assert!(Changes::default().is_empty());
    }

    #[test]
    fn test_merge_pages() {
        let mut changes = Changes {
            created: ids(&["e1", "e2"]),
            updated: ids(&["e5"]),
            destroyed: ids(&["e3"]),
            new_state: "S2".to_string(),
        };
        changes.merge(Changes {
            created: ids(&["e3"]),
            updated: ids(&["e1", "e6"]),
            destroyed: ids(&["e2", "e5"]),
            new_state: "S3".to_string(),
        });

        assert_eq!(changes.created, ids(&["e1", "e3"]));
        assert_eq!(changes.updated, ids(&["e6"]));
        assert_eq!(changes.destroyed, ids(&["e3", "e2", "e5"]));
        assert_eq!(changes.new_state, "S3");
    }
}
