use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashSet;
use tracing::debug;

use super::{from_unix, json_column, to_json, to_unix, Store};
use crate::types::error::Result;
use crate::types::EmailSummary;

/// Summary columns plus the membership list folded into one text column
/// (ids separated by U+001F). Expects `emails` aliased as `e`.
pub(crate) const SUMMARY_FIELDS: &str = "
    e.id, e.account_id, e.thread_id,
    (SELECT group_concat(m.mailbox_id, char(31))
       FROM email_mailboxes m WHERE m.email_id = e.id),
    e.subject, e.preview, e.from_json, e.to_json, e.cc_json, e.reply_to_json,
    e.received_at, e.size, e.is_unread, e.is_flagged, e.is_draft,
    e.has_attachment, e.updated_at";

/// Number of columns in [`SUMMARY_FIELDS`]
pub(crate) const SUMMARY_COLUMNS: usize = 17;

impl Store {
    /// Summaries in a mailbox, newest first
    pub fn get_emails(&self, mailbox_id: &str, limit: usize) -> Result<Vec<EmailSummary>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emails e
              JOIN email_mailboxes em ON em.email_id = e.id
             WHERE em.mailbox_id = ?1
             ORDER BY e.received_at DESC, e.id
             LIMIT ?2",
            SUMMARY_FIELDS
        ))?;

        let rows = stmt.query_map(params![mailbox_id, limit as i64], row_to_summary)?;
        let mut emails = Vec::new();
        for row in rows {
            emails.push(row?);
        }
        Ok(emails)
    }

    /// Summaries of one conversation, oldest first
    pub fn get_emails_by_thread(&self, thread_id: &str) -> Result<Vec<EmailSummary>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emails e WHERE e.thread_id = ?1 ORDER BY e.received_at ASC, e.id",
            SUMMARY_FIELDS
        ))?;

        let rows = stmt.query_map(params![thread_id], row_to_summary)?;
        let mut emails = Vec::new();
        for row in rows {
            emails.push(row?);
        }
        Ok(emails)
    }

    /// Single summary by id
    pub fn get_email(&self, email_id: &str) -> Result<Option<EmailSummary>> {
        let conn = self.connection()?;
        let email = conn
            .query_row(
                &format!("SELECT {} FROM emails e WHERE e.id = ?1", SUMMARY_FIELDS),
                params![email_id],
                row_to_summary,
            )
            .optional()?;
        Ok(email)
    }

    /// Upsert summaries and add their memberships.
    ///
    /// Membership is additive here: rows for mailboxes missing from
    /// `mailbox_ids` are left alone. Use [`Store::update_email_mailboxes`]
    /// or [`Store::save_synced_emails`] to correct membership.
    pub fn save_emails(&self, account_id: &str, emails: &[EmailSummary]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for email in emails {
            upsert_summary(&tx, account_id, email)?;
            add_memberships(&tx, &email.id, &email.mailbox_ids)?;
        }
        tx.commit()?;
        debug!("Saved {} emails for {}", emails.len(), account_id);
        Ok(())
    }

    /// Upsert summaries fetched from the server, whose `mailbox_ids` is
    /// complete: each email's membership is replaced, not extended.
    pub fn save_synced_emails(&self, account_id: &str, emails: &[EmailSummary]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for email in emails {
            upsert_summary(&tx, account_id, email)?;
            replace_memberships(&tx, &email.id, &email.mailbox_ids)?;
        }
        tx.commit()?;
        debug!("Applied {} synced emails for {}", emails.len(), account_id);
        Ok(())
    }

    /// Install a fresh listing of one mailbox.
    ///
    /// `complete` means the listing holds every email of the mailbox (the
    /// server returned fewer than requested). Only then are memberships of
    /// emails absent from the listing removed. Emails left without any
    /// mailbox are deleted along with their bodies.
    ///
    /// Returns the number of memberships removed.
    pub fn replace_mailbox_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
        emails: &[EmailSummary],
        complete: bool,
    ) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for email in emails {
            upsert_summary(&tx, account_id, email)?;
            replace_memberships(&tx, &email.id, &email.mailbox_ids)?;
        }

        let mut removed = Vec::new();
        if complete {
            let keep: HashSet<&str> = emails.iter().map(|e| e.id.as_str()).collect();
            let current: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT email_id FROM email_mailboxes WHERE mailbox_id = ?1")?;
                let rows = stmt.query_map(params![mailbox_id], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for email_id in current {
                if !keep.contains(email_id.as_str()) {
                    tx.execute(
                        "DELETE FROM email_mailboxes WHERE email_id = ?1 AND mailbox_id = ?2",
                        params![email_id, mailbox_id],
                    )?;
                    removed.push(email_id);
                }
            }

            for email_id in &removed {
                let remaining: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM email_mailboxes WHERE email_id = ?1",
                    params![email_id],
                    |row| row.get(0),
                )?;
                if remaining == 0 {
                    delete_email_rows(&tx, email_id)?;
                }
            }
        }

        tx.commit()?;
        debug!(
            "Replaced listing of mailbox {}: {} emails, {} memberships removed",
            mailbox_id,
            emails.len(),
            removed.len()
        );
        Ok(removed.len())
    }

    /// Replace every membership row of one email
    pub fn update_email_mailboxes(&self, email_id: &str, mailbox_ids: &[String]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        replace_memberships(&tx, email_id, mailbox_ids)?;
        tx.commit()?;
        Ok(())
    }

    /// Current memberships of one email, sorted
    pub fn get_email_mailboxes(&self, email_id: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT mailbox_id FROM email_mailboxes WHERE email_id = ?1 ORDER BY mailbox_id",
        )?;
        let rows = stmt.query_map(params![email_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Remove the body, memberships and summary of one email.
    /// Returns whether the summary existed.
    pub fn delete_email(&self, email_id: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed = delete_email_rows(&tx, email_id)?;
        tx.commit()?;
        Ok(existed)
    }

    /// Batch form of [`Store::delete_email`]; returns how many summaries existed
    pub fn delete_emails(&self, email_ids: &[String]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut count = 0;
        for email_id in email_ids {
            if delete_email_rows(&tx, email_id)? {
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Set the local flag state of a summary. Returns false if it is not cached.
    pub fn update_email_flags(&self, email_id: &str, is_unread: bool, is_flagged: bool) -> Result<bool> {
        let conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE emails SET is_unread = ?2, is_flagged = ?3, updated_at = ?4 WHERE id = ?1",
            params![email_id, is_unread, is_flagged, Utc::now().timestamp()],
        )?;
        Ok(updated > 0)
    }
}

fn upsert_summary(conn: &Connection, account_id: &str, email: &EmailSummary) -> Result<()> {
    conn.execute(
        "INSERT INTO emails (
            id, account_id, thread_id, subject, preview,
            from_json, to_json, cc_json, reply_to_json,
            received_at, size, is_unread, is_flagged, is_draft, has_attachment, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
            account_id = excluded.account_id,
            thread_id = excluded.thread_id,
            subject = excluded.subject,
            preview = excluded.preview,
            from_json = excluded.from_json,
            to_json = excluded.to_json,
            cc_json = excluded.cc_json,
            reply_to_json = excluded.reply_to_json,
            received_at = excluded.received_at,
            size = excluded.size,
            is_unread = excluded.is_unread,
            is_flagged = excluded.is_flagged,
            is_draft = excluded.is_draft,
            has_attachment = excluded.has_attachment,
            updated_at = excluded.updated_at",
        params![
            email.id,
            account_id,
            email.thread_id,
            email.subject,
            email.preview,
            to_json(&email.from)?,
            to_json(&email.to)?,
            to_json(&email.cc)?,
            to_json(&email.reply_to)?,
            to_unix(&email.received_at),
            email.size_bytes as i64,
            email.is_unread,
            email.is_flagged,
            email.is_draft,
            email.has_attachment,
            Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

fn add_memberships(conn: &Connection, email_id: &str, mailbox_ids: &[String]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO email_mailboxes (email_id, mailbox_id) VALUES (?1, ?2)")?;
    for mailbox_id in mailbox_ids {
        stmt.execute(params![email_id, mailbox_id])?;
    }
    Ok(())
}

fn replace_memberships(conn: &Connection, email_id: &str, mailbox_ids: &[String]) -> Result<()> {
    conn.execute("DELETE FROM email_mailboxes WHERE email_id = ?1", params![email_id])?;
    add_memberships(conn, email_id, mailbox_ids)
}

/// Body, then membership, then summary
pub(crate) fn delete_email_rows(conn: &Connection, email_id: &str) -> Result<bool> {
    conn.execute("DELETE FROM email_bodies WHERE email_id = ?1", params![email_id])?;
    conn.execute("DELETE FROM email_mailboxes WHERE email_id = ?1", params![email_id])?;
    let deleted = conn.execute("DELETE FROM emails WHERE id = ?1", params![email_id])?;
    Ok(deleted > 0)
}

pub(crate) fn row_to_summary(row: &Row) -> rusqlite::Result<EmailSummary> {
    let mut mailbox_ids: Vec<String> = row
        .get::<_, Option<String>>(3)?
        .map(|joined| joined.split('\u{1f}').map(str::to_string).collect())
        .unwrap_or_default();
    mailbox_ids.sort();

    Ok(EmailSummary {
        id: row.get(0)?,
        account_id: row.get(1)?,
        thread_id: row.get(2)?,
        mailbox_ids,
        subject: row.get(4)?,
        preview: row.get(5)?,
        from: json_column(row, 6)?,
        to: json_column(row, 7)?,
        cc: json_column(row, 8)?,
        reply_to: json_column(row, 9)?,
        received_at: from_unix(row.get(10)?),
        size_bytes: row.get::<_, i64>(11)?.max(0) as u64,
        is_unread: row.get(12)?,
        is_flagged: row.get(13)?,
        is_draft: row.get(14)?,
        has_attachment: row.get(15)?,
        updated_at: Some(from_unix(row.get(16)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::types::EmailBody;

    fn ids(emails: &[EmailSummary]) -> Vec<&str> {
        emails.iter().map(|e| e.id.as_str()).collect()
    }

    fn body(email_id: &str) -> EmailBody {
        EmailBody {
            email_id: email_id.to_string(),
            text_body: "text".to_string(),
            html_body: String::new(),
            attachments: vec![],
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_get_emails_newest_first_with_limit() {
        let store = Store::in_memory().expect("Failed to create store");
        store
            .save_emails(
                ACCOUNT,
                &[
                    email("e1", "t1", &["inbox-1"], 1),
                    email("e3", "t3", &["inbox-1"], 30),
                    email("e2", "t2", &["inbox-1"], 15),
                    email("e4", "t4", &["archive-1"], 45),
                ],
            )
            .unwrap();

        let all = store.get_emails("inbox-1", 50).unwrap();
        assert_eq!(ids(&all), vec!["e3", "e2", "e1"]);

        let limited = store.get_emails("inbox-1", 2).unwrap();
        assert_eq!(ids(&limited), vec!["e3", "e2"]);

        assert!(store.get_emails("nowhere", 50).unwrap().is_empty());
    }

    #[test]
    fn test_summary_fields_roundtrip() {
        let store = Store::in_memory().unwrap();
        let mut original = email("e1", "t1", &["inbox-1", "archive-1"], 5);
        original.cc = vec![crate::types::EmailAddress::new("Carol", "carol@example.com")];
        original.is_flagged = true;
        original.has_attachment = true;
        store.save_emails(ACCOUNT, &[original.clone()]).unwrap();

        let loaded = store.get_email("e1").unwrap().expect("email should exist");
        assert!(loaded.updated_at.is_some());
        assert_eq!(strip_email(loaded), original);
        assert!(store.get_email("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_emails_replaces_summary() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();

        let mut changed = email("e1", "t1", &["inbox-1"], 1);
        changed.subject = "Edited".to_string();
        changed.is_unread = false;
        store.save_emails(ACCOUNT, &[changed]).unwrap();

        let emails = store.get_emails("inbox-1", 50).unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].subject, "Edited");
        assert!(!emails[0].is_unread);
    }

    #[test]
    fn test_save_emails_membership_is_additive() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["archive-1"], 1)])
            .unwrap();

        assert_eq!(
            store.get_email_mailboxes("e1").unwrap(),
            vec!["archive-1".to_string(), "inbox-1".to_string()]
        );
        assert_eq!(ids(&store.get_emails("inbox-1", 50).unwrap()), vec!["e1"]);
        assert_eq!(ids(&store.get_emails("archive-1", 50).unwrap()), vec!["e1"]);
    }

    #[test]
    fn test_update_email_mailboxes_replaces() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1", "archive-1"], 1)])
            .unwrap();

        store
            .update_email_mailboxes("e1", &["trash-1".to_string()])
            .unwrap();

        assert_eq!(store.get_email_mailboxes("e1").unwrap(), vec!["trash-1".to_string()]);
        assert!(store.get_emails("inbox-1", 50).unwrap().is_empty());
        let in_trash = store.get_emails("trash-1", 50).unwrap();
        assert_eq!(in_trash[0].mailbox_ids, vec!["trash-1".to_string()]);
    }

    #[test]
    fn test_save_synced_emails_replaces_membership() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();
        store
            .save_synced_emails(ACCOUNT, &[email("e1", "t1", &["archive-1"], 1)])
            .unwrap();

        assert_eq!(store.get_email_mailboxes("e1").unwrap(), vec!["archive-1".to_string()]);
    }

    #[test]
    fn test_get_emails_by_thread_oldest_first() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(
                ACCOUNT,
                &[
                    email("reply-2", "t1", &["inbox-1"], 40),
                    email("start", "t1", &["sent-1"], 10),
                    email("reply-1", "t1", &["inbox-1"], 20),
                    email("other", "t2", &["inbox-1"], 30),
                ],
            )
            .unwrap();

        let thread = store.get_emails_by_thread("t1").unwrap();
        assert_eq!(ids(&thread), vec!["start", "reply-1", "reply-2"]);
    }

    #[test]
    fn test_delete_email_removes_all_rows() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1", "archive-1"], 1)])
            .unwrap();
        store.save_email_body(&body("e1")).unwrap();

        assert!(store.delete_email("e1").unwrap());
        assert!(!store.delete_email("e1").unwrap());

        assert!(store.get_email("e1").unwrap().is_none());
        assert!(store.get_email_body("e1").unwrap().is_none());
        assert!(!store.has_email_body("e1").unwrap());
        assert!(store.get_email_mailboxes("e1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_emails_batch() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(
                ACCOUNT,
                &[
                    email("e1", "t1", &["inbox-1"], 1),
                    email("e2", "t2", &["inbox-1"], 2),
                    email("e3", "t3", &["inbox-1"], 3),
                ],
            )
            .unwrap();

        let count = store
            .delete_emails(&["e1".to_string(), "e3".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(ids(&store.get_emails("inbox-1", 50).unwrap()), vec!["e2"]);
    }

    #[test]
    fn test_update_email_flags() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();

        assert!(store.update_email_flags("e1", false, true).unwrap());
        let loaded = store.get_email("e1").unwrap().unwrap();
        assert!(!loaded.is_unread);
        assert!(loaded.is_flagged);
        assert_eq!(loaded.subject, "Subject e1");

        assert!(!store.update_email_flags("missing", false, false).unwrap());
    }

    #[test]
    fn test_replace_mailbox_emails_complete_prunes() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(
                ACCOUNT,
                &[
                    email("stale", "t1", &["inbox-1"], 1),
                    email("shared", "t2", &["inbox-1", "archive-1"], 2),
                    email("kept", "t3", &["inbox-1"], 3),
                ],
            )
            .unwrap();
        store.save_email_body(&body("stale")).unwrap();

        let removed = store
            .replace_mailbox_emails(
                ACCOUNT,
                "inbox-1",
                &[email("kept", "t3", &["inbox-1"], 3), email("new", "t4", &["inbox-1"], 4)],
                true,
            )
            .unwrap();
        assert_eq!(removed, 2);

        assert_eq!(ids(&store.get_emails("inbox-1", 50).unwrap()), vec!["new", "kept"]);
        // Still in another mailbox: summary survives
        assert_eq!(ids(&store.get_emails("archive-1", 50).unwrap()), vec!["shared"]);
        // No membership left: summary and body gone
        assert!(store.get_email("stale").unwrap().is_none());
        assert!(!store.has_email_body("stale").unwrap());
    }

    #[test]
    fn test_replace_mailbox_emails_partial_keeps_older() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("old", "t1", &["inbox-1"], 1)])
            .unwrap();

        let removed = store
            .replace_mailbox_emails(ACCOUNT, "inbox-1", &[email("new", "t2", &["inbox-1"], 9)], false)
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(ids(&store.get_emails("inbox-1", 50).unwrap()), vec!["new", "old"]);
    }
}
