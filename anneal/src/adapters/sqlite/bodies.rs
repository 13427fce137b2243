use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::emails::{row_to_summary, SUMMARY_COLUMNS, SUMMARY_FIELDS};
use super::{json_column, to_json, to_unix, Store};
use crate::types::error::Result;
use crate::types::{Email, EmailBody};

impl Store {
    /// Summary joined with its body.
    ///
    /// `None` only when the summary is not cached. A summary whose body was
    /// never fetched (or was purged) comes back with empty body fields.
    pub fn get_email_body(&self, email_id: &str) -> Result<Option<Email>> {
        let conn = self.connection()?;
        let email = conn
            .query_row(
                &format!(
                    "SELECT {}, b.text_body, b.html_body, b.attachments_json
                       FROM emails e
                       LEFT JOIN email_bodies b ON b.email_id = e.id
                      WHERE e.id = ?1",
                    SUMMARY_FIELDS
                ),
                params![email_id],
                |row| {
                    Ok(Email {
                        summary: row_to_summary(row)?,
                        text_body: row
                            .get::<_, Option<String>>(SUMMARY_COLUMNS)?
                            .unwrap_or_default(),
                        html_body: row
                            .get::<_, Option<String>>(SUMMARY_COLUMNS + 1)?
                            .unwrap_or_default(),
                        attachments: json_column(row, SUMMARY_COLUMNS + 2)?,
                    })
                },
            )
            .optional()?;
        Ok(email)
    }

    /// Upsert the body row of an email
    pub fn save_email_body(&self, body: &EmailBody) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO email_bodies (email_id, text_body, html_body, attachments_json, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(email_id) DO UPDATE SET
                text_body = excluded.text_body,
                html_body = excluded.html_body,
                attachments_json = excluded.attachments_json,
                fetched_at = excluded.fetched_at",
            params![
                body.email_id,
                body.text_body,
                body.html_body,
                to_json(&body.attachments)?,
                to_unix(&body.fetched_at),
            ],
        )?;
        Ok(())
    }

    pub fn has_email_body(&self, email_id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM email_bodies WHERE email_id = ?1)",
            params![email_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Delete bodies fetched longer than `max_age` ago. Summaries are untouched.
    pub fn purge_old_bodies(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let conn = self.connection()?;
        let purged = conn.execute(
            "DELETE FROM email_bodies WHERE fetched_at < ?1",
            params![to_unix(&cutoff)],
        )?;
        if purged > 0 {
            info!("Purged {} cached bodies older than {}", purged, cutoff);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::types::Attachment;

    fn body(email_id: &str, days_old: i64) -> EmailBody {
        EmailBody {
            email_id: email_id.to_string(),
            text_body: format!("Body of {}", email_id),
            html_body: format!("<p>Body of {}</p>", email_id),
            attachments: vec![Attachment {
                blob_id: format!("blob-{}", email_id),
                name: "report.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size_bytes: 1024,
                is_inline: false,
            }],
            fetched_at: Utc::now() - Duration::days(days_old),
        }
    }

    #[test]
    fn test_get_email_body_left_join() {
        let store = Store::in_memory().expect("Failed to create store");
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();

        let without_body = store.get_email_body("e1").unwrap().expect("summary exists");
        assert_eq!(without_body.id(), "e1");
        assert!(!without_body.has_body());
        assert!(without_body.attachments.is_empty());

        store.save_email_body(&body("e1", 0)).unwrap();
        let with_body = store.get_email_body("e1").unwrap().unwrap();
        assert_eq!(with_body.text_body, "Body of e1");
        assert_eq!(with_body.attachments.len(), 1);
        assert_eq!(with_body.attachments[0].name, "report.pdf");
        assert_eq!(with_body.summary.mailbox_ids, vec!["inbox-1".to_string()]);

        assert!(store.get_email_body("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_email_body_upserts() {
        let store = Store::in_memory().unwrap();
        store
            .save_emails(ACCOUNT, &[email("e1", "t1", &["inbox-1"], 1)])
            .unwrap();
        store.save_email_body(&body("e1", 0)).unwrap();

        let mut replaced = body("e1", 0);
        replaced.text_body = "Second fetch".to_string();
        replaced.attachments.clear();
        store.save_email_body(&replaced).unwrap();

        let loaded = store.get_email_body("e1").unwrap().unwrap();
        assert_eq!(loaded.text_body, "Second fetch");
        assert!(loaded.attachments.is_empty());
        assert!(store.has_email_body("e1").unwrap());
    }

    #[test]
    fn test_purge_old_bodies_keeps_summaries() {
        let store = Store::in_memory().unwrap();
        let summaries = vec![
            email("old", "t1", &["inbox-1"], 1),
            email("fresh", "t2", &["inbox-1"], 2),
        ];
        store.save_emails(ACCOUNT, &summaries).unwrap();
        store.save_email_body(&body("old", 40)).unwrap();
        store.save_email_body(&body("fresh", 1)).unwrap();

        let purged = store.purge_old_bodies(Duration::days(30)).unwrap();
        assert_eq!(purged, 1);

        let old = store.get_email_body("old").unwrap().expect("summary must survive purge");
        assert!(old.text_body.is_empty());
        assert!(old.html_body.is_empty());
        assert!(old.attachments.is_empty());
        assert_eq!(strip_email(old.summary), summaries[0]);

        assert!(store.get_email_body("fresh").unwrap().unwrap().has_body());
        assert_eq!(store.get_emails("inbox-1", 50).unwrap().len(), 2);
    }
}
