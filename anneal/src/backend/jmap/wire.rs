//! JMAP request/response envelopes and the mail objects we read
//!
//! Only the properties the cache stores are modelled. Conversion into the
//! domain types happens here so the client code deals in domain values.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::error::{AnnealError, Result};
use crate::types::{Attachment, Email, EmailAddress, EmailSummary, Mailbox, MailboxRole};

pub const CORE_CAPABILITY: &str = "urn:ietf:params:jmap:core";
pub const MAIL_CAPABILITY: &str = "urn:ietf:params:jmap:mail";

/// Properties fetched for list views
pub const SUMMARY_PROPERTIES: &[&str] = &[
    "id",
    "threadId",
    "mailboxIds",
    "keywords",
    "from",
    "to",
    "cc",
    "replyTo",
    "subject",
    "preview",
    "receivedAt",
    "size",
    "hasAttachment",
];

/// Extra properties fetched when a message is opened
pub const BODY_PROPERTIES: &[&str] = &["textBody", "htmlBody", "attachments", "bodyValues"];

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub api_url: String,
    #[serde(default)]
    pub primary_accounts: HashMap<String, String>,
    #[serde(default)]
    pub username: String,
}

impl Session {
    pub fn mail_account_id(&self) -> Option<&str> {
        self.primary_accounts.get(MAIL_CAPABILITY).map(String::as_str)
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// `[name, arguments, call id]`
pub type Invocation = (String, Value, String);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub using: Vec<&'static str>,
    pub method_calls: Vec<Invocation>,
}

impl Request {
    pub fn new() -> Self {
        Self {
            using: vec![CORE_CAPABILITY, MAIL_CAPABILITY],
            method_calls: Vec::new(),
        }
    }

    /// Append a call and return its call id
    pub fn invoke(&mut self, method: &str, arguments: Value) -> String {
        let call_id = self.method_calls.len().to_string();
        self.method_calls
            .push((method.to_string(), arguments, call_id.clone()));
        call_id
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub method_responses: Vec<Invocation>,
    #[serde(default)]
    pub session_state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MethodError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<MethodError> for AnnealError {
    fn from(err: MethodError) -> Self {
        let message = match err.description {
            Some(description) => format!("{}: {}", err.kind, description),
            None => err.kind.clone(),
        };
        match err.kind.as_str() {
            "cannotCalculateChanges" => AnnealError::CannotCalculateChanges(message),
            "accountNotFound" | "forbidden" | "accountNotSupportedByMethod" => {
                AnnealError::Auth(message)
            }
            _ => AnnealError::Remote(message),
        }
    }
}

impl Response {
    /// Arguments of the response to `call_id`, decoded as `T`.
    ///
    /// A method-level `error` response is turned into an [`AnnealError`].
    pub fn take<T: DeserializeOwned>(&mut self, call_id: &str) -> Result<T> {
        let index = self
            .method_responses
            .iter()
            .position(|(_, _, id)| id == call_id)
            .ok_or_else(|| AnnealError::Parse(format!("No response for call {}", call_id)))?;
        let (name, arguments, _) = self.method_responses.swap_remove(index);

        if name == "error" {
            let err: MethodError = serde_json::from_value(arguments)?;
            return Err(err.into());
        }
        Ok(serde_json::from_value(arguments)?)
    }
}

// ============================================================================
// Method responses
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse<T> {
    pub state: String,
    pub list: Vec<T>,
    #[serde(default)]
    pub not_found: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    pub new_state: String,
    #[serde(default)]
    pub has_more_changes: bool,
    #[serde(default)]
    pub created: Vec<String>,
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub destroyed: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse {
    #[serde(default)]
    pub not_updated: Option<HashMap<String, MethodError>>,
}

impl SetResponse {
    /// Fail if the server rejected the update of `id`
    pub fn check_updated(self, id: &str) -> Result<()> {
        match self.not_updated.and_then(|mut rejected| rejected.remove(id)) {
            Some(err) => Err(AnnealError::Remote(format!(
                "notUpdated {}: {}",
                id,
                err.description.unwrap_or(err.kind)
            ))),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Mail objects
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapMailbox {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sort_order: u32,
    #[serde(default)]
    pub total_emails: u32,
    #[serde(default)]
    pub unread_emails: u32,
}

impl JmapMailbox {
    pub fn into_mailbox(self, account_id: &str) -> Mailbox {
        Mailbox {
            id: self.id,
            account_id: account_id.to_string(),
            name: self.name,
            role: self.role.as_deref().and_then(MailboxRole::parse),
            parent_id: self.parent_id,
            total_count: self.total_emails,
            unread_count: self.unread_emails,
            sort_order: self.sort_order,
            updated_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JmapAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub blob_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub disposition: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BodyValue {
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapEmail {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub mailbox_ids: HashMap<String, bool>,
    #[serde(default)]
    pub keywords: HashMap<String, bool>,
    #[serde(default)]
    pub from: Option<Vec<JmapAddress>>,
    #[serde(default)]
    pub to: Option<Vec<JmapAddress>>,
    #[serde(default)]
    pub cc: Option<Vec<JmapAddress>>,
    #[serde(default)]
    pub reply_to: Option<Vec<JmapAddress>>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default)]
    pub text_body: Vec<BodyPart>,
    #[serde(default)]
    pub html_body: Vec<BodyPart>,
    #[serde(default)]
    pub attachments: Vec<BodyPart>,
    #[serde(default)]
    pub body_values: HashMap<String, BodyValue>,
}

fn addresses(list: Option<Vec<JmapAddress>>) -> Vec<EmailAddress> {
    list.unwrap_or_default()
        .into_iter()
        .filter_map(|addr| {
            addr.email
                .map(|email| EmailAddress::new(addr.name.unwrap_or_default(), email))
        })
        .collect()
}

fn keyword(keywords: &HashMap<String, bool>, name: &str) -> bool {
    keywords.get(name).copied().unwrap_or(false)
}

impl JmapEmail {
    pub fn into_summary(self, account_id: &str) -> EmailSummary {
        self.split(account_id).0
    }

    pub fn into_email(self, account_id: &str) -> Email {
        let (summary, text_body, html_body, attachments) = self.split(account_id);
        Email {
            summary,
            text_body,
            html_body,
            attachments,
        }
    }

    fn split(self, account_id: &str) -> (EmailSummary, String, String, Vec<Attachment>) {
        let mut mailbox_ids: Vec<String> = self
            .mailbox_ids
            .into_iter()
            .filter(|(_, member)| *member)
            .map(|(id, _)| id)
            .collect();
        mailbox_ids.sort();

        let concat = |parts: &[BodyPart]| -> String {
            parts
                .iter()
                .filter_map(|part| part.part_id.as_ref())
                .filter_map(|id| self.body_values.get(id))
                .map(|value| value.value.as_str())
                .collect()
        };
        let text_body = concat(&self.text_body);
        let html_body = concat(&self.html_body);

        let attachments = self
            .attachments
            .iter()
            .map(|part| Attachment {
                blob_id: part.blob_id.clone().unwrap_or_default(),
                name: part.name.clone().unwrap_or_default(),
                mime_type: part.mime_type.clone(),
                size_bytes: part.size,
                is_inline: part.disposition.as_deref() == Some("inline"),
            })
            .collect();

        let summary = EmailSummary {
            id: self.id,
            account_id: account_id.to_string(),
            thread_id: self.thread_id,
            mailbox_ids,
            subject: self.subject.unwrap_or_default(),
            preview: self.preview,
            from: addresses(self.from),
            to: addresses(self.to),
            cc: addresses(self.cc),
            reply_to: addresses(self.reply_to),
            received_at: self.received_at.unwrap_or_default(),
            size_bytes: self.size,
            is_unread: !keyword(&self.keywords, "$seen"),
            is_flagged: keyword(&self.keywords, "$flagged"),
            is_draft: keyword(&self.keywords, "$draft"),
            has_attachment: self.has_attachment,
            updated_at: None,
        };

        (summary, text_body, html_body, attachments)
    }
}
