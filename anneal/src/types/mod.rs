pub mod error;
pub mod responses;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-defined purpose of a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxRole {
    Inbox,
    Drafts,
    Sent,
    Trash,
    Archive,
    Junk,
}

impl MailboxRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Drafts => "drafts",
            Self::Sent => "sent",
            Self::Trash => "trash",
            Self::Archive => "archive",
            Self::Junk => "junk",
        }
    }

    /// Parse a role string. Roles outside the known set map to `None`.
    pub fn parse(role: &str) -> Option<Self> {
        match role.to_ascii_lowercase().as_str() {
            "inbox" => Some(Self::Inbox),
            "drafts" => Some(Self::Drafts),
            "sent" => Some(Self::Sent),
            "trash" => Some(Self::Trash),
            "archive" => Some(Self::Archive),
            "junk" => Some(Self::Junk),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Inbox => "Inbox",
            Self::Drafts => "Drafts",
            Self::Sent => "Sent",
            Self::Trash => "Trash",
            Self::Archive => "Archive",
            Self::Junk => "Junk",
        }
    }
}

/// Represents a remote folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub role: Option<MailboxRole>,
    pub parent_id: Option<String>,
    pub total_count: u32,
    pub unread_count: u32,
    pub sort_order: u32,
    /// Set by the store on write; `None` for records fresh from the server
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mailbox {
    /// System mailboxes carry a role
    pub fn is_system(&self) -> bool {
        self.role.is_some()
    }

    /// Name to show in the UI
    pub fn display_name(&self) -> &str {
        match &self.role {
            Some(role) => role.display_name(),
            None => &self.name,
        }
    }
}

/// Email address with optional display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

impl EmailAddress {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Just the name, or the address when there is no name
    pub fn short_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

/// Metadata-only projection of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub account_id: String,
    pub thread_id: String,
    /// Current memberships, sorted
    pub mailbox_ids: Vec<String>,
    pub subject: String,
    pub preview: String,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub received_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub is_unread: bool,
    pub is_flagged: bool,
    pub is_draft: bool,
    pub has_attachment: bool,
    /// Set by the store on write; `None` for records fresh from the server
    pub updated_at: Option<DateTime<Utc>>,
}

impl EmailSummary {
    /// Primary sender for list display
    pub fn from_display(&self) -> &str {
        self.from
            .first()
            .map(|addr| addr.short_name())
            .unwrap_or("(unknown)")
    }

    pub fn in_mailbox(&self, mailbox_id: &str) -> bool {
        self.mailbox_ids.iter().any(|id| id == mailbox_id)
    }
}

/// Attachment descriptor; the content stays on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub blob_id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub is_inline: bool,
}

/// Lazily fetched body row, purgeable independently of the summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailBody {
    pub email_id: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    pub fetched_at: DateTime<Utc>,
}

/// A summary joined with its body fields.
///
/// Body fields are empty when the body has not been fetched (or was purged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    #[serde(flatten)]
    pub summary: EmailSummary,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

impl Email {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn has_body(&self) -> bool {
        !self.text_body.is_empty() || !self.html_body.is_empty()
    }

    /// Body row for this message, stamped with the current time
    pub fn body(&self) -> EmailBody {
        EmailBody {
            email_id: self.summary.id.clone(),
            text_body: self.text_body.clone(),
            html_body: self.html_body.clone(),
            attachments: self.attachments.clone(),
            fetched_at: Utc::now(),
        }
    }
}

/// Per-account checkpoint of the remote change history.
///
/// Tokens are opaque: they are stored and replayed, never interpreted.
/// An empty token means the entity type was never synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub account_id: String,
    pub mailbox_state: String,
    pub email_state: String,
    pub last_sync: DateTime<Utc>,
}

impl SyncState {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            mailbox_state: String::new(),
            email_state: String::new(),
            last_sync: Utc::now(),
        }
    }
}

/// Message keywords the client mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    Seen,
    Flagged,
    Draft,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seen => "$seen",
            Self::Flagged => "$flagged",
            Self::Draft => "$draft",
        }
    }
}
