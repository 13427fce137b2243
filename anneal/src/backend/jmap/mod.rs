//! JMAP backend over HTTPS
//!
//! One [`JmapBackend`] serves one configured login. The session resource is
//! fetched once at connect time; every method call afterwards is a POST of
//! a JMAP request envelope to the session's API URL.

pub mod wire;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Changes, MailBackend};
use crate::types::error::{AnnealError, Result};
use crate::types::{Email, EmailSummary, Keyword, Mailbox};
use wire::{
    ChangesResponse, GetResponse, JmapEmail, JmapMailbox, Request, Response, Session, SetResponse,
    BODY_PROPERTIES, SUMMARY_PROPERTIES,
};

/// Fastmail's session resource
pub const DEFAULT_SESSION_URL: &str = "https://api.fastmail.com/jmap/session";

/// Upper bound on ids per `*/get` call
const MAX_IDS_PER_GET: usize = 256;

/// Page size requested from `*/changes`
const MAX_CHANGES_PER_CALL: usize = 256;

pub struct JmapBackend {
    http: Client,
    api_url: Url,
    token: String,
    account_id: String,
    username: String,
}

impl JmapBackend {
    /// Fetch the session resource and resolve the primary mail account
    pub async fn connect(session_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let session_url = Url::parse(session_url)
            .map_err(|e| AnnealError::Config(format!("Invalid session URL {}: {}", session_url, e)))?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnnealError::Network(e.to_string()))?;

        info!("Fetching JMAP session from {}", session_url);
        let session: Session = http
            .get(session_url.clone())
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let account_id = session
            .mail_account_id()
            .ok_or_else(|| AnnealError::Auth("Session has no mail account".to_string()))?
            .to_string();
        let api_url = session_url
            .join(&session.api_url)
            .map_err(|e| AnnealError::Parse(format!("Invalid API URL {}: {}", session.api_url, e)))?;

        info!("JMAP session ready for {} (account {})", session.username, account_id);
        Ok(Self {
            http,
            api_url,
            token: token.to_string(),
            account_id,
            username: session.username,
        })
    }

    /// Primary mail account id from the session
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        let response = self
            .http
            .post(self.api_url.clone())
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<Response>()
            .await?;
        Ok(response)
    }

    /// Run a single method call and decode its response
    async fn single<T: serde::de::DeserializeOwned>(&self, method: &str, arguments: Value) -> Result<T> {
        let mut request = Request::new();
        let call_id = request.invoke(method, arguments);
        let mut response = self.call(&request).await?;
        response.take(&call_id)
    }

    /// Follow `hasMoreChanges` until the server is caught up
    async fn changes(&self, method: &str, account_id: &str, since_state: &str) -> Result<Changes> {
        let mut changes = Changes::default();
        let mut state = since_state.to_string();

        loop {
            let page: ChangesResponse = self
                .single(
                    method,
                    json!({
                        "accountId": account_id,
                        "sinceState": state,
                        "maxChanges": MAX_CHANGES_PER_CALL,
                    }),
                )
                .await?;

            let has_more = page.has_more_changes && page.new_state != state;
            state = page.new_state.clone();
            changes.merge(Changes {
                created: page.created,
                updated: page.updated,
                destroyed: page.destroyed,
                new_state: page.new_state,
            });

            if !has_more {
                break;
            }
            debug!("{}: more changes pending after {}", method, state);
        }

        debug!(
            "{} since {}: {} created, {} updated, {} destroyed",
            method,
            since_state,
            changes.created.len(),
            changes.updated.len(),
            changes.destroyed.len()
        );
        Ok(changes)
    }

    async fn get_emails(
        &self,
        account_id: &str,
        ids: &[String],
        with_bodies: bool,
    ) -> Result<Vec<JmapEmail>> {
        let mut properties: Vec<&str> = SUMMARY_PROPERTIES.to_vec();
        if with_bodies {
            properties.extend_from_slice(BODY_PROPERTIES);
        }

        let mut emails = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_GET) {
            let response: GetResponse<JmapEmail> = self
                .single(
                    "Email/get",
                    json!({
                        "accountId": account_id,
                        "ids": chunk,
                        "properties": properties,
                        "fetchTextBodyValues": with_bodies,
                        "fetchHTMLBodyValues": with_bodies,
                    }),
                )
                .await?;
            if !response.not_found.is_empty() {
                debug!("Email/get: {} ids not found", response.not_found.len());
            }
            emails.extend(response.list);
        }
        Ok(emails)
    }

    async fn update_email(&self, account_id: &str, email_id: &str, patch: Value) -> Result<()> {
        let response: SetResponse = self
            .single(
                "Email/set",
                json!({
                    "accountId": account_id,
                    "update": { email_id: patch },
                }),
            )
            .await?;
        response.check_updated(email_id)
    }
}

#[async_trait]
impl MailBackend for JmapBackend {
    async fn fetch_all_mailboxes(&self, account_id: &str) -> Result<(Vec<Mailbox>, String)> {
        let response: GetResponse<JmapMailbox> = self
            .single("Mailbox/get", json!({ "accountId": account_id, "ids": null }))
            .await?;
        let mailboxes = response
            .list
            .into_iter()
            .map(|m| m.into_mailbox(account_id))
            .collect();
        Ok((mailboxes, response.state))
    }

    async fn fetch_mailbox_changes(&self, account_id: &str, since_state: &str) -> Result<Changes> {
        self.changes("Mailbox/changes", account_id, since_state).await
    }

    async fn fetch_mailboxes_by_ids(&self, account_id: &str, ids: &[String]) -> Result<Vec<Mailbox>> {
        let mut mailboxes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_GET) {
            let response: GetResponse<JmapMailbox> = self
                .single("Mailbox/get", json!({ "accountId": account_id, "ids": chunk }))
                .await?;
            mailboxes.extend(response.list.into_iter().map(|m| m.into_mailbox(account_id)));
        }
        Ok(mailboxes)
    }

    async fn fetch_all_emails(
        &self,
        account_id: &str,
        mailbox_id: &str,
        limit: usize,
    ) -> Result<(Vec<EmailSummary>, String)> {
        let mut request = Request::new();
        let query_id = request.invoke(
            "Email/query",
            json!({
                "accountId": account_id,
                "filter": { "inMailbox": mailbox_id },
                "sort": [{ "property": "receivedAt", "isAscending": false }],
                "limit": limit,
            }),
        );
        let get_id = request.invoke(
            "Email/get",
            json!({
                "accountId": account_id,
                "#ids": { "resultOf": query_id, "name": "Email/query", "path": "/ids" },
                "properties": SUMMARY_PROPERTIES,
            }),
        );

        let mut response = self.call(&request).await?;
        // Surface a query failure rather than the get's resulting error
        let _query: Value = response.take(&query_id)?;
        let emails: GetResponse<JmapEmail> = response.take(&get_id)?;

        let summaries = emails
            .list
            .into_iter()
            .map(|e| e.into_summary(account_id))
            .collect();
        Ok((summaries, emails.state))
    }

    async fn fetch_email_changes(&self, account_id: &str, since_state: &str) -> Result<Changes> {
        self.changes("Email/changes", account_id, since_state).await
    }

    async fn fetch_emails_by_ids(&self, account_id: &str, ids: &[String]) -> Result<Vec<EmailSummary>> {
        let emails = self.get_emails(account_id, ids, false).await?;
        Ok(emails.into_iter().map(|e| e.into_summary(account_id)).collect())
    }

    async fn fetch_email(&self, account_id: &str, email_id: &str) -> Result<Option<Email>> {
        let emails = self
            .get_emails(account_id, &[email_id.to_string()], true)
            .await?;
        Ok(emails.into_iter().next().map(|e| e.into_email(account_id)))
    }

    async fn set_keywords(
        &self,
        account_id: &str,
        email_id: &str,
        keywords: &[(Keyword, bool)],
    ) -> Result<()> {
        let mut patch = Map::new();
        for (keyword, value) in keywords {
            // Unset keywords are removed, not stored as false
            let entry = if *value { Value::Bool(true) } else { Value::Null };
            patch.insert(format!("keywords/{}", keyword.as_str()), entry);
        }
        self.update_email(account_id, email_id, Value::Object(patch)).await
    }

    async fn move_email(&self, account_id: &str, email_id: &str, to_mailbox_id: &str) -> Result<()> {
        self.update_email(
            account_id,
            email_id,
            json!({ "mailboxIds": { to_mailbox_id: true } }),
        )
        .await
    }
}
