use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::backend::jmap::DEFAULT_SESSION_URL;
use crate::types::error::{AnnealError, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Emails per mailbox listing
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Cache database location (default: data dir/anneal/cache.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Display name for the account
    pub name: String,

    /// Email address
    pub email: String,

    /// Whether this is the default account
    #[serde(default)]
    pub default: bool,

    /// JMAP session resource
    #[serde(default = "default_session_url")]
    pub session_url: String,

    /// API token (can use command for keychain integration)
    pub token: TokenSource,
}

/// Token source - can be raw value or command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenSource {
    /// Raw token value
    Raw(String),
    /// Command to execute to get the token
    Command { command: String },
}

impl TokenSource {
    /// Produce the token, running the command through the shell if needed
    pub fn resolve(&self) -> Result<String> {
        match self {
            TokenSource::Raw(token) => Ok(token.clone()),
            TokenSource::Command { command } => {
                info!("Executing token command");
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .map_err(|e| AnnealError::Config(format!("Failed to run token command: {}", e)))?;

                if !output.status.success() {
                    return Err(AnnealError::Config("Token command failed".to_string()));
                }

                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if token.is_empty() {
                    return Err(AnnealError::Auth("Token command printed nothing".to_string()));
                }
                Ok(token)
            }
        }
    }
}

/// Sync and cache tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Emails fetched per background cycle
    #[serde(default = "default_background_email_limit")]
    pub background_email_limit: usize,

    /// Minimum seconds between two background cycles of one account
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Cached data older than this is considered stale
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Bodies fetched longer ago than this are purged
    #[serde(default = "default_body_max_age_days")]
    pub body_max_age_days: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_page_size() -> usize {
    50
}

fn default_session_url() -> String {
    DEFAULT_SESSION_URL.to_string()
}

fn default_background_email_limit() -> usize {
    100
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_body_max_age_days() -> u32 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            background_email_limit: default_background_email_limit(),
            cooldown_secs: default_cooldown_secs(),
            max_age_secs: default_max_age_secs(),
            body_max_age_days: default_body_max_age_days(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            cache_path: None,
            sync: SyncSettings::default(),
            accounts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from the first existing default path, or defaults if none exists
    pub fn load() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found config at: {:?}", path);
                return Self::load_from_path(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| AnnealError::Config(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AnnealError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The account marked default, else the first one
    pub fn default_account(&self) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.default)
            .or_else(|| self.accounts.first())
    }

    pub fn get_account(&self, name_or_email: &str) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.name == name_or_email || a.email == name_or_email)
    }

    /// Add an account. A new default account clears the flag on the others.
    pub fn add_account(&mut self, account: AccountConfig) -> Result<()> {
        if self.accounts.iter().any(|a| a.email == account.email) {
            return Err(AnnealError::InvalidInput(format!(
                "Account {} already exists",
                account.email
            )));
        }
        if account.default {
            for existing in &mut self.accounts {
                existing.default = false;
            }
        }
        self.accounts.push(account);
        Ok(())
    }

    /// Configured cache location, else the platform data directory
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("anneal").join("cache.db"))
            .ok_or_else(|| AnnealError::Config("Cannot determine data directory".to_string()))
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("anneal").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("anneal").join("config.toml"));
        paths.push(home_dir.join(".anneal.toml"));
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
page_size = 25

[sync]
cooldown_secs = 10

[[accounts]]
name = "personal"
email = "me@fastmail.com"
token = "fmu1-raw"

[[accounts]]
name = "work"
email = "me@work.example"
default = true
session_url = "https://jmap.work.example/session"
token = { command = "pass show jmap/work" }
"#;

    fn account(email: &str, default: bool) -> AccountConfig {
        AccountConfig {
            name: email.to_string(),
            email: email.to_string(),
            default,
            session_url: default_session_url(),
            token: TokenSource::Raw("t".to_string()),
        }
    }

    #[test]
    fn test_parse_config() {
        let config: AppConfig = toml::from_str(SAMPLE).expect("Failed to parse config");

        assert_eq!(config.page_size, 25);
        assert_eq!(config.sync.cooldown_secs, 10);
        assert_eq!(config.sync.background_email_limit, 100);
        assert_eq!(config.sync.body_max_age_days, 30);
        assert!(config.cache_path.is_none());

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].session_url, DEFAULT_SESSION_URL);
        assert!(matches!(config.accounts[0].token, TokenSource::Raw(ref t) if t == "fmu1-raw"));
        assert!(matches!(config.accounts[1].token, TokenSource::Command { .. }));

        assert_eq!(config.default_account().unwrap().name, "work");
        assert_eq!(config.get_account("me@fastmail.com").unwrap().name, "personal");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.sync.max_age_secs, 300);
        assert!(config.default_account().is_none());
    }

    #[test]
    fn test_default_account_falls_back_to_first() {
        let mut config = AppConfig::default();
        config.add_account(account("a@example.com", false)).unwrap();
        config.add_account(account("b@example.com", false)).unwrap();
        assert_eq!(config.default_account().unwrap().email, "a@example.com");
    }

    #[test]
    fn test_add_account() {
        let mut config = AppConfig::default();
        config.add_account(account("a@example.com", true)).unwrap();
        config.add_account(account("b@example.com", true)).unwrap();

        assert!(!config.accounts[0].default);
        assert!(config.accounts[1].default);

        let err = config.add_account(account("a@example.com", false)).unwrap_err();
        assert!(matches!(err, AnnealError::InvalidInput(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("anneal").join("config.toml");

        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.cache_path = Some(dir.path().join("cache.db"));
        config.save_to_path(&path).expect("Failed to save config");

        let reloaded = AppConfig::load_from_path(&path).expect("Failed to reload config");
        assert_eq!(reloaded.accounts.len(), 2);
        assert_eq!(reloaded.page_size, 25);
        assert_eq!(reloaded.cache_path().unwrap(), dir.path().join("cache.db"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "page_size = [").unwrap();
        assert!(matches!(
            AppConfig::load_from_path(&path),
            Err(AnnealError::Config(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_command() {
        let source = TokenSource::Command {
            command: "echo '  secret-token  '".to_string(),
        };
        assert_eq!(source.resolve().unwrap(), "secret-token");

        let failing = TokenSource::Command {
            command: "exit 3".to_string(),
        };
        assert!(failing.resolve().is_err());
    }
}
