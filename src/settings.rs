//! Layered configuration for millwright.
//!
//! Precedence: `millwright.toml` → environment (`MILLWRIGHT_*`, `.env`
//! honored) → CLI flags. Every field has a sensible default so a bare
//! `millwright serve` works on an empty directory.
//!
//! ```toml
//! [server]
//! port = 8640
//! db_path = ".millwright/workflow.db"
//!
//! [notify]
//! email_gateway_url = "https://mail.plant.example"
//! email_from = "maintenance@plant.example"
//! line_channel_token = "..."
//! send_timeout_secs = 10
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "millwright.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Base URL of the HTTP mail gateway. Email is disabled when unset.
    pub email_gateway_url: Option<String>,
    pub email_token: Option<String>,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    /// LINE Messaging API channel token. LINE push is disabled when unset.
    pub line_channel_token: Option<String>,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            email_gateway_url: None,
            email_token: None,
            email_from: default_email_from(),
            line_channel_token: None,
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    8640
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".millwright/workflow.db")
}

fn default_email_from() -> String {
    "maintenance@plant.local".to_string()
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Settings {
    /// Load settings from an explicit path, or `millwright.toml` in the
    /// working directory when present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Environment overrides through an injectable lookup, so tests never
    /// mutate process-global state.
    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(port) = get("MILLWRIGHT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = get("MILLWRIGHT_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(url) = get("MILLWRIGHT_EMAIL_GATEWAY_URL") {
            self.notify.email_gateway_url = Some(url);
        }
        if let Some(token) = get("MILLWRIGHT_EMAIL_TOKEN") {
            self.notify.email_token = Some(token);
        }
        if let Some(from) = get("MILLWRIGHT_EMAIL_FROM") {
            self.notify.email_from = from;
        }
        if let Some(token) = get("MILLWRIGHT_LINE_TOKEN") {
            self.notify.line_channel_token = Some(token);
        }
        if let Some(secs) = get("MILLWRIGHT_SEND_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.notify.send_timeout_secs = secs;
        }
    }
}
