//! Configuration for letterbox

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::smtp::{InboxConfig, QueueFullPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("server.domain must be set")]
    MissingDomain,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read a TOML configuration file.
    ///
    /// Nothing is validated here, so the caller can still fill in missing
    /// values before calling [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Check what a running server cannot do without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.domain.trim().is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        Ok(())
    }
}

/// SMTP listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Domain announced in the greeting and in EHLO/HELO replies
    #[serde(default)]
    pub domain: String,

    /// Address the binary binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Senders whose MAIL ends the session
    #[serde(default)]
    pub sender_blacklist: Vec<String>,

    /// The only recipients RCPT accepts
    #[serde(default)]
    pub recipient_whitelist: Vec<String>,

    /// Seconds a client may stay silent before it gets 421
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,

    /// Seconds a stopping server waits for live sessions
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub inbox: InboxConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            listen: default_listen(),
            sender_blacklist: Vec::new(),
            recipient_whitelist: Vec::new(),
            idle_timeout_secs: default_idle_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            inbox: InboxConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_sender_blacklist<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sender_blacklist = senders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_recipient_whitelist<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipient_whitelist = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// `None` lets clients stay silent forever
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        // Whole seconds in the file; round sub-second values up so they
        // never turn into "no timeout".
        self.idle_timeout_secs = timeout.map(|t| t.as_secs() + u64::from(t.subsec_nanos() > 0));
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_secs = grace.as_secs();
        self
    }

    pub fn with_inbox(mut self, capacity: usize, policy: QueueFullPolicy) -> Self {
        self.inbox = InboxConfig { capacity, policy };
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_listen() -> String {
    "0.0.0.0:1025".to_string()
}

fn default_idle_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

/// Message store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Folder accepted mail is saved into
    #[serde(default = "default_folder")]
    pub folder: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            folder: default_folder(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("letterbox.db")
}

fn default_folder() -> String {
    "INBOX".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Colour the output
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: default_ansi(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}
