//! # Node Configuration
//!
//! Configuration for hub and spoke nodes.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TMON_ROLE=hub                                                      │
//! │     TMON_HUB_URL=https://admin.example.com                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tmon/tmon.toml (Linux)                                   │
//! │     ~/Library/Application Support/org.tmon.tmon/tmon.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [node]
//! role = "spoke"
//! site_url = "https://farm-north.example.com"
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! path = "/var/lib/tmon/spoke.db"
//!
//! [queue]
//! claim_timeout_secs = 300
//! poll_max_commands = 10
//!
//! [hub]
//! url = "https://admin.example.com"
//!
//! [http]
//! connect_timeout_secs = 5
//! request_timeout_secs = 15
//!
//! [settings]
//! unknown_keys = "warehouse"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tmon_core::validation::normalize_site_url;
use tmon_core::{UnknownKeyPolicy, DEFAULT_CLAIM_TIMEOUT_SECS, DEFAULT_POLL_MAX_COMMANDS, MAX_POLL_COMMANDS};

use crate::error::{SyncError, SyncResult};

/// Bounds for outbound HTTP timeouts, in seconds.
const HTTP_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=20;

// =============================================================================
// Node Role
// =============================================================================

/// Which side of the hub/spoke protocol this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Central "TMON Admin" service.
    Hub,

    /// Per-site "Unit Connector" talking to field units.
    #[default]
    Spoke,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Hub => write!(f, "hub"),
            NodeRole::Spoke => write!(f, "spoke"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hub" | "admin" => Ok(NodeRole::Hub),
            "spoke" | "uc" | "unit-connector" => Ok(NodeRole::Spoke),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown node role: '{}'. Valid options: hub, spoke",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// `[node]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default)]
    pub role: NodeRole,

    /// Public URL of this node. A spoke sends it when pairing.
    #[serde(default)]
    pub site_url: Option<String>,
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// Returns `bind_addr:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// `[database]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("org", "tmon", "tmon")
        .map(|dirs| dirs.data_dir().join("tmon.db"))
        .unwrap_or_else(|| PathBuf::from("tmon.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// `[queue]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Claims untouched for this long go back to `queued`.
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    /// Commands handed out per poll when the device does not ask.
    #[serde(default = "default_poll_max")]
    pub poll_max_commands: u32,

    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

fn default_claim_timeout() -> u64 {
    DEFAULT_CLAIM_TIMEOUT_SECS
}

fn default_poll_max() -> u32 {
    DEFAULT_POLL_MAX_COMMANDS
}

fn default_reap_interval() -> u64 {
    60
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            claim_timeout_secs: default_claim_timeout(),
            poll_max_commands: default_poll_max(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

impl QueueSettings {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

/// `[hub]`
///
/// On a spoke: where the hub lives. On a hub: the operator key and the
/// refresh cadence.
#[derive(Clone, Serialize, Deserialize)]
pub struct HubSettings {
    #[serde(default)]
    pub url: Option<String>,

    /// Shared secret for the hub's operator endpoints (`X-TMON-ADMIN`).
    #[serde(default)]
    pub operator_key: Option<String>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_checkin_interval")]
    pub checkin_interval_secs: u64,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_checkin_interval() -> u64 {
    300
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            url: None,
            operator_key: None,
            refresh_interval_secs: default_refresh_interval(),
            checkin_interval_secs: default_checkin_interval(),
        }
    }
}

impl std::fmt::Debug for HubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSettings")
            .field("url", &self.url)
            .field("operator_key", &self.operator_key.as_ref().map(|_| "<redacted>"))
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("checkin_interval_secs", &self.checkin_interval_secs)
            .finish()
    }
}

/// `[http]` - outbound call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[settings]` - device settings schema policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPolicy {
    #[serde(default)]
    pub unknown_keys: UnknownKeyPolicy,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmonConfig {
    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub settings: SettingsPolicy,
}

impl TmonConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`tmon.toml`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, secs) in [
            ("http.connect_timeout_secs", self.http.connect_timeout_secs),
            ("http.request_timeout_secs", self.http.request_timeout_secs),
        ] {
            if !HTTP_TIMEOUT_RANGE.contains(&secs) {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be between {} and {}, got {}",
                    name,
                    HTTP_TIMEOUT_RANGE.start(),
                    HTTP_TIMEOUT_RANGE.end(),
                    secs
                )));
            }
        }

        if self.queue.poll_max_commands == 0 || self.queue.poll_max_commands > MAX_POLL_COMMANDS {
            return Err(SyncError::InvalidConfig(format!(
                "queue.poll_max_commands must be between 1 and {}",
                MAX_POLL_COMMANDS
            )));
        }

        for (name, secs) in [
            ("queue.claim_timeout_secs", self.queue.claim_timeout_secs),
            ("queue.reap_interval_secs", self.queue.reap_interval_secs),
            ("hub.refresh_interval_secs", self.hub.refresh_interval_secs),
            ("hub.checkin_interval_secs", self.hub.checkin_interval_secs),
        ] {
            if secs == 0 {
                return Err(SyncError::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }

        if let Some(ref url) = self.node.site_url {
            normalize_site_url(url)
                .map_err(|e| SyncError::InvalidConfig(format!("node.site_url: {}", e)))?;
        }

        if let Some(ref url) = self.hub.url {
            normalize_site_url(url)
                .map_err(|e| SyncError::InvalidConfig(format!("hub.url: {}", e)))?;

            if self.node.role == NodeRole::Spoke && self.node.site_url.is_none() {
                return Err(SyncError::InvalidConfig(
                    "node.site_url is required when hub.url is set".into(),
                ));
            }
        }

        if matches!(self.hub.operator_key.as_deref(), Some(key) if key.trim().is_empty()) {
            return Err(SyncError::InvalidConfig("hub.operator_key must not be blank".into()));
        }

        Ok(())
    }

    /// Applies `TMON_*` overrides from `lookup`.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(role) = lookup("TMON_ROLE") {
            match role.parse() {
                Ok(parsed) => self.node.role = parsed,
                Err(_) => warn!(role = %role, "Unknown TMON_ROLE in environment"),
            }
        }

        if let Some(url) = lookup("TMON_SITE_URL") {
            debug!(url = %url, "Overriding site URL from environment");
            self.node.site_url = Some(url);
        }

        if let Some(addr) = lookup("TMON_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(port) = lookup("TMON_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!(port = %port, "Invalid TMON_PORT in environment"),
            }
        }

        if let Some(path) = lookup("TMON_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(url) = lookup("TMON_HUB_URL") {
            debug!(url = %url, "Overriding hub URL from environment");
            self.hub.url = Some(url);
        }

        if let Some(key) = lookup("TMON_OPERATOR_KEY") {
            self.hub.operator_key = Some(key);
        }

        if let Some(secs) = lookup("TMON_CLAIM_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.queue.claim_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Invalid TMON_CLAIM_TIMEOUT_SECS in environment"),
            }
        }

        if let Some(max) = lookup("TMON_POLL_MAX") {
            match max.parse::<u32>() {
                Ok(m) => self.queue.poll_max_commands = m,
                Err(_) => warn!(value = %max, "Invalid TMON_POLL_MAX in environment"),
            }
        }

        if let Some(policy) = lookup("TMON_UNKNOWN_KEYS") {
            match policy.parse() {
                Ok(p) => self.settings.unknown_keys = p,
                Err(_) => warn!(value = %policy, "Invalid TMON_UNKNOWN_KEYS in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "tmon", "tmon")
            .map(|dirs| dirs.config_dir().join("tmon.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn role(&self) -> NodeRole {
        self.node.role
    }

    /// Normalized public URL of this node.
    pub fn site_url(&self) -> Option<String> {
        self.node
            .site_url
            .as_deref()
            .and_then(|u| normalize_site_url(u).ok())
    }

    /// Normalized hub URL (spoke side).
    pub fn hub_url(&self) -> Option<String> {
        self.hub.url.as_deref().and_then(|u| normalize_site_url(u).ok())
    }
}
