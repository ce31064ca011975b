//! # Terminal Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DISCREET_SYNC_MODE=hosted                                          │
//! │     DISCREET_DATABASE_URL=postgres://...                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/discreet-terminal/terminal.toml (Linux)                  │
//! │     ~/Library/Application Support/com.discreet.terminal/terminal.toml  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Mesh, generated peer identifier, seed inventory          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! name = "Front counter"
//!
//! [sync]
//! mode = "mesh"  # mesh | hosted | offline
//!
//! [local]
//! enabled = true
//! channel_name = "discreet_local_sync"
//!
//! [mesh]
//! id_prefix = "discreet"
//! broker_url = "ws://192.168.1.10:9470/broker"
//! connect_timeout_secs = 10
//!
//! [hosted]
//! database_url = "postgres://discreet@db/discreet"
//! store_code = "discreet-k3x9q"
//!
//! [staff]
//! pin = "1234"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use discreet_core::DEFAULT_STAFF_PIN;

use crate::error::{SyncError, SyncResult};
use crate::local::DEFAULT_CHANNEL_NAME;
use crate::mesh::MeshConfig;

// =============================================================================
// Sync Mode
// =============================================================================

/// How this terminal replicates beyond its own process.
///
/// Local tabs are kept in step in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Direct terminal-to-terminal links.
    #[default]
    Mesh,

    /// Shared database keyed by store code.
    Hosted,

    /// No replication beyond local tabs.
    Offline,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Mesh => write!(f, "mesh"),
            SyncMode::Hosted => write!(f, "hosted"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mesh" | "p2p" | "peer" => Ok(SyncMode::Mesh),
            "hosted" | "cloud" => Ok(SyncMode::Hosted),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: mesh, hosted, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// This terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Discreet Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            name: default_device_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,
}

/// Local-tab channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_channel_name")]
    pub channel_name: String,
}

fn default_true() -> bool {
    true
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            enabled: true,
            channel_name: default_channel_name(),
        }
    }
}

/// Peer mesh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSettings {
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Identifier to try before generating one.
    #[serde(default)]
    pub preferred_id: Option<String>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Link listener port. 0 picks a free one.
    #[serde(default)]
    pub port: u16,

    /// Address other terminals dial.
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Rendezvous broker. Without one only terminals in this process can
    /// find each other.
    #[serde(default)]
    pub broker_url: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_max_registration_attempts")]
    pub max_registration_attempts: u32,

    /// Forward received snapshots to the other open links.
    #[serde(default = "default_true")]
    pub relay: bool,
}

fn default_id_prefix() -> String {
    "discreet".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_registration_attempts() -> u32 {
    8
}

impl Default for MeshSettings {
    fn default() -> Self {
        MeshSettings {
            id_prefix: default_id_prefix(),
            preferred_id: None,
            bind_addr: default_bind_addr(),
            port: 0,
            advertise_host: default_advertise_host(),
            broker_url: None,
            connect_timeout_secs: default_connect_timeout(),
            max_registration_attempts: default_max_registration_attempts(),
            relay: true,
        }
    }
}

/// Hosted store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedSettings {
    #[serde(default)]
    pub database_url: Option<String>,

    /// Store to attach to on startup.
    #[serde(default)]
    pub store_code: Option<String>,

    #[serde(default = "default_id_prefix")]
    pub code_prefix: String,
}

impl Default for HostedSettings {
    fn default() -> Self {
        HostedSettings {
            database_url: None,
            store_code: None,
            code_prefix: default_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Overrides the platform data directory location.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffSettings {
    #[serde(default = "default_pin")]
    pub pin: String,
}

fn default_pin() -> String {
    DEFAULT_STAFF_PIN.to_string()
}

impl Default for StaffSettings {
    fn default() -> Self {
        StaffSettings { pin: default_pin() }
    }
}

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub mesh: MeshSettings,

    #[serde(default)]
    pub hosted: HostedSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub staff: StaffSettings,
}

impl TerminalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (terminal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading terminal config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load terminal config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Terminal config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.device.name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device name must not be empty".into()));
        }

        if let Some(ref url) = self.mesh.broker_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Broker URL must start with ws:// or wss://, got: {}",
                    url
                )));
            }
            url::Url::parse(url)?;
        }

        if self.mesh.max_registration_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_registration_attempts must be greater than 0".into(),
            ));
        }

        if self.mesh.id_prefix.is_empty() || self.hosted.code_prefix.is_empty() {
            return Err(SyncError::InvalidConfig("code prefixes must not be empty".into()));
        }

        if self.local.channel_name.is_empty() {
            return Err(SyncError::InvalidConfig("channel_name must not be empty".into()));
        }

        if self.staff.pin.is_empty() {
            return Err(SyncError::InvalidConfig("staff pin must not be empty".into()));
        }

        // Hosted mode without a database is allowed: every hosted call then
        // reports ConfigurationMissing.
        if self.sync.mode == SyncMode::Hosted && self.hosted.database_url.is_none() {
            warn!("Hosted mode selected without a database URL");
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("DISCREET_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(mode) = std::env::var("DISCREET_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(url) = std::env::var("DISCREET_BROKER_URL") {
            debug!(url = %url, "Overriding broker URL from environment");
            self.mesh.broker_url = Some(url);
        }

        if let Ok(id) = std::env::var("DISCREET_PEER_ID") {
            self.mesh.preferred_id = Some(id);
        }

        if let Ok(host) = std::env::var("DISCREET_ADVERTISE_HOST") {
            self.mesh.advertise_host = host;
        }

        if let Ok(port) = std::env::var("DISCREET_MESH_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding mesh port from environment");
                self.mesh.port = p;
            }
        }

        if let Ok(url) = std::env::var("DISCREET_DATABASE_URL") {
            self.hosted.database_url = Some(url);
        }

        if let Ok(code) = std::env::var("DISCREET_STORE_CODE") {
            self.hosted.store_code = Some(code);
        }

        if let Ok(path) = std::env::var("DISCREET_SNAPSHOT_PATH") {
            self.storage.snapshot_path = Some(PathBuf::from(path));
        }

        if let Ok(pin) = std::env::var("DISCREET_STAFF_PIN") {
            self.staff.pin = pin;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "discreet", "terminal")
            .map(|dirs| dirs.config_dir().join("terminal.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    /// Mesh endpoint settings derived from the `[mesh]` section.
    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            id_prefix: self.mesh.id_prefix.clone(),
            preferred_id: self.mesh.preferred_id.clone(),
            bind_addr: self.mesh.bind_addr.clone(),
            port: self.mesh.port,
            advertise_host: self.mesh.advertise_host.clone(),
            connect_timeout: Duration::from_secs(self.mesh.connect_timeout_secs),
            max_registration_attempts: self.mesh.max_registration_attempts,
            relay: self.mesh.relay,
        }
    }
}
