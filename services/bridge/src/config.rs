//! Bridge configuration loading.
//!
//! TOML is the sole file-based config source. CLI flags override TOML
//! values; `PARODUS_URL`/`PARODUS_CLIENT_URL` env vars are read only in
//! `--mode parodus` and only when the TOML config omits the corresponding
//! field (SPEC_FULL.md §A.3).
//!
//! # Required fields
//! - `schema_version = 1`
//! - `uplink.service_name`

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (validated, non-Option)
// ---------------------------------------------------------------------------

/// Top-level bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub schema_version: u32,
    pub downlink: DownlinkSection,
    pub cache: CacheConfig,
    pub webconfig: WebConfigSection,
    pub notifications: NotificationsConfig,
    pub uplink: UplinkSection,
}

#[derive(Debug, Clone)]
pub struct DownlinkSection {
    pub component: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub enable_persistence: bool,
    pub snapshot_path: String,
}

#[derive(Debug, Clone)]
pub struct WebConfigSection {
    pub max_transaction_size: usize,
    pub rollback_enabled: bool,
    pub backup_dir: String,
}

#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    pub enable_param_notifications: bool,
    pub enable_client_notifications: bool,
    pub enable_device_notifications: bool,
}

#[derive(Debug, Clone)]
pub struct UplinkSection {
    pub service_name: String,
    /// `"mock"` or `"parodus"`.
    pub mode: String,
    /// Only populated/used in `--mode parodus`.
    pub parodus_url: Option<String>,
    pub parodus_client_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (Option everywhere)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    downlink: Option<RawDownlinkSection>,
    cache: Option<RawCacheConfig>,
    webconfig: Option<RawWebConfigSection>,
    notifications: Option<RawNotificationsConfig>,
    uplink: Option<RawUplinkSection>,
}

#[derive(Debug, Deserialize)]
struct RawDownlinkSection {
    component: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCacheConfig {
    max_entries: Option<usize>,
    default_ttl_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    enable_persistence: Option<bool>,
    snapshot_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWebConfigSection {
    max_transaction_size: Option<usize>,
    rollback_enabled: Option<bool>,
    backup_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNotificationsConfig {
    enable_param_notifications: Option<bool>,
    enable_client_notifications: Option<bool>,
    enable_device_notifications: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawUplinkSection {
    service_name: Option<String>,
    mode: Option<String>,
    parodus_url: Option<String>,
    parodus_client_url: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI override
// ---------------------------------------------------------------------------

/// CLI-supplied overrides, applied after the TOML file is validated.
/// Mirrors the precedence used for `auth.token_file` in the teacher's
/// forwarder config: explicit values always win over file/env defaults.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub component: Option<String>,
    pub service_name: Option<String>,
    pub mode: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load bridge config from a custom path.
pub fn load_config_from_path(
    path: &Path,
    overrides: &CliOverrides,
) -> Result<BridgeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str, overrides)
}

/// Load bridge config from the default path `/etc/rdkb-bridge/bridge.toml`.
pub fn load_config(overrides: &CliOverrides) -> Result<BridgeConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/rdkb-bridge/bridge.toml"), overrides)
}

/// Load bridge config from a TOML string, applying CLI overrides.
pub fn load_config_from_str(
    toml_str: &str,
    overrides: &CliOverrides,
) -> Result<BridgeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let component = overrides
        .component
        .clone()
        .or(raw.downlink.and_then(|d| d.component))
        .unwrap_or_else(|| "parodus2rbus.client".to_owned());

    let cache = match raw.cache {
        Some(c) => CacheConfig {
            max_entries: c.max_entries.unwrap_or(1000),
            default_ttl_secs: c.default_ttl_secs.unwrap_or(300),
            cleanup_interval_secs: c.cleanup_interval_secs.unwrap_or(60),
            enable_persistence: c.enable_persistence.unwrap_or(false),
            snapshot_path: c
                .snapshot_path
                .unwrap_or_else(|| "/var/lib/rdkb-bridge/cache_snapshot.json".to_owned()),
        },
        None => CacheConfig {
            max_entries: 1000,
            default_ttl_secs: 300,
            cleanup_interval_secs: 60,
            enable_persistence: false,
            snapshot_path: "/var/lib/rdkb-bridge/cache_snapshot.json".to_owned(),
        },
    };

    let webconfig = match raw.webconfig {
        Some(w) => WebConfigSection {
            max_transaction_size: w.max_transaction_size.unwrap_or(100),
            rollback_enabled: w.rollback_enabled.unwrap_or(true),
            backup_dir: w
                .backup_dir
                .unwrap_or_else(|| "/var/lib/rdkb-bridge/webconfig_backups".to_owned()),
        },
        None => WebConfigSection {
            max_transaction_size: 100,
            rollback_enabled: true,
            backup_dir: "/var/lib/rdkb-bridge/webconfig_backups".to_owned(),
        },
    };

    let notifications = match raw.notifications {
        Some(n) => NotificationsConfig {
            enable_param_notifications: n.enable_param_notifications.unwrap_or(true),
            enable_client_notifications: n.enable_client_notifications.unwrap_or(true),
            enable_device_notifications: n.enable_device_notifications.unwrap_or(true),
        },
        None => NotificationsConfig {
            enable_param_notifications: true,
            enable_client_notifications: true,
            enable_device_notifications: true,
        },
    };

    let raw_uplink = raw.uplink.unwrap_or(RawUplinkSection {
        service_name: None,
        mode: None,
        parodus_url: None,
        parodus_client_url: None,
    });

    let service_name = overrides
        .service_name
        .clone()
        .or(raw_uplink.service_name)
        .ok_or_else(|| ConfigError::MissingField("uplink.service_name".to_owned()))?;

    let mode = overrides
        .mode
        .clone()
        .or(raw_uplink.mode)
        .unwrap_or_else(|| "mock".to_owned());
    if mode != "mock" && mode != "parodus" {
        return Err(ConfigError::InvalidValue(format!(
            "uplink.mode must be 'mock' or 'parodus', got '{}'",
            mode
        )));
    }

    let (parodus_url, parodus_client_url) = if mode == "parodus" {
        let url = raw_uplink
            .parodus_url
            .or_else(|| std::env::var("PARODUS_URL").ok());
        let client_url = raw_uplink
            .parodus_client_url
            .or_else(|| std::env::var("PARODUS_CLIENT_URL").ok());
        (url, client_url)
    } else {
        (None, None)
    };

    Ok(BridgeConfig {
        schema_version,
        downlink: DownlinkSection { component },
        cache,
        webconfig,
        notifications,
        uplink: UplinkSection {
            service_name,
            mode,
            parodus_url,
            parodus_client_url,
        },
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
