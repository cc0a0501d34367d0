use std::{fs::File, io::Read, path::Path, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use whitelist_store::SweeperConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to deserialize config.")]
    Serde(#[from] serde_yaml::Error),
    #[error("Failed to open config file")]
    Io(#[from] std::io::Error),
}

pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    info!("Loading {}", path.as_ref().to_string_lossy());
    let mut file = File::open(path)?;
    let mut s = String::new();
    file.read_to_string(&mut s)?;
    let t: T = serde_yaml::from_str(&s)?;
    Ok(t)
}

/// Like `load_config`, but a missing file just means "use the defaults".
pub fn load_config_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    match load_config(&path) {
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No config at {}, using defaults.", path.as_ref().to_string_lossy());
            Ok(T::default())
        }
        other => other,
    }
}

/// Reply texts. `{player}`, `{count}` etc. get filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub not_whitelisted: String,
    pub no_permission: String,
    pub invalid_id: String,
    pub already_whitelisted: String,
    pub not_found: String,
    pub added: String,
    pub added_temp: String,
    pub removed: String,
    pub list_header: String,
    pub list_empty: String,
    pub search_header: String,
    pub search_none: String,
    pub cleared: String,
    pub count: String,
    pub reloaded: String,
    pub bulk_done: String,
    pub exported: String,
    pub nothing_to_export: String,
    pub imported: String,
    pub document_missing: String,
    pub storage_failed: String,
    pub expired_kick: String,
    pub expired_admin_notice: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            not_whitelisted: "You are not whitelisted on this server.".into(),
            no_permission: "You do not have permission to use this command.".into(),
            invalid_id: "'{player}' is not a valid Steam64 ID.".into(),
            already_whitelisted: "{player} is already whitelisted.".into(),
            not_found: "{player} is not on the whitelist.".into(),
            added: "{player} has been added to the whitelist.".into(),
            added_temp: "{player} has been added to the whitelist for {duration}.".into(),
            removed: "{player} has been removed from the whitelist.".into(),
            list_header: "Whitelisted players (page {page}/{pages}, {total} total):".into(),
            list_empty: "The whitelist is empty.".into(),
            search_header: "{count} whitelisted ids match '{term}':".into(),
            search_none: "No whitelisted ids match '{term}'.".into(),
            cleared: "Removed {count} players from the whitelist.".into(),
            count: "{count} players are whitelisted.".into(),
            reloaded: "Reloaded the whitelist, {count} entries.".into(),
            bulk_done: "Bulk {op}: {succeeded} succeeded, {failed} failed.".into(),
            exported: "Exported {count} ids to {document}.".into(),
            nothing_to_export: "The whitelist is empty, nothing to export.".into(),
            imported: "Imported {imported} ids, {invalid} invalid lines.".into(),
            document_missing: "There is no document called {document}.".into(),
            storage_failed: "Storage error: {reason}".into(),
            expired_kick: "Your whitelist access has expired.".into(),
            expired_admin_notice: "Whitelist access of {player} has expired.".into(),
        }
    }
}

/// Replaces every `{key}` in `template`.
pub fn fill(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// As it sits in `configs/whitelist.yaml`. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfigYaml {
    pub enabled: bool,
    pub command: String,
    pub admin_permission: String,
    pub bypass_permission: Option<String>,
    pub sync_bypass_permission: bool,
    pub data_file: String,
    pub cleanup_interval_secs: u64,
    pub save_interval_secs: u64,
    pub save_immediately: bool,
    pub kick_on_expiration: bool,
    pub notify_admins_on_expiration: bool,
    pub page_size: usize,
    pub log_actions: bool,
    pub messages: Messages,
}

impl Default for WhitelistConfigYaml {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "whitelist".into(),
            admin_permission: "whitelistmanager.admin".into(),
            bypass_permission: None,
            sync_bypass_permission: false,
            data_file: "WhitelistManager.json".into(),
            cleanup_interval_secs: 300,
            save_interval_secs: 60,
            save_immediately: false,
            kick_on_expiration: true,
            notify_admins_on_expiration: true,
            page_size: 10,
            log_actions: true,
            messages: Messages::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhitelistConfig {
    pub enabled: bool,
    pub command: String,
    pub admin_permission: String,
    /// Holders may join without being on the whitelist.
    pub bypass_permission: Option<String>,
    /// Grant the bypass permission on `add`, revoke it on `remove`.
    pub sync_bypass_permission: bool,
    pub data_file: String,
    pub cleanup_interval: Duration,
    pub save_interval: Duration,
    pub save_immediately: bool,
    pub kick_on_expiration: bool,
    pub notify_admins_on_expiration: bool,
    pub page_size: usize,
    pub log_actions: bool,
    pub messages: Messages,
}

impl WhitelistConfig {
    pub fn from_yaml(other: WhitelistConfigYaml) -> Self {
        Self {
            enabled: other.enabled,
            command: other.command.trim_start_matches('/').to_ascii_lowercase(),
            admin_permission: other.admin_permission,
            bypass_permission: other.bypass_permission.filter(|p| !p.is_empty()),
            sync_bypass_permission: other.sync_bypass_permission,
            data_file: other.data_file,
            cleanup_interval: Duration::from_secs(other.cleanup_interval_secs.max(1)),
            save_interval: Duration::from_secs(other.save_interval_secs.max(1)),
            save_immediately: other.save_immediately,
            kick_on_expiration: other.kick_on_expiration,
            notify_admins_on_expiration: other.notify_admins_on_expiration,
            page_size: other.page_size.max(1),
            log_actions: other.log_actions,
            messages: other.messages,
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.cleanup_interval,
            kick_on_expiration: self.kick_on_expiration,
            kick_message: self.messages.expired_kick.clone(),
            notify_admins: self.notify_admins_on_expiration,
        }
    }

    /// For the `config` command.
    pub fn describe(&self) -> Vec<String> {
        vec![
            format!("enabled: {}", self.enabled),
            format!("command: /{}", self.command),
            format!("admin permission: {}", self.admin_permission),
            format!("bypass permission: {}{}",
                self.bypass_permission.as_deref().unwrap_or("(none)"),
                if self.sync_bypass_permission { " (granted on add)" } else { "" },
            ),
            format!("data file: {}", self.data_file),
            format!("cleanup interval: {}", humantime::format_duration(self.cleanup_interval)),
            format!("save: {}", if self.save_immediately {
                "after every change".to_string()
            } else {
                format!("every {}", humantime::format_duration(self.save_interval))
            }),
            format!("kick on expiration: {}", self.kick_on_expiration),
            format!("notify admins on expiration: {}", self.notify_admins_on_expiration),
            format!("page size: {}", self.page_size),
            format!("log actions: {}", self.log_actions),
        ]
    }
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self::from_yaml(WhitelistConfigYaml::default())
    }
}
