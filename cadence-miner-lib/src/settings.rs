use std::{io::Write, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, ConfigError, File, FileFormat};
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    probe::ProbeSettings,
    scheduler::SchedulerSettings,
    tls::{ClientIdentityPaths, TlsConfig},
};

pub const DEFAULT_URL: &str = "https://127.0.0.1:19109";
pub const DEFAULT_TARGET_BLOCK_TIME: i64 = 120;
pub const DEFAULT_RETRY_DURATION: i64 = 30;
pub const DEFAULT_PROBE_ATTEMPTS: i64 = 10;
pub const DEFAULT_PROBE_INTERVAL: i64 = 1;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const FOLDER_DIR: &str = ".cadence-miner";

const DEFAULT_CONFIG_FILE_CONTENT: &str = r#"rpc_url = "https://127.0.0.1:19109"
rpc_user = ""
rpc_password = ""
ca_path = ""
cert_path = ""
key_path = ""
target_block_time = 120
retry_duration = 30
startup_probe_attempts = 10
startup_probe_interval = 1
log_file = ""
log_level = "info"
"#;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no home directory")]
    NoHomeDir,

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Raw settings as read from defaults, the config file and overrides.
#[derive(Debug, Deserialize)]
pub struct ConfigSettings {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
    pub target_block_time: i64,
    pub retry_duration: i64,
    pub startup_probe_attempts: i64,
    pub startup_probe_interval: i64,
    pub log_file: String,
    pub log_level: String,
}

/// Validated settings, immutable for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rpc_url: String,
    pub basic_auth: Option<(String, String)>,
    pub tls: TlsConfig,
    pub target_block_time: Duration,
    pub retry_duration: Duration,
    pub probe: ProbeSettings,
    pub log_file: Option<PathBuf>,
    pub log_level: LevelFilter,
}

fn defaults() -> Result<Config, ConfigError> {
    let mut s = Config::new();
    s.set_default("rpc_url", DEFAULT_URL)?;
    s.set_default("rpc_user", "")?;
    s.set_default("rpc_password", "")?;
    s.set_default("ca_path", "")?;
    s.set_default("cert_path", "")?;
    s.set_default("key_path", "")?;
    s.set_default("target_block_time", DEFAULT_TARGET_BLOCK_TIME)?;
    s.set_default("retry_duration", DEFAULT_RETRY_DURATION)?;
    s.set_default("startup_probe_attempts", DEFAULT_PROBE_ATTEMPTS)?;
    s.set_default("startup_probe_interval", DEFAULT_PROBE_INTERVAL)?;
    s.set_default("log_file", "")?;
    s.set_default("log_level", DEFAULT_LOG_LEVEL)?;
    Ok(s)
}

/// `~/.cadence-miner/config.toml`, created with default content if missing.
fn default_config_file() -> Result<PathBuf, SettingsError> {
    let home_dir = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
    let default_config_folder = home_dir.join(FOLDER_DIR);
    let default_config_toml = default_config_folder.join("config.toml");
    if !default_config_toml.exists() {
        if let Err(err) = std::fs::create_dir_all(&default_config_folder) {
            eprintln!(
                "Error: Couldn't create default config folder {}: {}",
                default_config_folder.to_string_lossy(),
                err
            );
        }
        match std::fs::File::create(&default_config_toml) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(DEFAULT_CONFIG_FILE_CONTENT.as_bytes()) {
                    eprintln!(
                        "Error: Couldn't write default config toml file {}: {}",
                        default_config_toml.to_string_lossy(),
                        err
                    );
                }
            }
            Err(err) => {
                eprintln!(
                    "Error: Couldn't create default config toml file {}: {}",
                    default_config_toml.to_string_lossy(),
                    err
                );
            }
        };
    }
    Ok(default_config_toml)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn positive_secs(key: &'static str, value: i64) -> Result<Duration, SettingsError> {
    if value <= 0 {
        return Err(SettingsError::Invalid {
            key,
            reason: format!("must be a positive number of seconds, got {}", value),
        });
    }
    Ok(Duration::from_secs(value as u64))
}

impl ConfigSettings {
    /// Loads defaults, then `config_file` (or the default file in the home
    /// directory), then `overrides`.
    pub fn load(
        config_file: Option<PathBuf>,
        overrides: &[(&str, String)],
    ) -> Result<Settings, SettingsError> {
        let mut s = defaults()?;
        let config_file = match config_file {
            Some(path) => path,
            None => default_config_file()?,
        };
        s.merge(File::from(config_file).required(false))?;
        for (key, value) in overrides {
            s.set(key, value.as_str())?;
        }
        let raw: ConfigSettings = s.try_into()?;
        raw.validate()
    }

    /// Like [`ConfigSettings::load`] but reads TOML from a string.
    pub fn from_toml_str(toml: &str) -> Result<Settings, SettingsError> {
        let mut s = defaults()?;
        s.merge(File::from_str(toml, FileFormat::Toml))?;
        let raw: ConfigSettings = s.try_into()?;
        raw.validate()
    }

    pub fn validate(self) -> Result<Settings, SettingsError> {
        let rpc_url = non_empty(self.rpc_url).ok_or(SettingsError::Invalid {
            key: "rpc_url",
            reason: "must not be empty".to_string(),
        })?;
        let target_block_time = positive_secs("target_block_time", self.target_block_time)?;
        let retry_duration = positive_secs("retry_duration", self.retry_duration)?;
        let probe_interval = positive_secs("startup_probe_interval", self.startup_probe_interval)?;
        let probe_attempts = u32::try_from(self.startup_probe_attempts)
            .ok()
            .filter(|attempts| *attempts >= 1)
            .ok_or_else(|| SettingsError::Invalid {
                key: "startup_probe_attempts",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    u32::MAX,
                    self.startup_probe_attempts
                ),
            })?;

        let client_identity = match (non_empty(self.cert_path), non_empty(self.key_path)) {
            (Some(cert), Some(key)) => Some(ClientIdentityPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(SettingsError::Invalid {
                    key: "key_path",
                    reason: "required when cert_path is set".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(SettingsError::Invalid {
                    key: "cert_path",
                    reason: "required when key_path is set".to_string(),
                })
            }
        };

        let basic_auth = non_empty(self.rpc_user).map(|user| (user, self.rpc_password));
        let log_level = LevelFilter::from_str(self.log_level.trim()).map_err(|_| {
            SettingsError::Invalid {
                key: "log_level",
                reason: format!("unknown level {:?}", self.log_level),
            }
        })?;

        Ok(Settings {
            rpc_url,
            basic_auth,
            tls: TlsConfig {
                ca_path: non_empty(self.ca_path).map(PathBuf::from),
                client_identity,
            },
            target_block_time,
            retry_duration,
            probe: ProbeSettings {
                attempts: probe_attempts,
                interval: probe_interval,
                ..ProbeSettings::default()
            },
            log_file: non_empty(self.log_file).map(PathBuf::from),
            log_level,
        })
    }
}

impl Settings {
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings::new(self.target_block_time, self.retry_duration)
    }
}
