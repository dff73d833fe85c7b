use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime configuration. Constructed once and injected into the id codec and
/// the request handlers; nothing reads configuration through globals, so tests
/// can run both id modes side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// When false, external paste ids are the raw decimal ids (pass-through).
    pub use_encrypted_ids: bool,
    /// Key material for id obfuscation. Any string; the cipher key is
    /// digest-derived from it.
    pub id_encryption_key: String,
    pub id_encryption_iv: String,
    pub enable_paste_attachments: bool,
    /// Per-attachment size cap in bytes, pre-encoding. 0 means unlimited.
    pub max_attachment_size: u64,
    pub require_login_to_paste: bool,
    pub enable_user_registration: bool,
    pub attachments_dir: PathBuf,
    pub address: IpAddr,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            use_encrypted_ids: true,
            id_encryption_key: "insecure-default-key".to_string(),
            id_encryption_iv: "insecure-default-iv".to_string(),
            enable_paste_attachments: true,
            max_attachment_size: 0,
            require_login_to_paste: false,
            enable_user_registration: true,
            attachments_dir: PathBuf::from("attachments"),
            address: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
}

impl AppConfig {
    /// Loads `snipbin.toml` (or the file named by `SNIPBIN_CONFIG`) when it
    /// exists, then applies `SNIPBIN_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("SNIPBIN_CONFIG").unwrap_or_else(|_| "snipbin.toml".to_string());
        let path = Path::new(&path);
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(path.to_path_buf(), err))?;
        toml::from_str(&raw).map_err(|err| ConfigError::Parse(path.to_path_buf(), err))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_bool("SNIPBIN_USE_ENCRYPTED_IDS", &mut self.use_encrypted_ids)?;
        env_string("SNIPBIN_ID_ENCRYPTION_KEY", &mut self.id_encryption_key);
        env_string("SNIPBIN_ID_ENCRYPTION_IV", &mut self.id_encryption_iv);
        env_bool(
            "SNIPBIN_ENABLE_PASTE_ATTACHMENTS",
            &mut self.enable_paste_attachments,
        )?;
        if let Ok(value) = env::var("SNIPBIN_MAX_ATTACHMENT_SIZE") {
            self.max_attachment_size = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("SNIPBIN_MAX_ATTACHMENT_SIZE", value))?;
        }
        env_bool(
            "SNIPBIN_REQUIRE_LOGIN_TO_PASTE",
            &mut self.require_login_to_paste,
        )?;
        env_bool(
            "SNIPBIN_ENABLE_USER_REGISTRATION",
            &mut self.enable_user_registration,
        )?;
        if let Ok(value) = env::var("SNIPBIN_ATTACHMENTS_DIR") {
            self.attachments_dir = PathBuf::from(value);
        }
        if let Ok(value) = env::var("SNIPBIN_ADDRESS") {
            self.address = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("SNIPBIN_ADDRESS", value))?;
        }
        if let Ok(value) = env::var("SNIPBIN_PORT") {
            self.port = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("SNIPBIN_PORT", value))?;
        }
        Ok(())
    }
}

fn env_string(key: &'static str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn env_bool(key: &'static str, target: &mut bool) -> Result<(), ConfigError> {
    if let Ok(value) = env::var(key) {
        *target = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::InvalidEnv(key, value)),
        };
    }
    Ok(())
}
