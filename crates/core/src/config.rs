use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub inventory: InventoryConfig,
    pub upgrade: UpgradeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
    pub authorize_url: String,
    pub ciba_url: String,
    pub redirect_uri: String,
    pub calendar_redirect_uri: String,
    /// The original deployment disables TLS verification against the
    /// identity provider. Preserved as an explicit opt-in, default off.
    pub accept_invalid_certs: bool,
}

#[derive(Clone, Debug)]
pub struct InventoryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct UpgradeConfig {
    pub grace_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Base URL of the chat frontend; redirect target after a successful
    /// authorization callback.
    pub website_url: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: Option<String>,
    pub authorize_url: Option<String>,
    pub ciba_url: Option<String>,
    pub redirect_uri: Option<String>,
    pub calendar_redirect_uri: Option<String>,
    pub inventory_base_url: Option<String>,
    pub website_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig {
                client_id: String::new(),
                client_secret: String::new().into(),
                token_url: String::new(),
                authorize_url: String::new(),
                ciba_url: String::new(),
                redirect_uri: "http://localhost:8000/callback".to_string(),
                calendar_redirect_uri: "http://localhost:8000/callback/calendar".to_string(),
                accept_invalid_certs: false,
            },
            inventory: InventoryConfig {
                base_url: "http://localhost:9001".to_string(),
                timeout_secs: 30,
            },
            upgrade: UpgradeConfig { grace_secs: 30, poll_interval_secs: 15, max_polls: 60 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                website_url: "http://localhost:3000".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    identity: Option<IdentityPatch>,
    inventory: Option<InventoryPatch>,
    upgrade: Option<UpgradePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: Option<String>,
    authorize_url: Option<String>,
    ciba_url: Option<String>,
    redirect_uri: Option<String>,
    calendar_redirect_uri: Option<String>,
    accept_invalid_certs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct UpgradePatch {
    grace_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    max_polls: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    website_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("veranda.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(identity) = patch.identity {
            if let Some(client_id) = identity.client_id {
                self.identity.client_id = client_id;
            }
            if let Some(client_secret) = identity.client_secret {
                self.identity.client_secret = client_secret.into();
            }
            if let Some(token_url) = identity.token_url {
                self.identity.token_url = token_url;
            }
            if let Some(authorize_url) = identity.authorize_url {
                self.identity.authorize_url = authorize_url;
            }
            if let Some(ciba_url) = identity.ciba_url {
                self.identity.ciba_url = ciba_url;
            }
            if let Some(redirect_uri) = identity.redirect_uri {
                self.identity.redirect_uri = redirect_uri;
            }
            if let Some(calendar_redirect_uri) = identity.calendar_redirect_uri {
                self.identity.calendar_redirect_uri = calendar_redirect_uri;
            }
            if let Some(accept_invalid_certs) = identity.accept_invalid_certs {
                self.identity.accept_invalid_certs = accept_invalid_certs;
            }
        }

        if let Some(inventory) = patch.inventory {
            if let Some(base_url) = inventory.base_url {
                self.inventory.base_url = base_url;
            }
            if let Some(timeout_secs) = inventory.timeout_secs {
                self.inventory.timeout_secs = timeout_secs;
            }
        }

        if let Some(upgrade) = patch.upgrade {
            if let Some(grace_secs) = upgrade.grace_secs {
                self.upgrade.grace_secs = grace_secs;
            }
            if let Some(poll_interval_secs) = upgrade.poll_interval_secs {
                self.upgrade.poll_interval_secs = poll_interval_secs;
            }
            if let Some(max_polls) = upgrade.max_polls {
                self.upgrade.max_polls = max_polls;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(website_url) = server.website_url {
                self.server.website_url = website_url;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var("VERANDA_CLIENT_ID") {
            self.identity.client_id = value;
        }
        if let Ok(value) = env::var("VERANDA_CLIENT_SECRET") {
            self.identity.client_secret = value.into();
        }
        if let Ok(value) = env::var("VERANDA_TOKEN_URL") {
            self.identity.token_url = value;
        }
        if let Ok(value) = env::var("VERANDA_AUTHORIZE_URL") {
            self.identity.authorize_url = value;
        }
        if let Ok(value) = env::var("VERANDA_CIBA_URL") {
            self.identity.ciba_url = value;
        }
        if let Ok(value) = env::var("VERANDA_REDIRECT_URI") {
            self.identity.redirect_uri = value;
        }
        if let Ok(value) = env::var("VERANDA_CALENDAR_REDIRECT_URI") {
            self.identity.calendar_redirect_uri = value;
        }
        if let Ok(value) = env::var("VERANDA_ACCEPT_INVALID_CERTS") {
            self.identity.accept_invalid_certs = parse_bool("VERANDA_ACCEPT_INVALID_CERTS", &value)?;
        }
        if let Ok(value) = env::var("VERANDA_INVENTORY_URL") {
            self.inventory.base_url = value;
        }
        if let Ok(value) = env::var("VERANDA_WEBSITE_URL") {
            self.server.website_url = value;
        }
        if let Ok(value) = env::var("VERANDA_UPGRADE_GRACE_SECS") {
            self.upgrade.grace_secs = parse_number("VERANDA_UPGRADE_GRACE_SECS", &value)?;
        }
        if let Ok(value) = env::var("VERANDA_UPGRADE_POLL_SECS") {
            self.upgrade.poll_interval_secs = parse_number("VERANDA_UPGRADE_POLL_SECS", &value)?;
        }
        if let Ok(value) = env::var("VERANDA_UPGRADE_MAX_POLLS") {
            self.upgrade.max_polls = parse_number("VERANDA_UPGRADE_MAX_POLLS", &value)?;
        }
        if let Ok(value) = env::var("VERANDA_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("VERANDA_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(client_id) = overrides.client_id {
            self.identity.client_id = client_id;
        }
        if let Some(client_secret) = overrides.client_secret {
            self.identity.client_secret = client_secret.into();
        }
        if let Some(token_url) = overrides.token_url {
            self.identity.token_url = token_url;
        }
        if let Some(authorize_url) = overrides.authorize_url {
            self.identity.authorize_url = authorize_url;
        }
        if let Some(ciba_url) = overrides.ciba_url {
            self.identity.ciba_url = ciba_url;
        }
        if let Some(redirect_uri) = overrides.redirect_uri {
            self.identity.redirect_uri = redirect_uri;
        }
        if let Some(calendar_redirect_uri) = overrides.calendar_redirect_uri {
            self.identity.calendar_redirect_uri = calendar_redirect_uri;
        }
        if let Some(inventory_base_url) = overrides.inventory_base_url {
            self.inventory.base_url = inventory_base_url;
        }
        if let Some(website_url) = overrides.website_url {
            self.server.website_url = website_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.identity.authorize_url.is_empty() && self.identity.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "identity.client_id is required when identity.authorize_url is set".to_string(),
            ));
        }
        if self.upgrade.max_polls == 0 {
            return Err(ConfigError::Validation(
                "upgrade.max_polls must be at least 1".to_string(),
            ));
        }
        if self.upgrade.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "upgrade.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.inventory.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "inventory.base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    if let Ok(from_env) = env::var("VERANDA_CONFIG") {
        let path = PathBuf::from(from_env);
        return path.exists().then_some(path);
    }
    let default = PathBuf::from("veranda.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use crate::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::load(LoadOptions::default()).expect("defaults should load");
        assert_eq!(config.upgrade.grace_secs, 30);
        assert_eq!(config.upgrade.poll_interval_secs, 15);
        assert_eq!(config.upgrade.max_polls, 60);
        assert!(!config.identity.accept_invalid_certs);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
[identity]
client_id = "client-1"
client_secret = "s3cret"
authorize_url = "https://idp.example.com/oauth2/authorize"

[upgrade]
grace_secs = 1
poll_interval_secs = 2
max_polls = 3

[logging]
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("config should load");

        assert_eq!(config.identity.client_id, "client-1");
        assert_eq!(config.identity.client_secret.expose_secret(), "s3cret");
        assert_eq!(config.upgrade.grace_secs, 1);
        assert_eq!(config.upgrade.max_polls, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/veranda.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });
        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn authorize_url_without_client_id_fails_validation() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                authorize_url: Some("https://idp.example.com/authorize".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("identity.client_id"));
    }

    #[test]
    fn programmatic_overrides_take_precedence_over_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[inventory]\nbase_url = \"http://from-file\"\n").expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides {
                inventory_base_url: Some("http://from-override".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("config should load");

        assert_eq!(config.inventory.base_url, "http://from-override");
    }
}
