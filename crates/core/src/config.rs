use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DASHBOARD_URL: &str = "ws://localhost:5000/ws";
pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["steamguard.toml", "config/steamguard.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub dashboard: DashboardConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Credentials for the external chat client. The token is never used by this
/// workspace directly; startup still refuses to run without it.
#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub token: SecretString,
    pub application_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardConfig {
    pub url: String,
    pub bot_name: String,
    pub server_label: String,
    pub connect_retry_secs: u64,
    pub reconnect_delay_secs: u64,
    pub outbound_buffer: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub discord_token: Option<String>,
    pub dashboard_url: Option<String>,
    pub log_level: Option<String>,
    pub health_check_port: Option<u16>,
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
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DASHBOARD_URL.to_string(),
            bot_name: "SteamGuard".to_string(),
            server_label: "SteamGuard Multi-Server".to_string(),
            connect_retry_secs: 10,
            reconnect_delay_secs: 5,
            outbound_buffer: 256,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig { token: String::new().into(), application_id: None },
            dashboard: DashboardConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(discord) = patch.discord {
            if let Some(token) = discord.token {
                self.discord.token = secret_value(token);
            }
            if let Some(application_id) = discord.application_id {
                self.discord.application_id = Some(application_id);
            }
        }

        if let Some(dashboard) = patch.dashboard {
            if let Some(url) = dashboard.url {
                self.dashboard.url = url;
            }
            if let Some(bot_name) = dashboard.bot_name {
                self.dashboard.bot_name = bot_name;
            }
            if let Some(server_label) = dashboard.server_label {
                self.dashboard.server_label = server_label;
            }
            if let Some(connect_retry_secs) = dashboard.connect_retry_secs {
                self.dashboard.connect_retry_secs = connect_retry_secs;
            }
            if let Some(reconnect_delay_secs) = dashboard.reconnect_delay_secs {
                self.dashboard.reconnect_delay_secs = reconnect_delay_secs;
            }
            if let Some(outbound_buffer) = dashboard.outbound_buffer {
                self.dashboard.outbound_buffer = outbound_buffer;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        let token = read_env("STEAMGUARD_DISCORD_TOKEN").or_else(|| read_env("DISCORD_TOKEN"));
        if let Some(value) = token {
            self.discord.token = secret_value(value);
        }
        if let Some(value) = read_env("STEAMGUARD_DISCORD_APPLICATION_ID") {
            self.discord.application_id = Some(value);
        }

        let dashboard_url =
            read_env("STEAMGUARD_DASHBOARD_URL").or_else(|| read_env("DASHBOARD_URL"));
        if let Some(value) = dashboard_url {
            self.dashboard.url = value;
        }
        if let Some(value) = read_env("STEAMGUARD_DASHBOARD_BOT_NAME") {
            self.dashboard.bot_name = value;
        }
        if let Some(value) = read_env("STEAMGUARD_DASHBOARD_SERVER_LABEL") {
            self.dashboard.server_label = value;
        }
        if let Some(value) = read_env("STEAMGUARD_DASHBOARD_CONNECT_RETRY_SECS") {
            self.dashboard.connect_retry_secs =
                parse_u64("STEAMGUARD_DASHBOARD_CONNECT_RETRY_SECS", &value)?;
        }
        if let Some(value) = read_env("STEAMGUARD_DASHBOARD_RECONNECT_DELAY_SECS") {
            self.dashboard.reconnect_delay_secs =
                parse_u64("STEAMGUARD_DASHBOARD_RECONNECT_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("STEAMGUARD_DASHBOARD_OUTBOUND_BUFFER") {
            self.dashboard.outbound_buffer =
                parse_usize("STEAMGUARD_DASHBOARD_OUTBOUND_BUFFER", &value)?;
        }

        if let Some(value) = read_env("STEAMGUARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STEAMGUARD_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("STEAMGUARD_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("STEAMGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STEAMGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("STEAMGUARD_LOGGING_LEVEL").or_else(|| read_env("STEAMGUARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STEAMGUARD_LOGGING_FORMAT").or_else(|| read_env("STEAMGUARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(discord_token) = overrides.discord_token {
            self.discord.token = secret_value(discord_token);
        }
        if let Some(dashboard_url) = overrides.dashboard_url {
            self.dashboard.url = dashboard_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_discord(&self.discord)?;
        validate_dashboard(&self.dashboard)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_discord(discord: &DiscordConfig) -> Result<(), ConfigError> {
    if discord.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "discord.token is required. Set DISCORD_TOKEN (or STEAMGUARD_DISCORD_TOKEN) to the bot token from https://discord.com/developers/applications".to_string(),
        ));
    }

    if let Some(application_id) = &discord.application_id {
        if application_id.is_empty() || !application_id.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ConfigError::Validation(
                "discord.application_id must be a numeric snowflake".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_dashboard(dashboard: &DashboardConfig) -> Result<(), ConfigError> {
    let url = dashboard.url.trim();
    if !url.starts_with("ws://") && !url.starts_with("wss://") {
        return Err(ConfigError::Validation(
            "dashboard.url must be a websocket URL (`ws://...` or `wss://...`)".to_string(),
        ));
    }

    if dashboard.connect_retry_secs == 0 || dashboard.connect_retry_secs > 3_600 {
        return Err(ConfigError::Validation(
            "dashboard.connect_retry_secs must be in range 1..=3600".to_string(),
        ));
    }

    if dashboard.reconnect_delay_secs == 0 || dashboard.reconnect_delay_secs > 3_600 {
        return Err(ConfigError::Validation(
            "dashboard.reconnect_delay_secs must be in range 1..=3600".to_string(),
        ));
    }

    if dashboard.outbound_buffer == 0 {
        return Err(ConfigError::Validation(
            "dashboard.outbound_buffer must be greater than zero".to_string(),
        ));
    }

    if dashboard.server_label.trim().is_empty() {
        return Err(ConfigError::Validation(
            "dashboard.server_label must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    discord: Option<DiscordPatch>,
    dashboard: Option<DashboardPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordPatch {
    token: Option<String>,
    application_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardPatch {
    url: Option<String>,
    bot_name: Option<String>,
    server_label: Option<String>,
    connect_retry_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    outbound_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
