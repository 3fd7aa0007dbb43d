use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use steamguard_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

use super::CommandResult;

struct Field<'a> {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: &'a str,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("config", "config_validation", error.to_string(), 2)
        }
    };

    let file_path = resolve_config_path(options.config_path.as_deref());
    let file_doc = load_config_file_doc(file_path.as_deref());

    let token = redact_token(config.discord.token.expose_secret());
    let application_id = config.discord.application_id.as_deref().unwrap_or("<unset>");
    let connect_retry_secs = config.dashboard.connect_retry_secs.to_string();
    let reconnect_delay_secs = config.dashboard.reconnect_delay_secs.to_string();
    let outbound_buffer = config.dashboard.outbound_buffer.to_string();
    let health_check_port = config.server.health_check_port.to_string();
    let graceful_shutdown_secs = config.server.graceful_shutdown_secs.to_string();
    let log_format = format!("{:?}", config.logging.format).to_ascii_lowercase();

    let fields = [
        Field {
            key: "discord.token",
            env_keys: &["STEAMGUARD_DISCORD_TOKEN", "DISCORD_TOKEN"],
            value: &token,
        },
        Field {
            key: "discord.application_id",
            env_keys: &["STEAMGUARD_DISCORD_APPLICATION_ID"],
            value: application_id,
        },
        Field {
            key: "dashboard.url",
            env_keys: &["STEAMGUARD_DASHBOARD_URL", "DASHBOARD_URL"],
            value: &config.dashboard.url,
        },
        Field {
            key: "dashboard.bot_name",
            env_keys: &["STEAMGUARD_DASHBOARD_BOT_NAME"],
            value: &config.dashboard.bot_name,
        },
        Field {
            key: "dashboard.server_label",
            env_keys: &["STEAMGUARD_DASHBOARD_SERVER_LABEL"],
            value: &config.dashboard.server_label,
        },
        Field {
            key: "dashboard.connect_retry_secs",
            env_keys: &["STEAMGUARD_DASHBOARD_CONNECT_RETRY_SECS"],
            value: &connect_retry_secs,
        },
        Field {
            key: "dashboard.reconnect_delay_secs",
            env_keys: &["STEAMGUARD_DASHBOARD_RECONNECT_DELAY_SECS"],
            value: &reconnect_delay_secs,
        },
        Field {
            key: "dashboard.outbound_buffer",
            env_keys: &["STEAMGUARD_DASHBOARD_OUTBOUND_BUFFER"],
            value: &outbound_buffer,
        },
        Field {
            key: "server.bind_address",
            env_keys: &["STEAMGUARD_SERVER_BIND_ADDRESS"],
            value: &config.server.bind_address,
        },
        Field {
            key: "server.health_check_port",
            env_keys: &["STEAMGUARD_SERVER_HEALTH_CHECK_PORT"],
            value: &health_check_port,
        },
        Field {
            key: "server.graceful_shutdown_secs",
            env_keys: &["STEAMGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: &graceful_shutdown_secs,
        },
        Field {
            key: "logging.level",
            env_keys: &["STEAMGUARD_LOGGING_LEVEL", "STEAMGUARD_LOG_LEVEL"],
            value: &config.logging.level,
        },
        Field {
            key: "logging.format",
            env_keys: &["STEAMGUARD_LOGGING_FORMAT", "STEAMGUARD_LOG_FORMAT"],
            value: &log_format,
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(field, file_doc.as_ref(), file_path.as_deref());
        format!("- {} = {} (source: {source})", field.key, field.value)
    }));

    CommandResult::output(0, lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field<'_>, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    match file_doc {
        Some(doc) if contains_path(doc, field.key) => {
            let file_path = file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            format!("file ({})", file_path.display())
        }
        _ => "default".to_string(),
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

/// Bot tokens are three dot-separated segments; the first only encodes the
/// bot's user id, so it is the one part worth showing.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('.') {
        Some((user_segment, _)) if !user_segment.is_empty() => format!("{user_segment}.***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact_token;

    #[test]
    fn redacts_everything_after_the_user_segment() {
        assert_eq!(redact_token("MTIzNDU2.GhIjKl.secret-part"), "MTIzNDU2.***");
        assert_eq!(redact_token("opaque-token"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }
}
