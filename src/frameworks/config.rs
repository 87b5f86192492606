use serde::Deserialize;
use std::{env, fmt, path::PathBuf, time::Duration};

// Runtime constants and their environment overrides.

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LEADERBOARD_REFRESH: Duration = Duration::from_secs(300);
pub const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const SESSION_REFRESH_RETRY: Duration = Duration::from_secs(30);
pub const REALTIME_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
    File { path: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required setting {key}"),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value}"),
            ConfigError::File { path, message } => {
                write!(f, "failed to read config file {path}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// Optional TOML file; every key may also come from the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    gateway_url: Option<String>,
    anon_key: Option<String>,
    webhook_url: Option<String>,
    session_file: Option<PathBuf>,
    request_timeout_ms: Option<u64>,
    presence_interval_secs: Option<u64>,
    leaderboard_refresh_secs: Option<u64>,
    realtime: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub anon_key: String,
    pub webhook_url: Option<String>,
    pub session_file: Option<PathBuf>,
    pub request_timeout: Duration,
    pub presence_interval: Duration,
    pub leaderboard_refresh: Duration,
    pub realtime: bool,
    // Signs in on startup when no persisted session was restored.
    pub credentials: Option<Credentials>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env::var("SPDM_CONFIG") {
            Ok(path) => Some(std::fs::read_to_string(&path).map_err(|err| ConfigError::File {
                path: path.clone(),
                message: err.to_string(),
            })?),
            Err(_) => None,
        };
        Self::from_sources(file.as_deref(), |key| env::var(key).ok())
    }

    // Environment wins over the file; the file wins over defaults.
    pub fn from_sources(
        file: Option<&str>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig = match file {
            Some(raw) => toml::from_str(raw).map_err(|err| ConfigError::File {
                path: "SPDM_CONFIG".to_string(),
                message: err.to_string(),
            })?,
            None => FileConfig::default(),
        };
        let var = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        let gateway_url = var("SPDM_GATEWAY_URL")
            .or(file.gateway_url)
            .ok_or(ConfigError::Missing("SPDM_GATEWAY_URL"))?;
        let anon_key = var("SPDM_ANON_KEY")
            .or(file.anon_key)
            .ok_or(ConfigError::Missing("SPDM_ANON_KEY"))?;

        let number =
            |key: &'static str, fallback: Option<u64>| -> Result<Option<u64>, ConfigError> {
                match var(key) {
                    Some(value) => value
                        .trim()
                        .parse::<u64>()
                        .map(Some)
                        .map_err(|_| ConfigError::Invalid { key, value }),
                    None => Ok(fallback),
                }
            };
        let request_timeout = number("SPDM_REQUEST_TIMEOUT_MS", file.request_timeout_ms)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let presence_interval = number("SPDM_PRESENCE_INTERVAL_SECS", file.presence_interval_secs)?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PRESENCE_INTERVAL);
        let leaderboard_refresh =
            number("SPDM_LEADERBOARD_REFRESH_SECS", file.leaderboard_refresh_secs)?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LEADERBOARD_REFRESH);

        let realtime = match var("SPDM_REALTIME") {
            Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid {
                key: "SPDM_REALTIME",
                value,
            })?,
            None => file.realtime.unwrap_or(true),
        };

        let credentials = match (var("SPDM_EMAIL"), var("SPDM_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        Ok(Self {
            gateway_url,
            anon_key,
            webhook_url: var("SPDM_WEBHOOK_URL").or(file.webhook_url),
            session_file: var("SPDM_SESSION_FILE").map(PathBuf::from).or(file.session_file),
            request_timeout,
            presence_interval,
            leaderboard_refresh,
            realtime,
            credentials,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
