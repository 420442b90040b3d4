//! Environment-backed runtime configuration for `chat-terminal`.

use std::{env, error::Error, fmt, str::FromStr, time::Duration};

use chat_backend::SessionConfig;
use chat_core::{DEFAULT_MAX_ITEMS, ReconnectPolicy, RetryPolicy, User};
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8000/";
const DEFAULT_SEARCH_QUIET_MS: u64 = 500;
const DEFAULT_RECONNECT_BASE_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_VIEWPORT_ROWS: usize = 20;
const DEFAULT_NARROW_COLUMNS: u16 = 768;
const DEFAULT_TERMINAL_COLUMNS: u16 = 80;

/// Identity handed to the in-memory provider at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub user_id: String,
    pub display_name: String,
    pub token: String,
}

impl IdentityConfig {
    pub fn user(&self) -> User {
        User {
            id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            photo_url: None,
        }
    }
}

/// Runtime configuration used by the terminal app.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalConfig {
    /// REST base URL. The live URL is derived from it.
    pub api_url: Url,
    /// Signed-in identity. Without it the session cannot start.
    pub identity: Option<IdentityConfig>,
    pub search_quiet_period: Duration,
    /// Cap on retained timeline messages.
    pub timeline_max_items: usize,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
    /// Message rows rendered per frame.
    pub viewport_rows: usize,
    /// Terminal widths below this count as narrow for the sidebar policy.
    pub narrow_columns: u16,
    /// Terminal width as reported by the shell.
    pub terminal_columns: u16,
}

impl TerminalConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let raw_url = optional_trimmed_env("CHAT_API_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let api_url = Url::parse(&raw_url).map_err(|err| ConfigError::InvalidValue {
            key: "CHAT_API_URL",
            value: raw_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_API_URL",
                value: raw_url,
                reason: "scheme must be http or https".to_owned(),
            });
        }

        let identity = parse_identity(&mut lookup)?;

        let search_quiet_ms =
            parse_or("CHAT_SEARCH_QUIET_MS", DEFAULT_SEARCH_QUIET_MS, &mut lookup)?;
        let timeline_max_items =
            parse_or("CHAT_TIMELINE_MAX_ITEMS", DEFAULT_MAX_ITEMS, &mut lookup)?;
        let request_timeout_ms = parse_or(
            "CHAT_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let viewport_rows = parse_or("CHAT_VIEWPORT_ROWS", DEFAULT_VIEWPORT_ROWS, &mut lookup)?;
        let narrow_columns =
            parse_or("CHAT_NARROW_COLUMNS", DEFAULT_NARROW_COLUMNS, &mut lookup)?;
        let terminal_columns = parse_or("COLUMNS", DEFAULT_TERMINAL_COLUMNS, &mut lookup)?;
        let reconnect = parse_reconnect(&mut lookup)?;

        if timeline_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_TIMELINE_MAX_ITEMS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if viewport_rows == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_VIEWPORT_ROWS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            api_url,
            identity,
            search_quiet_period: Duration::from_millis(search_quiet_ms),
            timeline_max_items,
            reconnect,
            request_timeout: Duration::from_millis(request_timeout_ms),
            viewport_rows,
            narrow_columns,
            terminal_columns,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            search_quiet_period: self.search_quiet_period,
            max_timeline_items: self.timeline_max_items,
            reconnect: self.reconnect,
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_identity<F>(lookup: &mut F) -> Result<Option<IdentityConfig>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let user_id = optional_trimmed_env("CHAT_USER_ID", lookup);
    let token = optional_trimmed_env("CHAT_TOKEN", lookup);
    let display_name = optional_trimmed_env("CHAT_DISPLAY_NAME", lookup);

    match (user_id, token) {
        (Some(user_id), Some(token)) => Ok(Some(IdentityConfig {
            display_name: display_name.unwrap_or_else(|| user_id.clone()),
            user_id,
            token,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::InvalidValue {
            key: "CHAT_TOKEN",
            value: String::new(),
            reason: "required when CHAT_USER_ID is set".to_owned(),
        }),
        (None, Some(_)) => Err(ConfigError::InvalidValue {
            key: "CHAT_USER_ID",
            value: String::new(),
            reason: "required when CHAT_TOKEN is set".to_owned(),
        }),
    }
}

fn parse_reconnect<F>(lookup: &mut F) -> Result<ReconnectPolicy, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mode = optional_trimmed_env("CHAT_RECONNECT", lookup)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "none".to_owned());

    match mode.as_str() {
        "none" => Ok(ReconnectPolicy::None),
        "backoff" => {
            let base_ms = parse_or("CHAT_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS, lookup)?;
            let max_ms = parse_or("CHAT_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS, lookup)?;
            let max_attempts = parse_or(
                "CHAT_RECONNECT_MAX_ATTEMPTS",
                DEFAULT_RECONNECT_MAX_ATTEMPTS,
                lookup,
            )?;
            if max_ms < base_ms {
                return Err(ConfigError::InvalidValue {
                    key: "CHAT_RECONNECT_MAX_MS",
                    value: max_ms.to_string(),
                    reason: format!("must not be below CHAT_RECONNECT_BASE_MS ({base_ms})"),
                });
            }
            Ok(ReconnectPolicy::Backoff {
                policy: RetryPolicy::new(base_ms, max_ms),
                max_attempts,
            })
        }
        _ => Err(ConfigError::InvalidValue {
            key: "CHAT_RECONNECT",
            value: mode,
            reason: "expected 'none' or 'backoff'".to_owned(),
        }),
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
