//! Environment configuration

use crate::llm::LlmConfig;
use crate::runtime::{RetryPolicy, SessionConfig, DEFAULT_COMPLETION_TIMEOUT};
use crate::system_prompt::{PromptPolicy, DEFAULT_HISTORY_TURNS};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("No identity provider configured: set MINDLINE_AUTH_URL or MINDLINE_DEV_TOKENS")]
    NoIdentityProvider,
}

/// Where identities come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// Hosted GoTrue-compatible service
    Hosted { url: String, api_key: Option<String> },
    /// Fixed `token=user[:email]` list
    DevTokens(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_path = var("MINDLINE_DB_PATH").unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.mindline/mindline.db")
        });

        let port = parse(&var, "MINDLINE_PORT")?.unwrap_or(DEFAULT_PORT);

        let completion_timeout = parse::<u64>(&var, "MINDLINE_COMPLETION_TIMEOUT_SECS")?
            .map_or(DEFAULT_COMPLETION_TIMEOUT, Duration::from_secs);
        let history_turns = parse(&var, "MINDLINE_HISTORY_TURNS")?.unwrap_or(DEFAULT_HISTORY_TURNS);
        let max_output_tokens = parse(&var, "MINDLINE_MAX_OUTPUT_TOKENS")?;
        let persist_attempts = match parse::<u32>(&var, "MINDLINE_PERSIST_ATTEMPTS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "MINDLINE_PERSIST_ATTEMPTS",
                    value: "0".to_string(),
                })
            }
            Some(n) => n,
            None => RetryPolicy::default().max_attempts,
        };

        let auth = match (var("MINDLINE_AUTH_URL"), var("MINDLINE_DEV_TOKENS")) {
            (Some(url), _) => AuthConfig::Hosted {
                url,
                api_key: var("MINDLINE_AUTH_API_KEY"),
            },
            (None, Some(tokens)) => AuthConfig::DevTokens(tokens),
            (None, None) => return Err(ConfigError::NoIdentityProvider),
        };

        Ok(Self {
            db_path,
            port,
            llm: LlmConfig {
                gemini_api_key: var("GEMINI_API_KEY"),
                gateway: var("LLM_GATEWAY"),
                model: var("MINDLINE_MODEL"),
            },
            session: SessionConfig {
                completion_timeout,
                persist_retry: RetryPolicy {
                    max_attempts: persist_attempts,
                    ..RetryPolicy::default()
                },
                prompt: PromptPolicy {
                    history_turns,
                    max_output_tokens,
                },
            },
            auth,
        })
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: name,
                value: value.clone(),
            })
        })
        .transpose()
}
