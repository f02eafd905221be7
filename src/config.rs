//! Configuration management for the chat server.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `DEFAULT_MODEL` - Optional. Chat model. Defaults to `gpt-3.5-turbo`.
//! - `OPENAI_BASE_URL` - Optional. OpenAI-compatible API root. Defaults to `https://api.openai.com/v1`.
//! - `TEMPERATURE` - Optional. Sampling temperature. Defaults to `0.7`.
//! - `STREAMING` - Optional. Stream model tokens to the page. Defaults to `true`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent steps per answer. Defaults to `15`.
//! - `PARSE_RETRIES` - Optional. Malformed replies fed back before giving up. Defaults to `1`.
//! - `SEARCH_BASE_URL` - Optional. DuckDuckGo HTML root. Defaults to `https://html.duckduckgo.com`.
//! - `SEARCH_MAX_RESULTS` - Optional. Results returned per search. Defaults to `5`.
//! - `SEARCH_TIMEOUT_SECS` - Optional. Per-search time limit. Defaults to `20`.
//! - `LLM_TIMEOUT_SECS` - Optional. Per-request model time limit. Defaults to `120`.
//! - `GREETING` - Optional. First assistant message. Defaults to `How can I help you?`.
//! - `SESSION_IDLE_TTL_SECS` - Optional. Idle time before a session is dropped; `0` keeps sessions forever. Defaults to `3600`.
//!
//! The OpenAI API key is not configuration: each browser session supplies its own.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Chat model identifier
    pub default_model: String,

    /// Root of the OpenAI-compatible API
    pub openai_base_url: String,

    pub temperature: f32,

    /// Whether the policy streams tokens from the model
    pub streaming: bool,

    /// Maximum decide steps for one answer
    pub max_iterations: usize,

    /// How many malformed replies are fed back to the model before degrading
    pub parse_retries: usize,

    pub search_base_url: String,

    pub search_max_results: usize,

    pub search_timeout: Duration,

    pub llm_timeout: Duration,

    /// Seed assistant message of every session
    pub greeting: String,

    /// Idle time after which a session and its key are dropped. Zero disables eviction.
    pub session_idle_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let default_model = lookup("DEFAULT_MODEL").unwrap_or(defaults.default_model);
        let openai_base_url = lookup("OPENAI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.openai_base_url);
        let temperature = parse_or(&lookup, "TEMPERATURE", defaults.temperature)?;

        let streaming = lookup("STREAMING")
            .map(|v| {
                parse_bool(&v).map_err(|e| ConfigError::InvalidValue("STREAMING".to_string(), e))
            })
            .transpose()?
            .unwrap_or(defaults.streaming);

        let max_iterations = parse_or(&lookup, "MAX_ITERATIONS", defaults.max_iterations)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let parse_retries = parse_or(&lookup, "PARSE_RETRIES", defaults.parse_retries)?;

        let search_base_url = lookup("SEARCH_BASE_URL").unwrap_or(defaults.search_base_url);
        let search_max_results =
            parse_or(&lookup, "SEARCH_MAX_RESULTS", defaults.search_max_results)?;
        let search_timeout = parse_or(
            &lookup,
            "SEARCH_TIMEOUT_SECS",
            defaults.search_timeout.as_secs(),
        )
        .map(Duration::from_secs)?;
        let llm_timeout = parse_or(&lookup, "LLM_TIMEOUT_SECS", defaults.llm_timeout.as_secs())
            .map(Duration::from_secs)?;
        let greeting = lookup("GREETING").unwrap_or(defaults.greeting);
        let session_idle_ttl = parse_or(
            &lookup,
            "SESSION_IDLE_TTL_SECS",
            defaults.session_idle_ttl.as_secs(),
        )
        .map(Duration::from_secs)?;

        Ok(Self {
            host,
            port,
            default_model,
            openai_base_url,
            temperature,
            streaming,
            max_iterations,
            parse_retries,
            search_base_url,
            search_max_results,
            search_timeout,
            llm_timeout,
            greeting,
            session_idle_ttl,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            default_model: "gpt-3.5-turbo".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.7,
            streaming: true,
            max_iterations: 15,
            parse_retries: 1,
            search_base_url: "https://html.duckduckgo.com".to_string(),
            search_max_results: 5,
            search_timeout: Duration::from_secs(20),
            llm_timeout: Duration::from_secs(120),
            greeting: "How can I help you?".to_string(),
            session_idle_ttl: Duration::from_secs(3600),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
