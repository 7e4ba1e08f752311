// src/agentverse/config.rs

use std::env;
use std::time::Duration;

use crate::agentverse::error::AgentverseError;

const DEFAULT_MAX_WORKERS: usize = 5;
const DEFAULT_MAX_ROUNDS: u32 = 3;
const DEFAULT_MAX_VERTICAL_ITERS: u32 = 3;
const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_WORKER_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful expert collaborating with other experts to accomplish a task.";

/// Immutable, process-wide configuration read once at startup.
///
/// Every other component receives a `&Config` (or an `Arc<Config>`) rather
/// than reading the environment itself, per the "global mutable state"
/// design note: configuration is the one thing read from process
/// environment, and only here.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_url: String,
    pub worker_urls: Vec<String>,
    pub max_workers: usize,
    pub max_rounds: u32,
    pub max_vertical_iters: u32,
    pub llm_timeout: Duration,
    pub worker_timeout: Duration,
    pub default_system_prompt: String,
    pub apply_chat_template: bool,
}

impl Config {
    /// Loads configuration from the enumerated environment variables.
    ///
    /// An absent variable falls back to its documented default. A variable
    /// that *is* set but fails to parse as its expected type is a
    /// [`AgentverseError::ConfigError`] - silently falling back would mask
    /// an operator typo.
    pub fn from_env() -> Result<Self, AgentverseError> {
        let llm_url = env::var("LLM_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());

        let worker_urls = match env::var("WORKER_URLS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };

        let max_workers = parse_env_or("MAX_WORKERS", DEFAULT_MAX_WORKERS)?;
        let max_rounds = parse_env_or("MAX_ROUNDS", DEFAULT_MAX_ROUNDS)?;
        let max_vertical_iters = parse_env_or("MAX_VERTICAL_ITERS", DEFAULT_MAX_VERTICAL_ITERS)?;
        let llm_timeout_secs = parse_env_or("LLM_TIMEOUT_SECONDS", DEFAULT_LLM_TIMEOUT_SECONDS)?;
        let worker_timeout_secs =
            parse_env_or("WORKER_TIMEOUT_SECONDS", DEFAULT_WORKER_TIMEOUT_SECONDS)?;

        let default_system_prompt = env::var("DEFAULT_SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

        let apply_chat_template = match env::var("APPLY_CHAT_TEMPLATE") {
            Ok(raw) => parse_bool(&raw)
                .ok_or_else(|| AgentverseError::ConfigError(format!(
                    "APPLY_CHAT_TEMPLATE must be a boolean, got '{}'",
                    raw
                )))?,
            Err(_) => true,
        };

        Ok(Config {
            llm_url,
            worker_urls,
            max_workers,
            max_rounds,
            max_vertical_iters,
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            worker_timeout: Duration::from_secs(worker_timeout_secs),
            default_system_prompt,
            apply_chat_template,
        })
    }

    /// Fatal precondition for recruitment: the system cannot assign any
    /// expert an endpoint if no worker is configured.
    pub fn require_worker_urls(&self) -> Result<(), AgentverseError> {
        if self.worker_urls.is_empty() {
            return Err(AgentverseError::ConfigError(
                "WORKER_URLS is empty; cannot recruit experts".to_string(),
            ));
        }
        Ok(())
    }

    /// Round-robin endpoint assignment: `WORKER_URLS[idx % len]` (P9).
    pub fn worker_url_for(&self, idx: usize) -> &str {
        &self.worker_urls[idx % self.worker_urls.len()]
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, AgentverseError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AgentverseError::ConfigError(format!("{} is not a valid number: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            llm_url: "http://llm".into(),
            worker_urls: vec!["http://w1".into(), "http://w2".into(), "http://w3".into()],
            max_workers: DEFAULT_MAX_WORKERS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_vertical_iters: DEFAULT_MAX_VERTICAL_ITERS,
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECONDS),
            worker_timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECONDS),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            apply_chat_template: true,
        }
    }

    #[test]
    fn round_robin_wraps_around() {
        let cfg = base_config();
        assert_eq!(cfg.worker_url_for(0), "http://w1");
        assert_eq!(cfg.worker_url_for(2), "http://w3");
        assert_eq!(cfg.worker_url_for(3), "http://w1");
    }

    #[test]
    fn empty_worker_urls_is_fatal() {
        let mut cfg = base_config();
        cfg.worker_urls.clear();
        assert!(cfg.require_worker_urls().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
