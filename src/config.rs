//! Runtime configuration from the environment (and `.env`).

use crate::error::{NlqError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NlqConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub max_attempts: u32,
    pub retry_on_zero_rows: bool,
    /// JSON tenant registry.
    pub tenants_file: Option<PathBuf>,
    /// Directory of `<tenant>.json` schema snapshots.
    pub schema_dir: Option<PathBuf>,
    /// JSON fallback catalog; the built-in healthcare catalog otherwise.
    pub fallback_catalog: Option<PathBuf>,
    pub query_timeout: Duration,
    pub session_ttl: Duration,
    pub history_turns: usize,
}

impl Default for NlqConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            max_attempts: 2,
            retry_on_zero_rows: true,
            tenants_file: None,
            schema_dir: None,
            fallback_catalog: None,
            query_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(1800),
            history_turns: 3,
        }
    }
}

impl NlqConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            max_attempts: parse_var(&get, "NLQ_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            retry_on_zero_rows: parse_bool(&get, "NLQ_RETRY_ON_ZERO_ROWS")?
                .unwrap_or(defaults.retry_on_zero_rows),
            tenants_file: get("NLQ_TENANTS_FILE").map(PathBuf::from),
            schema_dir: get("NLQ_SCHEMA_DIR").map(PathBuf::from),
            fallback_catalog: get("NLQ_FALLBACK_CATALOG").map(PathBuf::from),
            query_timeout: parse_var(&get, "NLQ_QUERY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.query_timeout),
            session_ttl: parse_var(&get, "NLQ_SESSION_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_ttl),
            history_turns: parse_var(&get, "NLQ_HISTORY_TURNS")?.unwrap_or(defaults.history_turns),
        })
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| NlqError::Config(format!("{} has an invalid value '{}'", key, raw)))
        })
        .transpose()
}

fn parse_bool<G>(get: &G, key: &str) -> Result<Option<bool>>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(NlqError::Config(format!("{} must be a boolean, got '{}'", key, raw))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<NlqConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NlqConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.max_attempts, 2);
        assert!(c.retry_on_zero_rows);
        assert!(c.openai_api_key.is_none());
        assert_eq!(c.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("NLQ_MAX_ATTEMPTS", "4"),
            ("NLQ_RETRY_ON_ZERO_ROWS", "off"),
            ("NLQ_QUERY_TIMEOUT_SECS", "5"),
            ("OPENAI_MODEL", "gpt-4o"),
        ])
        .unwrap();
        assert_eq!(c.max_attempts, 4);
        assert!(!c.retry_on_zero_rows);
        assert_eq!(c.query_timeout, Duration::from_secs(5));
        assert_eq!(c.openai_model, "gpt-4o");
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            config(&[("NLQ_MAX_ATTEMPTS", "many")]),
            Err(NlqError::Config(_))
        ));
        assert!(matches!(
            config(&[("NLQ_RETRY_ON_ZERO_ROWS", "maybe")]),
            Err(NlqError::Config(_))
        ));
    }
}
