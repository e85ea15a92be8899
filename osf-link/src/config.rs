use std::sync::Arc;
use std::time::Duration;

use osf_core::{DEFAULT_PROVIDER, OsfClient, OsfError, RetryPolicy, TokenSource};

const DEFAULT_API_URL: &str = "https://api.osf.io";
const DEFAULT_MAX_RETRIES: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub provider: String,
    pub retry: RetryPolicy,
}

impl LinkConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup; zero or invalid numbers
    /// fall back to the defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = read_string(&var, "OSF_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = read_string(&var, "OSF_TOKEN");
        let provider =
            read_string(&var, "OSF_STORAGE_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let max_attempts = u32::try_from(read_u64(&var, "OSF_MAX_RETRIES", DEFAULT_MAX_RETRIES))
            .unwrap_or(DEFAULT_MAX_RETRIES as u32);
        let attempt_timeout =
            Duration::from_secs(read_u64(&var, "OSF_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS));
        let backoff = Duration::from_millis(read_u64(&var, "OSF_BACKOFF_MS", DEFAULT_BACKOFF_MS));

        Self {
            api_url,
            token,
            provider,
            retry: RetryPolicy::new(max_attempts, attempt_timeout, backoff),
        }
    }

    pub fn client(&self, tokens: Arc<dyn TokenSource>) -> Result<OsfClient, OsfError> {
        Ok(OsfClient::with_token_source(&self.api_url, tokens)?
            .with_retry_policy(self.retry)
            .with_provider(&self.provider))
    }
}

fn read_string(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    var(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64(var: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    var(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> LinkConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        LinkConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);

        assert_eq!(config.api_url, "https://api.osf.io");
        assert_eq!(config.token, None);
        assert_eq!(config.provider, "osfstorage");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn zero_and_garbage_numbers_fall_back() {
        let config = config(&[
            ("OSF_MAX_RETRIES", "0"),
            ("OSF_TIMEOUT_SECS", "soon"),
            ("OSF_BACKOFF_MS", "250"),
        ]);

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.backoff, Duration::from_millis(250));
    }

    #[test]
    fn blank_token_is_missing() {
        let config = config(&[("OSF_TOKEN", "  "), ("OSF_API_URL", "http://localhost:8000")]);

        assert_eq!(config.token, None);
        assert_eq!(config.api_url, "http://localhost:8000");
    }
}
