//! Runtime configuration.
//!
//! Every setting is read from the environment through [`EnvAdapter`], with a
//! `DEFAULT_*` fallback when the variable is absent. A present but malformed
//! value is an error rather than a silent fallback.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DocError, DocResult};
use crate::poller::PollOptions;

// =========================================================
// 默认值
// =========================================================

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CREDENTIALS_PATH: &str = ".lexdraft/credentials.json";
pub const DEFAULT_POLL_INITIAL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_POLL_LATER_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_POLL_INITIAL_PHASE_SECS: u64 = 20;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5 * 60 * 1000;

pub const ENV_API_BASE_URL: &str = "LEXDRAFT_API_BASE_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "LEXDRAFT_REQUEST_TIMEOUT_MS";
pub const ENV_CREDENTIALS_PATH: &str = "LEXDRAFT_CREDENTIALS_PATH";
pub const ENV_POLL_INITIAL_INTERVAL_MS: &str = "LEXDRAFT_POLL_INITIAL_INTERVAL_MS";
pub const ENV_POLL_LATER_INTERVAL_MS: &str = "LEXDRAFT_POLL_LATER_INTERVAL_MS";
pub const ENV_POLL_INITIAL_PHASE_SECS: &str = "LEXDRAFT_POLL_INITIAL_PHASE_SECS";
pub const ENV_POLL_TIMEOUT_MS: &str = "LEXDRAFT_POLL_TIMEOUT_MS";

/// 抽象环境变量接口
pub trait EnvAdapter {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnv;

impl EnvAdapter for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Without trailing slash.
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub credentials_path: PathBuf,
    pub poll: PollOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            poll: PollOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env<E: EnvAdapter>(env: &E) -> DocResult<Self> {
        let api_base_url = env
            .var(ENV_API_BASE_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        if api_base_url.is_empty() {
            return Err(DocError::config(format!("{} is empty", ENV_API_BASE_URL)));
        }

        let credentials_path = env
            .var(ENV_CREDENTIALS_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH));

        let poll = PollOptions {
            initial_interval: Duration::from_millis(read_u64(
                env,
                ENV_POLL_INITIAL_INTERVAL_MS,
                DEFAULT_POLL_INITIAL_INTERVAL_MS,
            )?),
            later_interval: Duration::from_millis(read_u64(
                env,
                ENV_POLL_LATER_INTERVAL_MS,
                DEFAULT_POLL_LATER_INTERVAL_MS,
            )?),
            initial_phase: Duration::from_secs(read_u64(
                env,
                ENV_POLL_INITIAL_PHASE_SECS,
                DEFAULT_POLL_INITIAL_PHASE_SECS,
            )?),
            overall_timeout: Duration::from_millis(read_u64(
                env,
                ENV_POLL_TIMEOUT_MS,
                DEFAULT_POLL_TIMEOUT_MS,
            )?),
        };
        poll.validate()?;

        Ok(Self {
            api_base_url,
            request_timeout: Duration::from_millis(read_u64(
                env,
                ENV_REQUEST_TIMEOUT_MS,
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?),
            credentials_path,
            poll,
        })
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.api_base_url, path)
        } else {
            format!("{}/{}", self.api_base_url, path)
        }
    }
}

fn read_u64<E: EnvAdapter>(env: &E, name: &str, default: u64) -> DocResult<u64> {
    match env.var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            DocError::config(format!("{}={:?} is not a non-negative integer", name, raw))
                .with_source(e)
                .in_op_with("config.read", name)
        }),
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::error::DocErrorKind;
    use std::collections::HashMap;

    /// Mock 环境变量适配器
    pub struct MockEnv {
        vars: HashMap<String, String>,
    }

    impl MockEnv {
        pub fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        pub fn with_var(mut self, name: &str, value: &str) -> Self {
            self.vars.insert(name.to_string(), value.to_string());
            self
        }
    }

    impl EnvAdapter for MockEnv {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = ClientConfig::from_env(&MockEnv::new()).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.poll.initial_interval, Duration::from_millis(2000));
        assert_eq!(config.poll.later_interval, Duration::from_millis(5000));
        assert_eq!(config.poll.initial_phase, Duration::from_secs(20));
        assert_eq!(config.poll.overall_timeout, Duration::from_millis(300_000));
    }

    #[test]
    fn test_overrides() {
        let env = MockEnv::new()
            .with_var(ENV_API_BASE_URL, "https://docs.example.ru/")
            .with_var(ENV_POLL_INITIAL_INTERVAL_MS, "500")
            .with_var(ENV_POLL_TIMEOUT_MS, "60000")
            .with_var(ENV_CREDENTIALS_PATH, "/tmp/creds.json");
        let config = ClientConfig::from_env(&env).unwrap();

        assert_eq!(config.api_base_url, "https://docs.example.ru");
        assert_eq!(config.poll.initial_interval, Duration::from_millis(500));
        assert_eq!(config.poll.overall_timeout, Duration::from_secs(60));
        assert_eq!(config.credentials_path, PathBuf::from("/tmp/creds.json"));
        assert_eq!(
            config.url("/v1/client/me"),
            "https://docs.example.ru/v1/client/me"
        );
        assert_eq!(
            config.url("api/user/balance"),
            "https://docs.example.ru/api/user/balance"
        );
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let env = MockEnv::new().with_var(ENV_REQUEST_TIMEOUT_MS, "ten seconds");
        let err = ClientConfig::from_env(&env).unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Config);
        assert!(err.message.contains(ENV_REQUEST_TIMEOUT_MS));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let env = MockEnv::new().with_var(ENV_POLL_LATER_INTERVAL_MS, "0");
        let err = ClientConfig::from_env(&env).unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Config);
    }
}
