use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use voxbridge_core::backoff::BackoffSchedule;
use voxbridge_core::governor::{OperationClass, Overflow, QuotaPolicy};

use crate::orchestrator::OrchestratorSettings;
use crate::supervisor::SupervisorSettings;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend_url: String,
    pub gateway_url: String,
    pub platform_token: String,
    pub commands_url: Option<String>,
    pub log_level: Level,
    pub relay_timeout: Duration,
    pub relay_retry_delay: Duration,
    pub dedup_capacity: usize,
    pub conversation_window: usize,
    pub max_connect_attempts: u32,
    pub connect_timeout: Duration,
    pub settle: Duration,
    pub keepalive_interval: Duration,
    pub probe_timeout: Duration,
    pub backoff: BackoffSchedule,
    pub command_quota: u32,
    pub command_quota_window: Duration,
    pub presence_quota: u32,
    pub presence_quota_window: Duration,
    pub wake_words: Vec<String>,
    pub fallback_message: String,
    pub max_message_len: usize,
    pub inbound_queue_depth: usize,
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    parsed_var::<u64>(name, default_secs).map(Duration::from_secs)
}

fn list_var(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_lowercase())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let backend_url = required_var("BACKEND_URL")?;
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "BACKEND_URL".to_string(),
                "must be an http(s) URL".to_string(),
            ));
        }

        let gateway_url = required_var("GATEWAY_URL")?;
        if !gateway_url.starts_with("ws://") && !gateway_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_URL".to_string(),
                "must be a ws(s) URL".to_string(),
            ));
        }

        let platform_token = required_var("PLATFORM_TOKEN")?;
        let commands_url = std::env::var("COMMANDS_URL")
            .ok()
            .filter(|value| !value.is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let backoff = match std::env::var("CONNECT_BACKOFF_SECS") {
            Ok(raw) => {
                let intervals = raw
                    .split(',')
                    .map(|part| part.trim().parse::<u64>().map(Duration::from_secs))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| {
                        ConfigError::InvalidValue(
                            "CONNECT_BACKOFF_SECS".to_string(),
                            e.to_string(),
                        )
                    })?;
                BackoffSchedule::new(intervals).map_err(|e| {
                    ConfigError::InvalidValue("CONNECT_BACKOFF_SECS".to_string(), e.to_string())
                })?
            }
            Err(_) => BackoffSchedule::default(),
        };

        let fallback_message = std::env::var("FALLBACK_MESSAGE")
            .unwrap_or_else(|_| "I can't reach my main systems right now.".to_string());

        Ok(Self {
            bind_address,
            backend_url,
            gateway_url,
            platform_token,
            commands_url,
            log_level,
            relay_timeout: secs_var("RELAY_TIMEOUT_SECS", 60)?,
            relay_retry_delay: secs_var("RELAY_RETRY_DELAY_SECS", 2)?,
            dedup_capacity: parsed_var("DEDUP_CAPACITY", 100)?,
            conversation_window: parsed_var("CONVERSATION_WINDOW", 30)?,
            max_connect_attempts: parsed_var("MAX_CONNECT_ATTEMPTS", 3)?,
            connect_timeout: secs_var("CONNECT_TIMEOUT_SECS", 60)?,
            settle: secs_var("SETTLE_SECS", 1)?,
            keepalive_interval: secs_var("KEEPALIVE_INTERVAL_SECS", 30)?,
            probe_timeout: secs_var("PROBE_TIMEOUT_SECS", 10)?,
            backoff,
            command_quota: parsed_var("COMMAND_QUOTA", 200)?,
            command_quota_window: secs_var("COMMAND_QUOTA_WINDOW_SECS", 24 * 60 * 60)?,
            presence_quota: parsed_var("PRESENCE_QUOTA", 5)?,
            presence_quota_window: secs_var("PRESENCE_QUOTA_WINDOW_SECS", 10)?,
            wake_words: list_var("WAKE_WORDS"),
            fallback_message,
            max_message_len: parsed_var("MAX_MESSAGE_LEN", 2000)?,
            inbound_queue_depth: parsed_var("INBOUND_QUEUE_DEPTH", 64)?,
        })
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            connect_timeout: self.connect_timeout,
            settle: self.settle,
            keepalive_interval: self.keepalive_interval,
            probe_timeout: self.probe_timeout,
            max_attempts: self.max_connect_attempts,
            backoff: self.backoff.clone(),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            relay_retry_delay: self.relay_retry_delay,
            fallback_message: self.fallback_message.clone(),
            wake_words: self.wake_words.clone(),
            max_message_len: self.max_message_len,
        }
    }

    pub fn quota_policies(&self) -> HashMap<OperationClass, QuotaPolicy> {
        let mut policies = HashMap::new();
        policies.insert(
            OperationClass::CommandRegistration,
            QuotaPolicy {
                limit: self.command_quota,
                window: self.command_quota_window,
                overflow: Overflow::Reject,
            },
        );
        policies.insert(
            OperationClass::PresenceIndicator,
            QuotaPolicy {
                limit: self.presence_quota,
                window: self.presence_quota_window,
                overflow: Overflow::Defer,
            },
        );
        policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const ALL_VARS: &[&str] = &[
        "BIND_ADDRESS",
        "BACKEND_URL",
        "GATEWAY_URL",
        "PLATFORM_TOKEN",
        "COMMANDS_URL",
        "RUST_LOG",
        "RELAY_TIMEOUT_SECS",
        "RELAY_RETRY_DELAY_SECS",
        "DEDUP_CAPACITY",
        "CONVERSATION_WINDOW",
        "MAX_CONNECT_ATTEMPTS",
        "CONNECT_TIMEOUT_SECS",
        "SETTLE_SECS",
        "KEEPALIVE_INTERVAL_SECS",
        "PROBE_TIMEOUT_SECS",
        "CONNECT_BACKOFF_SECS",
        "COMMAND_QUOTA",
        "COMMAND_QUOTA_WINDOW_SECS",
        "PRESENCE_QUOTA",
        "PRESENCE_QUOTA_WINDOW_SECS",
        "WAKE_WORDS",
        "FALLBACK_MESSAGE",
        "MAX_MESSAGE_LEN",
        "INBOUND_QUEUE_DEPTH",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in ALL_VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("BACKEND_URL", "http://localhost:5000");
            env::set_var("GATEWAY_URL", "wss://gateway.example.test/session");
            env::set_var("PLATFORM_TOKEN", "test-token");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.backend_url, "http://localhost:5000");
        assert_eq!(config.gateway_url, "wss://gateway.example.test/session");
        assert_eq!(config.platform_token, "test-token");
        assert_eq!(config.commands_url, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.relay_timeout, Duration::from_secs(60));
        assert_eq!(config.relay_retry_delay, Duration::from_secs(2));
        assert_eq!(config.dedup_capacity, 100);
        assert_eq!(config.conversation_window, 30);
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.settle, Duration::from_secs(1));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.backoff.delay_after(3), Duration::from_secs(5));
        assert_eq!(config.command_quota, 200);
        assert_eq!(config.command_quota_window, Duration::from_secs(86_400));
        assert_eq!(config.presence_quota, 5);
        assert_eq!(config.presence_quota_window, Duration::from_secs(10));
        assert!(config.wake_words.is_empty());
        assert_eq!(
            config.fallback_message,
            "I can't reach my main systems right now."
        );
        assert_eq!(config.max_message_len, 2000);
        assert_eq!(config.inbound_queue_depth, 64);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("COMMANDS_URL", "https://platform.example.test/commands");
            env::set_var("RUST_LOG", "debug");
            env::set_var("RELAY_TIMEOUT_SECS", "15");
            env::set_var("DEDUP_CAPACITY", "250");
            env::set_var("MAX_CONNECT_ATTEMPTS", "5");
            env::set_var("CONNECT_BACKOFF_SECS", "2, 4, 8");
            env::set_var("WAKE_WORDS", "Vox, Bridge ");
            env::set_var("FALLBACK_MESSAGE", "Back soon.");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(
            config.commands_url.as_deref(),
            Some("https://platform.example.test/commands")
        );
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.relay_timeout, Duration::from_secs(15));
        assert_eq!(config.dedup_capacity, 250);
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.backoff.delay_after(1), Duration::from_secs(2));
        assert_eq!(config.backoff.delay_after(9), Duration::from_secs(8));
        assert_eq!(config.wake_words, vec!["vox", "bridge"]);
        assert_eq!(config.fallback_message, "Back soon.");
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_backend_url() {
        clear_env_vars();
        unsafe {
            env::set_var("GATEWAY_URL", "wss://gateway.example.test/session");
            env::set_var("PLATFORM_TOKEN", "test-token");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "BACKEND_URL"),
            _ => panic!("Expected MissingVar for BACKEND_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_websocket_gateway() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("GATEWAY_URL", "https://gateway.example.test/session");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "GATEWAY_URL"),
            _ => panic!("Expected InvalidValue for GATEWAY_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_decreasing_backoff() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("CONNECT_BACKOFF_SECS", "5,2,1");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CONNECT_BACKOFF_SECS"),
            _ => panic!("Expected InvalidValue for CONNECT_BACKOFF_SECS"),
        }
    }
}
