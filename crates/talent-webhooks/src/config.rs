//! Runtime configuration for webhook delivery.

use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::SecretKey;

/// Attempts per delivery before it is marked `failed`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Consecutive failed deliveries before a subscription is suspended.
pub const DEFAULT_FAILURE_SUSPEND_THRESHOLD: u32 = 10;

/// Exponential backoff base.
pub const DEFAULT_BACKOFF_BASE: u32 = 5;

/// Backoff unit: one minute.
pub const DEFAULT_BACKOFF_UNIT_SECS: u64 = 60;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

pub const DEFAULT_USER_AGENT: &str = "talent-webhooks/1.0";

/// Deliveries kept per subscription in the ledger.
pub const DEFAULT_HISTORY_RETENTION: usize = 500;

/// Seconds between state snapshots when a state path is configured.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 30;

/// Configuration for the webhook registry, dispatcher and worker pool.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Attempts per delivery, the first one included.
    pub max_attempts: u32,

    /// Consecutive failed deliveries that suspend a subscription.
    pub failure_suspend_threshold: u32,

    /// Base of the exponential backoff.
    pub backoff_base: u32,

    /// Multiplier of the backoff curve.
    ///
    /// Delay after attempt `n` fails is `backoff_unit * backoff_base^n`.
    /// With the defaults: 5 min after attempt 1, 25 min after attempt 2,
    /// and attempt 3 is terminal.
    pub backoff_unit: Duration,

    /// Hard timeout of a single HTTP attempt.
    pub request_timeout: Duration,

    /// Number of deliveries attempted concurrently.
    pub worker_concurrency: usize,

    /// `User-Agent` sent with every delivery.
    pub user_agent: String,

    /// Accept loopback/private destinations. Development and tests only.
    pub allow_private_hosts: bool,

    /// Deliveries kept per subscription for history queries.
    pub history_retention: usize,

    /// Snapshot file for subscriptions and open deliveries. `None` keeps
    /// everything in memory only.
    pub state_path: Option<PathBuf>,

    /// How often the binary writes the snapshot.
    pub snapshot_interval: Duration,

    /// Encrypts subscription secrets inside the snapshot. Required with
    /// `state_path`.
    pub secret_key: Option<SecretKey>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            failure_suspend_threshold: DEFAULT_FAILURE_SUSPEND_THRESHOLD,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_unit: Duration::from_secs(DEFAULT_BACKOFF_UNIT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allow_private_hosts: false,
            history_retention: DEFAULT_HISTORY_RETENTION,
            state_path: None,
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS),
            secret_key: None,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let defaults = Self::default();

        let max_attempts = parse_var(&reader, "WEBHOOK_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_MAX_ATTEMPTS".into(),
                "must be at least 1".into(),
            ));
        }

        let failure_suspend_threshold = parse_var(
            &reader,
            "WEBHOOK_FAILURE_SUSPEND_THRESHOLD",
            defaults.failure_suspend_threshold,
        )?;

        let backoff_base = parse_var(&reader, "WEBHOOK_BACKOFF_BASE", defaults.backoff_base)?;

        let backoff_unit_secs =
            parse_var(&reader, "WEBHOOK_BACKOFF_UNIT_SECS", DEFAULT_BACKOFF_UNIT_SECS)?;

        let request_timeout_secs = parse_var(
            &reader,
            "WEBHOOK_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        if request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_REQUEST_TIMEOUT_SECS".into(),
                "must be at least 1".into(),
            ));
        }

        let worker_concurrency = parse_var(
            &reader,
            "WEBHOOK_WORKER_CONCURRENCY",
            defaults.worker_concurrency,
        )?
        .max(1);

        let user_agent = reader("WEBHOOK_USER_AGENT").unwrap_or(defaults.user_agent);

        let allow_private_hosts = parse_var(
            &reader,
            "WEBHOOK_ALLOW_PRIVATE_HOSTS",
            defaults.allow_private_hosts,
        )?;

        let history_retention = parse_var(
            &reader,
            "WEBHOOK_HISTORY_RETENTION",
            defaults.history_retention,
        )?;

        let state_path = reader("WEBHOOK_STATE_PATH")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let snapshot_interval_secs = parse_var(
            &reader,
            "WEBHOOK_SNAPSHOT_INTERVAL_SECS",
            DEFAULT_SNAPSHOT_INTERVAL_SECS,
        )?;
        if snapshot_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_SNAPSHOT_INTERVAL_SECS".into(),
                "must be at least 1".into(),
            ));
        }

        let secret_key = match reader("WEBHOOK_SECRET_KEY") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                SecretKey::from_hex(&raw)
                    .map_err(|e| ConfigError::InvalidValue("WEBHOOK_SECRET_KEY".into(), e))?,
            ),
            _ => None,
        };
        if state_path.is_some() && secret_key.is_none() {
            return Err(ConfigError::MissingVar(
                "WEBHOOK_SECRET_KEY".into(),
                "required when WEBHOOK_STATE_PATH is set".into(),
            ));
        }

        Ok(Self {
            max_attempts,
            failure_suspend_threshold,
            backoff_base,
            backoff_unit: Duration::from_secs(backoff_unit_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            worker_concurrency,
            user_agent,
            allow_private_hosts,
            history_retention,
            state_path,
            snapshot_interval: Duration::from_secs(snapshot_interval_secs),
            secret_key,
        })
    }

    /// Set the attempts per delivery.
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Set the consecutive failure threshold for suspension.
    #[must_use]
    pub fn with_failure_suspend_threshold(mut self, threshold: u32) -> Self {
        self.failure_suspend_threshold = threshold;
        self
    }

    /// Set the backoff base and unit.
    #[must_use]
    pub fn with_backoff(mut self, base: u32, unit: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_unit = unit;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Allow private/loopback destinations (for development/testing).
    #[must_use]
    pub fn with_allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    #[must_use]
    pub fn with_history_retention(mut self, retention: usize) -> Self {
        self.history_retention = retention;
        self
    }

    /// Persist state to `path` across restarts.
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Key for subscription secrets in the snapshot.
    #[must_use]
    pub fn with_secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Delay before the next attempt after `attempts` attempts have failed.
    #[must_use]
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(attempts);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Delay before the next retry, or `None` once `attempts` reaches the limit.
    #[must_use]
    pub fn next_retry_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        Some(self.backoff_delay(attempts))
    }
}

fn parse_var<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match reader(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing {0}: {1}")]
    MissingVar(String, String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;

    /// Create a reader closure from a HashMap (no global env mutation).
    fn make_reader(vars: HashMap<&str, &str>) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults() {
        let config = WebhookConfig::from_reader(make_reader(HashMap::new())).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.failure_suspend_threshold, 10);
        assert_eq!(config.backoff_base, 5);
        assert_eq!(config.backoff_unit, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(!config.allow_private_hosts);
        assert!(config.state_path.is_none());
        assert_eq!(config.snapshot_interval, Duration::from_secs(30));
        assert!(config.secret_key.is_none());
    }

    const KEY_HEX: &str = "4242424242424242424242424242424242424242424242424242424242424242";

    #[test]
    fn test_state_path() {
        let config = WebhookConfig::from_reader(make_reader(HashMap::from([
            ("WEBHOOK_STATE_PATH", "/var/lib/webhooks/state.json"),
            ("WEBHOOK_SNAPSHOT_INTERVAL_SECS", "5"),
            ("WEBHOOK_SECRET_KEY", KEY_HEX),
        ])))
        .unwrap();
        assert_eq!(config.secret_key, Some(SecretKey::new([0x42; 32])));
        assert_eq!(
            config.state_path,
            Some(PathBuf::from("/var/lib/webhooks/state.json"))
        );
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));

        let blank =
            WebhookConfig::from_reader(make_reader(HashMap::from([("WEBHOOK_STATE_PATH", "  ")])))
                .unwrap();
        assert!(blank.state_path.is_none());
    }

    #[test]
    fn test_state_path_requires_secret_key() {
        let result = WebhookConfig::from_reader(make_reader(HashMap::from([(
            "WEBHOOK_STATE_PATH",
            "/var/lib/webhooks/state.json",
        )])));
        assert!(matches!(result, Err(ConfigError::MissingVar(var, _)) if var == "WEBHOOK_SECRET_KEY"));

        let short = WebhookConfig::from_reader(make_reader(HashMap::from([
            ("WEBHOOK_STATE_PATH", "/var/lib/webhooks/state.json"),
            ("WEBHOOK_SECRET_KEY", "4242"),
        ])));
        assert!(matches!(short, Err(ConfigError::InvalidValue(var, _)) if var == "WEBHOOK_SECRET_KEY"));
    }

    #[test]
    fn test_overrides() {
        let config = WebhookConfig::from_reader(make_reader(HashMap::from([
            ("WEBHOOK_MAX_ATTEMPTS", "5"),
            ("WEBHOOK_BACKOFF_BASE", "2"),
            ("WEBHOOK_BACKOFF_UNIT_SECS", "1"),
            ("WEBHOOK_WORKER_CONCURRENCY", "0"),
            ("WEBHOOK_ALLOW_PRIVATE_HOSTS", "true"),
            ("WEBHOOK_USER_AGENT", "ats-hooks/2"),
        ])))
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.backoff_unit, Duration::from_secs(1));
        assert_eq!(config.worker_concurrency, 1);
        assert!(config.allow_private_hosts);
        assert_eq!(config.user_agent, "ats-hooks/2");
    }

    #[test]
    fn test_invalid_number() {
        let result = WebhookConfig::from_reader(make_reader(HashMap::from([(
            "WEBHOOK_MAX_ATTEMPTS",
            "three",
        )])));
        assert!(matches!(result, Err(ConfigError::InvalidValue(var, _)) if var == "WEBHOOK_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = WebhookConfig::from_reader(make_reader(HashMap::from([(
            "WEBHOOK_MAX_ATTEMPTS",
            "0",
        )])));
        assert!(result.is_err());
    }

    #[test]
    fn test_backoff_curve_is_five_then_twenty_five_minutes() {
        let config = WebhookConfig::default();
        assert_eq!(config.next_retry_delay(1), Some(Duration::from_secs(5 * 60)));
        assert_eq!(config.next_retry_delay(2), Some(Duration::from_secs(25 * 60)));
        assert_eq!(config.next_retry_delay(3), None);
        assert_eq!(config.next_retry_delay(4), None);
    }

    #[test]
    fn test_backoff_is_configurable() {
        let config = WebhookConfig::default()
            .with_max_attempts(5)
            .with_backoff(2, Duration::from_millis(10));
        assert_eq!(config.next_retry_delay(1), Some(Duration::from_millis(20)));
        assert_eq!(config.next_retry_delay(3), Some(Duration::from_millis(80)));
        assert_eq!(config.next_retry_delay(5), None);
    }

    #[test]
    fn test_backoff_saturates() {
        let config = WebhookConfig::default().with_max_attempts(u32::MAX);
        assert_eq!(
            config.backoff_delay(200),
            Duration::from_secs(60).saturating_mul(u32::MAX)
        );
    }
}
