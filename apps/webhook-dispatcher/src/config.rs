//! Process configuration for the webhook dispatcher.

use std::net::SocketAddr;

use talent_webhooks::{ConfigError, WebhookConfig};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Address of the control API.
    pub listen_addr: SocketAddr,

    pub log_format: LogFormat,

    pub webhook: WebhookConfig,
}

/// Dispatcher configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherConfigError {
    #[error("invalid WEBHOOK_LISTEN_ADDR: {0}")]
    InvalidListenAddr(String),

    #[error(transparent)]
    Webhook(#[from] ConfigError),
}

impl DispatcherConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, DispatcherConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, DispatcherConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let listen_addr = reader("WEBHOOK_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| DispatcherConfigError::InvalidListenAddr(e.to_string()))?;

        let log_format = match reader("LOG_FORMAT").as_deref() {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let webhook = WebhookConfig::from_reader(&reader)?;

        Ok(Self {
            listen_addr,
            log_format,
            webhook,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;

    fn make_reader(vars: HashMap<&str, &str>) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::from_reader(make_reader(HashMap::new())).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.webhook.max_attempts, 3);
    }

    #[test]
    fn test_json_logs_and_custom_addr() {
        let config = DispatcherConfig::from_reader(make_reader(HashMap::from([
            ("WEBHOOK_LISTEN_ADDR", "127.0.0.1:9090"),
            ("LOG_FORMAT", "JSON"),
        ])))
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9090);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_listen_addr() {
        let result = DispatcherConfig::from_reader(make_reader(HashMap::from([(
            "WEBHOOK_LISTEN_ADDR",
            "not-an-addr",
        )])));
        assert!(matches!(
            result,
            Err(DispatcherConfigError::InvalidListenAddr(_))
        ));
    }

    #[test]
    fn test_webhook_errors_propagate() {
        let result = DispatcherConfig::from_reader(make_reader(HashMap::from([(
            "WEBHOOK_BACKOFF_BASE",
            "-1",
        )])));
        assert!(matches!(result, Err(DispatcherConfigError::Webhook(_))));
    }
}
