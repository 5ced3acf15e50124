//! Environment configuration.
//!
//! Everything is read once at startup. Missing required variables and
//! unparsable values are fatal: the binary reports them and exits before
//! binding its port.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use matchforge_backend::BackendCredentials;
use matchforge_pump::{PumpConfig, TickConfig};
use matchforge_session::OrchestratorConfig;

pub const DEFAULT_BUCKET_ID: &str = "sbmm_default_bucket";
pub const DEFAULT_MAX_PLAYERS: u32 = 2;

/// Errors raised while loading [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub credentials: BackendCredentials,
    pub host: String,
    pub port: u16,
    /// Bucket new sessions are committed under.
    pub bucket_id: String,
    /// Capacity of new sessions.
    pub max_players: u32,
    pub pump_hz: u32,
    pub commit_timeout: Duration,
    pub destroy_timeout: Duration,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable
    /// name to its value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let credentials = BackendCredentials {
            product_id: required("EOS_PRODUCT_ID")?,
            sandbox_id: required("EOS_SANDBOX_ID")?,
            deployment_id: required("EOS_DEPLOYMENT_ID")?,
            client_id: required("EOS_CLIENT_ID")?,
            client_secret: required("EOS_CLIENT_SECRET")?,
        };
        let port = parse("SERVER_PORT", &required("SERVER_PORT")?)?;

        let max_players = optional(&get, "MATCHFORGE_MAX_PLAYERS", DEFAULT_MAX_PLAYERS)?;
        if max_players == 0 {
            return Err(invalid("MATCHFORGE_MAX_PLAYERS", "0", "must be at least 1"));
        }

        let pump_hz = optional(&get, "MATCHFORGE_PUMP_HZ", TickConfig::DEFAULT_TICK_RATE_HZ)?;
        if !(1..=TickConfig::MAX_TICK_RATE_HZ).contains(&pump_hz) {
            return Err(invalid(
                "MATCHFORGE_PUMP_HZ",
                &pump_hz.to_string(),
                &format!("must be between 1 and {}", TickConfig::MAX_TICK_RATE_HZ),
            ));
        }

        Ok(Self {
            credentials,
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            bucket_id: get("MATCHFORGE_BUCKET_ID")
                .unwrap_or_else(|| DEFAULT_BUCKET_ID.to_owned()),
            max_players,
            pump_hz,
            commit_timeout: seconds(&get, "MATCHFORGE_COMMIT_TIMEOUT_SECS", 30)?,
            destroy_timeout: seconds(&get, "MATCHFORGE_DESTROY_TIMEOUT_SECS", 30)?,
            sweep_interval: seconds(&get, "MATCHFORGE_SWEEP_INTERVAL_SECS", 5)?,
            request_timeout: seconds(&get, "MATCHFORGE_REQUEST_TIMEOUT_SECS", 10)?,
        })
    }

    /// `host:port`, ready for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            commit_timeout: self.commit_timeout,
            destroy_timeout: self.destroy_timeout,
            ..OrchestratorConfig::default()
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig::with_rate(self.pump_hz)
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value, &e.to_string()))
}

fn optional<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => parse(var, &value),
        None => Ok(default),
    }
}

/// A whole number of seconds, at least 1.
fn seconds<G>(get: &G, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = optional(get, var, default)?;
    if secs == 0 {
        return Err(invalid(var, "0", "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var| map.get(var).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("EOS_PRODUCT_ID", "prod"),
        ("EOS_SANDBOX_ID", "sandbox"),
        ("EOS_DEPLOYMENT_ID", "deploy"),
        ("EOS_CLIENT_ID", "client"),
        ("EOS_CLIENT_SECRET", "secret"),
        ("SERVER_PORT", "8080"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(extra);
        pairs
    }

    #[test]
    fn test_from_lookup_required_only_uses_defaults() {
        let cfg = ServerConfig::from_lookup(env(REQUIRED)).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.bucket_id, DEFAULT_BUCKET_ID);
        assert_eq!(cfg.max_players, 2);
        assert_eq!(cfg.pump_hz, 250);
        assert_eq!(cfg.commit_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.credentials.client_secret, "secret");
    }

    #[test]
    fn test_from_lookup_missing_credential_is_error() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "EOS_CLIENT_SECRET")
            .collect();

        let err = ServerConfig::from_lookup(env(&pairs)).unwrap_err();

        assert_eq!(err, ConfigError::Missing("EOS_CLIENT_SECRET"));
    }

    #[test]
    fn test_from_lookup_blank_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("EOS_PRODUCT_ID", "   ");

        let err = ServerConfig::from_lookup(env(&pairs)).unwrap_err();

        assert_eq!(err, ConfigError::Missing("EOS_PRODUCT_ID"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let cfg = ServerConfig::from_lookup(env(&with(&[
            ("SERVER_HOST", "127.0.0.1"),
            ("MATCHFORGE_BUCKET_ID", "ranked"),
            ("MATCHFORGE_MAX_PLAYERS", "4"),
            ("MATCHFORGE_PUMP_HZ", "60"),
            ("MATCHFORGE_COMMIT_TIMEOUT_SECS", "12"),
        ])))
        .unwrap();

        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.bucket_id, "ranked");
        assert_eq!(cfg.max_players, 4);
        assert_eq!(cfg.pump_config().tick.tick_rate_hz, 60);
        assert_eq!(
            cfg.orchestrator_config().commit_timeout,
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_from_lookup_bad_port_is_invalid() {
        let mut pairs = REQUIRED.to_vec();
        pairs[5] = ("SERVER_PORT", "eighty");

        let err = ServerConfig::from_lookup(env(&pairs)).unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { var: "SERVER_PORT", .. }));
    }

    #[test]
    fn test_from_lookup_out_of_range_pump_rate_is_invalid() {
        let err = ServerConfig::from_lookup(env(&with(&[("MATCHFORGE_PUMP_HZ", "5000")])))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "MATCHFORGE_PUMP_HZ", .. }));
    }

    #[test]
    fn test_from_lookup_zero_seconds_is_invalid() {
        let err = ServerConfig::from_lookup(env(&with(&[(
            "MATCHFORGE_SWEEP_INTERVAL_SECS",
            "0",
        )])))
        .unwrap_err();
        assert!(err.to_string().contains("MATCHFORGE_SWEEP_INTERVAL_SECS"));
    }
}
