//! Pool configuration: defaults, JSON and environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::tuning::{DEFAULT_TICK_WAIT_DURATION, DEFAULT_TICKS_BEFORE_WAIT};

/// Sleep between idle ticks, in milliseconds.
pub const ENV_TICK_WAIT_MS: &str = "STRIPE_TICK_WAIT_MS";
/// Consecutive empty ticks before a worker sleeps.
pub const ENV_TICKS_BEFORE_WAIT: &str = "STRIPE_TICKS_BEFORE_WAIT";
/// Prefix for stripe thread names.
pub const ENV_THREAD_PREFIX: &str = "STRIPE_THREAD_PREFIX";

/// Stripe pool configuration.
///
/// ```
/// use stripe_pool::StripePoolConfig;
///
/// let config = StripePoolConfig::from_json(r#"{ "tick_wait_ms": 5 }"#).unwrap();
/// assert_eq!(config.tick_wait_duration.as_millis(), 5);
/// assert_eq!(config.ticks_before_wait, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StripePoolConfig {
    #[serde(rename = "tick_wait_ms", with = "millis")]
    pub tick_wait_duration: Duration,
    pub ticks_before_wait: u32,
    pub thread_name_prefix: String,
}

impl Default for StripePoolConfig {
    fn default() -> Self {
        Self {
            tick_wait_duration: DEFAULT_TICK_WAIT_DURATION,
            ticks_before_wait: DEFAULT_TICKS_BEFORE_WAIT,
            thread_name_prefix: "stripe".to_owned(),
        }
    }
}

impl StripePoolConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overridden by `STRIPE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Override fields from `STRIPE_*` environment variables that are set.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|var| std::env::var(var).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_TICK_WAIT_MS) {
            self.tick_wait_duration = Duration::from_millis(parse_var(ENV_TICK_WAIT_MS, value)?);
        }
        if let Some(value) = lookup(ENV_TICKS_BEFORE_WAIT) {
            self.ticks_before_wait = parse_var(ENV_TICKS_BEFORE_WAIT, value)?;
        }
        if let Some(value) = lookup(ENV_THREAD_PREFIX) {
            self.thread_name_prefix = value;
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_json_partial() {
        let config = StripePoolConfig::from_json(r#"{"ticks_before_wait": 0}"#).unwrap();
        assert_eq!(config.ticks_before_wait, 0);
        assert_eq!(config.tick_wait_duration, Duration::from_millis(1));
        assert_eq!(config.thread_name_prefix, "stripe");
    }

    #[test]
    fn test_json_roundtrip_uses_millis() {
        let config = StripePoolConfig {
            tick_wait_duration: Duration::from_millis(250),
            ticks_before_wait: 3,
            thread_name_prefix: "dist".into(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["tick_wait_ms"], 250);
        assert_eq!(
            serde_json::from_value::<StripePoolConfig>(json).unwrap(),
            config
        );
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        assert!(matches!(
            StripePoolConfig::from_json(r#"{"tick_wait": 5}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = StripePoolConfig::default()
            .apply_vars(vars(&[
                (ENV_TICK_WAIT_MS, "20"),
                (ENV_TICKS_BEFORE_WAIT, " 2 "),
                (ENV_THREAD_PREFIX, "distributor"),
            ]))
            .unwrap();
        assert_eq!(config.tick_wait_duration, Duration::from_millis(20));
        assert_eq!(config.ticks_before_wait, 2);
        assert_eq!(config.thread_name_prefix, "distributor");
    }

    #[test]
    fn test_env_invalid_value() {
        let err = StripePoolConfig::default()
            .apply_vars(vars(&[(ENV_TICKS_BEFORE_WAIT, "-1")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid value for STRIPE_TICKS_BEFORE_WAIT: "-1""#
        );
    }
}
