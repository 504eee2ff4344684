//! Configuration Module
//! Loads admin, retry and per-gateway circuit settings from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::Gateway;
use crate::resilience::{CircuitConfig, RetryConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub admin_port: u16,
    pub retry: RetryConfig,
    pub circuits: Vec<(Gateway, CircuitConfig)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// defaults; values that parse but are invalid (zero) are errors.
    pub fn from_lookup<L>(lookup: L) -> anyhow::Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_or(&lookup, "RETRY_MAX_RETRIES", retry_defaults.max_retries),
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "RETRY_BASE_DELAY_MS",
                retry_defaults.base_delay.as_millis() as u64,
            )),
        };
        retry.validate()?;

        let circuits = Gateway::ALL
            .iter()
            .map(|&gateway| {
                let config = circuit_config_for(&lookup, gateway);
                config.validate().map(|()| (gateway, config))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            admin_port: parse_or(&lookup, "ADMIN_PORT", 9100),
            retry,
            circuits,
        })
    }
}

fn circuit_config_for<L>(lookup: &L, gateway: Gateway) -> CircuitConfig
where
    L: Fn(&str) -> Option<String>,
{
    let defaults = gateway.default_circuit_config();
    let prefix = format!("CIRCUIT_{}", gateway.env_prefix());
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let half_open_max_probes = lookup(&key("HALF_OPEN_MAX_PROBES"))
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .or(defaults.half_open_max_probes);

    CircuitConfig {
        failure_threshold: parse_or(lookup, &key("FAILURE_THRESHOLD"), defaults.failure_threshold),
        reset_timeout: Duration::from_millis(parse_or(
            lookup,
            &key("RESET_TIMEOUT_MS"),
            defaults.reset_timeout.as_millis() as u64,
        )),
        success_threshold: parse_or(lookup, &key("SUCCESS_THRESHOLD"), defaults.success_threshold),
        failure_window: Duration::from_millis(parse_or(
            lookup,
            &key("FAILURE_WINDOW_MS"),
            defaults.failure_window.as_millis() as u64,
        )),
        half_open_max_probes,
        observers: defaults.observers,
    }
}

fn parse_or<L, T>(lookup: &L, key: &str, default: T) -> T
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
