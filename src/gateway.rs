//! Downstream Gateways
//! Service names, per-gateway circuit defaults and the error contract for
//! gateway operation closures

use std::fmt;
use thiserror::Error;

use crate::resilience::{CircuitConfig, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gateway {
    Sms,
    Voice,
    Push,
    Email,
}

impl Gateway {
    pub const ALL: [Gateway; 4] = [Gateway::Sms, Gateway::Voice, Gateway::Push, Gateway::Email];

    /// Registry key for this gateway.
    pub fn service_name(&self) -> &'static str {
        match self {
            Gateway::Sms => "sms-gateway",
            Gateway::Voice => "voice-gateway",
            Gateway::Push => "push-gateway",
            Gateway::Email => "email-gateway",
        }
    }

    pub(crate) fn env_prefix(&self) -> &'static str {
        match self {
            Gateway::Sms => "SMS_GATEWAY",
            Gateway::Voice => "VOICE_GATEWAY",
            Gateway::Push => "PUSH_GATEWAY",
            Gateway::Email => "EMAIL_GATEWAY",
        }
    }

    /// Voice calls are costlier to get wrong, so they trip sooner.
    pub fn default_circuit_config(&self) -> CircuitConfig {
        match self {
            Gateway::Voice => CircuitConfig::default().with_failure_threshold(3),
            Gateway::Sms | Gateway::Push | Gateway::Email => CircuitConfig::default(),
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Missing credentials for {0}")]
    MissingCredentials(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limited by gateway")]
    RateLimited,
    #[error("Gateway request timed out")]
    Timeout,
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GatewayError::MissingCredentials(_) | GatewayError::InvalidRecipient(_)
        )
    }
}
