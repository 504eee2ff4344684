//! Gateway Resilience - circuit breaking, retries and fallbacks for outbound
//! calls to SMS, voice, push and email providers
//!
//! ```no_run
//! use gateway_resilience::gateway::{Gateway, GatewayError};
//! use gateway_resilience::resilience::{CallContext, CircuitRegistry, RetryExecutor};
//! use std::time::Duration;
//!
//! # async fn send_sms() -> Result<String, GatewayError> { Ok("queued".into()) }
//! # async fn demo() -> anyhow::Result<()> {
//! let registry = CircuitRegistry::new();
//! let sms = registry.breaker(Gateway::Sms.service_name(), Gateway::Sms.default_circuit_config())?;
//! let retry = RetryExecutor::default();
//!
//! // Deadlines are the caller's job: race the call against a timer inside the closure.
//! let status = retry
//!     .execute_through(&sms, &CallContext::new("send_sms"), || async {
//!         tokio::time::timeout(Duration::from_secs(10), send_sms())
//!             .await
//!             .unwrap_or(Err(GatewayError::Timeout))
//!     })
//!     .await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod gateway;
pub mod observability;
pub mod resilience;

pub use config::Config;
pub use resilience::{CircuitBreaker, CircuitRegistry, CircuitState};
