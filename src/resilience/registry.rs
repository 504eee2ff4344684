//! Circuit Registry
//! One circuit per service name, created lazily and kept for the registry's
//! lifetime

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::circuit_breaker::{Circuit, CircuitBreaker};
use super::error::ConfigError;
use super::state::{CircuitConfig, CircuitSnapshot, CircuitState};

#[derive(Default)]
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<Circuit>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `name`, creating the circuit with `config` on first use.
    /// Once a circuit exists its configuration is fixed; a later `config` is
    /// ignored.
    pub fn breaker(
        &self,
        name: impl Into<String>,
        config: CircuitConfig,
    ) -> Result<CircuitBreaker, ConfigError> {
        let name = name.into();

        if let Some(existing) = self.circuits.get(&name) {
            debug!(service = %name, "Reusing existing circuit, supplied config ignored");
            return Ok(CircuitBreaker::from_circuit(Arc::clone(existing.value())));
        }

        config.validate()?;
        Ok(self.register(name, config))
    }

    pub fn breaker_with_defaults(&self, name: impl Into<String>) -> CircuitBreaker {
        let name = name.into();
        match self.get(&name) {
            Some(breaker) => breaker,
            None => self.register(name, CircuitConfig::default()),
        }
    }

    /// Insert path shared by every constructor. `config` must already be
    /// valid. Observers are told about the initial state once, by whichever
    /// caller actually created the circuit.
    fn register(&self, name: String, config: CircuitConfig) -> CircuitBreaker {
        let mut created = false;
        let circuit = self
            .circuits
            .entry(name.clone())
            .or_insert_with(|| {
                created = true;
                info!(
                    service = %name,
                    failure_threshold = config.failure_threshold,
                    reset_timeout_ms = config.reset_timeout.as_millis() as u64,
                    success_threshold = config.success_threshold,
                    failure_window_ms = config.failure_window.as_millis() as u64,
                    "Circuit registered"
                );
                Arc::new(Circuit::new(name.clone(), config))
            })
            .value()
            .clone();

        if created {
            for observer in &circuit.config().observers {
                observer.on_register(&name, CircuitState::Closed);
            }
        }

        CircuitBreaker::from_circuit(circuit)
    }

    /// Breaker for an already registered service.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.circuits
            .get(name)
            .map(|entry| CircuitBreaker::from_circuit(Arc::clone(entry.value())))
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    fn breakers(&self) -> Vec<CircuitBreaker> {
        self.circuits
            .iter()
            .map(|entry| CircuitBreaker::from_circuit(Arc::clone(entry.value())))
            .collect()
    }

    /// Snapshot of every known circuit, keyed and sorted by service name.
    pub fn get_all_circuit_states(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers()
            .into_iter()
            .map(|breaker| (breaker.name().to_string(), breaker.snapshot()))
            .collect()
    }

    pub fn reset_all_circuits(&self) {
        let breakers = self.breakers();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(circuits = breakers.len(), "All circuits reset");
    }
}

impl std::fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("services", &self.service_names())
            .finish()
    }
}
