//! Scenario Runner
//!
//! Composition root for one benchmark run: validates the configuration,
//! assembles scenario, address pool and metrics, drives the ramp schedule,
//! and snapshots the aggregator once every session has terminated.
//!
//! A run that completes its schedule always yields a summary, even if
//! every single session failed; only configuration errors propagate.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{ConfigError, RunConfig};
use crate::filter::{AddressPool, FilterGenerator};
use crate::metrics::{MetricsAggregator, Summary};
use crate::ramp::RampController;
use crate::scenario::Scenario;

/// Synthetic pool size when no address file is configured
const SYNTHETIC_POOL_SIZE: usize = 10_000;

/// One benchmark run, ready to execute
pub struct ScenarioRunner {
    config: Arc<RunConfig>,
    scenario: Scenario,
    pool: AddressPool,
    metrics: Arc<MetricsAggregator>,
}

impl ScenarioRunner {
    /// Validate and assemble. Everything fatal happens here or in the host
    /// check at the top of `run`, before a single connection is attempted.
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let scenario = Scenario::from_id(config.scenario)
            .ok_or(ConfigError::InvalidScenario(config.scenario))?;

        let pool = match &config.address_file {
            Some(path) if path.exists() => AddressPool::load_from_file(path)
                .map_err(|e| ConfigError::AddressFile(e.to_string()))?,
            Some(path) => {
                warn!(path = ?path, "address_file_missing, using synthetic pool");
                AddressPool::synthetic(SYNTHETIC_POOL_SIZE)
            }
            None => AddressPool::synthetic(SYNTHETIC_POOL_SIZE),
        };
        if pool.is_empty() {
            return Err(ConfigError::EmptyAddressPool);
        }

        Ok(Self {
            config: Arc::new(config),
            scenario,
            pool,
            metrics: Arc::new(MetricsAggregator::new()),
        })
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub async fn run(self) -> Result<Summary> {
        let mut addrs =
            tokio::net::lookup_host((self.config.ws_host.as_str(), self.config.ws_port))
                .await
                .map_err(|_| ConfigError::UnresolvableHost(self.config.ws_host.clone()))?;
        if addrs.next().is_none() {
            return Err(ConfigError::UnresolvableHost(self.config.ws_host.clone()).into());
        }

        info!(
            scenario = %self.scenario,
            clients = self.config.num_clients,
            host = %self.config.ws_host,
            port = self.config.ws_port,
            channel = %self.config.channel,
            ramp_up_secs = self.config.ramp_up_secs,
            warmup_secs = self.config.warmup_secs,
            hold_secs = self.config.hold_secs,
            ramp_down_secs = self.config.ramp_down_secs,
            pool = self.pool.len(),
            "run_start"
        );

        let generator = FilterGenerator::new(self.scenario, self.pool.clone());
        let controller = RampController::new(
            Arc::clone(&self.config),
            generator,
            Arc::clone(&self.metrics),
        );
        let result = controller.run().await;

        // Every session has reached a terminal state: the snapshot cannot
        // race an in-flight write.
        let summary = self.metrics.snapshot();
        info!(
            spawned = result.sessions_spawned,
            forced = result.forced_terminations,
            success = summary.subscribe_success,
            failed = summary.subscribe_failed,
            errors = summary.connection_errors,
            messages = summary.messages_received,
            "run_complete"
        );
        Ok(summary)
    }
}

/// Engine entry point consumed by the CLI layer.
pub async fn run(config: RunConfig) -> Result<Summary> {
    let runner = ScenarioRunner::new(config).context("invalid benchmark configuration")?;
    runner.run().await
}
