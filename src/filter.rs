//! Filter Generation
//!
//! Turns a scenario rule into concrete subscription filters, sampling
//! values from a shared immutable address pool. Generation holds no mutable
//! state: every call draws from a thread-local RNG, so any number of
//! sessions can generate concurrently.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::info;

use crate::scenario::{FilterRule, Scenario};

/// Comparison mode carried in the subscribe payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    Equals,
    InSet,
}

impl CompareMode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::InSet => "in",
        }
    }
}

/// One subscription predicate: a comparison mode plus its value(s)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub mode: CompareMode,
    pub values: Vec<String>,
}

/// Shared pool of opaque filter values
///
/// Cloning is cheap (`Arc` inside); the backing vector is never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct AddressPool {
    addresses: Arc<Vec<String>>,
}

impl AddressPool {
    /// Build a pool from explicit values. Empty pools are rejected here so
    /// sampling never has to deal with them.
    pub fn new(addresses: Vec<String>) -> Result<Self> {
        if addresses.is_empty() {
            anyhow::bail!("address pool must not be empty");
        }
        Ok(Self {
            addresses: Arc::new(addresses),
        })
    }

    /// Load a JSON string array from disk.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading address file {:?}", path))?;
        let addresses: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("parsing address file {:?}", path))?;
        info!(count = addresses.len(), path = ?path, "address_pool_loaded");
        Self::new(addresses)
    }

    /// Deterministic synthetic pool for runs without an address file.
    pub fn synthetic(count: usize) -> Self {
        let addresses: Vec<String> = (0..count.max(1)).map(|i| format!("addr_{:08x}", i)).collect();
        Self {
            addresses: Arc::new(addresses),
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// One uniformly drawn value.
    pub fn sample_one(&self) -> String {
        let mut rng = rand::thread_rng();
        self.addresses
            .choose(&mut rng)
            .cloned()
            .expect("address pool is never empty")
    }

    /// `count` distinct values drawn without replacement, capped at the
    /// pool size.
    pub fn sample_distinct(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let count = count.min(self.addresses.len());
        self.addresses
            .choose_multiple(&mut rng, count)
            .cloned()
            .collect()
    }
}

/// Per-session filter factory: scenario rule + pool handle
///
/// Fixed-cardinality scenarios call `next_filter` once at connect time; the
/// periodic scenario calls it again on every update tick. Successive calls
/// are independent draws.
#[derive(Debug, Clone)]
pub struct FilterGenerator {
    scenario: Scenario,
    pool: AddressPool,
}

impl FilterGenerator {
    pub fn new(scenario: Scenario, pool: AddressPool) -> Self {
        Self { scenario, pool }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn next_filter(&self) -> SubscriptionFilter {
        match self.scenario.rule() {
            FilterRule::Single | FilterRule::PeriodicSingle => SubscriptionFilter {
                mode: CompareMode::Equals,
                values: vec![self.pool.sample_one()],
            },
            FilterRule::InSet { cardinality } => SubscriptionFilter {
                mode: CompareMode::InSet,
                values: self.pool.sample_distinct(cardinality),
            },
        }
    }
}
