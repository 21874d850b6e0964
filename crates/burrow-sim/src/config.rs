//! Simulation configuration.

use std::str::FromStr;
use std::time::Duration;

use burrow_coord::CoordinatorConfig;
use burrow_hook::HookConfig;
use burrow_radar::RadarConfig;
use burrow_topology::Topology;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of the simulated network and the timers of every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Nodes built by the driver binary.
    pub nodes: usize,
    pub levels: usize,
    pub gsize: u16,
    /// Seed of the initial addresses.
    pub seed: u64,
    /// One-way delay of every link.
    pub latency: Duration,
    /// Scan, collision and vessels rounds run by the driver binary.
    pub rounds: usize,
    pub radar: RadarConfig,
    pub hook: HookConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 8,
            levels: 2,
            gsize: 16,
            seed: 42,
            latency: Duration::from_millis(5),
            rounds: 4,
            radar: RadarConfig::fast(),
            hook: HookConfig::fast(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidEnv { name, value }),
        Err(_) => Ok(default),
    }
}

impl SimConfig {
    /// Read `BURROW_NODES`, `BURROW_LEVELS`, `BURROW_GSIZE` and `BURROW_SEED`,
    /// keeping the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            nodes: env_or("BURROW_NODES", defaults.nodes)?,
            levels: env_or("BURROW_LEVELS", defaults.levels)?,
            gsize: env_or("BURROW_GSIZE", defaults.gsize)?,
            seed: env_or("BURROW_SEED", defaults.seed)?,
            ..defaults
        };
        config.topology()?;
        Ok(config)
    }

    pub fn topology(&self) -> Result<Topology> {
        Ok(Topology::new(self.levels, self.gsize)?)
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    #[must_use]
    pub fn with_topology(mut self, levels: usize, gsize: u16) -> Self {
        self.levels = levels;
        self.gsize = gsize;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: HookConfig) -> Self {
        self.hook = hook;
        self
    }
}
