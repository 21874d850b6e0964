//! Radar and neighbour table configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the [`NeighborTable`](crate::NeighborTable).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighbourConfig {
    /// Maximum number of neighbours tracked. Handles are `1..=max_neigh`.
    pub max_neigh: usize,

    /// Relative RTT change above which a `RemChanged` event fires.
    /// Default: 0.9, i.e. the RTT grew or shrank tenfold.
    pub rtt_variation_threshold: f64,

    /// Consecutive missed scans tolerated before a neighbour is deleted.
    pub scans_before_delete: u32,

    /// Extra radar wait per outstanding missed scan.
    pub increment_wait: Duration,

    /// Upper bound on gateway rendezvous waits inside the table.
    pub gateway_wait_timeout: Duration,
}

impl Default for NeighbourConfig {
    fn default() -> Self {
        Self {
            max_neigh: 16,
            rtt_variation_threshold: 0.9,
            scans_before_delete: 3,
            increment_wait: Duration::from_millis(1000),
            gateway_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl NeighbourConfig {
    /// Set the neighbour capacity.
    #[must_use]
    pub fn with_max_neigh(mut self, max_neigh: usize) -> Self {
        self.max_neigh = max_neigh;
        self
    }

    /// Set the RTT variation threshold.
    #[must_use]
    pub fn with_rtt_variation_threshold(mut self, threshold: f64) -> Self {
        self.rtt_variation_threshold = threshold;
        self
    }

    /// Set how many missed scans are tolerated.
    #[must_use]
    pub fn with_scans_before_delete(mut self, scans: u32) -> Self {
        self.scans_before_delete = scans;
        self
    }

    #[must_use]
    pub fn with_increment_wait(mut self, wait: Duration) -> Self {
        self.increment_wait = wait;
        self
    }

    #[must_use]
    pub fn with_gateway_wait_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_wait_timeout = timeout;
        self
    }
}

/// Configuration for the [`Radar`](crate::Radar) scan loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Probes broadcast per round.
    pub max_bouquet: usize,

    /// Base time to collect replies after the bouquet went out.
    pub wait_time: Duration,

    /// Settings of the table fed by the radar.
    pub neighbour: NeighbourConfig,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            max_bouquet: 16,
            wait_time: Duration::from_secs(8),
            neighbour: NeighbourConfig::default(),
        }
    }
}

impl RadarConfig {
    /// Short rounds for simulations and tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_bouquet: 4,
            wait_time: Duration::from_millis(500),
            neighbour: NeighbourConfig::default().with_increment_wait(Duration::from_millis(100)),
        }
    }

    /// Set the bouquet size.
    #[must_use]
    pub fn with_max_bouquet(mut self, max_bouquet: usize) -> Self {
        self.max_bouquet = max_bouquet;
        self
    }

    /// Set the base collection wait.
    #[must_use]
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Set the neighbour table configuration.
    #[must_use]
    pub fn with_neighbour(mut self, neighbour: NeighbourConfig) -> Self {
        self.neighbour = neighbour;
        self
    }
}
