//! Hook configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timers and limits of the join state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Bound on every remote query. A query that takes longer counts as no
    /// answer.
    pub rpc_timeout: Duration,

    /// Pause between announcing the new address and adopting the new netid,
    /// so late messages addressed to the old identity drain.
    pub netid_grace: Duration,

    /// Delay before `Hooked2` fires after a non-isolated join.
    pub hooked2_delay: Duration,

    /// How long a node stays zombie after detecting a gnode split.
    pub zombie_cooldown: Duration,

    /// Consecutive restarts before the dispatcher gives up.
    pub max_restarts: u32,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            netid_grace: Duration::from_secs(2),
            hooked2_delay: Duration::from_secs(10),
            zombie_cooldown: Duration::from_secs(20),
            max_restarts: 16,
        }
    }
}

impl HookConfig {
    /// Short timers for simulations and local experiments.
    pub fn fast() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(1),
            netid_grace: Duration::from_millis(100),
            hooked2_delay: Duration::from_secs(1),
            zombie_cooldown: Duration::from_secs(2),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_netid_grace(mut self, grace: Duration) -> Self {
        self.netid_grace = grace;
        self
    }

    #[must_use]
    pub fn with_hooked2_delay(mut self, delay: Duration) -> Self {
        self.hooked2_delay = delay;
        self
    }

    #[must_use]
    pub fn with_zombie_cooldown(mut self, cooldown: Duration) -> Self {
        self.zombie_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_max_restarts(mut self, restarts: u32) -> Self {
        self.max_restarts = restarts;
        self
    }
}
