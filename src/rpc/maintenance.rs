//! Leaf set and routing table maintenance logic.

use std::time::{Duration, Instant};

use crate::common::Peer;

use super::routing::RoutingState;

/// Default interval between probes of the leaf set.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
/// Interval between probes of every known peer, including the routing table.
pub const REFRESH_TABLE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Routing state maintenance timers
#[derive(Debug)]
pub struct RoutingMaintenance {
    interval: Duration,
    last_leaf_set_probe: Instant,
    last_table_refresh: Instant,
}

/// Decisions about routing state maintenance
#[derive(Debug, Default)]
pub struct MaintenanceDecisions {
    /// Whether the whole routing table is probed, not only the leaf set.
    pub should_refresh_table: bool,

    /// Peers to send a ROUTE_UPDATE to, evicting those that don't respond.
    pub peers_to_probe: Vec<Peer>,
}

impl RoutingMaintenance {
    /// Create new maintenance timers probing the leaf set every `interval`.
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();

        RoutingMaintenance {
            interval,
            last_leaf_set_probe: now,
            last_table_refresh: now,
        }
    }

    /// Determine which peers should be probed now.
    ///
    /// Resets the timers of the intervals that elapsed.
    pub fn periodic_maintenance_decisions(&mut self, state: &RoutingState) -> MaintenanceDecisions {
        self.periodic_maintenance_decisions_at(Instant::now(), state)
    }

    fn periodic_maintenance_decisions_at(
        &mut self,
        now: Instant,
        state: &RoutingState,
    ) -> MaintenanceDecisions {
        let refresh_is_due = now.duration_since(self.last_table_refresh) >= REFRESH_TABLE_INTERVAL;
        let probe_is_due = now.duration_since(self.last_leaf_set_probe) >= self.interval;

        if refresh_is_due {
            self.last_table_refresh = now;
            self.last_leaf_set_probe = now;

            return MaintenanceDecisions {
                should_refresh_table: true,
                peers_to_probe: state.known_peers(),
            };
        }

        if probe_is_due {
            self.last_leaf_set_probe = now;

            return MaintenanceDecisions {
                should_refresh_table: false,
                peers_to_probe: state.leaf_set().to_owned_peers(),
            };
        }

        MaintenanceDecisions::default()
    }
}
