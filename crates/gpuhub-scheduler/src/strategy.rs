//! Placement strategies

use gpuhub_core::{OccupancyView, Placement, StrategyKind};
use std::sync::Arc;

/// Strategy for choosing where a request lands
pub trait AssignmentStrategy: Send + Sync {
    /// Propose a placement for `requested` slots, or `None` if infeasible
    fn propose(&self, occupancy: &OccupancyView, requested: u32) -> Option<Placement>;

    /// Get the strategy name
    fn name(&self) -> &'static str;
}

/// Greedy first-fit: the first host (by name) with enough free slots wins.
///
/// A request is never split across hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFitStrategy;

impl AssignmentStrategy for FirstFitStrategy {
    fn propose(&self, occupancy: &OccupancyView, requested: u32) -> Option<Placement> {
        if requested == 0 {
            return None;
        }

        for host in occupancy.hosts() {
            let free = occupancy.free_slots(host);
            if (free.len() as u64) < u64::from(requested) {
                continue;
            }
            let slots = free.into_iter().take(requested as usize).collect();
            return Some(Placement::new(host, slots));
        }

        None
    }

    fn name(&self) -> &'static str {
        "first-fit"
    }
}

/// Build the strategy selected in configuration
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn AssignmentStrategy> {
    match kind {
        StrategyKind::FirstFit => Arc::new(FirstFitStrategy),
    }
}
