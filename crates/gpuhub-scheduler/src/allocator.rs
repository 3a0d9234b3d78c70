//! GPU resource allocator: idempotent get-or-assign and release

use gpuhub_core::{
    AllocationTable, AllocatorConfig, GpuhubError, GpuhubResult, HostStatus, Placement,
    ResourceCatalog,
};
use gpuhub_store::AllocationStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::strategy::{strategy_for, AssignmentStrategy, FirstFitStrategy};

/// Allocator that hands GPU slots to requesters and remembers them on disk
///
/// Every operation re-reads the catalog and the allocation table. Mutating
/// operations hold the store lock for the whole read-modify-write cycle, so
/// allocators in different threads or processes sharing the same store never
/// double-book a slot.
pub struct GpuResourceAllocator {
    catalog: ResourceCatalog,
    store: AllocationStore,
    strategy: Arc<dyn AssignmentStrategy>,
}

impl GpuResourceAllocator {
    /// Create an allocator using the first-fit strategy
    pub fn new(catalog_path: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog: ResourceCatalog::new(catalog_path),
            store: AllocationStore::new(store_path),
            strategy: Arc::new(FirstFitStrategy),
        }
    }

    /// Create an allocator from configuration
    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(config.catalog_path.clone(), config.store_path.clone())
            .with_strategy(strategy_for(config.strategy))
    }

    /// Replace the placement strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn AssignmentStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Get the placement strategy name
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Return the requester's placement, assigning one if it has none
    ///
    /// A requester that already holds slots gets the same placement back,
    /// whatever `count` it asks for this time.
    pub fn get_or_assign(&self, requester: &str, count: u32) -> GpuhubResult<Placement> {
        if requester.is_empty() {
            return Err(GpuhubError::InvalidRequest(
                "requester id must not be empty".to_string(),
            ));
        }

        let _lock = self.store.lock()?;
        let mut table = self.store.load()?;

        if let Some(placement) = table.placement_of(requester) {
            debug!(
                requester = requester,
                host = %placement.host,
                slots = ?placement.slots,
                "Requester already assigned"
            );
            return Ok(placement);
        }

        if count == 0 {
            return Err(GpuhubError::InvalidRequest(
                "requested GPU count must be positive".to_string(),
            ));
        }

        let catalog = self.catalog.load()?;
        let occupancy = self.store.occupancy(&table, &catalog)?;

        let placement = match self.strategy.propose(&occupancy, count) {
            Some(placement) => placement,
            None => {
                warn!(
                    requester = requester,
                    requested = count,
                    strategy = self.strategy.name(),
                    "No host can satisfy GPU request"
                );
                return Err(GpuhubError::InsufficientResources { requested: count });
            }
        };

        // An empty list left behind counts as unassigned; start it fresh
        table.remove(requester);
        table.assign(requester, &placement);
        self.store.save(&table)?;

        info!(
            requester = requester,
            host = %placement.host,
            slots = ?placement.slots,
            "Assigned GPUs"
        );

        Ok(placement)
    }

    /// Return every slot held by the requester to the pool
    ///
    /// Returns whether anything was released. Releasing an unknown requester
    /// succeeds without rewriting the store.
    pub fn release(&self, requester: &str) -> GpuhubResult<bool> {
        let _lock = self.store.lock()?;
        let mut table = self.store.load()?;

        match table.remove(requester) {
            Some(slots) => {
                self.store.save(&table)?;
                info!(requester = requester, slots = slots.len(), "Released GPUs");
                Ok(true)
            }
            None => {
                debug!(requester = requester, "Nothing to release");
                Ok(false)
            }
        }
    }

    /// Current placement of a requester
    pub fn placement_of(&self, requester: &str) -> GpuhubResult<Option<Placement>> {
        Ok(self.store.load()?.placement_of(requester))
    }

    /// Snapshot of the allocation table
    pub fn allocations(&self) -> GpuhubResult<AllocationTable> {
        self.store.load()
    }

    /// Occupancy of every catalog host
    pub fn hosts(&self) -> GpuhubResult<Vec<HostStatus>> {
        let table = self.store.load()?;
        let catalog = self.catalog.load()?;
        let occupancy = self.store.occupancy(&table, &catalog)?;
        Ok(occupancy.host_status(&catalog))
    }

    /// Driver version declared for a host in the catalog
    pub fn driver_version(&self, host: &str) -> GpuhubResult<Option<String>> {
        let catalog = self.catalog.load()?;
        Ok(catalog.driver_version(host).map(str::to_string))
    }
}
