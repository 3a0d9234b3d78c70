//! Allocation table, placement and occupancy view types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CatalogSnapshot, GpuhubError, GpuhubResult};

/// A single reserved GPU slot, persisted as `[hostname, slot_index]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef(pub String, pub u32);

impl SlotRef {
    pub fn new(host: impl Into<String>, slot: u32) -> Self {
        Self(host.into(), slot)
    }

    pub fn host(&self) -> &str {
        &self.0
    }

    pub fn slot(&self) -> u32 {
        self.1
    }
}

/// Result of a successful allocation: one host and the slots on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Host the requester is pinned to
    pub host: String,
    /// Slot indices on that host, in assignment order
    pub slots: Vec<u32>,
}

impl Placement {
    pub fn new(host: impl Into<String>, slots: Vec<u32>) -> Self {
        Self {
            host: host.into(),
            slots,
        }
    }
}

/// Persisted mapping from requester to reserved slots
///
/// Serialized as a JSON object `{requester: [[host, slot], ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationTable {
    entries: BTreeMap<String, Vec<SlotRef>>,
}

impl AllocationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserved slots for a requester
    pub fn get(&self, requester: &str) -> Option<&[SlotRef]> {
        self.entries.get(requester).map(Vec::as_slice)
    }

    /// Current placement of a requester, if it holds any slot
    pub fn placement_of(&self, requester: &str) -> Option<Placement> {
        let slots = self.entries.get(requester)?;
        let first = slots.first()?;
        Some(Placement {
            host: first.host().to_string(),
            slots: slots.iter().map(SlotRef::slot).collect(),
        })
    }

    /// Append a placement to a requester's reservation list
    pub fn assign(&mut self, requester: &str, placement: &Placement) {
        let entry = self.entries.entry(requester.to_string()).or_default();
        entry.extend(
            placement
                .slots
                .iter()
                .map(|slot| SlotRef::new(placement.host.clone(), *slot)),
        );
    }

    /// Drop every reservation held by a requester
    pub fn remove(&mut self, requester: &str) -> Option<Vec<SlotRef>> {
        self.entries.remove(requester)
    }

    /// Iterate over requesters and their reservations in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SlotRef])> {
        self.entries
            .iter()
            .map(|(requester, slots)| (requester.as_str(), slots.as_slice()))
    }

    /// All placements, skipping requesters with an empty list
    pub fn placements(&self) -> Vec<(String, Placement)> {
        self.entries
            .keys()
            .filter_map(|requester| {
                self.placement_of(requester)
                    .map(|placement| (requester.clone(), placement))
            })
            .collect()
    }

    /// Number of requesters in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requester holding a given slot
    pub fn holder_of(&self, host: &str, slot: u32) -> Option<&str> {
        self.iter()
            .find(|(_, slots)| slots.iter().any(|s| s.host() == host && s.slot() == slot))
            .map(|(requester, _)| requester)
    }

    /// Check that no slot is reserved twice
    pub fn validate(&self) -> GpuhubResult<()> {
        let mut seen: BTreeMap<&SlotRef, &str> = BTreeMap::new();
        for (requester, slots) in self.iter() {
            for slot in slots {
                if let Some(other) = seen.insert(slot, requester) {
                    return Err(GpuhubError::StoreCorrupt(format!(
                        "slot {} on host '{}' is reserved by both '{}' and '{}'",
                        slot.slot(),
                        slot.host(),
                        other,
                        requester
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Derived view of which slots are free on every catalog host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyView {
    hosts: BTreeMap<String, BTreeMap<u32, Option<String>>>,
}

impl OccupancyView {
    /// Combine the allocation table with catalog capacities
    ///
    /// Every slot in `[0, capacity)` of every catalog host is present.
    /// Reservations on unknown hosts, out-of-range slots, or slots held twice
    /// are reported as `StoreCorrupt`.
    pub fn build(table: &AllocationTable, catalog: &CatalogSnapshot) -> GpuhubResult<Self> {
        let mut hosts: BTreeMap<String, BTreeMap<u32, Option<String>>> = BTreeMap::new();

        for host in &catalog.hosts {
            let capacity = catalog.capacity_of(&host.name);
            hosts
                .entry(host.name.clone())
                .or_insert_with(|| (0..capacity).map(|slot| (slot, None)).collect());
        }

        for (requester, reservations) in table.iter() {
            for reservation in reservations {
                let slots = hosts.get_mut(reservation.host()).ok_or_else(|| {
                    GpuhubError::StoreCorrupt(format!(
                        "'{}' holds slot {} on host '{}' which is not in the catalog",
                        requester,
                        reservation.slot(),
                        reservation.host()
                    ))
                })?;

                let holder = slots.get_mut(&reservation.slot()).ok_or_else(|| {
                    GpuhubError::StoreCorrupt(format!(
                        "'{}' holds slot {} on host '{}' beyond its capacity",
                        requester,
                        reservation.slot(),
                        reservation.host()
                    ))
                })?;

                if let Some(other) = holder.as_deref() {
                    return Err(GpuhubError::StoreCorrupt(format!(
                        "slot {} on host '{}' is reserved by both '{}' and '{}'",
                        reservation.slot(),
                        reservation.host(),
                        other,
                        requester
                    )));
                }
                *holder = Some(requester.to_string());
            }
        }

        Ok(Self { hosts })
    }

    /// Hostnames in lexicographic order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// Slots of a host in ascending index order
    pub fn slots(&self, host: &str) -> impl Iterator<Item = (u32, Option<&str>)> {
        self.hosts
            .get(host)
            .into_iter()
            .flat_map(|slots| slots.iter().map(|(idx, holder)| (*idx, holder.as_deref())))
    }

    /// Unoccupied slot indices of a host in ascending order
    pub fn free_slots(&self, host: &str) -> Vec<u32> {
        self.slots(host)
            .filter(|(_, holder)| holder.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Summarize every host for status reporting
    pub fn host_status(&self, catalog: &CatalogSnapshot) -> Vec<HostStatus> {
        self.hosts
            .iter()
            .map(|(name, slots)| {
                let slots: Vec<SlotStatus> = slots
                    .iter()
                    .map(|(index, requester)| SlotStatus {
                        index: *index,
                        requester: requester.clone(),
                    })
                    .collect();
                let used = slots.iter().filter(|s| s.requester.is_some()).count() as u32;
                let capacity = slots.len() as u32;

                HostStatus {
                    name: name.clone(),
                    capacity,
                    driver_version: catalog.driver_version(name).map(str::to_string),
                    used,
                    free: capacity - used,
                    slots,
                }
            })
            .collect()
    }
}

/// Per-host occupancy summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub name: String,
    pub capacity: u32,
    pub driver_version: Option<String>,
    pub used: u32,
    pub free: u32,
    pub slots: Vec<SlotStatus>,
}

/// Holder of a single slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub index: u32,
    pub requester: Option<String>,
}
