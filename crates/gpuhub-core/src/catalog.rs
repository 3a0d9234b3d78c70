//! Resource catalog: the static declaration of GPU hosts
//!
//! The catalog is a line-oriented text file, one host per line:
//!
//! ```text
//! <hostname> <capacity> [<driver_version>]
//! ```
//!
//! It is re-read on every allocator operation so capacity changes take
//! effect without a restart.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{GpuhubError, GpuhubResult};

/// Largest slot count a single host may declare, summed across its lines
pub const MAX_HOST_CAPACITY: u32 = 4096;

/// A GPU host declared in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Hostname used as the placement constraint
    pub name: String,
    /// Number of GPU slots on the host
    pub capacity: u32,
    /// NVIDIA driver version installed on the host
    pub driver_version: Option<String>,
}

/// Point-in-time view of the catalog file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Hosts in declaration order, duplicates preserved
    pub hosts: Vec<Host>,
    /// Driver version per hostname
    pub driver_versions: HashMap<String, String>,
    /// Slot count per hostname, summed across duplicate lines
    pub capacities: HashMap<String, u32>,
}

impl CatalogSnapshot {
    /// Parse catalog text
    pub fn parse(content: &str) -> GpuhubResult<Self> {
        let mut snapshot = CatalogSnapshot::default();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let name = match tokens.next() {
                Some(name) => name.to_string(),
                None => continue,
            };

            let capacity = match tokens.next() {
                Some(raw) => raw.parse::<u32>().map_err(|_| GpuhubError::CatalogParse {
                    line: idx + 1,
                    reason: format!("capacity '{}' for host '{}' is not a number", raw, name),
                })?,
                None => {
                    return Err(GpuhubError::CatalogParse {
                        line: idx + 1,
                        reason: format!("missing capacity for host '{}'", name),
                    })
                }
            };

            if capacity == 0 {
                return Err(GpuhubError::CatalogParse {
                    line: idx + 1,
                    reason: format!("capacity for host '{}' must be positive", name),
                });
            }

            let total = snapshot.capacities.entry(name.clone()).or_insert(0);
            *total = total
                .checked_add(capacity)
                .filter(|sum| *sum <= MAX_HOST_CAPACITY)
                .ok_or_else(|| GpuhubError::CatalogParse {
                    line: idx + 1,
                    reason: format!(
                        "host '{}' declares more than {} slots",
                        name, MAX_HOST_CAPACITY
                    ),
                })?;

            let driver_version = tokens.next().map(str::to_string);
            if let Some(version) = &driver_version {
                snapshot
                    .driver_versions
                    .insert(name.clone(), version.clone());
            }

            snapshot.hosts.push(Host {
                name,
                capacity,
                driver_version,
            });
        }

        Ok(snapshot)
    }

    /// Total slot count for a host, summed across duplicate lines
    pub fn capacity_of(&self, host: &str) -> u32 {
        self.capacities.get(host).copied().unwrap_or(0)
    }

    /// Driver version declared for a host
    pub fn driver_version(&self, host: &str) -> Option<&str> {
        self.driver_versions.get(host).map(String::as_str)
    }

    /// Whether the host appears in the catalog
    pub fn contains(&self, host: &str) -> bool {
        self.capacities.contains_key(host)
    }

    /// Total number of slots across all hosts
    pub fn total_slots(&self) -> u64 {
        self.capacities.values().map(|c| u64::from(*c)).sum()
    }
}

/// File-backed resource catalog
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    path: PathBuf,
}

impl ResourceCatalog {
    /// Create a catalog reading from the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the catalog file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the catalog file
    pub fn load(&self) -> GpuhubResult<CatalogSnapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GpuhubError::CatalogUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        let snapshot = CatalogSnapshot::parse(&content)?;
        debug!(
            path = %self.path.display(),
            hosts = snapshot.hosts.len(),
            slots = snapshot.total_slots(),
            "Loaded resource catalog"
        );
        Ok(snapshot)
    }
}
