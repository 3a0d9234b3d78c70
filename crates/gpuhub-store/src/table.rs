//! File-backed allocation table

use gpuhub_core::{AllocationTable, CatalogSnapshot, GpuhubError, GpuhubResult, OccupancyView};
use serde_json::ser::PrettyFormatter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::lock::StoreLock;

/// Durable mapping from requester to reserved slots
///
/// Every call goes to disk; there is no in-memory cache. Callers performing
/// a read-modify-write cycle must hold [`AllocationStore::lock`] across it.
#[derive(Debug, Clone)]
pub struct AllocationStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AllocationStore {
    /// Create a store persisted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "allocations".into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Self { path, lock_path }
    }

    /// Path of the JSON table
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the exclusive store lock
    pub fn lock(&self) -> GpuhubResult<StoreLock> {
        self.ensure_parent()?;
        StoreLock::acquire(&self.lock_path)
    }

    /// Read the table, creating an empty one if none exists yet
    pub fn load(&self) -> GpuhubResult<AllocationTable> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.create_empty();
            }
            Err(e) => return Err(e.into()),
        };

        let table: AllocationTable = serde_json::from_str(&content).map_err(|e| {
            GpuhubError::StoreCorrupt(format!("{}: {}", self.path.display(), e))
        })?;
        table.validate()?;

        debug!(
            path = %self.path.display(),
            requesters = table.len(),
            "Loaded allocation table"
        );
        Ok(table)
    }

    /// Replace the persisted table atomically
    pub fn save(&self, table: &AllocationTable) -> GpuhubResult<()> {
        let tmp = self.write_temp(table)?;
        tmp.persist(&self.path).map_err(|e| GpuhubError::Io(e.error))?;

        debug!(
            path = %self.path.display(),
            requesters = table.len(),
            "Saved allocation table"
        );
        Ok(())
    }

    /// Derive the occupancy view for the given catalog
    pub fn occupancy(
        &self,
        table: &AllocationTable,
        catalog: &CatalogSnapshot,
    ) -> GpuhubResult<OccupancyView> {
        OccupancyView::build(table, catalog)
    }

    fn create_empty(&self) -> GpuhubResult<AllocationTable> {
        let table = AllocationTable::new();
        let tmp = self.write_temp(&table)?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                info!(path = %self.path.display(), "Created empty allocation store");
                Ok(table)
            }
            // Another process created it first; read theirs
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => self.load(),
            Err(e) => Err(GpuhubError::Io(e.error)),
        }
    }

    fn write_temp(&self, table: &AllocationTable) -> GpuhubResult<NamedTempFile> {
        let dir = self.ensure_parent()?;
        let mut tmp = NamedTempFile::new_in(dir)?;

        let mut ser = serde_json::Serializer::with_formatter(
            tmp.as_file_mut(),
            PrettyFormatter::with_indent(b"    "),
        );
        serde::Serialize::serialize(table, &mut ser)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;

        Ok(tmp)
    }

    fn ensure_parent(&self) -> GpuhubResult<PathBuf> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}
