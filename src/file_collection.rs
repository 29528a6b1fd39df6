// CloudShare File Collection
// Client-side mirror of the user's remote file set with sort/search projection

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::remote::{ErrorKind, FileRecord, FileService, MediaKind, ServiceError};

/// Ordering applied by `view`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Creation time, descending
    #[default]
    Newest,
    /// Creation time, ascending
    Oldest,
    /// Name, ascending, ignoring case (byte order breaks ties)
    Name,
    /// Size, descending
    Size,
}

impl SortKey {
    fn compare(self, a: &FileRecord, b: &FileRecord) -> Ordering {
        match self {
            SortKey::Newest => b.created_at.cmp(&a.created_at),
            SortKey::Oldest => a.created_at.cmp(&b.created_at),
            SortKey::Name => a
                .name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name)),
            SortKey::Size => b.size_bytes.cmp(&a.size_bytes),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortKey::Newest => "newest",
            SortKey::Oldest => "oldest",
            SortKey::Name => "name",
            SortKey::Size => "size",
        };
        f.write_str(s)
    }
}

impl FromStr for SortKey {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newest" => Ok(SortKey::Newest),
            "oldest" => Ok(SortKey::Oldest),
            "name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            other => Err(ServiceError::Validation(format!(
                "Unknown sort key '{}' (expected newest, oldest, name or size)",
                other
            ))),
        }
    }
}

/// Store operation that produced a `StoreError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Refresh,
    Remove,
    ToggleVisibility,
    Rename,
    Share,
    Download,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Refresh => "Refresh",
            Operation::Remove => "Delete",
            Operation::ToggleVisibility => "Toggle visibility",
            Operation::Rename => "Rename",
            Operation::Share => "Share",
            Operation::Download => "Download link",
        };
        f.write_str(s)
    }
}

/// A failed store operation. The local collection is never modified when
/// one of these is returned.
#[derive(Error, Debug)]
#[error("{operation} failed: {source} (local files unchanged)")]
pub struct StoreError {
    pub operation: Operation,
    pub id: Option<String>,
    #[source]
    pub source: ServiceError,
}

impl StoreError {
    fn new(operation: Operation, id: Option<&str>, source: ServiceError) -> Self {
        Self {
            operation,
            id: id.map(str::to_string),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

#[derive(Default)]
struct CollectionState {
    records: Vec<FileRecord>,
    /// Name filter of the last applied refresh
    query: Option<String>,
    /// Bumped on every local change
    version: u64,
    issued_refresh: u64,
    applied_refresh: u64,
    /// Bumped on every server-confirmed mutation
    mutation_seq: u64,
    /// Confirmed mutations a listing in flight may predate: the sequence they
    /// landed at, and the confirmed record (`None` once deleted)
    confirmed: HashMap<String, (u64, Option<FileRecord>)>,
    /// Mutations awaiting a response, per id
    in_flight: HashMap<String, usize>,
}

impl CollectionState {
    fn confirm(&mut self, id: &str, record: Option<FileRecord>) {
        self.mutation_seq += 1;
        self.confirmed.insert(id.to_string(), (self.mutation_seq, record));
    }

    /// Overlay mutations confirmed after `since` onto a fresh listing.
    fn reconcile(&mut self, mut records: Vec<FileRecord>, since: u64) -> Vec<FileRecord> {
        for (id, (seq, confirmed)) in &self.confirmed {
            if *seq <= since {
                continue;
            }
            match confirmed {
                None => records.retain(|r| &r.id != id),
                Some(newer) => {
                    if let Some(slot) = records.iter_mut().find(|r| &r.id == id) {
                        *slot = newer.clone();
                    }
                }
            }
        }
        // Refreshes issued before this one are discarded when they land.
        self.confirmed.retain(|_, (seq, _)| *seq > since);
        records
    }
}

/// Marks an id as having a mutation in flight until dropped
struct PendingGuard<'a> {
    state: &'a RwLock<CollectionState>,
    id: String,
}

impl<'a> PendingGuard<'a> {
    fn new(state: &'a RwLock<CollectionState>, id: &str) -> Self {
        *state.write().in_flight.entry(id.to_string()).or_insert(0) += 1;
        Self {
            state,
            id: id.to_string(),
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write();
        if let Some(count) = state.in_flight.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                state.in_flight.remove(&self.id);
            }
        }
    }
}

/// Local mirror of the remote file set.
///
/// Every mutation goes to the server first; local state changes only after a
/// confirmed response, and only for the record with the confirmed id.
pub struct FileCollectionStore {
    service: Arc<dyn FileService>,
    state: RwLock<CollectionState>,
}

impl FileCollectionStore {
    pub fn new(service: Arc<dyn FileService>) -> Self {
        Self {
            service,
            state: RwLock::new(CollectionState::default()),
        }
    }

    /// Replace the local set with the server's listing.
    ///
    /// An empty filter means unfiltered. If a newer refresh has already been
    /// applied when this one lands, its response is discarded. Mutations the
    /// server confirmed while the listing was in flight win over it.
    pub async fn refresh(&self, name_filter: Option<&str>) -> Result<usize, StoreError> {
        let filter = name_filter.map(str::trim).filter(|f| !f.is_empty());
        let (ticket, since) = {
            let mut state = self.state.write();
            state.issued_refresh += 1;
            (state.issued_refresh, state.mutation_seq)
        };

        let records = self
            .service
            .list(filter)
            .await
            .map_err(|e| StoreError::new(Operation::Refresh, None, e))?;

        let mut state = self.state.write();
        if ticket <= state.applied_refresh {
            debug!("Discarding stale refresh #{}", ticket);
            return Ok(state.records.len());
        }
        state.applied_refresh = ticket;
        state.records = state.reconcile(records, since);
        state.query = filter.map(str::to_string);
        state.version += 1;
        info!("Loaded {} files", state.records.len());
        Ok(state.records.len())
    }

    /// Delete a file on the server, then drop it locally.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let _pending = PendingGuard::new(&self.state, id);
        self.service
            .delete(id)
            .await
            .map_err(|e| StoreError::new(Operation::Remove, Some(id), e))?;

        let mut state = self.state.write();
        state.confirm(id, None);
        let before = state.records.len();
        state.records.retain(|r| r.id != id);
        if state.records.len() != before {
            state.version += 1;
        }
        Ok(())
    }

    /// Flip a file between public and private.
    pub async fn toggle_visibility(&self, id: &str) -> Result<FileRecord, StoreError> {
        let _pending = PendingGuard::new(&self.state, id);
        let updated = self
            .service
            .toggle_public(id)
            .await
            .map_err(|e| StoreError::new(Operation::ToggleVisibility, Some(id), e))?;
        self.apply_confirmed(Operation::ToggleVisibility, id, updated)
    }

    /// Rename a file. Empty names, unknown ids and no-op renames are rejected
    /// without a network call.
    pub async fn rename(&self, id: &str, new_name: &str) -> Result<FileRecord, StoreError> {
        let reject = |msg: String| {
            Err(StoreError::new(
                Operation::Rename,
                Some(id),
                ServiceError::Validation(msg),
            ))
        };
        if new_name.trim().is_empty() {
            return reject("File name cannot be empty".to_string());
        }
        let current = self.state.read().records.iter().find(|r| r.id == id).map(|r| r.name.clone());
        match current {
            None => return reject(format!("File {} is not loaded", id)),
            Some(name) if name == new_name => return reject("Name is unchanged".to_string()),
            Some(_) => {}
        }

        let _pending = PendingGuard::new(&self.state, id);
        let updated = self
            .service
            .rename(id, new_name)
            .await
            .map_err(|e| StoreError::new(Operation::Rename, Some(id), e))?;
        self.apply_confirmed(Operation::Rename, id, updated)
    }

    /// Substitute a server-confirmed record by id. A record that a refresh
    /// dropped in the meantime is not re-inserted.
    fn apply_confirmed(
        &self,
        operation: Operation,
        id: &str,
        updated: FileRecord,
    ) -> Result<FileRecord, StoreError> {
        if updated.id != id {
            return Err(StoreError::new(
                operation,
                Some(id),
                ServiceError::ParseError(format!(
                    "Server answered for file {} instead of {}",
                    updated.id, id
                )),
            ));
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        state.confirm(id, Some(updated.clone()));
        match state.records.iter_mut().find(|r| r.id == id) {
            Some(slot) => {
                *slot = updated.clone();
                state.version += 1;
            }
            None => debug!("{} confirmed for {}, which is not listed locally", operation, id),
        }
        Ok(updated)
    }

    /// Sorted, searched projection of the local set.
    pub fn view(&self, sort: SortKey, search: &str) -> Vec<FileRecord> {
        self.view_filtered(sort, search, None)
    }

    pub fn view_filtered(
        &self,
        sort: SortKey,
        search: &str,
        kind: Option<MediaKind>,
    ) -> Vec<FileRecord> {
        project(&self.state.read().records, sort, search, kind)
    }

    pub fn get(&self, id: &str) -> Option<FileRecord> {
        self.state.read().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Name filter of the refresh that produced the current set
    pub fn query(&self) -> Option<String> {
        self.state.read().query.clone()
    }

    /// Changes every time the local set changes
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.state.read().in_flight.contains_key(id)
    }

    /// Link for sharing a public file.
    pub fn share_link(&self, id: &str) -> Result<String, StoreError> {
        let record = self.loaded(Operation::Share, id)?;
        record.share_link().map(str::to_string).ok_or_else(|| {
            StoreError::new(
                Operation::Share,
                Some(id),
                ServiceError::Validation(
                    "File is private. Make it public first to share.".to_string(),
                ),
            )
        })
    }

    pub fn download_url(&self, id: &str) -> Result<String, StoreError> {
        Ok(self.loaded(Operation::Download, id)?.download_url())
    }

    fn loaded(&self, operation: Operation, id: &str) -> Result<FileRecord, StoreError> {
        self.get(id).ok_or_else(|| {
            StoreError::new(
                operation,
                Some(id),
                ServiceError::Validation(format!("File {} is not loaded", id)),
            )
        })
    }
}

/// Filter and sort `records` without touching them. The sort is stable, so
/// ties keep their listing order.
pub fn project(
    records: &[FileRecord],
    sort: SortKey,
    search: &str,
    kind: Option<MediaKind>,
) -> Vec<FileRecord> {
    let needle = search.to_lowercase();
    let mut out: Vec<FileRecord> = records
        .iter()
        .filter(|r| needle.is_empty() || r.name.to_lowercase().contains(&needle))
        .filter(|r| kind.map_or(true, |k| r.media_kind() == k))
        .cloned()
        .collect();
    out.sort_by(|a, b| sort.compare(a, b));
    out
}
