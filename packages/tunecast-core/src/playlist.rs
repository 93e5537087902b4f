//! Per-playlist membership tracking.
//!
//! DAAP clients address playlist members by a *container id* that is local
//! to the playlist and distinct from the track's item id. Container ids are
//! assigned on first observation, strictly increase in entry order, and are
//! never reused or reassigned — a member that survives a refresh keeps the
//! id it was first given, even across arbitrary deletions around it.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// How many revisions of removal history each container keeps.
const HISTORY_LIMIT: usize = 64;

/// One playlist member: the track's item id plus its playlist-local
/// container id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEntry {
    pub item_id: u32,
    pub container_id: u32,
}

/// Membership snapshot of a single playlist.
#[derive(Debug)]
pub struct ContainerState {
    entries: Vec<ContainerEntry>,
    next_container_id: u32,
    /// Removal history keyed by the revision the removal was observed at.
    deletions: BTreeMap<u32, Vec<u32>>,
}

impl ContainerState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_container_id: 1,
            deletions: BTreeMap::new(),
        }
    }

    /// Current members in order.
    #[must_use]
    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    /// Reconciles the snapshot against the adapter's authoritative id
    /// sequence and returns the item ids that dropped out.
    ///
    /// Both sequences are walked in lockstep. A mismatch drops the current
    /// entry (it was deleted, or reordered away — in which case it comes
    /// back later under a fresh container id) and retries the same incoming
    /// id. Leftover incoming ids are appended as fresh entries.
    pub fn refresh(&mut self, ids: &[u32]) -> Vec<u32> {
        let mut removed = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < ids.len() && j < self.entries.len() {
            if ids[i] == self.entries[j].item_id {
                i += 1;
                j += 1;
            } else {
                removed.push(self.entries[j].item_id);
                self.entries.remove(j);
            }
        }
        while j < self.entries.len() {
            removed.push(self.entries[j].item_id);
            self.entries.remove(j);
        }
        for &id in &ids[i..] {
            self.entries.push(ContainerEntry {
                item_id: id,
                container_id: self.next_container_id,
            });
            self.next_container_id += 1;
        }
        removed
    }

    /// Records a refresh's removals under the revision they were observed
    /// at, pruning history beyond the retention window.
    pub fn record_deletions(&mut self, revision: u32, removed: Vec<u32>) {
        if removed.is_empty() {
            return;
        }
        self.deletions
            .entry(revision)
            .or_default()
            .extend(removed);
        while self.deletions.len() > HISTORY_LIMIT {
            let oldest = *self.deletions.keys().next().unwrap();
            self.deletions.remove(&oldest);
        }
    }

    /// Union of removals in `(from_rev, current]`, sorted and deduplicated.
    #[must_use]
    pub fn deleted_since(&self, from_rev: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .deletions
            .range(from_rev + 1..)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Container states for every playlist the server has seen, keyed by
/// playlist id. Each state carries its own lock so concurrent requests for
/// the same playlist serialize their refresh without blocking others.
pub struct ContainerRegistry {
    containers: DashMap<u32, Arc<Mutex<ContainerState>>>,
}

impl ContainerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { containers: DashMap::new() }
    }

    /// The container state for a playlist, created empty on first use.
    #[must_use]
    pub fn get(&self, playlist_id: u32) -> Arc<Mutex<ContainerState>> {
        self.containers
            .entry(playlist_id)
            .or_insert_with(|| Arc::new(Mutex::new(ContainerState::new())))
            .clone()
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
