//! Library revision tracking and the `/update` long-poll.
//!
//! The revision is a global counter starting at 1; every library mutation
//! bumps it and records which root tracks disappeared in that step. Clients
//! park on [`RevisionManager::wait_for_update`] until the counter passes
//! their last-seen value or the server shuts down.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How many revisions of deletion history to keep. Clients further behind
/// than this get an empty deletion set and fall back to a full listing.
const HISTORY_LIMIT: usize = 64;

struct RevState {
    revision: u32,
    /// revision -> ids deleted between revision-1 and revision.
    deletions: BTreeMap<u32, Vec<u32>>,
}

/// Owns the revision counter, its deletion history, and the waiter wakeup.
pub struct RevisionManager {
    state: Mutex<RevState>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl RevisionManager {
    /// Creates a manager at revision 1 whose waits abort when `shutdown`
    /// is cancelled.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            state: Mutex::new(RevState {
                revision: 1,
                deletions: BTreeMap::new(),
            }),
            notify: Notify::new(),
            shutdown,
        }
    }

    /// The current revision.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.state.lock().revision
    }

    /// Atomically advances the revision, records the deletion set for the
    /// new revision, and wakes every waiter. Returns the new revision.
    pub fn bump(&self, deleted_ids: Vec<u32>) -> u32 {
        let revision = {
            let mut state = self.state.lock();
            state.revision += 1;
            let revision = state.revision;
            state.deletions.insert(revision, deleted_ids);
            while state.deletions.len() > HISTORY_LIMIT {
                let oldest = *state.deletions.keys().next().unwrap();
                state.deletions.remove(&oldest);
            }
            revision
        };
        self.notify.notify_waiters();
        log::debug!("[Revision] advanced to {}", revision);
        revision
    }

    /// Parks until the revision exceeds `client_rev` or the server stops,
    /// then returns the current revision. The caller distinguishes the
    /// shutdown case by checking the token itself.
    pub async fn wait_for_update(&self, client_rev: u32) -> u32 {
        loop {
            // arm before checking so a bump between the check and the await
            // cannot be missed
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if state.revision > client_rev {
                    return state.revision;
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.cancelled() => return self.current(),
            }
        }
    }

    /// Union of the root deletion sets in `(from_rev, current]`, sorted and
    /// deduplicated. If any revision in that range has been pruned from
    /// history the result is empty, which makes clients re-fetch the full
    /// listing.
    #[must_use]
    pub fn deleted_since(&self, from_rev: u32) -> Vec<u32> {
        let state = self.state.lock();
        if from_rev >= state.revision {
            return Vec::new();
        }
        let mut ids = Vec::new();
        for rev in from_rev + 1..=state.revision {
            match state.deletions.get(&rev) {
                Some(deleted) => ids.extend(deleted.iter().copied()),
                None => return Vec::new(),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
