//! Replay planning for the mutation queue.
//!
//! A reconciliation pass replays queued records in an order where every
//! dependent record comes after the records its foreign keys name.
//!
//! # Algorithm
//!
//! 1. Collect all queued records (pending + failed)
//! 2. For each, find referenced records that have no remote ID yet
//! 3. A record waiting on something outside the queue (in flight, or
//!    unknown) is deferred, and so is everything that waits on it
//! 4. Order the rest topologically (Kahn), ties broken by
//!    (created_at, local_id) for a deterministic order
//! 5. Records caught in a reference cycle are deferred

use crate::{CollectionName, Fields, LocalId, RemoteId, Store, SyncStatus, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// How a record is sent to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ReplayMode {
    /// Not yet known remotely
    Create,
    /// Already confirmed; send the edit against the remote id
    Update { remote_id: RemoteId },
}

/// One in-flight replay of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayAttempt {
    pub local_id: LocalId,
    pub collection: CollectionName,
    pub mode: ReplayMode,
    /// Fields to send, with foreign keys resolved to remote ids
    pub fields: Fields,
    /// Record revision when the attempt started
    pub revision: u64,
    /// Status before the record was marked syncing
    pub previous: SyncStatus,
}

/// Outcome of trying to start a replay.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStart {
    /// Marked syncing, ready to send
    Ready(ReplayAttempt),
    /// A referenced record has no remote id yet
    Deferred { waiting_on: Vec<LocalId> },
    /// No longer queued (removed, or settled meanwhile)
    Skipped,
}

/// A queued record left out of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deferral {
    pub local_id: LocalId,
    /// Unconfirmed records it references
    pub waiting_on: Vec<LocalId>,
}

/// Ordered replay queue for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayPlan {
    /// Records to attempt, dependencies first
    pub order: Vec<LocalId>,
    /// Records that must wait for a later pass
    pub deferred: Vec<Deferral>,
}

impl ReplayPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty() && self.deferred.is_empty()
    }

    /// Position of a record in the replay order.
    pub fn position(&self, id: &LocalId) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }
}

/// Build the replay plan for the store's current queue.
pub fn plan_replay(store: &Store) -> ReplayPlan {
    let queued = store.queued();
    let queued_ids: HashSet<&LocalId> = queued.iter().map(|r| &r.local_id).collect();
    let created: HashMap<&LocalId, Timestamp> =
        queued.iter().map(|r| (&r.local_id, r.created_at)).collect();

    let mut plan = ReplayPlan::default();
    let mut waiting: HashMap<&LocalId, Vec<LocalId>> = HashMap::new();

    for record in &queued {
        let unresolved = store.unresolved_references(record);
        if unresolved.iter().any(|dep| !queued_ids.contains(dep)) {
            plan.deferred.push(Deferral {
                local_id: record.local_id.clone(),
                waiting_on: unresolved,
            });
        } else {
            waiting.insert(&record.local_id, unresolved);
        }
    }

    let mut indegree: HashMap<&LocalId, usize> = HashMap::new();
    let mut dependents: HashMap<LocalId, Vec<&LocalId>> = HashMap::new();
    for (&id, deps) in &waiting {
        indegree.insert(id, deps.len());
        for dep in deps {
            dependents.entry(dep.clone()).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<(Timestamp, &LocalId)> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| (created[id], *id))
        .collect();

    let mut emitted: HashSet<&LocalId> = HashSet::new();
    while let Some((_, id)) = ready.pop_first() {
        plan.order.push(id.clone());
        emitted.insert(id);
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((created[dependent], *dependent));
                }
            }
        }
    }

    // Anything not emitted waits on a deferred record or sits in a cycle.
    let mut leftover: Vec<&LocalId> = waiting
        .keys()
        .filter(|id| !emitted.contains(*id))
        .copied()
        .collect();
    leftover.sort_by_key(|id| (created[id], *id));
    for id in leftover {
        let waiting_on = waiting[id]
            .iter()
            .filter(|dep| !emitted.contains(dep))
            .cloned()
            .collect();
        plan.deferred.push(Deferral {
            local_id: id.clone(),
            waiting_on,
        });
    }

    plan.deferred.sort_by(|a, b| a.local_id.cmp(&b.local_id));
    plan
}
