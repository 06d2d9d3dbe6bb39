//! Reconciliation engine.
//!
//! A pass replays the queued records in dependency order against the remote
//! store. Only one pass runs at a time; a pass requested while another is in
//! flight, or while a refresh is merging, is coalesced into a no-op.

use crate::connectivity::ConnectivityMonitor;
use crate::context::SyncContext;
use crate::error::{ClientError, Result};
use crate::local::LocalStore;
use crate::remote::{RemoteError, RemoteRepository};
use fieldsync_engine::{
    Deferral, FailedRecord, Filter, LocalId, MergeReport, RemoteId, ReplayAttempt, ReplayMode,
    ReplayStart, SyncStatus,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Field the acting principal is sent under when a record is first created
/// remotely.
pub const CREATED_BY_FIELD: &str = "createdBy";

/// What a finished pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Records confirmed by the remote store
    pub synced: Vec<LocalId>,
    /// Records the remote store rejected
    pub failed: Vec<FailedRecord>,
    /// Records left for a later pass because a reference is unresolved
    pub deferred: Vec<Deferral>,
    /// Create and update calls sent
    pub remote_calls: usize,
    /// The pass stopped early because the remote store was out of reach
    pub stopped_offline: bool,
    /// Records whose foreign keys were rewritten to new remote ids
    pub remapped: usize,
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already running
    Coalesced,
    Completed(PassReport),
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Coalesced => None,
            PassOutcome::Completed(report) => Some(report),
        }
    }
}

/// How a single replay ended for the pass loop.
enum Step {
    Continue,
    Stop,
}

struct Inner {
    local: LocalStore,
    remote: Arc<dyn RemoteRepository>,
    monitor: ConnectivityMonitor,
    pass_guard: Mutex<()>,
}

/// Drives queued records to the remote store. Cheap to clone.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("online", &self.inner.monitor.is_online())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteRepository>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                monitor,
                pass_guard: Mutex::new(()),
            }),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    pub fn remote(&self) -> &Arc<dyn RemoteRepository> {
        &self.inner.remote
    }

    /// Reset records left syncing by an interrupted run. Call once at
    /// startup, before the first pass.
    pub async fn recover(&self) -> Result<usize> {
        let reset = self.inner.local.recover().await?;
        if !reset.is_empty() {
            tracing::warn!(records = reset.len(), "reset interrupted replays to pending");
        }
        Ok(reset.len())
    }

    /// Run one reconciliation pass now.
    pub async fn run_pass(&self, ctx: &SyncContext) -> Result<PassOutcome> {
        let Ok(_guard) = self.inner.pass_guard.try_lock() else {
            tracing::debug!("reconciliation pass already running");
            return Ok(PassOutcome::Coalesced);
        };

        let plan = self.inner.local.plan().await;
        let mut report = PassReport {
            deferred: plan.deferred,
            ..PassReport::default()
        };
        if plan.order.is_empty() {
            return Ok(PassOutcome::Completed(report));
        }

        tracing::info!(
            queued = plan.order.len(),
            deferred = report.deferred.len(),
            "reconciliation pass started"
        );

        for local_id in &plan.order {
            if !self.inner.monitor.is_online() {
                tracing::warn!("went offline, stopping reconciliation pass");
                report.stopped_offline = true;
                break;
            }

            let attempt = match self.inner.local.begin_replay(local_id).await? {
                ReplayStart::Ready(attempt) => attempt,
                ReplayStart::Deferred { waiting_on } => {
                    tracing::debug!(local_id = %local_id, waiting = waiting_on.len(), "replay deferred");
                    report.deferred.push(Deferral {
                        local_id: local_id.clone(),
                        waiting_on,
                    });
                    continue;
                }
                ReplayStart::Skipped => continue,
            };

            match self.replay(ctx, &attempt, &mut report).await? {
                Step::Continue => {}
                Step::Stop => break,
            }
        }

        tracing::info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            remote_calls = report.remote_calls,
            remapped = report.remapped,
            stopped_offline = report.stopped_offline,
            "reconciliation pass finished"
        );
        Ok(PassOutcome::Completed(report))
    }

    async fn replay(
        &self,
        ctx: &SyncContext,
        attempt: &ReplayAttempt,
        report: &mut PassReport,
    ) -> Result<Step> {
        let local = &self.inner.local;
        tracing::debug!(
            local_id = %attempt.local_id,
            collection = %attempt.collection,
            mode = ?attempt.mode,
            "replaying record"
        );

        report.remote_calls += 1;
        let sent: std::result::Result<Option<RemoteId>, RemoteError> = match &attempt.mode {
            ReplayMode::Create => {
                let mut fields = attempt.fields.clone();
                if let Some(principal) = &ctx.principal_id {
                    fields
                        .entry(CREATED_BY_FIELD)
                        .or_insert_with(|| principal.clone().into());
                }
                self.inner
                    .remote
                    .create_remote(&attempt.collection, &fields)
                    .await
                    .map(Some)
            }
            ReplayMode::Update { remote_id } => self
                .inner
                .remote
                .update_remote(&attempt.collection, remote_id, &attempt.fields)
                .await
                .map(|()| None),
        };

        match sent {
            Ok(Some(remote_id)) => {
                let confirmed = local
                    .settle_created(attempt, remote_id, ctx.principal_id.as_deref())
                    .await?;
                report.remapped += confirmed.remapped.len();
                if confirmed.record.sync == SyncStatus::Synced {
                    report.synced.push(attempt.local_id.clone());
                }
                Ok(Step::Continue)
            }
            Ok(None) => {
                let record = local.settle_updated(attempt).await?;
                if record.sync == SyncStatus::Synced {
                    report.synced.push(attempt.local_id.clone());
                }
                Ok(Step::Continue)
            }
            Err(RemoteError::Rejected(reason)) => {
                tracing::warn!(local_id = %attempt.local_id, %reason, "remote store rejected record");
                let record = local.settle_rejected(attempt, &reason).await?;
                if record.sync.failure_reason().is_some() {
                    report.failed.push(FailedRecord {
                        local_id: attempt.local_id.clone(),
                        collection: attempt.collection.clone(),
                        reason,
                    });
                }
                Ok(Step::Continue)
            }
            Err(RemoteError::Unreachable(reason)) => {
                tracing::warn!(local_id = %attempt.local_id, %reason, "remote store unreachable, stopping pass");
                local.settle_unreachable(attempt).await?;
                report.stopped_offline = true;
                Ok(Step::Stop)
            }
        }
    }

    /// Start a pass in the background if online. Never waits for it.
    pub fn request_pass(&self, ctx: &SyncContext) -> Option<JoinHandle<()>> {
        if !self.inner.monitor.is_online() {
            return None;
        }

        let reconciler = self.clone();
        let ctx = ctx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = reconciler.run_pass(&ctx).await {
                tracing::error!(error = %e, "background reconciliation pass failed");
            }
        }))
    }

    /// Run a pass on every transition to online, including the current state
    /// if already online. Stops once the monitor or every reconciler clone is
    /// gone.
    pub fn watch(&self, ctx: SyncContext) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let transitions = self.inner.monitor.transitions();
        tokio::spawn(async move {
            futures::pin_mut!(transitions);
            while let Some(transition) = transitions.next().await {
                if !transition.online {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let reconciler = Reconciler { inner };
                match reconciler.run_pass(&ctx).await {
                    Ok(PassOutcome::Coalesced) => {}
                    Ok(PassOutcome::Completed(report)) => {
                        tracing::debug!(synced = report.synced.len(), "reconnect pass done")
                    }
                    Err(e) => tracing::error!(error = %e, "reconnect pass failed"),
                }
            }
            tracing::debug!("connectivity monitor closed, watcher exiting");
        })
    }

    /// Put a failed record back in the queue and ask for a pass.
    pub async fn retry(&self, ctx: &SyncContext, id: &LocalId) -> Result<()> {
        self.inner.local.requeue(id).await?;
        self.request_pass(ctx);
        Ok(())
    }

    /// Put every failed record back in the queue and ask for a pass.
    pub async fn retry_failed(&self, ctx: &SyncContext) -> Result<usize> {
        let requeued = self.inner.local.requeue_failed().await?;
        if !requeued.is_empty() {
            tracing::info!(records = requeued.len(), "requeued failed records");
            self.request_pass(ctx);
        }
        Ok(requeued.len())
    }

    /// Pull matching remote records into the local store. Local edits still
    /// queued are kept. Fails without touching local state when the remote
    /// store cannot be reached; callers can fall back to local reads.
    ///
    /// Waits for a running pass to finish and holds off new ones until the
    /// merge is done, so a listing never races a create still in flight.
    pub async fn refresh(&self, collection: &str, filter: &Filter) -> Result<MergeReport> {
        let _guard = self.inner.pass_guard.lock().await;
        let remote = self
            .inner
            .remote
            .list_remote(collection, filter)
            .await
            .map_err(|e| {
                tracing::warn!(collection, error = %e, "remote listing failed");
                ClientError::Remote(e)
            })?;

        let report = self.inner.local.merge_remote(remote).await?;
        tracing::info!(
            collection,
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            kept_local = report.kept_local.len(),
            "merged remote records"
        );
        Ok(report)
    }
}
