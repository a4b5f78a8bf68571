//! Sync orchestrator.
//!
//! Runs full reconciliation passes over every shared profile. At most one
//! pass runs at a time: a request that arrives while a pass is in flight is
//! dropped, and the next trigger catches up. Within a pass each profile is
//! pulled before it is pushed; owners push every pass, participants only
//! after a local change. A failing profile is logged and skipped.

use crate::engine::{PullReport, PushReport, SyncEngine};
use crate::error::{SharingError, SharingResult};
use crate::sharing::ShareManager;
use nestling_types::ProfileId;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Foreground,
    RemoteNotification,
    /// A profile changed locally and should be pushed.
    LocalChange(ProfileId),
    Timer,
}

/// Progress notifications for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PassStarted(SyncTrigger),
    PassSkipped(SyncTrigger),
    UnitSynced {
        profile_id: ProfileId,
        pulled: PullReport,
        pushed: Option<PushReport>,
    },
    UnitFailed {
        profile_id: ProfileId,
        error: String,
    },
    PassFinished(PassReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub trigger: SyncTrigger,
    pub synced: Vec<ProfileId>,
    pub failed: Vec<(ProfileId, String)>,
    pub orphaned_zones_removed: usize,
}

impl PassReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            synced: Vec::new(),
            failed: Vec::new(),
            orphaned_zones_removed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass was already running.
    Skipped,
}

/// Sends triggers to a spawned orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<SyncTrigger>,
}

impl OrchestratorHandle {
    /// Queues a trigger. Returns false if the queue is full or the worker
    /// has stopped; either way a later trigger will catch up.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.tx.try_send(trigger).is_ok()
    }

    pub fn foreground(&self) -> bool {
        self.trigger(SyncTrigger::Foreground)
    }

    pub fn remote_notification(&self) -> bool {
        self.trigger(SyncTrigger::RemoteNotification)
    }

    pub fn local_change(&self, profile_id: ProfileId) -> bool {
        self.trigger(SyncTrigger::LocalChange(profile_id))
    }
}

const TRIGGER_QUEUE: usize = 32;
const EVENT_CAPACITY: usize = 64;

pub struct SyncOrchestrator {
    shares: Arc<ShareManager>,
    in_flight: AsyncMutex<()>,
    /// Profiles with local changes not yet pushed.
    dirty: Mutex<BTreeSet<ProfileId>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(shares: Arc<ShareManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shares,
            in_flight: AsyncMutex::new(()),
            dirty: Mutex::new(BTreeSet::new()),
            events,
        }
    }

    fn engine(&self) -> &Arc<SyncEngine> {
        self.shares.engine()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn mark_dirty(&self, profile_id: ProfileId) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile_id);
    }

    pub fn is_dirty(&self, profile_id: ProfileId) -> bool {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&profile_id)
    }

    /// Clears the dirty flag, returning whether it was set.
    fn take_dirty(&self, profile_id: ProfileId) -> bool {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&profile_id)
    }

    /// Runs one full pass, or skips it if another is in flight.
    pub async fn run_pass(&self, trigger: SyncTrigger) -> PassOutcome {
        if let SyncTrigger::LocalChange(profile_id) = trigger {
            self.mark_dirty(profile_id);
        }

        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!(?trigger, "Sync pass already running; dropping request");
            self.emit(SyncEvent::PassSkipped(trigger));
            return PassOutcome::Skipped;
        };

        info!(?trigger, "Sync pass started");
        self.emit(SyncEvent::PassStarted(trigger));
        let mut report = PassReport::new(trigger);

        let units = self.engine().state().read().await.shared_profile_ids();
        for profile_id in units {
            match self.reconcile(profile_id).await {
                Ok((pulled, pushed)) => {
                    report.synced.push(profile_id);
                    self.emit(SyncEvent::UnitSynced {
                        profile_id,
                        pulled,
                        pushed,
                    });
                }
                Err(e) => {
                    warn!(%profile_id, "Reconciliation failed: {}", e);
                    let error = e.to_string();
                    self.engine()
                        .state()
                        .write()
                        .await
                        .record_failure(profile_id, error.clone());
                    report.failed.push((profile_id, error.clone()));
                    self.emit(SyncEvent::UnitFailed { profile_id, error });
                }
            }
        }

        if self.engine().config().cleanup_orphaned_zones {
            match self.shares.cleanup_orphaned_zones().await {
                Ok(removed) => report.orphaned_zones_removed = removed.len(),
                Err(e) => warn!("Orphaned zone cleanup failed: {}", e),
            }
        }

        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "Sync pass finished"
        );
        self.emit(SyncEvent::PassFinished(report.clone()));
        PassOutcome::Completed(report)
    }

    /// Pull, then push if this device owns the profile or changed it.
    ///
    /// The dirty flag is taken before the pull, so a change marked while
    /// this profile is being reconciled stays marked for the next pass. A
    /// failed reconciliation puts the flag back.
    async fn reconcile(
        &self,
        profile_id: ProfileId,
    ) -> SharingResult<(PullReport, Option<PushReport>)> {
        let engine = self.engine();
        let profile = match engine.load_profile(profile_id) {
            Ok(profile) => profile,
            Err(e @ SharingError::ProfileNotFound(_)) => {
                info!(%profile_id, "Profile deleted locally; dropping from registry");
                engine.state().write().await.remove_shared(profile_id);
                self.take_dirty(profile_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let dirty = self.take_dirty(profile_id);
        let result = self
            .pull_then_push(profile_id, profile.is_owned_locally() || dirty)
            .await;
        if result.is_err() && dirty {
            self.mark_dirty(profile_id);
        }
        result
    }

    async fn pull_then_push(
        &self,
        profile_id: ProfileId,
        push: bool,
    ) -> SharingResult<(PullReport, Option<PushReport>)> {
        let pulled = self.engine().pull(profile_id).await?;
        let pushed = if push {
            Some(self.engine().push(profile_id).await?)
        } else {
            None
        };
        Ok((pulled, pushed))
    }

    /// Starts a worker that runs a pass per trigger and on a timer.
    ///
    /// Triggers queued while a pass runs are folded into a single follow-up
    /// pass. The worker stops once every handle is dropped.
    pub fn spawn(self: Arc<Self>) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        let task = tokio::spawn(self.run(rx));
        (OrchestratorHandle { tx }, task)
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<SyncTrigger>) {
        let mut timer = tokio::time::interval(self.engine().config().poll_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            let trigger = tokio::select! {
                received = rx.recv() => match received {
                    Some(trigger) => trigger,
                    None => break,
                },
                _ = timer.tick() => SyncTrigger::Timer,
            };

            while let Ok(queued) = rx.try_recv() {
                if let SyncTrigger::LocalChange(profile_id) = queued {
                    self.mark_dirty(profile_id);
                }
            }

            self.run_pass(trigger).await;
        }
        debug!("Orchestrator stopped");
    }
}
