use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{MeshError, MeshResult, WorkerRecord, WorkerStatus};
use taskmesh_store::KvStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ALL_WORKERS_SET: &str = "workers:all";

fn worker_key(role: &str, id: &str) -> String {
    format!("worker:{role}:{id}")
}

fn role_set(role: &str) -> String {
    format!("role:{role}")
}

fn status_set(role: &str, status: WorkerStatus) -> String {
    format!("role:{role}:status:{status}")
}

/// Outcome of a task execution, fed back into per-worker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Filters applied by [`WorkerRegistry::list_by_role`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<WorkerStatus>,
    pub max_load: Option<f64>,
    pub enabled_only: bool,
}

impl ListFilter {
    /// The filter the broker uses for candidate selection: available,
    /// enabled workers only.
    pub fn candidates() -> Self {
        Self {
            status: Some(WorkerStatus::Available),
            max_load: None,
            enabled_only: true,
        }
    }

    pub fn matches(&self, worker: &WorkerRecord) -> bool {
        if let Some(status) = self.status {
            if worker.status != status {
                return false;
            }
        }
        if let Some(max) = self.max_load {
            if worker.load > max {
                return false;
            }
        }
        !(self.enabled_only && !worker.enabled)
    }
}

/// Store-backed repository of registered workers.
///
/// Passed by `Arc` into the broker and orchestrator. Worker entries expire
/// after `ttl` absent a fresh heartbeat; records past TTL are logically
/// absent even before the sweep physically cleans the indexes.
pub struct WorkerRegistry {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Upsert a worker by id and (re)start its TTL clock. Re-registering
    /// the same id updates rather than duplicates.
    pub async fn register(&self, mut worker: WorkerRecord) -> MeshResult<()> {
        worker.role = worker.role.to_lowercase();
        worker.last_heartbeat = Utc::now();

        // Preserve accumulated statistics across re-registration.
        if let Some(existing) = self.get(&worker.role, &worker.id).await? {
            worker.stats = existing.stats;
            if existing.status != worker.status {
                self.store
                    .set_remove(&status_set(&worker.role, existing.status), &worker.id)
                    .await?;
            }
        }

        let value = serde_json::to_value(&worker)?;
        self.store
            .put_with_ttl(&worker_key(&worker.role, &worker.id), value, self.ttl)
            .await?;
        self.store
            .set_add(&role_set(&worker.role), &worker.id)
            .await?;
        self.store
            .set_add(&status_set(&worker.role, worker.status), &worker.id)
            .await?;
        self.store
            .set_add(ALL_WORKERS_SET, &worker_key(&worker.role, &worker.id))
            .await?;

        info!(worker_id = %worker.id, role = %worker.role, endpoint = %worker.endpoint, "Worker registered");
        Ok(())
    }

    /// Refresh a worker's liveness and load. Fails with `NotFound` when the
    /// worker was never registered or its entry already expired.
    pub async fn heartbeat(
        &self,
        role: &str,
        id: &str,
        status: WorkerStatus,
        load: f64,
        active_task_count: u32,
    ) -> MeshResult<()> {
        let role = role.to_lowercase();
        let mut worker = self
            .get(&role, id)
            .await?
            .ok_or_else(|| MeshError::NotFound(format!("worker {id} for role {role}")))?;

        if worker.status != status {
            self.store
                .set_remove(&status_set(&role, worker.status), id)
                .await?;
            self.store.set_add(&status_set(&role, status), id).await?;
        }

        worker.status = status;
        worker.load = load.clamp(0.0, 1.0);
        worker.active_task_count = active_task_count;
        worker.last_heartbeat = Utc::now();

        let value = serde_json::to_value(&worker)?;
        self.store
            .put_with_ttl(&worker_key(&role, id), value, self.ttl)
            .await?;
        debug!(worker_id = %id, role = %role, status = %status, load, "Heartbeat");
        Ok(())
    }

    /// Remove a worker from all indexes. Unregistering an absent worker is
    /// a no-op, not an error.
    pub async fn unregister(&self, role: &str, id: &str) -> MeshResult<()> {
        let role = role.to_lowercase();
        let key = worker_key(&role, id);

        if let Some(worker) = self.get(&role, id).await? {
            self.store
                .set_remove(&status_set(&role, worker.status), id)
                .await?;
        } else {
            // The record may be gone while status indexes linger; clear all.
            for status in [
                WorkerStatus::Available,
                WorkerStatus::Busy,
                WorkerStatus::Offline,
                WorkerStatus::Error,
            ] {
                self.store.set_remove(&status_set(&role, status), id).await?;
            }
        }

        self.store.delete(&key).await?;
        self.store.set_remove(&role_set(&role), id).await?;
        self.store.set_remove(ALL_WORKERS_SET, &key).await?;
        info!(worker_id = %id, role = %role, "Worker unregistered");
        Ok(())
    }

    /// Load one worker, treating an expired entry as absent.
    pub async fn get(&self, role: &str, id: &str) -> MeshResult<Option<WorkerRecord>> {
        let role = role.to_lowercase();
        match self.store.get(&worker_key(&role, id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// All live workers for a role matching the supplied filters.
    pub async fn list_by_role(
        &self,
        role: &str,
        filter: &ListFilter,
    ) -> MeshResult<Vec<WorkerRecord>> {
        let role = role.to_lowercase();
        let ids = self.store.set_members(&role_set(&role)).await?;
        let mut workers = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&role, &id).await? {
                Some(worker) if filter.matches(&worker) => workers.push(worker),
                Some(_) => {}
                // Entry expired under the index; clean it up opportunistically.
                None => self.cleanup_indexes(&role, &id).await?,
            }
        }
        Ok(workers)
    }

    /// Distinct roles with at least one live, enabled worker. Used by the
    /// orchestrator to filter plans.
    pub async fn enabled_roles(&self) -> MeshResult<Vec<String>> {
        let keys = self.store.set_members(ALL_WORKERS_SET).await?;
        let mut roles = Vec::new();
        for key in keys {
            if let Some(value) = self.store.get(&key).await? {
                let worker: WorkerRecord = serde_json::from_value(value)?;
                if worker.enabled && !roles.contains(&worker.role) {
                    roles.push(worker.role);
                }
            }
        }
        roles.sort();
        Ok(roles)
    }

    /// Fold one task outcome into the worker's running statistics.
    ///
    /// Successful samples update the EWMA execution time with weight 0.2.
    /// The rewrite keeps the entry's existing TTL; stats updates are not a
    /// liveness signal.
    pub async fn update_task_stats(
        &self,
        role: &str,
        id: &str,
        outcome: TaskOutcome,
        execution_ms: Option<u64>,
    ) -> MeshResult<()> {
        let role = role.to_lowercase();
        let Some(mut worker) = self.get(&role, id).await? else {
            // The worker may have expired between task dispatch and
            // completion; dropping the sample is fine.
            debug!(worker_id = %id, role = %role, "Stats update for absent worker dropped");
            return Ok(());
        };
        worker
            .stats
            .record(outcome == TaskOutcome::Completed, execution_ms);
        let value = serde_json::to_value(&worker)?;
        self.store.put(&worker_key(&role, id), value).await?;
        Ok(())
    }

    async fn cleanup_indexes(&self, role: &str, id: &str) -> MeshResult<()> {
        self.store.set_remove(&role_set(role), id).await?;
        for status in [
            WorkerStatus::Available,
            WorkerStatus::Busy,
            WorkerStatus::Offline,
            WorkerStatus::Error,
        ] {
            self.store.set_remove(&status_set(role, status), id).await?;
        }
        self.store
            .set_remove(ALL_WORKERS_SET, &worker_key(role, id))
            .await?;
        Ok(())
    }

    /// One pass of secondary-index cleanup: every indexed worker whose
    /// entry has expired is removed from the role/status/all indexes.
    /// Returns the number of workers swept.
    pub async fn sweep_once(&self) -> MeshResult<usize> {
        let keys = self.store.set_members(ALL_WORKERS_SET).await?;
        let mut swept = 0;
        for key in keys {
            if self.store.get(&key).await?.is_some() {
                continue;
            }
            // Key layout is worker:{role}:{id}; ids may not contain ':'.
            let mut parts = key.splitn(3, ':');
            let (Some(_), Some(role), Some(id)) = (parts.next(), parts.next(), parts.next())
            else {
                warn!(key = %key, "Malformed worker key in index, removing");
                self.store.set_remove(ALL_WORKERS_SET, &key).await?;
                continue;
            };
            self.cleanup_indexes(role, id).await?;
            swept += 1;
            info!(worker_id = %id, role = %role, "Expired worker swept from indexes");
        }
        Ok(swept)
    }

    /// Spawn the periodic expiry sweep. The returned handle stops the loop
    /// at shutdown.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.sweep_once().await {
                            Ok(0) => {}
                            Ok(n) => debug!(swept = n, "Registry sweep complete"),
                            Err(e) => warn!(error = %e, "Registry sweep failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Registry sweeper shutting down");
                        break;
                    }
                }
            }
        });
        SweeperHandle {
            handle,
            shutdown: shutdown_tx,
        }
    }

    /// Dump every live worker across all roles (unfiltered).
    pub async fn list_all(&self) -> MeshResult<Vec<WorkerRecord>> {
        let keys = self.store.set_members(ALL_WORKERS_SET).await?;
        let mut workers = Vec::new();
        for key in keys {
            if let Some(value) = self.store.get(&key).await? {
                workers.push(serde_json::from_value::<WorkerRecord>(value)?);
            }
        }
        Ok(workers)
    }
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SweeperHandle {
    /// Signal the sweep loop to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
