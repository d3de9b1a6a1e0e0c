use crate::cache::ResultCache;
use crate::client::{RunRequest, WorkerClient};
use crate::inference::InferenceOracle;
use crate::selection::select_worker;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use taskmesh_core::{
    coerce_value, validate_params, MeshConfig, MeshError, MeshResult, ParamSpec, TaskRecord,
    TaskStatus,
};
use taskmesh_registry::{ListFilter, TaskOutcome, WorkerRegistry};
use taskmesh_store::KvStore;
use tracing::{debug, info, warn};

fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

fn conversation_set(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

/// Response of the fire-and-forget submission API.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: String,
}

/// One page of a task listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Owns the lifecycle of every task routed through this control plane.
///
/// Cloning is cheap; all clones share the same store, registry, cache, and
/// HTTP client.
#[derive(Clone)]
pub struct TaskBroker {
    registry: Arc<WorkerRegistry>,
    store: Arc<dyn KvStore>,
    cache: ResultCache,
    client: WorkerClient,
    config: Arc<MeshConfig>,
    inference: Option<Arc<dyn InferenceOracle>>,
}

impl TaskBroker {
    pub fn new(registry: Arc<WorkerRegistry>, store: Arc<dyn KvStore>, config: MeshConfig) -> Self {
        let client = WorkerClient::new(config.max_call_retries, config.retry_backoff_ms);
        Self {
            registry,
            cache: ResultCache::new(store.clone()),
            store,
            client,
            config: Arc::new(config),
            inference: None,
        }
    }

    /// Attach the external parameter-inference oracle.
    pub fn with_inference(mut self, oracle: Arc<dyn InferenceOracle>) -> Self {
        self.inference = Some(oracle);
        self
    }

    /// Submit a task and begin executing it in the background. Returns
    /// immediately; callers poll [`TaskBroker::get_task`] for progress.
    ///
    /// With a conversation id the task id is deterministic, and
    /// resubmitting an identical request while the first is still known
    /// returns the existing task instead of starting a duplicate.
    pub async fn create_task(
        &self,
        role: &str,
        params: Map<String, Value>,
        conversation_id: Option<String>,
        agent_configs: Option<Value>,
    ) -> MeshResult<TaskAccepted> {
        let record = TaskRecord::new(role, params, conversation_id);

        if record.conversation_id.is_some() {
            if let Some(existing) = self.get_task(&record.task_id).await? {
                debug!(task_id = %existing.task_id, "Duplicate submission de-duplicated");
                return Ok(TaskAccepted {
                    task_id: existing.task_id,
                    status: "accepted".to_string(),
                });
            }
        }

        self.save_task(&record).await?;
        if let Some(cid) = &record.conversation_id {
            self.store
                .set_add(&conversation_set(cid), &record.task_id)
                .await?;
        }

        info!(task_id = %record.task_id, role = %record.role, "Task accepted");

        let broker = self.clone();
        let task_id = record.task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = broker.run_pipeline(&task_id, None, agent_configs).await {
                debug!(task_id = %task_id, error = %e, "Background task ended in failure");
            }
        });

        Ok(TaskAccepted {
            task_id: record.task_id,
            status: "accepted".to_string(),
        })
    }

    /// The same pipeline as [`TaskBroker::create_task`], executed inline
    /// with the result returned directly. Used by the orchestrator to
    /// await one task without polling.
    ///
    /// Resubmissions under a conversation land on the deterministic id of
    /// the earlier task; the existing record is settled, never replaced.
    pub async fn execute_task_sync(
        &self,
        role: &str,
        params: Map<String, Value>,
        conversation_id: Option<String>,
        exclude_worker_id: Option<&str>,
    ) -> MeshResult<Map<String, Value>> {
        let record = TaskRecord::new(role, params, conversation_id);

        if record.conversation_id.is_some() {
            if let Some(existing) = self.get_task(&record.task_id).await? {
                debug!(task_id = %existing.task_id, "Duplicate submission; settling existing record");
                return self.settle_existing(existing).await;
            }
        }

        self.save_task(&record).await?;
        if let Some(cid) = &record.conversation_id {
            self.store
                .set_add(&conversation_set(cid), &record.task_id)
                .await?;
        }
        self.run_pipeline(&record.task_id, exclude_worker_id, None)
            .await
    }

    /// Resolve a duplicate submission against the record already stored
    /// under its id: replay a completed result, surface a failure or
    /// cancellation, and wait out an execution still in flight. The stored
    /// record is authoritative and is never written here, so a terminal
    /// record can never regress.
    async fn settle_existing(&self, mut task: TaskRecord) -> MeshResult<Map<String, Value>> {
        // Generous bound covering the in-flight call plus its retries.
        let per_call = self.config.call_timeout(&task.role);
        let deadline = std::time::Instant::now()
            + per_call * (self.config.max_call_retries + 1)
            + std::time::Duration::from_secs(1);

        loop {
            match task.status {
                TaskStatus::Completed => return Ok(task.result.unwrap_or_default()),
                TaskStatus::Failed => {
                    return Err(MeshError::Worker(task.error.unwrap_or_else(|| {
                        format!("task {} previously failed", task.task_id)
                    })))
                }
                TaskStatus::Cancelled => {
                    return Err(MeshError::Validation(format!(
                        "task {} was cancelled",
                        task.task_id
                    )))
                }
                TaskStatus::Pending | TaskStatus::Processing => {
                    if std::time::Instant::now() >= deadline {
                        return Err(MeshError::Transport(format!(
                            "timed out waiting for in-flight task {}",
                            task.task_id
                        )));
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    task = self.load_task(&task.task_id).await?;
                }
            }
        }
    }

    /// Drive one task from pending to a terminal state.
    async fn run_pipeline(
        &self,
        task_id: &str,
        exclude_worker_id: Option<&str>,
        agent_configs: Option<Value>,
    ) -> MeshResult<Map<String, Value>> {
        let mut task = self.load_task(task_id).await?;
        // A cancel between submission and pickup lands here as an illegal
        // transition and stops the pipeline before any worker is contacted.
        task.transition(TaskStatus::Processing)?;
        self.save_task(&task).await?;

        // The cache key is built from the params as submitted, before any
        // schema repair, so identical submissions hit regardless of what a
        // worker's schema later did to them.
        let submitted_params = task.params.clone();
        if let Some(result) = self.cache.get(&task.role, &submitted_params).await? {
            task.cache_hit = true;
            task.complete(result.clone())?;
            self.save_task(&task).await?;
            info!(task_id = %task.task_id, role = %task.role, "Task served from cache");
            return Ok(result);
        }

        match self
            .dispatch(&mut task, exclude_worker_id, agent_configs)
            .await
        {
            Ok(result) => {
                if self.reloaded_as_cancelled(task_id).await? {
                    info!(task_id = %task.task_id, "Discarding result: task was cancelled in flight");
                    return Err(MeshError::Validation(format!(
                        "task {task_id} was cancelled"
                    )));
                }
                task.complete(result.clone())?;
                self.save_task(&task).await?;
                self.cache
                    .put(&task.role, &submitted_params, &result)
                    .await?;
                if let Some(worker_id) = &task.assigned_worker_id {
                    self.registry
                        .update_task_stats(
                            &task.role,
                            worker_id,
                            TaskOutcome::Completed,
                            task.execution_time_ms,
                        )
                        .await?;
                }
                info!(
                    task_id = %task.task_id,
                    role = %task.role,
                    execution_ms = task.execution_time_ms,
                    "Task completed"
                );
                Ok(result)
            }
            Err(e) => {
                if self.reloaded_as_cancelled(task_id).await? {
                    return Err(e);
                }
                warn!(task_id = %task.task_id, role = %task.role, error = %e, "Task failed");
                task.fail(e.to_string())?;
                self.save_task(&task).await?;
                if let Some(worker_id) = &task.assigned_worker_id {
                    self.registry
                        .update_task_stats(&task.role, worker_id, TaskOutcome::Failed, None)
                        .await?;
                }
                Err(e)
            }
        }
    }

    /// Select a worker, repair parameters, and make the HTTP call.
    async fn dispatch(
        &self,
        task: &mut TaskRecord,
        exclude_worker_id: Option<&str>,
        agent_configs: Option<Value>,
    ) -> MeshResult<Map<String, Value>> {
        let candidates = self
            .registry
            .list_by_role(&task.role, &ListFilter::candidates())
            .await?;
        let worker = select_worker(&task.role, candidates, exclude_worker_id)?;

        let params = self.prepare_params(&task.role, &worker.params, &task.params).await?;
        task.params = params.clone();
        task.assigned_worker_id = Some(worker.id.clone());
        self.save_task(task).await?;

        debug!(
            task_id = %task.task_id,
            worker_id = %worker.id,
            endpoint = %worker.endpoint,
            "Dispatching task to worker"
        );

        let request = RunRequest {
            task_id: task.task_id.clone(),
            params,
            agent_configs,
        };
        self.client
            .run(&worker.endpoint, &request, self.config.call_timeout(&task.role))
            .await
    }

    /// Coerce supplied params against the worker's declared schema, then
    /// fill any still-missing required parameters through the inference
    /// oracle, re-coercing exactly the inferred fields.
    async fn prepare_params(
        &self,
        role: &str,
        specs: &[ParamSpec],
        supplied: &Map<String, Value>,
    ) -> MeshResult<Map<String, Value>> {
        let (mut repaired, missing) = validate_params(specs, supplied);
        if missing.is_empty() {
            return Ok(repaired);
        }

        let Some(oracle) = &self.inference else {
            return Err(MeshError::Validation(format!(
                "missing required params for role '{role}': {}",
                missing.join(", ")
            )));
        };

        let missing_specs: Vec<ParamSpec> = specs
            .iter()
            .filter(|s| missing.contains(&s.name))
            .cloned()
            .collect();
        let inferred = oracle.infer(role, &missing_specs, &repaired).await?;

        for spec in &missing_specs {
            if let Some(value) = inferred.get(&spec.name) {
                if let Some(coerced) = coerce_value(value, spec.kind) {
                    repaired.insert(spec.name.clone(), coerced);
                }
            }
        }

        let still_missing: Vec<String> = missing_specs
            .iter()
            .filter(|s| !repaired.contains_key(&s.name))
            .map(|s| s.name.clone())
            .collect();
        if !still_missing.is_empty() {
            return Err(MeshError::Validation(format!(
                "required params for role '{role}' could not be inferred: {}",
                still_missing.join(", ")
            )));
        }
        Ok(repaired)
    }

    /// Cancel a pending or processing task. Illegal from a terminal state.
    pub async fn cancel_task(&self, task_id: &str) -> MeshResult<TaskRecord> {
        let mut task = self.load_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(MeshError::Validation(format!(
                "task {task_id} is already {} and cannot be cancelled",
                task.status
            )));
        }
        task.transition(TaskStatus::Cancelled)?;
        self.save_task(&task).await?;
        info!(task_id = %task_id, "Task cancelled");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> MeshResult<Option<TaskRecord>> {
        match self.store.get(&task_key(task_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Paginated task listing, newest first. `page` is 1-based.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        role: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> MeshResult<TaskPage> {
        let keys = self.store.keys_with_prefix("task:").await?;
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.store.get(&key).await? {
                tasks.push(serde_json::from_value::<TaskRecord>(value)?);
            }
        }

        let role = role.map(str::to_lowercase);
        tasks.retain(|t| {
            status.map_or(true, |s| t.status == s) && role.as_deref().map_or(true, |r| t.role == r)
        });
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = tasks.len();
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = (page - 1) * page_size;
        let tasks = if start >= total {
            Vec::new()
        } else {
            tasks[start..(start + page_size).min(total)].to_vec()
        };

        Ok(TaskPage {
            tasks,
            total,
            page,
            page_size,
        })
    }

    /// All tasks submitted under a conversation, oldest first.
    pub async fn tasks_by_conversation(&self, conversation_id: &str) -> MeshResult<Vec<TaskRecord>> {
        let ids = self
            .store
            .set_members(&conversation_set(conversation_id))
            .await?;
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.get_task(&id).await? {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn load_task(&self, task_id: &str) -> MeshResult<TaskRecord> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| MeshError::NotFound(format!("task {task_id}")))
    }

    async fn save_task(&self, task: &TaskRecord) -> MeshResult<()> {
        let value = serde_json::to_value(task)?;
        self.store.put(&task_key(&task.task_id), value).await
    }

    async fn reloaded_as_cancelled(&self, task_id: &str) -> MeshResult<bool> {
        Ok(self
            .get_task(task_id)
            .await?
            .map_or(false, |t| t.status == TaskStatus::Cancelled))
    }
}
