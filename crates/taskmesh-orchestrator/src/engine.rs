use crate::extract::{extract_content, propagate};
use crate::graph::{compute_levels, filter_plan};
use crate::oracle::{Integrator, Planner, TaskSummary};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use taskmesh_broker::TaskBroker;
use taskmesh_core::{MeshError, MeshResult, PlannedTask};
use taskmesh_fallback::{
    FallbackContext, FallbackManager, FallbackStatus, AGENT_SELECTION_FAILURE,
    PARAM_VALIDATION_FAILURE, TASK_EXECUTION_FAILURE,
};
use taskmesh_registry::WorkerRegistry;
use tracing::{debug, info, warn};

/// Terminal verdict of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Completed,
    PartiallyCompleted,
    Failed,
}

/// Per-task outcome inside a report.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub index: usize,
    pub role: String,
    pub description: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What one call to [`Orchestrator::run`] produced: the integrated answer
/// when at least one task yielded usable content, plus every task's
/// individual outcome.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReport {
    pub status: OrchestrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub tasks: Vec<TaskReport>,
}

/// Drives a whole request: plan, filter, level, execute, integrate.
#[derive(Clone)]
pub struct Orchestrator {
    broker: TaskBroker,
    registry: Arc<WorkerRegistry>,
    planner: Arc<dyn Planner>,
    integrator: Arc<dyn Integrator>,
    fallback: Arc<FallbackManager>,
}

enum Outcome {
    Completed(Map<String, Value>),
    Failed(String),
    Skipped,
}

impl Orchestrator {
    pub fn new(
        broker: TaskBroker,
        registry: Arc<WorkerRegistry>,
        planner: Arc<dyn Planner>,
        integrator: Arc<dyn Integrator>,
        fallback: Arc<FallbackManager>,
    ) -> Self {
        Self {
            broker,
            registry,
            planner,
            integrator,
            fallback,
        }
    }

    /// Execute a free-form request end to end.
    ///
    /// Tasks inside one level run concurrently; a later level starts only
    /// once every task of the previous level is terminal. A failure in a
    /// level skips all later levels, but the results collected so far are
    /// still integrated and returned.
    pub async fn run(
        &self,
        request: &str,
        conversation_id: Option<String>,
    ) -> MeshResult<OrchestrationReport> {
        let enabled_roles = self.registry.enabled_roles().await?;
        let planned = self.planner.plan(request, &enabled_roles).await?;
        let planned_count = planned.len();
        let mut tasks = filter_plan(planned, &enabled_roles);

        if tasks.is_empty() {
            warn!(planned = planned_count, "No executable tasks after filtering");
            return Ok(OrchestrationReport {
                status: OrchestrationStatus::Failed,
                answer: None,
                tasks: Vec::new(),
            });
        }

        let levels = compute_levels(&tasks);
        info!(
            tasks = tasks.len(),
            levels = levels.len(),
            "Executing orchestration plan"
        );

        let mut outcomes: Vec<Outcome> = (0..tasks.len()).map(|_| Outcome::Skipped).collect();
        for (depth, level) in levels.iter().enumerate() {
            let calls = level.iter().map(|&index| {
                let task = tasks[index].clone();
                let conversation_id = conversation_id.clone();
                async move { (index, self.execute_one(&task, conversation_id).await) }
            });

            let mut level_failed = false;
            for (index, result) in join_all(calls).await {
                match result {
                    Ok(result) => outcomes[index] = Outcome::Completed(result),
                    Err(e) => {
                        level_failed = true;
                        outcomes[index] = Outcome::Failed(e.to_string());
                    }
                }
            }

            self.propagate_level(level, &mut tasks, &outcomes);

            if level_failed && depth + 1 < levels.len() {
                warn!(level = depth, "Level failed; skipping remaining levels");
                break;
            }
        }

        self.integrate(request, &tasks, outcomes).await
    }

    /// One task: broker call, then the fallback chain on failure.
    async fn execute_one(
        &self,
        task: &PlannedTask,
        conversation_id: Option<String>,
    ) -> MeshResult<Map<String, Value>> {
        match self
            .broker
            .execute_task_sync(&task.role, task.params.clone(), conversation_id.clone(), None)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => self.recover(task, conversation_id, e).await,
        }
    }

    async fn recover(
        &self,
        task: &PlannedTask,
        conversation_id: Option<String>,
        err: MeshError,
    ) -> MeshResult<Map<String, Value>> {
        let category = match &err {
            MeshError::NoAgentAvailable(_) => AGENT_SELECTION_FAILURE,
            MeshError::Validation(_) => PARAM_VALIDATION_FAILURE,
            _ => TASK_EXECUTION_FAILURE,
        };
        if !self.fallback.has_strategies(category) {
            return Err(err);
        }

        let ctx = FallbackContext::new(category, err.to_string())
            .with_data("role", json!(task.role))
            .with_data("params", Value::Object(task.params.clone()));
        let outcome = self.fallback.handle(&ctx).await;

        match outcome.status {
            FallbackStatus::Success => match outcome.payload {
                Some(Value::Object(result)) => {
                    info!(role = %task.role, "Fallback produced a direct result");
                    Ok(result)
                }
                _ => Err(err),
            },
            FallbackStatus::Alternative => {
                let Some(Value::Object(alternative)) = outcome.payload else {
                    return Err(err);
                };
                let role = alternative
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or(&task.role)
                    .to_string();
                let params = match alternative.get("params") {
                    Some(Value::Object(p)) => p.clone(),
                    _ => task.params.clone(),
                };
                info!(
                    original_role = %task.role,
                    substitute_role = %role,
                    "Retrying task with fallback alternative"
                );
                self.broker
                    .execute_task_sync(&role, params, conversation_id, None)
                    .await
            }
            FallbackStatus::Retry | FallbackStatus::Failure => Err(err),
        }
    }

    /// Push content from tasks finished in `level` into the params of the
    /// not-yet-run tasks that depend on them.
    fn propagate_level(&self, level: &[usize], tasks: &mut [PlannedTask], outcomes: &[Outcome]) {
        for &source in level {
            let Outcome::Completed(result) = &outcomes[source] else {
                continue;
            };
            let Some(extracted) = extract_content(result) else {
                continue;
            };
            let source_role = tasks[source].role.clone();
            for (index, task) in tasks.iter_mut().enumerate() {
                if matches!(outcomes[index], Outcome::Skipped)
                    && task.depends_on.contains(&source)
                {
                    debug!(
                        from = %source_role,
                        to = %task.role,
                        key = %extracted.key,
                        "Propagating dependency output"
                    );
                    propagate(&mut task.params, &source_role, extracted.clone());
                }
            }
        }
    }

    async fn integrate(
        &self,
        request: &str,
        tasks: &[PlannedTask],
        outcomes: Vec<Outcome>,
    ) -> MeshResult<OrchestrationReport> {
        let mut reports = Vec::with_capacity(tasks.len());
        let mut summaries = Vec::new();
        for (index, (task, outcome)) in tasks.iter().zip(outcomes).enumerate() {
            let report = match outcome {
                Outcome::Completed(result) => {
                    if let Some(extracted) = extract_content(&result) {
                        summaries.push(TaskSummary {
                            role: task.role.clone(),
                            description: task.description.clone(),
                            content: extracted.content,
                        });
                    }
                    TaskReport {
                        index,
                        role: task.role.clone(),
                        description: task.description.clone(),
                        status: "completed".to_string(),
                        result: Some(result),
                        error: None,
                    }
                }
                Outcome::Failed(error) => TaskReport {
                    index,
                    role: task.role.clone(),
                    description: task.description.clone(),
                    status: "failed".to_string(),
                    result: None,
                    error: Some(error),
                },
                Outcome::Skipped => TaskReport {
                    index,
                    role: task.role.clone(),
                    description: task.description.clone(),
                    status: "skipped".to_string(),
                    result: None,
                    error: None,
                },
            };
            reports.push(report);
        }

        let all_completed = reports.iter().all(|r| r.status == "completed");
        let any_completed = reports.iter().any(|r| r.status == "completed");

        if summaries.is_empty() {
            // Nothing usable to integrate; hand back the raw task list.
            return Ok(OrchestrationReport {
                status: if any_completed {
                    OrchestrationStatus::PartiallyCompleted
                } else {
                    OrchestrationStatus::Failed
                },
                answer: None,
                tasks: reports,
            });
        }

        let answer = self.integrator.integrate(request, &summaries).await?;
        Ok(OrchestrationReport {
            status: if all_completed {
                OrchestrationStatus::Completed
            } else {
                OrchestrationStatus::PartiallyCompleted
            },
            answer: Some(answer),
            tasks: reports,
        })
    }
}
