use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use taskmesh_broker::{TaskAccepted, TaskBroker, TaskPage};
use taskmesh_core::{MeshError, ParamSpec, TaskRecord, TaskStatus, WorkerRecord, WorkerStatus};
use taskmesh_registry::{ListFilter, WorkerRegistry};
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub broker: TaskBroker,
}

/// The HTTP surface over registry and broker.
pub struct GatewayServer;

impl GatewayServer {
    pub fn build(registry: Arc<WorkerRegistry>, broker: TaskBroker) -> Router {
        let state = Arc::new(AppState { registry, broker });

        Router::new()
            .route("/health", get(health_handler))
            .route("/register", post(register_handler))
            .route("/heartbeat/{role}/{id}", post(heartbeat_handler))
            .route("/unregister", post(unregister_handler))
            .route("/agents", get(list_agents_handler))
            .route("/tasks", post(create_task_handler).get(list_tasks_handler))
            .route("/tasks/{task_id}", get(get_task_handler))
            .route("/tasks/{task_id}/cancel", post(cancel_task_handler))
            .route("/execute_task", post(execute_task_handler))
            .route(
                "/conversations/{conversation_id}/tasks",
                get(conversation_tasks_handler),
            )
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "taskmesh"}))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    id: String,
    role: String,
    endpoint: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    params: Vec<ParamSpec>,
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let worker = WorkerRecord::new(body.id, body.role, body.endpoint)
        .with_description(body.description)
        .with_params(body.params);
    state.registry.register(worker).await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "registered"}))))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    status: WorkerStatus,
    #[serde(default)]
    load: f64,
    #[serde(default)]
    active_task_count: u32,
}

async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Path((role, id)): Path<(String, String)>,
    Json(body): Json<HeartbeatRequest>,
) -> ApiResult<Json<Value>> {
    state
        .registry
        .heartbeat(&role, &id, body.status, body.load, body.active_task_count)
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct UnregisterQuery {
    role: String,
    agent_id: String,
}

async fn unregister_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnregisterQuery>,
) -> ApiResult<Json<Value>> {
    state.registry.unregister(&query.role, &query.agent_id).await?;
    Ok(Json(json!({"status": "unregistered"})))
}

#[derive(Debug, Deserialize)]
struct AgentsQuery {
    role: Option<String>,
    status: Option<WorkerStatus>,
    max_load: Option<f64>,
    #[serde(default)]
    enabled_only: bool,
}

async fn list_agents_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AgentsQuery>,
) -> ApiResult<Json<Vec<WorkerRecord>>> {
    let filter = ListFilter {
        status: query.status,
        max_load: query.max_load,
        enabled_only: query.enabled_only,
    };
    let workers = match &query.role {
        Some(role) => state.registry.list_by_role(role, &filter).await?,
        None => {
            let all = state.registry.list_all().await?;
            all.into_iter().filter(|w| filter.matches(w)).collect()
        }
    };
    Ok(Json(workers))
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    role: String,
    #[serde(default)]
    params: Map<String, Value>,
    conversation_id: Option<String>,
    agent_configs: Option<Value>,
}

async fn create_task_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let accepted = state
        .broker
        .create_task(&body.role, body.params, body.conversation_id, body.agent_configs)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    status: Option<TaskStatus>,
    role: Option<String>,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

async fn list_tasks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<TaskPage>> {
    let page = state
        .broker
        .list_tasks(query.status, query.role.as_deref(), query.page, query.page_size)
        .await?;
    Ok(Json(page))
}

async fn get_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    let task = state
        .broker
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError(MeshError::NotFound(format!("task {task_id}"))))?;
    Ok(Json(task))
}

async fn cancel_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    let task = state.broker.cancel_task(&task_id).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct ExecuteTaskRequest {
    role: String,
    #[serde(default)]
    params: Map<String, Value>,
    conversation_id: Option<String>,
    exclude_agent: Option<String>,
}

/// Synchronous execution: the response carries the worker result inline
/// instead of requiring the caller to poll.
async fn execute_task_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteTaskRequest>,
) -> impl IntoResponse {
    info!(role = %body.role, "Synchronous task execution requested");
    let outcome = state
        .broker
        .execute_task_sync(
            &body.role,
            body.params,
            body.conversation_id,
            body.exclude_agent.as_deref(),
        )
        .await;
    match outcome {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({"success": true, "result": result})),
        ),
        Err(e) => {
            let status = match &e {
                MeshError::NoAgentAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                MeshError::Validation(_) => StatusCode::BAD_REQUEST,
                MeshError::Transport(_) | MeshError::Worker(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"success": false, "error": e.to_string()})))
        }
    }
}

async fn conversation_tasks_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<TaskRecord>>> {
    let tasks = state.broker.tasks_by_conversation(&conversation_id).await?;
    Ok(Json(tasks))
}
