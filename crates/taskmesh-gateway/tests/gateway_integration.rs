//! Full-stack HTTP tests: a real listener, a real client, mock workers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taskmesh_broker::TaskBroker;
use taskmesh_core::MeshConfig;
use taskmesh_gateway::GatewayServer;
use taskmesh_registry::WorkerRegistry;
use taskmesh_store::{KvStore, MemoryStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_gateway(ttl: Duration) -> String {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(WorkerRegistry::new(store.clone(), ttl));
    let config = MeshConfig {
        max_call_retries: 0,
        retry_backoff_ms: 10,
        ..MeshConfig::default()
    };
    let broker = TaskBroker::new(registry.clone(), store, config);
    let app = GatewayServer::build(registry, broker);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn register_worker(client: &reqwest::Client, base: &str, id: &str, role: &str, endpoint: &str) {
    let resp = client
        .post(format!("{base}/register"))
        .json(&json!({"id": id, "role": role, "endpoint": endpoint}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn health_reports_ok() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn register_list_unregister_roundtrip() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    register_worker(&client, &base, "w1", "writer", "http://127.0.0.1:9000").await;

    let agents: Vec<Value> = client
        .get(format!("{base}/agents?role=writer"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["id"], json!("w1"));

    let resp = client
        .post(format!("{base}/unregister?role=writer&agent_id=w1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let agents: Vec<Value> = client
        .get(format!("{base}/agents?role=writer"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(agents.is_empty());

    // Unregistering again is a quiet no-op.
    let resp = client
        .post(format!("{base}/unregister?role=writer&agent_id=w1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn heartbeat_unknown_worker_is_404() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/heartbeat/writer/ghost"))
        .json(&json!({"status": "available", "load": 0.1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn heartbeat_updates_status_and_clamps_load() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    register_worker(&client, &base, "w1", "writer", "http://127.0.0.1:9000").await;

    let resp = client
        .post(format!("{base}/heartbeat/writer/w1"))
        .json(&json!({"status": "busy", "load": 1.7, "active_task_count": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let agents: Vec<Value> = client
        .get(format!("{base}/agents?role=writer"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents[0]["status"], json!("busy"));
    assert_eq!(agents[0]["load"], json!(1.0));
    assert_eq!(agents[0]["active_task_count"], json!(3));
}

#[tokio::test]
async fn expired_worker_disappears_from_listing() {
    let base = spawn_gateway(Duration::from_millis(40)).await;
    let client = reqwest::Client::new();
    register_worker(&client, &base, "w1", "writer", "http://127.0.0.1:9000").await;

    tokio::time::sleep(Duration::from_millis(80)).await;

    let agents: Vec<Value> = client
        .get(format!("{base}/agents?role=writer"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(agents.is_empty());
}

#[tokio::test]
async fn agents_filters_by_max_load() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    register_worker(&client, &base, "w1", "writer", "http://127.0.0.1:9000").await;
    register_worker(&client, &base, "w2", "writer", "http://127.0.0.1:9001").await;

    client
        .post(format!("{base}/heartbeat/writer/w2"))
        .json(&json!({"status": "available", "load": 0.9}))
        .send()
        .await
        .unwrap();

    let agents: Vec<Value> = client
        .get(format!("{base}/agents?role=writer&max_load=0.5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["id"], json!("w1"));
}

#[tokio::test]
async fn submitted_task_completes_end_to_end() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "result": {"text": "essay"}
        })))
        .mount(&worker)
        .await;

    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    register_worker(&client, &base, "w1", "writer", &worker.uri()).await;

    let resp = client
        .post(format!("{base}/tasks"))
        .json(&json!({"role": "writer", "params": {"topic": "rust"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["status"], json!("accepted"));
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let mut task = Value::Null;
    for _ in 0..50 {
        task = client
            .get(format!("{base}/tasks/{task_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == json!("completed") || task["status"] == json!("failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(task["status"], json!("completed"));
    assert_eq!(task["result"]["text"], json!("essay"));
}

#[tokio::test]
async fn failed_task_surfaces_its_error() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    // No worker registered for the role.
    let resp = client
        .post(format!("{base}/tasks"))
        .json(&json!({"role": "writer", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: Value = resp.json().await.unwrap();
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let mut task = Value::Null;
    for _ in 0..50 {
        task = client
            .get(format!("{base}/tasks/{task_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == json!("failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(task["status"], json!("failed"));
    assert!(task["error"].as_str().unwrap().contains("writer"));
}

#[tokio::test]
async fn unknown_task_is_404() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let resp = reqwest::get(format!("{base}/tasks/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn cancel_transitions_then_rejects_terminal() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/tasks"))
        .json(&json!({"role": "writer", "params": {}}))
        .send()
        .await
        .unwrap();
    let accepted: Value = resp.json().await.unwrap();
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    // Wait for the background pipeline to fail (no worker registered),
    // leaving the task terminal.
    for _ in 0..50 {
        let task: Value = client
            .get(format!("{base}/tasks/{task_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == json!("failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let resp = client
        .post(format!("{base}/tasks/{task_id}/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn execute_task_returns_result_inline() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "result": {"hits": [1, 2, 3]}
        })))
        .mount(&worker)
        .await;

    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    register_worker(&client, &base, "s1", "search", &worker.uri()).await;

    let resp = client
        .post(format!("{base}/execute_task"))
        .json(&json!({"role": "search", "params": {"q": "rust"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["result"]["hits"], json!([1, 2, 3]));
}

#[tokio::test]
async fn execute_task_without_workers_is_503() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/execute_task"))
        .json(&json!({"role": "search", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn tasks_listing_paginates() {
    let base = spawn_gateway(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        client
            .post(format!("{base}/tasks"))
            .json(&json!({"role": "writer", "params": {}}))
            .send()
            .await
            .unwrap();
    }

    let page: Value = client
        .get(format!("{base}/tasks?page=1&page_size=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], json!(3));
    assert_eq!(page["tasks"].as_array().unwrap().len(), 2);

    let page2: Value = client
        .get(format!("{base}/tasks?page=2&page_size=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page2["tasks"].as_array().unwrap().len(), 1);
}
