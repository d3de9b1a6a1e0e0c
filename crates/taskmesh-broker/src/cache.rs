use serde_json::{Map, Value};
use std::sync::Arc;
use taskmesh_core::{params_hash, MeshResult};
use taskmesh_store::KvStore;
use tracing::debug;

/// Shared result cache.
///
/// Completed tasks with a non-empty result are stored under a key derived
/// from (role, canonical params hash); a later identical request is served
/// straight from here without contacting a worker.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(role: &str, params: &Map<String, Value>) -> String {
        format!("cache:{role}:{}", params_hash(params))
    }

    pub async fn get(
        &self,
        role: &str,
        params: &Map<String, Value>,
    ) -> MeshResult<Option<Map<String, Value>>> {
        let key = Self::key(role, params);
        match self.store.get(&key).await? {
            Some(Value::Object(result)) => {
                debug!(role, key = %key, "Result cache hit");
                Ok(Some(result))
            }
            _ => Ok(None),
        }
    }

    pub async fn put(
        &self,
        role: &str,
        params: &Map<String, Value>,
        result: &Map<String, Value>,
    ) -> MeshResult<()> {
        if result.is_empty() {
            return Ok(());
        }
        self.store
            .put(&Self::key(role, params), Value::Object(result.clone()))
            .await
    }
}
