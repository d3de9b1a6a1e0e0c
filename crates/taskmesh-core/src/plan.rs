use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a decomposed request plan, as proposed by the external
/// planner. `depends_on` holds indices into the plan it arrived in; the
/// orchestrator rewrites them when tasks are filtered out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl PlannedTask {
    pub fn new(role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: role.into().to_lowercase(),
            description: description.into(),
            params: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<usize>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_lowercases_role() {
        let task = PlannedTask::new("Search", "find sources").with_depends_on(vec![0]);
        assert_eq!(task.role, "search");
        assert_eq!(task.depends_on, vec![0]);
    }

    #[test]
    fn deserializes_with_defaults() {
        let task: PlannedTask = serde_json::from_value(json!({"role": "writer"})).unwrap();
        assert!(task.depends_on.is_empty());
        assert!(task.params.is_empty());
        assert!(task.description.is_empty());
    }
}
