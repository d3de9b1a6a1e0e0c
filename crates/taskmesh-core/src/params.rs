use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The declared type of a worker parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
}

/// One entry of a worker's declared parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    /// Fallback applied when a supplied value fails coercion.
    #[serde(default)]
    pub default: Option<Value>,
    /// Closed set of allowed values, checked after coercion.
    #[serde(default, rename = "enum")]
    pub allowed: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            allowed: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// Coerce a supplied value to the declared type.
///
/// Returns `None` when the value cannot be represented as the target type;
/// the caller then falls back to the declared default or drops the value.
pub fn coerce_value(value: &Value, kind: ParamType) -> Option<Value> {
    match kind {
        ParamType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ParamType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
                // Prefer an integer representation when the string held one.
                if let Ok(i) = s.trim().parse::<i64>() {
                    Some(Value::Number(i.into()))
                } else {
                    serde_json::Number::from_f64(f).map(Value::Number)
                }
            }),
            Value::Bool(b) => Some(Value::Number(i64::from(*b).into())),
            _ => None,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|i| Value::Bool(i != 0)),
            _ => None,
        },
        ParamType::Array => match value {
            Value::Array(_) => Some(value.clone()),
            // A lone scalar is repaired by wrapping, not rejected.
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                Some(Value::Array(vec![value.clone()]))
            }
            _ => None,
        },
    }
}

/// Validate supplied params against a declared schema.
///
/// Each declared parameter is coerced to its declared type; on coercion
/// failure or enum violation the declared default is used if present,
/// otherwise the value is dropped. Undeclared params pass through
/// untouched. Returns the repaired map plus the names of required
/// parameters still absent afterwards.
pub fn validate_params(
    specs: &[ParamSpec],
    params: &Map<String, Value>,
) -> (Map<String, Value>, Vec<String>) {
    let mut repaired = params.clone();
    let mut missing = Vec::new();

    for spec in specs {
        match repaired.get(&spec.name) {
            Some(value) => {
                let coerced = coerce_value(value, spec.kind).filter(|v| {
                    spec.allowed
                        .as_ref()
                        .map_or(true, |allowed| allowed.contains(v))
                });
                match coerced {
                    Some(v) => {
                        repaired.insert(spec.name.clone(), v);
                    }
                    None => match &spec.default {
                        Some(d) => {
                            repaired.insert(spec.name.clone(), d.clone());
                        }
                        None => {
                            repaired.remove(&spec.name);
                            if spec.required {
                                missing.push(spec.name.clone());
                            }
                        }
                    },
                }
            }
            None => {
                if let Some(d) = &spec.default {
                    repaired.insert(spec.name.clone(), d.clone());
                } else if spec.required {
                    missing.push(spec.name.clone());
                }
            }
        }
    }

    (repaired, missing)
}

/// Serialize a JSON value with object keys in sorted order at every depth.
///
/// Used to build deterministic cache keys and task ids, where two maps with
/// the same entries must hash identically regardless of insertion order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Hex-encoded sha256 over the canonical form of a parameter map.
pub fn params_hash(params: &Map<String, Value>) -> String {
    let canonical = canonical_json(&Value::Object(params.clone()));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
