//! Capabilities — the named, schema-described functions a model may ask
//! the agent loop to invoke.
//!
//! Capabilities are built fresh for every run from request-scoped closures,
//! so a handler can capture whatever the request needs (a patient context, a
//! shared HTTP client) without any cross-run mutable state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::CapabilityError;

/// The boxed future a handler returns.
pub type HandlerFuture = BoxFuture<'static, Result<Value, CapabilityError>>;

type Handler = Arc<dyn Fn(ToolArgs) -> HandlerFuture + Send + Sync>;

/// A single registered capability.
#[derive(Clone)]
pub struct Capability {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl Capability {
    /// Build a capability from an async handler returning raw JSON.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |args| -> HandlerFuture { Box::pin(handler(args)) }),
        }
    }

    /// Wrap a plain async lookup returning any serializable record.
    pub fn from_fn<F, Fut, T>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        lookup: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CapabilityError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let name = name.into();
        let owner = name.clone();
        let lookup = Arc::new(lookup);
        Self::new(name, description, schema, move |args| {
            let lookup = Arc::clone(&lookup);
            let owner = owner.clone();
            async move {
                let record = (*lookup)(args).await?;
                serde_json::to_value(record).map_err(|e| CapabilityError::ExecutionFailed {
                    name: owner,
                    reason: format!("result is not serializable: {e}"),
                })
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Check arguments against the schema's `required` list and the
    /// primitive `type` of each declared property.
    pub fn validate(&self, args: &ToolArgs) -> Result<(), CapabilityError> {
        if let Some(required) = self.schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !args.contains(key) {
                    return Err(CapabilityError::InvalidArguments(format!(
                        "missing required argument '{key}'"
                    )));
                }
            }
        }

        let Some(properties) = self.schema.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };

        for (key, value) in args.iter() {
            let Some(expected) = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(CapabilityError::InvalidArguments(format!(
                    "argument '{key}' should be of type {expected}"
                )));
            }
        }

        Ok(())
    }

    /// Start the handler. Failures are returned, never raised.
    pub fn invoke(&self, args: ToolArgs) -> HandlerFuture {
        (self.handler.as_ref())(args)
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Loosely-typed tool arguments with typed accessors for use inside handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accept any JSON value the model produced; `null` means no arguments.
    pub fn from_value(value: Value) -> Result<Self, CapabilityError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(CapabilityError::InvalidArguments(format!(
                "arguments must be an object, got {other}"
            ))),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn str(&self, key: &str) -> Result<&str, CapabilityError> {
        self.opt_str(key)
            .ok_or_else(|| missing(key, "a string"))
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numbers may arrive as JSON numbers or numeric strings.
    pub fn f64(&self, key: &str) -> Result<f64, CapabilityError> {
        self.opt_f64(key).ok_or_else(|| missing(key, "a number"))
    }

    pub fn opt_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn i64(&self, key: &str) -> Result<i64, CapabilityError> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| missing(key, "an integer"))
    }

    pub fn bool(&self, key: &str) -> Result<bool, CapabilityError> {
        match self.0.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| missing(key, "a boolean"))
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn missing(key: &str, what: &str) -> CapabilityError {
    CapabilityError::InvalidArguments(format!("'{key}' must be {what}"))
}

/// The per-run set of capabilities, in registration order.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability from its parts.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
    {
        self.add(Capability::new(name, description, schema, handler));
    }

    /// Add a prebuilt capability. Replaces any existing one with the same name.
    pub fn add(&mut self, capability: Capability) {
        match self.index.get(capability.name()) {
            Some(&pos) => {
                warn!(capability = %capability.name(), "Replacing duplicate capability");
                self.capabilities[pos] = capability;
            }
            None => {
                self.index
                    .insert(capability.name().to_string(), self.capabilities.len());
                self.capabilities.push(capability);
            }
        }
    }

    /// Builder-style variant of [`add`](Self::add).
    pub fn with(mut self, capability: Capability) -> Self {
        self.add(capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    pub fn list(&self) -> Vec<&Capability> {
        self.capabilities.iter().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Capability {
        Capability::new(
            "echo",
            "Echoes back the input",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            |args: ToolArgs| async move {
                let text = args.str("text")?;
                Ok::<Value, CapabilityError>(json!(text))
            },
        )
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = CapabilityRegistry::new();
        registry.add(echo());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_keeps_registration_order_and_replaces_duplicates() {
        let mut registry = CapabilityRegistry::new();
        registry.register("b", "second", json!({}), |_| async { Ok::<Value, CapabilityError>(json!(1)) });
        registry.register("a", "first", json!({}), |_| async { Ok::<Value, CapabilityError>(json!(2)) });
        registry.register("b", "replaced", json!({}), |_| async { Ok::<Value, CapabilityError>(json!(3)) });
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert_eq!(registry.get("b").unwrap().description(), "replaced");
    }

    #[tokio::test]
    async fn invoke_runs_handler() {
        let cap = echo();
        let args = ToolArgs::from_value(json!({"text": "hello"})).unwrap();
        let out = cap.invoke(args).await.unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn from_fn_serializes_records() {
        #[derive(Serialize)]
        struct Record {
            code: &'static str,
            label: &'static str,
        }

        let cap = Capability::from_fn("icd", "ICD lookup", json!({}), |_args| async {
            Ok::<_, CapabilityError>(Record {
                code: "I10",
                label: "Essential hypertension",
            })
        });
        let out = cap.invoke(ToolArgs::default()).await.unwrap();
        assert_eq!(out["code"], "I10");
    }

    #[test]
    fn validate_required_and_types() {
        let cap = echo();
        let missing = ToolArgs::default();
        assert!(matches!(
            cap.validate(&missing),
            Err(CapabilityError::InvalidArguments(_))
        ));

        let wrong = ToolArgs::from_value(json!({"text": 5})).unwrap();
        assert!(cap.validate(&wrong).is_err());

        let ok = ToolArgs::from_value(json!({"text": "x", "extra": true})).unwrap();
        assert!(cap.validate(&ok).is_ok());
    }

    #[test]
    fn typed_accessors() {
        let args = ToolArgs::from_value(json!({
            "weight": "72.5",
            "age": 64,
            "male": true
        }))
        .unwrap();
        assert!((args.f64("weight").unwrap() - 72.5).abs() < f64::EPSILON);
        assert_eq!(args.i64("age").unwrap(), 64);
        assert!(args.bool("male").unwrap());
        assert!(args.str("weight").is_ok());
        assert!(args.f64("height").is_err());
    }

    #[test]
    fn args_from_non_object_rejected() {
        assert!(ToolArgs::from_value(json!([1, 2])).is_err());
        assert!(ToolArgs::from_value(Value::Null).unwrap().as_map().is_empty());
    }
}
