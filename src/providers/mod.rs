//! Provider adapters shipped with keel
//!
//! Each adapter drives one external CLI:
//! - `gcp` - `gcloud`, one command group per resource type
//! - `k8s` - `kubectl apply` with generated manifests
//! - `helm` - `helm upgrade --install`
//! - `null` - in-process, for dry runs and tests
//!
//! The external binaries can be swapped with `KEEL_GCLOUD`, `KEEL_KUBECTL`
//! and `KEEL_HELM`.

pub mod gcp;
pub mod helm;
pub mod k8s;
pub mod null;

use declarative::{Attributes, ProviderError, ProviderRegistry, Value};
use std::fmt;
use std::sync::Arc;

pub use gcp::GcpProvider;
pub use helm::HelmProvider;
pub use k8s::KubernetesProvider;
pub use null::NullProvider;

/// Registry with every built-in provider
pub fn default_registry() -> ProviderRegistry {
    ProviderRegistry::new()
        .with(Arc::new(GcpProvider::new()))
        .with(Arc::new(KubernetesProvider::new()))
        .with(Arc::new(HelmProvider::new()))
        .with(Arc::new(NullProvider::new()))
}

/// Binary to run for a tool, honouring its override variable
pub(crate) fn program(env: &str, default: &str) -> String {
    std::env::var(env).unwrap_or_else(|_| default.to_string())
}

// ============================================================================
// Resource Ids
// ============================================================================

/// Identifier stored in state for CLI-managed resources
///
/// Rendered as `name;key=value;...` so later calls can rebuild the scope
/// flags (project, zone, namespace) without the declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub name: String,
    pub scope: Vec<(String, String)>,
}

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.scope.push((key.to_string(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.scope
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(id: &str) -> Result<Self, ProviderError> {
        let mut parts = id.split(';');
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProviderError::failed(format!("invalid resource id '{id}'")))?;
        let mut parsed = Self::new(name);
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ProviderError::failed(format!("invalid resource id '{id}'")))?;
            parsed.scope.push((key.to_string(), value.to_string()));
        }
        Ok(parsed)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.scope {
            write!(f, ";{key}={value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Attribute Helpers
// ============================================================================

/// `machine_type` -> `machineType`
pub(crate) fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `selfLink` -> `self_link`
pub(crate) fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut previous: Option<char> = None;
    for c in key.chars() {
        if c.is_uppercase() {
            if previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        previous = Some(c);
    }
    out
}

/// Render a value as a single CLI argument value
pub(crate) fn flag_value(value: &Value) -> Option<String> {
    match value {
        Value::List(items) => Some(
            items
                .iter()
                .filter_map(flag_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Map(entries) => Some(
            entries
                .iter()
                .filter_map(|(k, v)| flag_value(v).map(|v| format!("{k}={v}")))
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => other.interpolate(),
    }
}

/// `--kebab-key=value`, or `--key` / `--no-key` for booleans
pub(crate) fn flag(key: &str, value: &Value) -> Option<String> {
    let name = key.replace('_', "-");
    match value {
        Value::Bool(true) => Some(format!("--{name}")),
        Value::Bool(false) => Some(format!("--no-{name}")),
        other => flag_value(other).map(|v| format!("--{name}={v}")),
    }
}

/// Top-level scalar fields of a JSON object, keys in snake case
pub(crate) fn scalar_fields(json: &serde_json::Value) -> Attributes {
    let object = match json {
        serde_json::Value::Array(items) => items.first(),
        other => Some(other),
    };
    object
        .and_then(serde_json::Value::as_object)
        .map(|map| {
            map.iter()
                .filter(|(_, v)| !v.is_object() && !v.is_array())
                .filter_map(|(k, v)| Value::from_json(v.clone()).map(|v| (snake_case(k), v)))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_json(program: &str, stdout: &str) -> Result<serde_json::Value, ProviderError> {
    if stdout.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(stdout)
        .map_err(|e| ProviderError::failed(format!("{program} returned invalid JSON: {e}")))
}

pub(crate) fn string_attr<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    attributes.get(key).and_then(Value::as_str)
}
