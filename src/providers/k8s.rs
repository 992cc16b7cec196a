//! Kubernetes provider driving `kubectl`
//!
//! A `k8s_<kind>` node becomes one manifest. `name`, `namespace`, `labels`
//! and `annotations` go into `metadata`; every other attribute is a
//! top-level manifest field (`string_data` -> `stringData`). Manifests are
//! applied with `kubectl apply -f -`, so create and update are the same call.
//!
//! Connection attributes `context` and `kubeconfig` select the cluster and
//! are kept in the resource id. `wait_for = "condition=complete"` blocks
//! until `kubectl wait` succeeds or the operation deadline passes.

use declarative::{
    Applied, Attributes, OperationContext, Provider, ProviderError, ResourceSchema, Value,
};
use serde_json::json;

use super::{ResourceId, camel_case, parse_json, program, string_attr};
use crate::runner;
use declarative::format_duration;

/// Override for the kubectl binary
pub const ENV_KUBECTL: &str = "KEEL_KUBECTL";

/// `(type suffix, apiVersion, kind, namespaced)`
const KINDS: &[(&str, &str, &str, bool)] = &[
    ("namespace", "v1", "Namespace", false),
    ("config_map", "v1", "ConfigMap", true),
    ("secret", "v1", "Secret", true),
    ("service", "v1", "Service", true),
    ("service_account", "v1", "ServiceAccount", true),
    ("persistent_volume_claim", "v1", "PersistentVolumeClaim", true),
    ("deployment", "apps/v1", "Deployment", true),
    ("stateful_set", "apps/v1", "StatefulSet", true),
    ("daemon_set", "apps/v1", "DaemonSet", true),
    ("job", "batch/v1", "Job", true),
    ("ingress", "networking.k8s.io/v1", "Ingress", true),
    (
        "horizontal_pod_autoscaler",
        "autoscaling/v2",
        "HorizontalPodAutoscaler",
        true,
    ),
    ("priority_class", "scheduling.k8s.io/v1", "PriorityClass", false),
];

/// Attributes that are not manifest fields
const METADATA: &[&str] = &["name", "namespace", "labels", "annotations"];
const CONNECTION: &[&str] = &["context", "kubeconfig"];
const CONTROL: &[&str] = &["wait_for"];

#[derive(Debug, Clone, Copy)]
struct Kind {
    api_version: &'static str,
    kind: &'static str,
    namespaced: bool,
}

fn lookup(resource_type: &str) -> Result<Kind, ProviderError> {
    let suffix = resource_type.strip_prefix("k8s_").unwrap_or_default();
    KINDS
        .iter()
        .find(|(s, ..)| *s == suffix)
        .map(|&(_, api_version, kind, namespaced)| Kind {
            api_version,
            kind,
            namespaced,
        })
        .ok_or_else(|| ProviderError::unsupported(format!("k8s does not manage {resource_type}")))
}

#[derive(Debug)]
pub struct KubernetesProvider {
    program: String,
}

impl Default for KubernetesProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KubernetesProvider {
    pub fn new() -> Self {
        Self::with_program(program(ENV_KUBECTL, "kubectl"))
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn resource_id(ctx: &OperationContext, kind: Kind, attributes: &Attributes) -> ResourceId {
        let name = string_attr(attributes, "name").unwrap_or(ctx.node.name.as_str());
        let mut id = ResourceId::new(name);
        if kind.namespaced {
            id = id.with(
                "namespace",
                string_attr(attributes, "namespace").unwrap_or("default"),
            );
        }
        for key in CONNECTION {
            if let Some(value) = string_attr(attributes, key) {
                id = id.with(key, value);
            }
        }
        id
    }

    /// Build the manifest for a node
    fn manifest(kind: Kind, id: &ResourceId, attributes: &Attributes) -> serde_json::Value {
        let mut metadata = json!({ "name": id.name });
        if let Some(namespace) = id.get("namespace") {
            metadata["namespace"] = json!(namespace);
        }
        for key in ["labels", "annotations"] {
            if let Some(value) = attributes.get(key) {
                metadata[key] = serde_json::to_value(value).unwrap_or_default();
            }
        }

        let mut manifest = json!({
            "apiVersion": kind.api_version,
            "kind": kind.kind,
            "metadata": metadata,
        });
        for (key, value) in attributes {
            let key = key.as_str();
            if METADATA.contains(&key) || CONNECTION.contains(&key) || CONTROL.contains(&key) {
                continue;
            }
            manifest[camel_case(key)] = serde_json::to_value(value).unwrap_or_default();
        }
        manifest
    }

    /// `--context` / `--kubeconfig` and `--namespace` flags for an id
    fn scope_args(id: &ResourceId) -> Vec<String> {
        id.scope
            .iter()
            .map(|(key, value)| format!("--{key}={value}"))
            .collect()
    }

    fn apply(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: ResourceId,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        let kind = lookup(resource_type)?;
        let manifest = Self::manifest(kind, &id, attributes);
        let document = serde_json::to_string(&manifest).map_err(|e| {
            ProviderError::failed(format!("cannot render manifest for {}: {e}", ctx.node))
        })?;

        let mut args = vec![
            "apply".to_string(),
            "-f".to_string(),
            "-".to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        args.extend(Self::scope_args(&id));
        let stdout = runner::run_capture(ctx, &self.program, &args, Some(&document))?;
        let applied = parse_json(&self.program, &stdout)?;

        if let Some(condition) = string_attr(attributes, "wait_for") {
            self.wait(ctx, kind, &id, condition)?;
        }

        Ok(Applied {
            outputs: observed(&applied),
            id: id.to_string(),
        })
    }

    fn wait(
        &self,
        ctx: &OperationContext,
        kind: Kind,
        id: &ResourceId,
        condition: &str,
    ) -> Result<(), ProviderError> {
        let mut args = vec![
            "wait".to_string(),
            format!("--for={condition}"),
            format!("{}/{}", kind.kind.to_lowercase(), id.name),
        ];
        if let Some(remaining) = ctx.remaining() {
            args.push(format!("--timeout={}", format_duration(remaining)));
        }
        args.extend(Self::scope_args(id));
        log::info!("Waiting for {} ({})", ctx.node, condition);
        runner::run_capture(ctx, &self.program, &args, None).map(|_| ())
    }
}

/// Outputs worth referencing from other nodes
fn observed(object: &serde_json::Value) -> Attributes {
    let pointers = [
        ("uid", "/metadata/uid"),
        ("name", "/metadata/name"),
        ("namespace", "/metadata/namespace"),
        ("cluster_ip", "/spec/clusterIP"),
        ("load_balancer_ip", "/status/loadBalancer/ingress/0/ip"),
    ];
    pointers
        .iter()
        .filter_map(|(key, pointer)| {
            object
                .pointer(pointer)
                .cloned()
                .and_then(Value::from_json)
                .map(|v| ((*key).to_string(), v))
        })
        .collect()
}

impl Provider for KubernetesProvider {
    fn name(&self) -> &str {
        "k8s"
    }

    fn supports(&self, resource_type: &str) -> bool {
        lookup(resource_type).is_ok()
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        match resource_type {
            "k8s_job" => ResourceSchema::with_immutable(["name", "namespace", "spec"]),
            "k8s_persistent_volume_claim" => {
                ResourceSchema::with_immutable(["name", "namespace", "spec"]).data_bearing()
            }
            "k8s_stateful_set" => ResourceSchema::with_immutable(["name", "namespace"]).data_bearing(),
            _ => ResourceSchema::with_immutable(["name", "namespace"]),
        }
    }

    fn create(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        let kind = lookup(resource_type)?;
        let id = Self::resource_id(ctx, kind, attributes);
        self.apply(ctx, resource_type, id, attributes)
    }

    fn update(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        self.apply(ctx, resource_type, ResourceId::parse(id)?, attributes)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<(), ProviderError> {
        let kind = lookup(resource_type)?;
        let id = ResourceId::parse(id)?;
        let mut args = vec![
            "delete".to_string(),
            kind.kind.to_lowercase(),
            id.name.clone(),
            "--ignore-not-found".to_string(),
            "--wait=true".to_string(),
        ];
        args.extend(Self::scope_args(&id));
        runner::run_capture(ctx, &self.program, &args, None).map(|_| ())
    }

    fn read(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        let kind = lookup(resource_type)?;
        let id = ResourceId::parse(id)?;
        let mut args = vec![
            "get".to_string(),
            kind.kind.to_lowercase(),
            id.name.clone(),
            "--ignore-not-found".to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        args.extend(Self::scope_args(&id));
        let stdout = runner::run_capture(ctx, &self.program, &args, None)?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(observed(&parse_json(&self.program, &stdout)?)))
    }
}
