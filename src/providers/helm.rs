//! Helm provider for `helm_release`
//!
//! Releases are installed and upgraded with `helm upgrade --install`.
//! `values` is sent as JSON on stdin, `set` entries become `--set` flags.

use declarative::{
    Applied, Attributes, OperationContext, Provider, ProviderError, ResourceSchema, Value,
    format_duration,
};

use super::{ResourceId, flag_value, parse_json, program, string_attr};
use crate::runner;

/// Override for the helm binary
pub const ENV_HELM: &str = "KEEL_HELM";

#[derive(Debug)]
pub struct HelmProvider {
    program: String,
}

impl Default for HelmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HelmProvider {
    pub fn new() -> Self {
        Self::with_program(program(ENV_HELM, "helm"))
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn release_id(ctx: &OperationContext, attributes: &Attributes) -> ResourceId {
        let name = string_attr(attributes, "name").unwrap_or(ctx.node.name.as_str());
        let mut id = ResourceId::new(name).with(
            "namespace",
            string_attr(attributes, "namespace").unwrap_or("default"),
        );
        if let Some(context) = string_attr(attributes, "kube_context") {
            id = id.with("kube-context", context);
        }
        id
    }

    fn scope_args(id: &ResourceId) -> Vec<String> {
        id.scope
            .iter()
            .map(|(key, value)| format!("--{key}={value}"))
            .collect()
    }

    /// Arguments for `helm upgrade --install`
    fn upgrade_args(
        ctx: &OperationContext,
        id: &ResourceId,
        attributes: &Attributes,
    ) -> Result<Vec<String>, ProviderError> {
        let chart = string_attr(attributes, "chart").ok_or_else(|| {
            ProviderError::failed(format!("{} has no chart attribute", ctx.node))
        })?;

        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            id.name.clone(),
            chart.to_string(),
        ];
        args.extend(Self::scope_args(id));
        if let Some(repository) = string_attr(attributes, "repository") {
            args.push(format!("--repo={repository}"));
        }
        if let Some(version) = attributes.get("version").and_then(Value::interpolate) {
            args.push(format!("--version={version}"));
        }
        if attributes.get("create_namespace").and_then(Value::as_bool) == Some(true) {
            args.push("--create-namespace".to_string());
        }
        if attributes.get("wait").and_then(Value::as_bool) != Some(false) {
            args.push("--wait".to_string());
            if let Some(remaining) = ctx.remaining() {
                args.push(format!("--timeout={}", format_duration(remaining)));
            }
        }
        if attributes.get("atomic").and_then(Value::as_bool) == Some(true) {
            args.push("--atomic".to_string());
        }
        if let Some(Value::Map(set)) = attributes.get("set") {
            for (key, value) in set {
                if let Some(value) = flag_value(value) {
                    args.push(format!("--set={key}={value}"));
                }
            }
        }
        args.push("--values=-".to_string());
        args.push("--output=json".to_string());
        Ok(args)
    }

    fn values(attributes: &Attributes) -> Result<String, ProviderError> {
        let values = attributes
            .get("values")
            .cloned()
            .unwrap_or_else(|| Value::Map(Default::default()));
        serde_json::to_string(&values)
            .map_err(|e| ProviderError::failed(format!("cannot render values: {e}")))
    }

    fn install(
        &self,
        ctx: &OperationContext,
        id: ResourceId,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        let args = Self::upgrade_args(ctx, &id, attributes)?;
        let values = Self::values(attributes)?;
        let stdout = runner::run_capture(ctx, &self.program, &args, Some(&values))?;
        let release = parse_json(&self.program, &stdout)?;
        Ok(Applied {
            id: id.to_string(),
            outputs: release_outputs(&release),
        })
    }
}

/// Fields of `helm ... --output json` worth keeping
fn release_outputs(release: &serde_json::Value) -> Attributes {
    let pointers = [
        ("revision", "/version"),
        ("status", "/info/status"),
        ("chart_version", "/chart/metadata/version"),
        ("app_version", "/chart/metadata/appVersion"),
    ];
    pointers
        .iter()
        .filter_map(|(key, pointer)| {
            release
                .pointer(pointer)
                .cloned()
                .and_then(Value::from_json)
                .map(|v| ((*key).to_string(), v))
        })
        .collect()
}

impl Provider for HelmProvider {
    fn name(&self) -> &str {
        "helm"
    }

    fn supports(&self, resource_type: &str) -> bool {
        resource_type == "helm_release"
    }

    fn schema(&self, _resource_type: &str) -> ResourceSchema {
        ResourceSchema::with_immutable(["name", "namespace", "kube_context"])
    }

    fn create(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        self.install(ctx, Self::release_id(ctx, attributes), attributes)
    }

    fn update(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        self.install(ctx, ResourceId::parse(id)?, attributes)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
    ) -> Result<(), ProviderError> {
        let id = ResourceId::parse(id)?;
        let mut args = vec!["uninstall".to_string(), id.name.clone(), "--wait".to_string()];
        args.extend(Self::scope_args(&id));

        let captured = runner::run(ctx, &self.program, &args, None)?;
        if !captured.success && captured.stderr.contains("not found") {
            log::info!("Release {} was already uninstalled", id.name);
            return Ok(());
        }
        captured.into_stdout(&self.program).map(|_| ())
    }

    fn read(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        let id = ResourceId::parse(id)?;
        let mut args = vec![
            "status".to_string(),
            id.name.clone(),
            "--output=json".to_string(),
        ];
        args.extend(Self::scope_args(&id));

        let captured = runner::run(ctx, &self.program, &args, None)?;
        if !captured.success && captured.stderr.contains("not found") {
            return Ok(None);
        }
        let release = parse_json(&self.program, &captured.into_stdout(&self.program)?)?;
        Ok(Some(release_outputs(&release)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::NodeId;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_upgrade_args() {
        let ctx = OperationContext::new(NodeId::new("helm_release", "ingress_nginx"));
        let attributes = attrs(&[
            ("name", "ingress-nginx".into()),
            ("namespace", "ingress".into()),
            ("chart", "ingress-nginx".into()),
            ("repository", "https://kubernetes.github.io/ingress-nginx".into()),
            ("version", "4.11.2".into()),
            ("create_namespace", Value::Bool(true)),
            (
                "set",
                Value::Map([("controller.replicaCount".to_string(), Value::Int(2))].into()),
            ),
        ]);
        let id = HelmProvider::release_id(&ctx, &attributes);
        assert_eq!(id.to_string(), "ingress-nginx;namespace=ingress");

        let args = HelmProvider::upgrade_args(&ctx, &id, &attributes).unwrap();
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "ingress-nginx",
                "ingress-nginx",
                "--namespace=ingress",
                "--repo=https://kubernetes.github.io/ingress-nginx",
                "--version=4.11.2",
                "--create-namespace",
                "--wait",
                "--set=controller.replicaCount=2",
                "--values=-",
                "--output=json",
            ]
        );
    }

    #[test]
    fn test_missing_chart() {
        let ctx = OperationContext::new(NodeId::new("helm_release", "broken"));
        let id = ResourceId::new("broken").with("namespace", "default");
        let err = HelmProvider::upgrade_args(&ctx, &id, &Attributes::new()).unwrap_err();
        assert_eq!(err.message, "helm_release.broken has no chart attribute");
    }

    #[test]
    fn test_release_outputs() {
        let release = json!({
            "name": "monitoring",
            "version": 3,
            "info": {"status": "deployed"},
            "chart": {"metadata": {"version": "61.3.0", "appVersion": "v0.75.2"}}
        });
        let outputs = release_outputs(&release);
        assert_eq!(outputs["revision"], Value::Int(3));
        assert_eq!(outputs["status"], Value::from("deployed"));
        assert_eq!(outputs["app_version"], Value::from("v0.75.2"));
    }

    #[test]
    fn test_values_default_to_empty_object() {
        assert_eq!(HelmProvider::values(&Attributes::new()).unwrap(), "{}");
        let values = HelmProvider::values(&attrs(&[(
            "values",
            Value::Map([("replicas".to_string(), Value::Int(2))].into()),
        )]))
        .unwrap();
        assert_eq!(values, r#"{"replicas":2}"#);
    }
}
