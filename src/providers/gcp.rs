//! Google Cloud provider driving `gcloud`
//!
//! Each supported type maps to a command group. Attributes become flags
//! (`machine_type = "g2-standard-8"` -> `--machine-type=g2-standard-8`),
//! except for the scope attributes (project, region, zone, location, and
//! parent names) which are also recorded in the resource id so update,
//! delete and read can address the resource later.

use declarative::{
    Applied, Attributes, OperationContext, Provider, ProviderError, ResourceSchema, Value,
};

use super::{ResourceId, flag, flag_value, parse_json, program, scalar_fields, string_attr};
use crate::runner;

/// Override for the gcloud binary
pub const ENV_GCLOUD: &str = "KEEL_GCLOUD";

/// How a type's lifecycle maps onto gcloud verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    /// `create` / `<update verb>` / `delete` / `describe`
    Standard,
    /// `services enable` / `services disable` / `services list`
    Service,
    /// Secret payload piped through `--data-file=-`
    Secret,
    /// `sql users`, which has no describe
    SqlUser,
}

#[derive(Debug)]
struct TypeSpec {
    resource_type: &'static str,
    group: &'static [&'static str],
    /// Attributes identifying where the resource lives
    scope: &'static [&'static str],
    /// Verb for in-place changes; `None` means every change replaces
    update_verb: Option<&'static str>,
    immutable: &'static [&'static str],
    data_bearing: bool,
    /// Prefix of the positional name (`gs://` for buckets)
    name_prefix: &'static str,
    /// Flags passed to every command
    fixed: &'static [&'static str],
    style: Style,
}

const fn spec(resource_type: &'static str, group: &'static [&'static str]) -> TypeSpec {
    TypeSpec {
        resource_type,
        group,
        scope: &["project"],
        update_verb: Some("update"),
        immutable: &[],
        data_bearing: false,
        name_prefix: "",
        fixed: &[],
        style: Style::Standard,
    }
}

static TYPES: &[TypeSpec] = &[
    TypeSpec {
        scope: &["project"],
        update_verb: None,
        style: Style::Service,
        ..spec("gcp_project_service", &["services"])
    },
    TypeSpec {
        immutable: &["name", "project", "subnet_mode"],
        ..spec("gcp_compute_network", &["compute", "networks"])
    },
    TypeSpec {
        scope: &["project", "region"],
        immutable: &["name", "project", "region", "network", "range"],
        ..spec("gcp_compute_subnetwork", &["compute", "networks", "subnets"])
    },
    TypeSpec {
        update_verb: None,
        ..spec("gcp_compute_firewall", &["compute", "firewall-rules"])
    },
    TypeSpec {
        update_verb: None,
        fixed: &["--global"],
        ..spec("gcp_compute_global_address", &["compute", "addresses"])
    },
    TypeSpec {
        scope: &["project", "zone"],
        immutable: &["name", "project", "zone", "type", "image", "snapshot"],
        data_bearing: true,
        ..spec("gcp_compute_disk", &["compute", "disks"])
    },
    TypeSpec {
        scope: &["project", "location"],
        immutable: &[
            "name",
            "project",
            "location",
            "network",
            "subnetwork",
            "cluster_ipv4_cidr",
            "enable_private_nodes",
        ],
        ..spec("gcp_container_cluster", &["container", "clusters"])
    },
    TypeSpec {
        scope: &["project", "location", "cluster"],
        immutable: &[
            "name",
            "project",
            "location",
            "cluster",
            "machine_type",
            "accelerator",
            "disk_size",
            "disk_type",
            "spot",
            "preemptible",
            "node_taints",
        ],
        ..spec("gcp_container_node_pool", &["container", "node-pools"])
    },
    TypeSpec {
        update_verb: Some("patch"),
        immutable: &["name", "project", "database_version", "region"],
        data_bearing: true,
        ..spec("gcp_sql_database_instance", &["sql", "instances"])
    },
    TypeSpec {
        scope: &["project", "instance"],
        update_verb: Some("patch"),
        immutable: &["name", "project", "instance"],
        data_bearing: true,
        ..spec("gcp_sql_database", &["sql", "databases"])
    },
    TypeSpec {
        scope: &["project", "instance"],
        update_verb: Some("set-password"),
        immutable: &["name", "project", "instance", "host"],
        style: Style::SqlUser,
        ..spec("gcp_sql_user", &["sql", "users"])
    },
    TypeSpec {
        data_bearing: true,
        style: Style::Secret,
        ..spec("gcp_secret_manager_secret", &["secrets"])
    },
    TypeSpec {
        immutable: &["name", "project", "location"],
        data_bearing: true,
        name_prefix: "gs://",
        ..spec("gcp_storage_bucket", &["storage", "buckets"])
    },
    TypeSpec {
        immutable: &["name", "project"],
        ..spec("gcp_service_account", &["iam", "service-accounts"])
    },
];

fn lookup(resource_type: &str) -> Result<&'static TypeSpec, ProviderError> {
    TYPES
        .iter()
        .find(|t| t.resource_type == resource_type)
        .ok_or_else(|| {
            ProviderError::unsupported(format!("gcp does not manage {resource_type}"))
        })
}

/// Attributes that are never turned into flags
const RESERVED: &[&str] = &["name", "data"];

#[derive(Debug)]
pub struct GcpProvider {
    program: String,
}

impl Default for GcpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GcpProvider {
    pub fn new() -> Self {
        Self::with_program(program(ENV_GCLOUD, "gcloud"))
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn resource_id(ctx: &OperationContext, spec: &TypeSpec, attributes: &Attributes) -> ResourceId {
        let name = string_attr(attributes, "name").unwrap_or(ctx.node.name.as_str());
        let name = match spec.style {
            Style::Service => string_attr(attributes, "service").unwrap_or(name),
            _ => name,
        };
        spec.scope
            .iter()
            .fold(ResourceId::new(name), |id, key| match attributes.get(*key) {
                Some(value) => match flag_value(value) {
                    Some(v) => id.with(key, v),
                    None => id,
                },
                None => id,
            })
    }

    /// `gcloud <group> <verb> <name> <scope flags> <fixed flags>`
    fn command(spec: &TypeSpec, verb: &str, id: &ResourceId) -> Vec<String> {
        let mut args: Vec<String> = spec.group.iter().map(|s| (*s).to_string()).collect();
        args.push(verb.to_string());
        args.push(format!("{}{}", spec.name_prefix, id.name));
        for (key, value) in &id.scope {
            args.push(format!("--{}={value}", key.replace('_', "-")));
        }
        args.extend(spec.fixed.iter().map(|s| (*s).to_string()));
        args
    }

    fn attribute_flags(spec: &TypeSpec, attributes: &Attributes, mutable_only: bool) -> Vec<String> {
        attributes
            .iter()
            .filter(|(key, _)| {
                !RESERVED.contains(&key.as_str()) && !spec.scope.contains(&key.as_str())
            })
            .filter(|(key, _)| !mutable_only || !spec.immutable.contains(&key.as_str()))
            .filter_map(|(key, value)| flag(key, value))
            .collect()
    }

    fn run_json(
        &self,
        ctx: &OperationContext,
        mut args: Vec<String>,
        stdin: Option<&str>,
    ) -> Result<serde_json::Value, ProviderError> {
        args.push("--format=json".to_string());
        args.push("--quiet".to_string());
        let stdout = runner::run_capture(ctx, &self.program, &args, stdin)?;
        parse_json(&self.program, &stdout)
    }

    fn applied(id: &ResourceId, json: &serde_json::Value) -> Applied {
        Applied {
            id: id.to_string(),
            outputs: scalar_fields(json),
        }
    }

    fn secret_payload(attributes: &Attributes) -> Option<String> {
        attributes.get("data").and_then(Value::interpolate)
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NOT_FOUND") || stderr.contains("not found")
}

impl Provider for GcpProvider {
    fn name(&self) -> &str {
        "gcp"
    }

    fn supports(&self, resource_type: &str) -> bool {
        lookup(resource_type).is_ok()
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        let Ok(spec) = lookup(resource_type) else {
            return ResourceSchema::default();
        };
        let schema = match (spec.style, spec.update_verb) {
            // New payloads become versions; everything else is fixed at create
            (Style::Secret, _) => ResourceSchema::only_updatable(["data"]),
            (_, None) => ResourceSchema::only_updatable([]),
            _ => ResourceSchema::with_immutable(spec.immutable.iter().copied()),
        };
        if spec.data_bearing {
            schema.data_bearing()
        } else {
            schema
        }
    }

    fn create(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        let spec = lookup(resource_type)?;
        let id = Self::resource_id(ctx, spec, attributes);

        match spec.style {
            Style::Service => {
                let args = vec![
                    "services".to_string(),
                    "enable".to_string(),
                    id.name.clone(),
                    format!("--project={}", id.get("project").unwrap_or_default()),
                ];
                self.run_json(ctx, args, None)?;
                Ok(Applied {
                    id: id.to_string(),
                    outputs: [("service".to_string(), Value::from(id.name.as_str()))].into(),
                })
            }
            Style::Secret => {
                let payload = Self::secret_payload(attributes);
                let mut args = Self::command(spec, "create", &id);
                args.extend(Self::attribute_flags(spec, attributes, false));
                if payload.is_some() {
                    args.push("--data-file=-".to_string());
                }
                let json = self.run_json(ctx, args, payload.as_deref())?;
                Ok(Self::applied(&id, &json))
            }
            Style::Standard | Style::SqlUser => {
                let mut args = Self::command(spec, "create", &id);
                args.extend(Self::attribute_flags(spec, attributes, false));
                let json = self.run_json(ctx, args, None)?;
                Ok(Self::applied(&id, &json))
            }
        }
    }

    fn update(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        let spec = lookup(resource_type)?;
        let id = ResourceId::parse(id)?;

        if spec.style == Style::Secret {
            let Some(payload) = Self::secret_payload(attributes) else {
                log::warn!("{}: data was removed; existing versions are kept", ctx.node);
                return Ok(Applied {
                    id: id.to_string(),
                    outputs: Attributes::new(),
                });
            };
            let mut args: Vec<String> = vec![
                "secrets".into(),
                "versions".into(),
                "add".into(),
                id.name.clone(),
            ];
            args.extend(id.scope.iter().map(|(k, v)| format!("--{k}={v}")));
            args.push("--data-file=-".to_string());
            let json = self.run_json(ctx, args, Some(&payload))?;
            let outputs = json
                .get("name")
                .and_then(serde_json::Value::as_str)
                .map(|version| ("latest_version".to_string(), Value::from(version)))
                .into_iter()
                .collect();
            return Ok(Applied {
                id: id.to_string(),
                outputs,
            });
        }

        let verb = spec.update_verb.ok_or_else(|| {
            ProviderError::unsupported(format!("{resource_type} cannot be updated in place"))
        })?;
        let mut args = Self::command(spec, verb, &id);
        args.extend(Self::attribute_flags(spec, attributes, true));
        let json = self.run_json(ctx, args, None)?;
        Ok(Self::applied(&id, &json))
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<(), ProviderError> {
        let spec = lookup(resource_type)?;
        let id = ResourceId::parse(id)?;

        let mut args = if spec.style == Style::Service {
            vec![
                "services".to_string(),
                "disable".to_string(),
                id.name.clone(),
                format!("--project={}", id.get("project").unwrap_or_default()),
            ]
        } else {
            Self::command(spec, "delete", &id)
        };
        args.push("--quiet".to_string());

        let captured = runner::run(ctx, &self.program, &args, None)?;
        if !captured.success && is_not_found(&captured.stderr) {
            log::info!("{} was already gone", ctx.node);
            return Ok(());
        }
        captured.into_stdout(&self.program).map(|_| ())
    }

    fn read(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        let spec = lookup(resource_type)?;
        let id = ResourceId::parse(id)?;

        let mut args = match spec.style {
            Style::Service => vec![
                "services".to_string(),
                "list".to_string(),
                "--enabled".to_string(),
                format!("--project={}", id.get("project").unwrap_or_default()),
                format!("--filter=config.name={}", id.name),
            ],
            Style::SqlUser => {
                let mut args: Vec<String> = vec!["sql".into(), "users".into(), "list".into()];
                args.extend(id.scope.iter().map(|(k, v)| format!("--{k}={v}")));
                args
            }
            Style::Standard | Style::Secret => Self::command(spec, "describe", &id),
        };
        args.push("--format=json".to_string());

        let captured = runner::run(ctx, &self.program, &args, None)?;
        if !captured.success && is_not_found(&captured.stderr) {
            return Ok(None);
        }
        let json = parse_json(&self.program, &captured.into_stdout(&self.program)?)?;

        let observed = match (spec.style, &json) {
            (Style::Service, serde_json::Value::Array(items)) if items.is_empty() => None,
            (Style::Service, _) => {
                Some([("service".to_string(), Value::from(id.name.as_str()))].into())
            }
            (Style::SqlUser, serde_json::Value::Array(items)) => items
                .iter()
                .find(|user| {
                    user.get("name").and_then(serde_json::Value::as_str) == Some(id.name.as_str())
                })
                .map(scalar_fields),
            _ => Some(scalar_fields(&json)),
        };
        Ok(observed)
    }
}
