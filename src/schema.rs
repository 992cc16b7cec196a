//! Declaration documents
//!
//! A project is one TOML file or a directory of them. Every file may carry
//! `[settings]`, `[variables.*]`, `[[resource]]` and `[outputs.*]` tables;
//! they are merged in path order.
//!
//! # Interpolation
//!
//! - `${var.NAME}` is substituted while loading. A string that is exactly one
//!   variable keeps the variable's type.
//! - `${type.name.attr[.path]}` is a reference to another resource. A string
//!   that is exactly one reference becomes a [`Value::Ref`], anything mixed
//!   becomes a [`Value::Template`].
//! - `$${` is a literal `${`.
//!
//! # Variable Priority
//!
//! 1. `--var name=value`
//! 2. `--var-file FILE` (later files win)
//! 3. `keel.vars.toml` next to the declarations
//! 4. `KEEL_VAR_<name>` environment variable
//! 5. The declared `default`

use anyhow::{Context, Result};
use declarative::{Attributes, Lifecycle, Node, NodeId, OutputDecl, Reference, Segment, Value};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

/// Variable file picked up automatically from a project directory
pub const AUTO_VARS_FILE: &str = "keel.vars.toml";

/// Prefix of environment variables supplying variable values
pub const ENV_VAR_PREFIX: &str = "KEEL_VAR_";

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$\{|\$\{([^}]*)\}").expect("interpolation pattern is valid")
});

/// Problems found while turning documents into nodes
#[derive(Error, Debug)]
pub enum DeclarationError {
    #[error("no declaration files found in {}", .0.display())]
    NoDeclarations(PathBuf),

    #[error("variable '{name}' is declared in both {} and {}", .first.display(), .second.display())]
    DuplicateVariable {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("output '{name}' is declared more than once")]
    DuplicateOutput { name: String },

    #[error("variable '{name}' has no value; pass --var {name}=... or set KEEL_VAR_{name}")]
    MissingVariable { name: String },

    #[error("{location}: unknown variable 'var.{name}'")]
    UnknownVariable { name: String, location: String },

    #[error("{location}: invalid reference '${{{expression}}}', expected type.name.attribute")]
    InvalidReference { expression: String, location: String },

    #[error("{location}: unterminated interpolation in {text:?}")]
    Unterminated { text: String, location: String },

    #[error("invalid resource identity '{resource_type}.{name}'")]
    InvalidIdentity { resource_type: String, name: String },

    #[error("{location}: {message}")]
    Invalid { location: String, message: String },
}

// ============================================================================
// Document Schema
// ============================================================================

/// One declaration file as written
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default)]
    pub settings: SettingsDoc,

    #[serde(default)]
    pub variables: BTreeMap<String, VariableDoc>,

    #[serde(default)]
    pub resource: Vec<ResourceDoc>,

    #[serde(default)]
    pub outputs: BTreeMap<String, OutputDoc>,
}

/// Run settings; later files override earlier ones field by field
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct SettingsDoc {
    pub parallelism: Option<usize>,
    /// Per-operation timeout such as `"20m"`
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct VariableDoc {
    pub default: Option<toml::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ResourceDoc {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Defaults to the type prefix (`gcp_compute_network` -> `gcp`)
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub attributes: toml::Table,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OutputDoc {
    pub value: toml::Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Loaded Declarations
// ============================================================================

/// Variable values supplied on the command line
#[derive(Debug, Default, Clone)]
pub struct VariableInputs {
    /// `name=value` pairs from `--var`
    pub assignments: Vec<String>,
    /// Files from `--var-file`
    pub files: Vec<PathBuf>,
}

/// Effective run settings
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    pub parallelism: Option<usize>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub description: Option<String>,
    pub sensitive: bool,
}

/// Everything a project declares, with variables substituted
#[derive(Debug, Default)]
pub struct Declarations {
    pub nodes: Vec<Node>,
    pub outputs: Vec<OutputDecl>,
    pub settings: Settings,
    pub variables: BTreeMap<String, Variable>,
    /// Files that were read, in merge order
    pub sources: Vec<PathBuf>,
}

/// Load a declaration file or every `*.toml` file of a directory
pub fn load(path: &Path, inputs: &VariableInputs) -> Result<Declarations> {
    let sources = declaration_files(path)?;
    let mut documents = Vec::with_capacity(sources.len());
    for source in &sources {
        let content = fs::read_to_string(source)
            .with_context(|| format!("Could not read {}", source.display()))?;
        let document: Document = toml::from_str(&content)
            .with_context(|| format!("Invalid declaration file {}", source.display()))?;
        documents.push((source.clone(), document));
    }

    let auto_vars = if path.is_dir() {
        Some(path.join(AUTO_VARS_FILE)).filter(|p| p.is_file())
    } else {
        None
    };
    let supplied = supplied_values(inputs, auto_vars.as_deref())?;

    let mut declarations = assemble(documents, &supplied, &|name| {
        std::env::var(format!("{ENV_VAR_PREFIX}{name}")).ok()
    })?;
    declarations.sources = sources;
    log::debug!(
        "Loaded {} resources and {} outputs from {} files",
        declarations.nodes.len(),
        declarations.outputs.len(),
        declarations.sources.len()
    );
    Ok(declarations)
}

/// Declaration files for a path, sorted
///
/// Variable files (`*.vars.toml`) are not declarations.
pub fn declaration_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        anyhow::bail!("Declaration path does not exist: {}", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Could not list {}", path.display()))?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_file() && name.ends_with(".toml") && !name.ends_with(".vars.toml")
        {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(DeclarationError::NoDeclarations(path.to_path_buf()).into());
    }
    Ok(files)
}

/// Explicitly supplied variable values, highest priority last applied
fn supplied_values(
    inputs: &VariableInputs,
    auto_vars: Option<&Path>,
) -> Result<BTreeMap<String, Value>> {
    let mut values = BTreeMap::new();

    for file in auto_vars.into_iter().chain(inputs.files.iter().map(PathBuf::as_path)) {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Could not read variable file {}", file.display()))?;
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Invalid variable file {}", file.display()))?;
        for (name, value) in table {
            values.insert(name, from_toml(value));
        }
    }

    for assignment in &inputs.assignments {
        let (name, raw) = assignment
            .split_once('=')
            .with_context(|| format!("Invalid --var '{assignment}', expected name=value"))?;
        values.insert(name.trim().to_string(), infer_scalar(raw));
    }

    Ok(values)
}

/// Merge parsed documents into nodes and outputs
pub fn assemble(
    documents: Vec<(PathBuf, Document)>,
    supplied: &BTreeMap<String, Value>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Declarations, DeclarationError> {
    let mut settings = SettingsDoc::default();
    let mut variable_docs: BTreeMap<String, (PathBuf, VariableDoc)> = BTreeMap::new();
    let mut resources = Vec::new();
    let mut output_docs: BTreeMap<String, OutputDoc> = BTreeMap::new();

    for (path, document) in documents {
        if document.settings.parallelism.is_some() {
            settings.parallelism = document.settings.parallelism;
        }
        if document.settings.timeout.is_some() {
            settings.timeout = document.settings.timeout;
        }
        for (name, variable) in document.variables {
            if let Some((first, _)) = variable_docs.get(&name) {
                return Err(DeclarationError::DuplicateVariable {
                    name,
                    first: first.clone(),
                    second: path,
                });
            }
            variable_docs.insert(name, (path.clone(), variable));
        }
        resources.extend(document.resource);
        for (name, output) in document.outputs {
            if output_docs.insert(name.clone(), output).is_some() {
                return Err(DeclarationError::DuplicateOutput { name });
            }
        }
    }

    let mut variables = BTreeMap::new();
    for (name, (_, doc)) in variable_docs {
        let value = supplied
            .get(&name)
            .cloned()
            .or_else(|| env(&name).map(|raw| infer_scalar(&raw)))
            .or_else(|| doc.default.clone().map(from_toml))
            .ok_or_else(|| DeclarationError::MissingVariable { name: name.clone() })?;
        variables.insert(
            name,
            Variable {
                value,
                description: doc.description,
                sensitive: doc.sensitive,
            },
        );
    }
    for name in supplied.keys().filter(|n| !variables.contains_key(*n)) {
        log::warn!("Value supplied for undeclared variable '{}'", name);
    }

    let interpolator = Interpolator {
        variables: &variables,
    };

    let nodes = resources
        .into_iter()
        .map(|resource| interpolator.node(resource))
        .collect::<Result<Vec<_>, _>>()?;

    let outputs = output_docs
        .into_iter()
        .map(|(name, doc)| {
            let location = format!("output '{name}'");
            Ok(OutputDecl {
                value: interpolator.value(doc.value, &location)?,
                name,
                sensitive: doc.sensitive,
                description: doc.description,
            })
        })
        .collect::<Result<Vec<_>, DeclarationError>>()?;

    let timeout = settings
        .timeout
        .as_deref()
        .map(|raw| {
            crate::ui::parse_duration(raw).map_err(|message| DeclarationError::Invalid {
                location: "settings.timeout".to_string(),
                message,
            })
        })
        .transpose()?;

    if settings.parallelism == Some(0) {
        return Err(DeclarationError::Invalid {
            location: "settings.parallelism".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    Ok(Declarations {
        nodes,
        outputs,
        settings: Settings {
            parallelism: settings.parallelism,
            timeout,
        },
        variables,
        sources: Vec::new(),
    })
}

// ============================================================================
// Interpolation
// ============================================================================

enum Piece {
    Literal(String),
    Variable(Value),
    Ref(Reference),
}

struct Interpolator<'a> {
    variables: &'a BTreeMap<String, Variable>,
}

impl Interpolator<'_> {
    fn node(&self, doc: ResourceDoc) -> Result<Node, DeclarationError> {
        if !valid_identifier(&doc.resource_type) || !valid_identifier(&doc.name) {
            return Err(DeclarationError::InvalidIdentity {
                resource_type: doc.resource_type,
                name: doc.name,
            });
        }
        let id = NodeId::new(&doc.resource_type, &doc.name);

        let mut attributes = Attributes::new();
        for (key, value) in doc.attributes {
            let location = format!("{id}.{key}");
            attributes.insert(key, self.value(value, &location)?);
        }

        let depends_on = doc
            .depends_on
            .iter()
            .map(|raw| {
                raw.parse::<NodeId>().map_err(|message| DeclarationError::Invalid {
                    location: format!("{id}.depends_on"),
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut node = Node::new(id, attributes)
            .with_depends_on(depends_on)
            .with_lifecycle(doc.lifecycle);
        if let Some(provider) = doc.provider {
            node = node.with_provider(provider);
        }
        Ok(node)
    }

    fn value(&self, value: toml::Value, location: &str) -> Result<Value, DeclarationError> {
        Ok(match value {
            toml::Value::String(text) => self.string(&text, location)?,
            toml::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.value(item, &format!("{location}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            toml::Value::Table(table) => Value::Map(
                table
                    .into_iter()
                    .map(|(k, v)| {
                        let nested = format!("{location}.{k}");
                        self.value(v, &nested).map(|v| (k, v))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            scalar => from_toml(scalar),
        })
    }

    fn string(&self, text: &str, location: &str) -> Result<Value, DeclarationError> {
        let pieces = self.pieces(text, location)?;

        if let [single] = pieces.as_slice() {
            match single {
                Piece::Variable(value) => return Ok(value.clone()),
                Piece::Ref(reference) => return Ok(Value::Ref(reference.clone())),
                Piece::Literal(_) => {}
            }
        }

        let mut segments: Vec<Segment> = Vec::new();
        for piece in pieces {
            let text = match piece {
                Piece::Ref(reference) => {
                    segments.push(Segment::Ref(reference));
                    continue;
                }
                Piece::Literal(text) => text,
                Piece::Variable(value) => value.interpolate().unwrap_or_default(),
            };
            if let Some(Segment::Literal(last)) = segments.last_mut() {
                last.push_str(&text);
            } else {
                segments.push(Segment::Literal(text));
            }
        }

        Ok(match segments.as_slice() {
            [] => Value::String(String::new()),
            [Segment::Literal(text)] => Value::String(text.clone()),
            _ => Value::Template(segments),
        })
    }

    fn pieces(&self, text: &str, location: &str) -> Result<Vec<Piece>, DeclarationError> {
        let mut pieces = Vec::new();
        let mut cursor = 0;

        for captures in INTERPOLATION.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if whole.start() > cursor {
                pieces.push(Piece::Literal(text[cursor..whole.start()].to_string()));
            }
            cursor = whole.end();

            match captures.get(1) {
                None => pieces.push(Piece::Literal("${".to_string())),
                Some(expression) => pieces.push(self.expression(expression.as_str(), location)?),
            }
        }

        let rest = &text[cursor..];
        if rest.contains("${") {
            return Err(DeclarationError::Unterminated {
                text: text.to_string(),
                location: location.to_string(),
            });
        }
        if !rest.is_empty() {
            pieces.push(Piece::Literal(rest.to_string()));
        }
        Ok(pieces)
    }

    fn expression(&self, raw: &str, location: &str) -> Result<Piece, DeclarationError> {
        let expression = raw.trim();
        let parts: Vec<&str> = expression.split('.').collect();

        if let ["var", name] = parts.as_slice() {
            return self
                .variables
                .get(*name)
                .map(|v| Piece::Variable(v.value.clone()))
                .ok_or_else(|| DeclarationError::UnknownVariable {
                    name: (*name).to_string(),
                    location: location.to_string(),
                });
        }

        match parts.as_slice() {
            [resource_type, name, path @ ..]
                if !path.is_empty()
                    && valid_identifier(resource_type)
                    && valid_identifier(name)
                    && path.iter().all(|p| !p.is_empty()) =>
            {
                Ok(Piece::Ref(Reference::new(
                    NodeId::new(*resource_type, *name),
                    path.iter().copied(),
                )))
            }
            _ => Err(DeclarationError::InvalidReference {
                expression: expression.to_string(),
                location: location.to_string(),
            }),
        }
    }
}

fn valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Convert a plain TOML value without interpolation
fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => {
            Value::Map(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
        }
    }
}

/// Type a raw command-line or environment value
fn infer_scalar(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>()
        && raw.contains('.')
    {
        Value::Float(f)
    } else {
        Value::String(raw.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
