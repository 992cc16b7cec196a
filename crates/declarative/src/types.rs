//! Core types for declarative resource graphs

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Attribute map of a node, ordered by name
pub type Attributes = BTreeMap<String, Value>;

/// Identity of a node: `(type, name)`, displayed as `type.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    pub resource_type: String,
    pub name: String,
}

impl NodeId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Provider tag implied by the type: the prefix before the first `_`
    pub fn default_provider(&self) -> &str {
        self.resource_type
            .split_once('_')
            .map_or(self.resource_type.as_str(), |(prefix, _)| prefix)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((resource_type, name))
                if !resource_type.is_empty() && !name.is_empty() && !name.contains('.') =>
            {
                Ok(Self::new(resource_type, name))
            }
            _ => Err(format!("invalid node id '{s}', expected 'type.name'")),
        }
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A pointer to another node's (future) attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub node: NodeId,
    /// Attribute path below the node; numeric segments index into lists
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(node: NodeId, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            node,
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}", self.node)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        write!(f, "}}")
    }
}

/// One piece of an interpolated string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Ref(Reference),
}

/// Attribute value
///
/// `Ref` and `Template` only appear in declarations; applied state holds
/// fully resolved values. `Unknown` is produced while planning for values
/// that are only known after apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(Reference),
    Template(Vec<Segment>),
    Unknown,
}

impl Value {
    /// Collect every node this value refers to
    pub fn collect_references(&self, out: &mut BTreeSet<NodeId>) {
        match self {
            Value::Ref(reference) => {
                out.insert(reference.node.clone());
            }
            Value::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(reference) = segment {
                        out.insert(reference.node.clone());
                    }
                }
            }
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// True if the value still contains references or templates
    pub fn has_references(&self) -> bool {
        match self {
            Value::Ref(_) | Value::Template(_) => true,
            Value::List(items) => items.iter().any(Value::has_references),
            Value::Map(map) => map.values().any(Value::has_references),
            _ => false,
        }
    }

    /// True if any part of the value is only known after apply
    pub fn is_unknown(&self) -> bool {
        match self {
            Value::Unknown => true,
            Value::List(items) => items.iter().any(Value::is_unknown),
            Value::Map(map) => map.values().any(Value::is_unknown),
            _ => false,
        }
    }

    /// Walk an attribute path into nested maps and lists
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        match self {
            Value::Map(map) => map.get(first)?.get_path(rest),
            Value::List(items) => items.get(first.parse::<usize>().ok()?)?.get_path(rest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Equality that treats `1` and `1.0` as the same number
    ///
    /// `Unknown` never equals anything, itself included.
    pub fn semantic_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unknown, _) | (_, Value::Unknown) => false,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.semantic_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Render a scalar for string interpolation
    pub fn interpolate(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::List(_) | Value::Map(_) => serde_json::to_string(self).ok(),
            Value::Ref(_) | Value::Template(_) | Value::Unknown => None,
        }
    }

    /// Convert a JSON document into a value; `null`s are dropped
    pub fn from_json(json: serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            }),
            serde_json::Value::String(s) => Some(Value::String(s)),
            serde_json::Value::Array(items) => Some(Value::List(
                items.into_iter().filter_map(Value::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(Value::Map(
                map.into_iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Ref(reference) => write!(f, "\"{reference}\""),
            Value::Template(segments) => write!(f, "\"{}\"", render_template(segments)),
            Value::Unknown => write!(f, "(known after apply)"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn render_template(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(text) => text.clone(),
            Segment::Ref(reference) => reference.to_string(),
        })
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Ref(reference) => serializer.collect_str(reference),
            Value::Template(segments) => serializer.serialize_str(&render_template(segments)),
            Value::Unknown => serializer.serialize_unit(),
        }
    }
}

/// Plain data shape used to deserialize resolved values
#[derive(Deserialize)]
#[serde(untagged)]
enum PlainValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let plain = PlainValue::deserialize(deserializer)
            .map_err(|e| de::Error::custom(format!("unsupported attribute value: {e}")))?;
        Ok(match plain {
            PlainValue::Bool(b) => Value::Bool(b),
            PlainValue::Int(i) => Value::Int(i),
            PlainValue::Float(f) => Value::Float(f),
            PlainValue::String(s) => Value::String(s),
            PlainValue::List(items) => Value::List(items),
            PlainValue::Map(map) => Value::Map(map),
        })
    }
}

/// Per-node lifecycle policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Create the replacement before tearing down the old instance
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Refuse any plan that would destroy or replace this node
    #[serde(default)]
    pub prevent_destroy: bool,
    /// Top-level attributes whose changes are not acted upon
    #[serde(default)]
    pub ignore_changes: Vec<String>,
}

/// One declared unit of desired state
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Provider tag used to dispatch operations
    pub provider: String,
    pub attributes: Attributes,
    /// Explicit ordering edges with no data dependency
    pub depends_on: Vec<NodeId>,
    pub lifecycle: Lifecycle,
}

impl Node {
    pub fn new(id: NodeId, attributes: Attributes) -> Self {
        let provider = id.default_provider().to_string();
        Self {
            id,
            provider,
            attributes,
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_depends_on(mut self, depends_on: impl IntoIterator<Item = NodeId>) -> Self {
        self.depends_on.extend(depends_on);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Nodes referenced from attribute values
    pub fn references(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        for value in self.attributes.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// References plus explicit `depends_on` edges
    pub fn dependencies(&self) -> BTreeSet<NodeId> {
        let mut deps = self.references();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// Last-known applied state of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    pub node: NodeId,
    pub provider: String,
    /// Identifier the provider assigned to the external resource
    pub resource_id: String,
    /// Declared attributes, resolved, as sent on the last apply
    #[serde(default)]
    pub inputs: Attributes,
    /// Attributes the provider returned on the last apply
    #[serde(default)]
    pub outputs: Attributes,
    /// Nodes this one depended on when it was applied
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    pub generation: u64,
    /// Old instances awaiting deletion after a create-before-destroy replace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<Deposed>,
    pub updated_at: DateTime<Utc>,
}

/// An old instance kept until its replacement's dependents have moved over
///
/// It remembers its own provider, which may differ from the node's current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposed {
    pub id: String,
    pub provider: String,
}

impl fmt::Display for Deposed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.provider)
    }
}

impl AppliedState {
    /// Look up an attribute path; outputs take precedence over inputs
    pub fn attribute(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.outputs
            .get(first)
            .or_else(|| self.inputs.get(first))?
            .get_path(rest)
    }

    /// Full attribute snapshot: outputs overlaid on inputs
    pub fn attributes(&self) -> Attributes {
        let mut merged = self.inputs.clone();
        merged.extend(self.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_node_id_parse_and_display() {
        let id: NodeId = "gcp_container_cluster.primary".parse().unwrap();
        assert_eq!(id.resource_type, "gcp_container_cluster");
        assert_eq!(id.name, "primary");
        assert_eq!(id.to_string(), "gcp_container_cluster.primary");
        assert_eq!(id.default_provider(), "gcp");

        assert!("nodot".parse::<NodeId>().is_err());
        assert!(".name".parse::<NodeId>().is_err());
        assert!("a.b.c".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let id = NodeId::new("k8s_deployment", "api");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"k8s_deployment.api\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_node_references_include_templates_and_nested() {
        let net = NodeId::new("gcp_compute_network", "vpc");
        let sql = NodeId::new("gcp_sql_database_instance", "db");
        let node = Node::new(
            NodeId::new("k8s_deployment", "api"),
            attrs(&[
                (
                    "env",
                    Value::Map(attrs(&[(
                        "DB_HOST",
                        Value::Ref(Reference::new(sql.clone(), ["private_ip"])),
                    )])),
                ),
                (
                    "url",
                    Value::Template(vec![
                        Segment::Literal("https://".into()),
                        Segment::Ref(Reference::new(net.clone(), ["name"])),
                    ]),
                ),
            ]),
        )
        .with_depends_on([NodeId::new("gcp_project_service", "container")]);

        let refs = node.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&net));
        assert!(refs.contains(&sql));
        assert_eq!(node.dependencies().len(), 3);
    }

    #[test]
    fn test_get_path_walks_maps_and_lists() {
        let value = Value::Map(attrs(&[(
            "ingress",
            Value::List(vec![Value::Map(attrs(&[("ip", "10.0.0.1".into())]))]),
        )]));
        let path: Vec<String> = vec!["ingress".into(), "0".into(), "ip".into()];
        assert_eq!(value.get_path(&path), Some(&Value::from("10.0.0.1")));
        let missing: Vec<String> = vec!["ingress".into(), "3".into()];
        assert_eq!(value.get_path(&missing), None);
    }

    #[test]
    fn test_semantic_eq() {
        assert!(Value::Int(3).semantic_eq(&Value::Float(3.0)));
        assert!(!Value::Int(3).semantic_eq(&Value::Float(3.5)));
        assert!(!Value::Unknown.semantic_eq(&Value::Unknown));
        assert!(
            Value::List(vec![Value::Int(1)]).semantic_eq(&Value::List(vec![Value::Float(1.0)]))
        );
    }

    #[test]
    fn test_value_json_shape() {
        let value = Value::Map(attrs(&[
            ("count", Value::Int(2)),
            ("preemptible", Value::Bool(true)),
            ("zones", Value::List(vec!["a".into(), "b".into()])),
        ]));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            r#"{"count":2,"preemptible":true,"zones":["a","b"]}"#
        );
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_from_json_drops_nulls() {
        let json = serde_json::json!({"a": null, "b": [1, null, "x"], "c": 1.5});
        let value = Value::from_json(json).unwrap();
        assert_eq!(
            value,
            Value::Map(attrs(&[
                ("b", Value::List(vec![Value::Int(1), "x".into()])),
                ("c", Value::Float(1.5)),
            ]))
        );
    }

    #[test]
    fn test_applied_state_attribute_prefers_outputs() {
        let state = AppliedState {
            node: NodeId::new("null_thing", "a"),
            provider: "null".into(),
            resource_id: "a-1".into(),
            inputs: attrs(&[("name", "declared".into()), ("size", Value::Int(1))]),
            outputs: attrs(&[("name", "returned".into())]),
            dependencies: vec![],
            generation: 1,
            deposed: vec![],
            updated_at: Utc::now(),
        };
        assert_eq!(
            state.attribute(&["name".to_string()]),
            Some(&Value::from("returned"))
        );
        assert_eq!(state.attribute(&["size".to_string()]), Some(&Value::Int(1)));
        assert_eq!(state.attributes().len(), 2);
    }
}
