//! Reference resolution

use crate::error::ConfigError;
use crate::state::StateStore;
use crate::types::{Attributes, NodeId, Reference, Segment, Value};

/// Outcome of looking up one reference
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    Known(Value),
    /// Will only be known after the referenced node is applied
    Unknown,
    Missing(String),
}

/// Replace every reference in a node's attributes
pub(crate) fn resolve_attributes(
    node: &NodeId,
    attributes: &Attributes,
    lookup: &dyn Fn(&Reference) -> Resolution,
) -> Result<Attributes, ConfigError> {
    attributes
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(node, value, lookup)?)))
        .collect()
}

pub(crate) fn resolve_value(
    node: &NodeId,
    value: &Value,
    lookup: &dyn Fn(&Reference) -> Resolution,
) -> Result<Value, ConfigError> {
    let unresolved = |reference: &Reference, reason: String| ConfigError::UnresolvedReference {
        node: node.clone(),
        reference: reference.to_string(),
        reason,
    };

    match value {
        Value::Ref(reference) => match lookup(reference) {
            Resolution::Known(v) => Ok(v),
            Resolution::Unknown => Ok(Value::Unknown),
            Resolution::Missing(reason) => Err(unresolved(reference, reason)),
        },
        Value::Template(segments) => {
            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => out.push_str(text),
                    Segment::Ref(reference) => match lookup(reference) {
                        Resolution::Known(v) if v.is_unknown() => return Ok(Value::Unknown),
                        Resolution::Known(v) => match v.interpolate() {
                            Some(text) => out.push_str(&text),
                            None => {
                                return Err(unresolved(
                                    reference,
                                    "value cannot be interpolated into a string".into(),
                                ));
                            }
                        },
                        Resolution::Unknown => return Ok(Value::Unknown),
                        Resolution::Missing(reason) => return Err(unresolved(reference, reason)),
                    },
                }
            }
            Ok(Value::String(out))
        }
        Value::List(items) => items
            .iter()
            .map(|item| resolve_value(node, item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(node, v, lookup)?)))
            .collect::<Result<_, ConfigError>>()
            .map(Value::Map),
        other => Ok(other.clone()),
    }
}

/// Resolve references against committed applied state
pub(crate) fn lookup_in_store(store: &dyn StateStore, reference: &Reference) -> Resolution {
    match store.get(&reference.node) {
        None => Resolution::Missing(format!("{} has not been applied", reference.node)),
        Some(state) => match state.attribute(&reference.path) {
            Some(value) => Resolution::Known(value.clone()),
            None => Resolution::Missing(format!(
                "{} has no attribute '{}'",
                reference.node,
                reference.path.join(".")
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> Reference {
        Reference::new(NodeId::new("null_resource", "up"), path.split('.'))
    }

    fn lookup(r: &Reference) -> Resolution {
        match r.path.join(".").as_str() {
            "ip" => Resolution::Known(Value::from("10.0.0.7")),
            "port" => Resolution::Known(Value::Int(8443)),
            "tags" => Resolution::Known(Value::List(vec!["a".into()])),
            "endpoint" => Resolution::Unknown,
            other => Resolution::Missing(format!("no attribute {other}")),
        }
    }

    fn node() -> NodeId {
        NodeId::new("null_resource", "down")
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let value = resolve_value(&node(), &Value::Ref(reference("port")), &lookup).unwrap();
        assert_eq!(value, Value::Int(8443));
    }

    #[test]
    fn test_template_interpolates() {
        let template = Value::Template(vec![
            Segment::Literal("https://".into()),
            Segment::Ref(reference("ip")),
            Segment::Literal(":".into()),
            Segment::Ref(reference("port")),
        ]);
        let value = resolve_value(&node(), &template, &lookup).unwrap();
        assert_eq!(value, Value::from("https://10.0.0.7:8443"));
    }

    #[test]
    fn test_unknown_propagates_through_templates() {
        let template = Value::Template(vec![
            Segment::Literal("https://".into()),
            Segment::Ref(reference("endpoint")),
        ]);
        assert_eq!(
            resolve_value(&node(), &template, &lookup).unwrap(),
            Value::Unknown
        );
    }

    #[test]
    fn test_nested_values_resolve() {
        let value = Value::Map(
            [(
                "hosts".to_string(),
                Value::List(vec![Value::Ref(reference("ip")), Value::Ref(reference("tags"))]),
            )]
            .into_iter()
            .collect(),
        );
        let resolved = resolve_value(&node(), &value, &lookup).unwrap();
        assert!(!resolved.has_references());
    }

    #[test]
    fn test_missing_reference_names_node_and_reference() {
        let err = resolve_value(&node(), &Value::Ref(reference("nope")), &lookup).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("null_resource.down"));
        assert!(message.contains("${null_resource.up.nope}"));
    }
}
