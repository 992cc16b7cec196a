//! Named outputs resolved from applied state

use crate::error::ConfigError;
use crate::graph::DependencyGraph;
use crate::resolve::{lookup_in_store, resolve_value};
use crate::state::StateStore;
use crate::types::{NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDecl {
    pub name: String,
    pub value: Value,
    /// Hidden from default display
    pub sensitive: bool,
    pub description: Option<String>,
}

/// Resolved output as stored alongside applied state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
}

/// Check outputs only reference declared nodes
pub fn validate_outputs(outputs: &[OutputDecl], graph: &DependencyGraph) -> Result<(), ConfigError> {
    for output in outputs {
        let mut targets = BTreeSet::new();
        output.value.collect_references(&mut targets);
        if let Some(target) = targets.into_iter().find(|t| !graph.contains(t)) {
            return Err(ConfigError::UnknownOutputReference {
                output: output.name.clone(),
                target,
            });
        }
    }
    Ok(())
}

/// Resolve every output against the store
///
/// Each output resolves independently; one that cannot be resolved does not
/// prevent the others.
pub fn evaluate_outputs(
    outputs: &[OutputDecl],
    store: &dyn StateStore,
) -> BTreeMap<String, Result<OutputValue, ConfigError>> {
    outputs
        .iter()
        .map(|output| {
            // Output errors are reported per output, not per node
            let anchor = NodeId::new("output", &output.name);
            let resolved = resolve_value(&anchor, &output.value, &|r| lookup_in_store(store, r))
                .map_err(|e| ConfigError::UnresolvedOutput {
                    output: output.name.clone(),
                    reason: match e {
                        ConfigError::UnresolvedReference {
                            reference, reason, ..
                        } => format!("{reference}: {reason}"),
                        other => other.to_string(),
                    },
                })
                .and_then(|value| {
                    if value.is_unknown() {
                        Err(ConfigError::UnresolvedOutput {
                            output: output.name.clone(),
                            reason: "value is not known yet".to_string(),
                        })
                    } else {
                        Ok(OutputValue {
                            value,
                            sensitive: output.sensitive,
                        })
                    }
                });
            (output.name.clone(), resolved)
        })
        .collect()
}

/// Keep only the outputs that resolved
pub fn resolved_outputs(
    evaluated: &BTreeMap<String, Result<OutputValue, ConfigError>>,
) -> BTreeMap<String, OutputValue> {
    evaluated
        .iter()
        .filter_map(|(name, result)| result.as_ref().ok().map(|v| (name.clone(), v.clone())))
        .collect()
}
