//! Drift detection
//!
//! Reads every applied node back through its provider and compares the
//! observed attributes with the stored snapshot. Drift is a warning: it
//! never fails a run, it only changes what the planner recommends.

use crate::executor::call_with_timeout;
use crate::provider::{OperationContext, ProviderRegistry};
use crate::state::StateStore;
use crate::types::{NodeId, Value};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// How a node diverged from its applied state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftKind {
    /// The external resource no longer exists
    Gone,
    /// An attribute differs from the stored value
    Changed {
        attribute: String,
        stored: Value,
        actual: Value,
    },
    /// The provider could not read the resource
    ReadFailed { message: String },
}

/// Drift warning for one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drift {
    pub node: NodeId,
    #[serde(flatten)]
    pub kind: DriftKind,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DriftKind::Gone => write!(f, "{} no longer exists", self.node),
            DriftKind::Changed {
                attribute,
                stored,
                actual,
            } => write!(
                f,
                "{}.{attribute} changed outside keel: {stored} -> {actual}",
                self.node
            ),
            DriftKind::ReadFailed { message } => {
                write!(f, "{} could not be read: {message}", self.node)
            }
        }
    }
}

/// Read back every applied node and report divergence
///
/// Only attributes the provider returns are compared; attributes it does
/// not report are assumed unchanged.
pub fn refresh(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    timeout: Option<Duration>,
) -> Vec<Drift> {
    let mut drift = Vec::new();

    for state in store.snapshot() {
        let provider = match providers.resolve(&state.node, &state.provider) {
            Ok(provider) => provider,
            Err(e) => {
                drift.push(Drift {
                    node: state.node.clone(),
                    kind: DriftKind::ReadFailed {
                        message: e.to_string(),
                    },
                });
                continue;
            }
        };

        let ctx = OperationContext::new(state.node.clone());
        let resource_type = state.node.resource_type.clone();
        let id = state.resource_id.clone();
        let observed = call_with_timeout(ctx, timeout, move |ctx| {
            provider.read(ctx, &resource_type, &id)
        });

        match observed {
            Ok(None) => {
                log::info!("{} no longer exists", state.node);
                drift.push(Drift {
                    node: state.node.clone(),
                    kind: DriftKind::Gone,
                });
            }
            Ok(Some(actual)) => {
                for (attribute, actual) in actual {
                    let Some(stored) = state.attribute(std::slice::from_ref(&attribute)) else {
                        continue;
                    };
                    if !stored.semantic_eq(&actual) {
                        log::info!("{}.{} drifted", state.node, attribute);
                        drift.push(Drift {
                            node: state.node.clone(),
                            kind: DriftKind::Changed {
                                attribute,
                                stored: stored.clone(),
                                actual,
                            },
                        });
                    }
                }
            }
            Err(e) => {
                log::warn!("Refresh of {} failed: {}", state.node, e);
                drift.push(Drift {
                    node: state.node.clone(),
                    kind: DriftKind::ReadFailed {
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    drift
}
