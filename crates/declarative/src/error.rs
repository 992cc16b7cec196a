//! Error taxonomy for graph building, planning and execution
//!
//! Configuration and cycle errors are fatal and surface before planning.
//! Provider errors halt an apply; nodes committed before the failure stay
//! committed and nothing is rolled back. Drift is not an error, see
//! [`crate::refresh::Drift`].

use crate::planner::Action;
use crate::types::NodeId;
use std::fmt;
use thiserror::Error;

/// Malformed or inconsistent declarations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("node {0} is declared more than once")]
    DuplicateNode(NodeId),

    #[error("{node} references unknown node {target}")]
    UnknownReference { node: NodeId, target: NodeId },

    #[error("{node} depends on unknown node {target}")]
    UnknownDependency { node: NodeId, target: NodeId },

    #[error("{node}: reference {reference} cannot be resolved: {reason}")]
    UnresolvedReference {
        node: NodeId,
        reference: String,
        reason: String,
    },

    #[error("{node}: no provider named '{provider}' is registered")]
    UnknownProvider { node: NodeId, provider: String },

    #[error("{node}: provider '{provider}' does not manage resources of this type")]
    UnsupportedType { node: NodeId, provider: String },

    #[error("{node}: {message}")]
    Invalid { node: NodeId, message: String },

    #[error("output '{output}' references unknown node {target}")]
    UnknownOutputReference { output: String, target: NodeId },

    #[error("output '{output}' cannot be resolved: {reason}")]
    UnresolvedOutput { output: String, reason: String },
}

/// The declared graph has no topological order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between {}{}", join_ids(.members), join_others(.others))]
pub struct CycleError {
    /// Every node on the first cycle, in declaration order
    pub members: Vec<NodeId>,
    /// Further cycles that share no node with the first
    pub others: Vec<Vec<NodeId>>,
}

impl CycleError {
    /// Builds the error from cycles ordered by their first member
    pub fn from_cycles(cycles: impl IntoIterator<Item = Vec<NodeId>>) -> Self {
        let mut cycles = cycles.into_iter();
        Self {
            members: cycles.next().unwrap_or_default(),
            others: cycles.collect(),
        }
    }
}

fn join_others(others: &[Vec<NodeId>]) -> String {
    others
        .iter()
        .map(|cycle| format!("; also between {}", join_ids(cycle)))
        .collect()
}

/// Why a provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The platform rejected or failed the operation
    Failed,
    /// No response within the configured timeout
    Timeout,
    /// The run was cancelled while the call was in flight
    Cancelled,
    /// The provider does not implement this operation or type
    Unsupported,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Failed => "failed",
            Self::Timeout => "timed out",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
        };
        f.write_str(label)
    }
}

/// Error returned by a provider operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Cancelled,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unsupported,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ProviderErrorKind::Timeout
    }
}

/// Failure to read or write applied state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("state store: {message}")]
pub struct StateError {
    pub message: String,
}

impl StateError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Errors from graph building, planning and execution
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("{node} has prevent_destroy set but the plan would {action} it")]
    PreventDestroy { node: NodeId, action: Action },

    #[error("{action} {node} failed: {source}")]
    Provider {
        node: NodeId,
        action: Action,
        #[source]
        source: ProviderError,
    },

    #[error("refusing destructive changes to {}", join_ids(.nodes))]
    DestructiveRefused { nodes: Vec<NodeId> },

    #[error("run cancelled before {node} started")]
    Cancelled { node: NodeId },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to create worker pool: {0}")]
    Pool(String),

    #[error("confirmation failed: {0}")]
    Confirm(anyhow::Error),
}

impl Error {
    /// Node the error is attributed to, if any
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Error::Provider { node, .. }
            | Error::PreventDestroy { node, .. }
            | Error::Cancelled { node } => Some(node),
            Error::Config(
                ConfigError::DuplicateNode(node)
                | ConfigError::UnknownReference { node, .. }
                | ConfigError::UnknownDependency { node, .. }
                | ConfigError::UnresolvedReference { node, .. }
                | ConfigError::UnknownProvider { node, .. }
                | ConfigError::UnsupportedType { node, .. }
                | ConfigError::Invalid { node, .. },
            ) => Some(node),
            _ => None,
        }
    }

    /// True for provider calls that ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Provider { source, .. } if source.is_timeout())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
