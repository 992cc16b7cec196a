//! # Declarative
//!
//! Desired-state resource graphs and their reconciliation.
//!
//! Declared [`Node`]s reference each other's outputs. The crate turns them
//! into a [`DependencyGraph`], diffs them against the applied state held by
//! a [`StateStore`], and converges the two by calling [`Provider`]s in
//! dependency order.
//!
//! ## Core Concepts
//!
//! - **Node**: a named, typed unit of desired state
//! - **DependencyGraph**: DAG built from references and `depends_on` edges
//! - **ChangeSet**: ordered Create / Update / Replace / Destroy / NoOp entries
//! - **Executor**: applies a change set on a bounded worker pool
//! - **StateStore**: last-known applied state per node
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     DependencyGraph, ExecuteOptions, MemoryStateStore, Node, NodeId, PlanOptions,
//!     ProviderRegistry, execute_simple, plan,
//! };
//!
//! let nodes = vec![Node::new(NodeId::new("null_resource", "a"), Default::default())];
//! let graph = DependencyGraph::build(nodes)?;
//! let store = MemoryStateStore::new();
//! let providers = ProviderRegistry::new().with(my_provider);
//!
//! let changes = plan(&graph, &store, &providers, PlanOptions::default())?;
//! let report = execute_simple(&changes, &graph, &store, &providers, &ExecuteOptions::default())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Callback Traits
//!
//! - [`ProgressCallback`]: receives progress updates from worker threads
//! - [`ConfirmCallback`]: approves destructive changes
//!
//! This allows the crate to be used without hard dependencies on a
//! specific terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod refresh;
mod resolve;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{AttributeChange, DiffSummary, diff_attributes};
pub use error::{
    ConfigError, CycleError, Error, ProviderError, ProviderErrorKind, Result, StateError,
};
pub use executor::{
    ExecuteOptions, ExecuteReport, ExecuteSummary, execute, execute_simple, format_duration,
};
pub use graph::DependencyGraph;
pub use outputs::{OutputDecl, OutputValue, evaluate_outputs, resolved_outputs, validate_outputs};
pub use planner::{
    Action, ChangeEntry, ChangeSet, PlanMode, PlanOptions, PlanSummary, plan,
};
pub use provider::{
    Applied, CancelToken, OperationContext, Provider, ProviderRegistry, ResourceSchema,
};
pub use refresh::{Drift, DriftKind, refresh};
pub use state::{MemoryStateStore, StateStore};
pub use types::{
    AppliedState, Attributes, Deposed, Lifecycle, Node, NodeId, Reference, Segment, Value,
};
