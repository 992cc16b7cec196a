//! Provider interface
//!
//! A provider adapts one external system (cloud API, cluster API server,
//! chart installer) to the create/update/delete/read protocol. Providers are
//! registered by name and nodes are dispatched by their provider tag.

use crate::error::{ConfigError, ProviderError};
use crate::graph::DependencyGraph;
use crate::types::{Attributes, Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Per-type behaviour the planner needs from a provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Top-level attributes that cannot change in place
    pub immutable: BTreeSet<String>,
    /// Every attribute outside `updatable` forces replacement
    pub replace_by_default: bool,
    /// Attributes that change in place when `replace_by_default` is set
    pub updatable: BTreeSet<String>,
    /// Replacing or destroying this type loses data
    pub data_bearing: bool,
}

impl ResourceSchema {
    pub fn with_immutable<'a>(attributes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            immutable: attributes.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    /// Schema for types whose only in-place changes are `attributes`
    ///
    /// An empty list means the type has no update at all.
    pub fn only_updatable<'a>(attributes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            replace_by_default: true,
            updatable: attributes.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn data_bearing(mut self) -> Self {
        self.data_bearing = true;
        self
    }

    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.contains(attribute)
            || (self.replace_by_default && !self.updatable.contains(attribute))
    }
}

/// What a successful create or update returns
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Identifier of the external resource, used for update/delete/read
    pub id: String,
    pub outputs: Attributes,
}

/// Shared cancellation flag
///
/// A child token is cancelled with its parent, but cancelling the child
/// leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}

/// Context handed to every provider call
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub node: NodeId,
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            cancel: CancelToken::new(),
            deadline: None,
        }
    }

    /// Tie this call to a run-wide token
    pub fn with_cancel(mut self, run: &CancelToken) -> Self {
        self.cancel = run.child();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the call was cancelled or ran past its deadline
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::cancelled(format!(
                "operation on {} was cancelled",
                self.node
            )));
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(ProviderError::timeout(format!(
                "operation on {} exceeded its deadline",
                self.node
            )));
        }
        Ok(())
    }
}

/// Capability interface implemented once per external system
pub trait Provider: Send + Sync + fmt::Debug {
    /// Name nodes use to select this provider
    fn name(&self) -> &str;

    /// Whether this provider manages the given resource type
    fn supports(&self, _resource_type: &str) -> bool {
        true
    }

    fn schema(&self, _resource_type: &str) -> ResourceSchema {
        ResourceSchema::default()
    }

    fn create(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError>;

    fn update(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError>;

    fn delete(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<(), ProviderError>;

    /// Observe the actual attributes; `None` if the resource no longer exists
    fn read(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Attributes>, ProviderError>;
}

/// Providers by name
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one with the same name
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Provider responsible for `node`, checked against its type
    pub fn resolve(
        &self,
        node: &NodeId,
        provider: &str,
    ) -> Result<Arc<dyn Provider>, ConfigError> {
        let found = self.get(provider).ok_or_else(|| ConfigError::UnknownProvider {
            node: node.clone(),
            provider: provider.to_string(),
        })?;
        if !found.supports(&node.resource_type) {
            return Err(ConfigError::UnsupportedType {
                node: node.clone(),
                provider: provider.to_string(),
            });
        }
        Ok(found)
    }

    pub fn for_node(&self, node: &Node) -> Result<Arc<dyn Provider>, ConfigError> {
        self.resolve(&node.id, &node.provider)
    }

    /// Schema for a type, or the permissive default if the provider is unknown
    pub fn schema(&self, provider: &str, resource_type: &str) -> ResourceSchema {
        self.get(provider)
            .map(|p| p.schema(resource_type))
            .unwrap_or_default()
    }

    /// Check every declared node has a provider that accepts its type
    pub fn validate(&self, graph: &DependencyGraph) -> Result<(), ConfigError> {
        for node in graph.nodes() {
            self.for_node(node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProvider;
    use crate::types::Node;

    #[test]
    fn test_context_check_reports_cancel_and_deadline() {
        let ctx = OperationContext::new(NodeId::new("null_resource", "a"));
        assert!(ctx.check().is_ok());

        let expired = ctx.clone().with_timeout(Some(Duration::ZERO));
        assert!(expired.check().unwrap_err().is_timeout());

        ctx.cancel.cancel();
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind, crate::error::ProviderErrorKind::Cancelled);
    }

    #[test]
    fn test_child_token_follows_run_but_not_back() {
        let run = CancelToken::new();
        let ctx = OperationContext::new(NodeId::new("null_resource", "a")).with_cancel(&run);

        ctx.cancel.cancel();
        assert!(!run.is_cancelled());

        let other = OperationContext::new(NodeId::new("null_resource", "b")).with_cancel(&run);
        assert!(other.check().is_ok());
        run.cancel();
        assert_eq!(
            other.check().unwrap_err().kind,
            crate::error::ProviderErrorKind::Cancelled
        );
    }

    #[test]
    fn test_registry_dispatch_by_provider_tag() {
        let registry = ProviderRegistry::new().with(Arc::new(RecordingProvider::new("null")));
        let node = Node::new(NodeId::new("null_resource", "a"), Attributes::new());
        assert_eq!(registry.for_node(&node).unwrap().name(), "null");

        let other = Node::new(NodeId::new("gcp_compute_network", "vpc"), Attributes::new());
        assert!(matches!(
            registry.for_node(&other),
            Err(ConfigError::UnknownProvider { provider, .. }) if provider == "gcp"
        ));
    }

    #[test]
    fn test_schema_helpers() {
        let schema = ResourceSchema::with_immutable(["location", "name"]).data_bearing();
        assert!(schema.is_immutable("name"));
        assert!(!schema.is_immutable("node_count"));
        assert!(schema.data_bearing);

        let fixed = ResourceSchema::only_updatable(["data"]);
        assert!(fixed.is_immutable("labels"));
        assert!(!fixed.is_immutable("data"));
        assert!(ResourceSchema::only_updatable([]).is_immutable("source_ranges"));
    }
}
