//! Planner - diffs declared nodes against applied state
//!
//! Declared nodes are visited in topological order so every reference can
//! be resolved against what upstream nodes are about to do. The resulting
//! entries, plus a `Destroy` for every stored node that is no longer
//! declared, are ordered by a second graph over actions.

use crate::diff::{AttributeChange, diff_attributes};
use crate::error::{CycleError, Error, Result};
use crate::graph::{DependencyGraph, find_cycles, topological_sort};
use crate::provider::{ProviderRegistry, ResourceSchema};
use crate::refresh::{Drift, DriftKind};
use crate::resolve::{Resolution, resolve_attributes};
use crate::state::StateStore;
use crate::types::{AppliedState, Attributes, Node, NodeId, Reference, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// What the executor will do to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Tear down and recreate; the order depends on the node's lifecycle
    Replace,
    Destroy,
    NoOp,
}

impl Action {
    pub fn is_change(self) -> bool {
        self != Action::NoOp
    }

    /// Marker used in plan listings
    pub fn symbol(self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Destroy => "-",
            Action::NoOp => " ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Destroy => "destroy",
            Action::NoOp => "no-op",
        })
    }
}

/// One planned action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEntry {
    pub node: NodeId,
    pub provider: String,
    pub action: Action,
    pub reason: String,
    /// Replaces or destroys a data-bearing resource
    pub destructive: bool,
    /// For `Replace`: create the new instance before deleting the old one
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub create_before_destroy: bool,
    pub changes: Vec<AttributeChange>,
    /// Entries that must finish before this one starts
    pub after: Vec<NodeId>,
}

/// Entry counts by action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.destroy
    }
}

/// Ordered plan for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    /// Drift observed by a refresh before planning
    pub drift: Vec<Drift>,
}

impl ChangeSet {
    /// Entries that do something, in execution order
    pub fn changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.action.is_change())
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn entry(&self, node: &NodeId) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| &e.node == node)
    }

    pub fn destructive(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.destructive)
    }

    /// `(node, action)` for every entry that does something
    pub fn actions(&self) -> Vec<(NodeId, Action)> {
        self.changes().map(|e| (e.node.clone(), e.action)).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Destroy => summary.destroy += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanMode {
    /// Converge on the declarations
    #[default]
    Apply,
    /// Tear down everything in state
    Destroy,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub mode: PlanMode,
    /// Output of a refresh; forces actions on drifted nodes
    pub drift: Vec<Drift>,
}

/// Compute the change set that converges applied state on `graph`
pub fn plan(
    graph: &DependencyGraph,
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    options: PlanOptions,
) -> Result<ChangeSet> {
    let stored: BTreeMap<NodeId, AppliedState> = store
        .snapshot()
        .into_iter()
        .map(|state| (state.node.clone(), state))
        .collect();
    let mut declared = Vec::new();
    if options.mode == PlanMode::Apply {
        let drift = index_drift(&options.drift);
        let mut planner = Planner {
            stored: &stored,
            providers,
            drift: &drift,
            planned: HashMap::new(),
        };
        for node in graph.topological_order() {
            declared.push(planner.plan_node(node)?);
        }
    }

    let removed: Vec<&AppliedState> = stored
        .values()
        .filter(|state| options.mode == PlanMode::Destroy || !graph.contains(&state.node))
        .collect();
    let mut destroys = Vec::with_capacity(removed.len());
    for state in teardown_order(&removed) {
        destroys.push(plan_destroy(state, graph, providers, options.mode)?);
    }

    let entries = order_entries(destroys, declared, graph, &stored)?;
    let changes = ChangeSet {
        entries,
        drift: options.drift,
    };

    let summary = changes.summary();
    log::debug!(
        "Planned {} create, {} update, {} replace, {} destroy, {} unchanged",
        summary.create,
        summary.update,
        summary.replace,
        summary.destroy,
        summary.unchanged
    );
    Ok(changes)
}

#[derive(Debug, Default)]
struct NodeDrift<'a> {
    gone: bool,
    changed: Vec<(&'a str, &'a Value)>,
}

fn index_drift(drift: &[Drift]) -> HashMap<&NodeId, NodeDrift<'_>> {
    let mut index: HashMap<&NodeId, NodeDrift<'_>> = HashMap::new();
    for d in drift {
        match &d.kind {
            DriftKind::Gone => index.entry(&d.node).or_default().gone = true,
            DriftKind::Changed {
                attribute, actual, ..
            } => index
                .entry(&d.node)
                .or_default()
                .changed
                .push((attribute.as_str(), actual)),
            DriftKind::ReadFailed { .. } => {}
        }
    }
    index
}

struct Planner<'a> {
    stored: &'a BTreeMap<NodeId, AppliedState>,
    providers: &'a ProviderRegistry,
    drift: &'a HashMap<&'a NodeId, NodeDrift<'a>>,
    /// Action and resolved attributes of every node planned so far
    planned: HashMap<NodeId, (Action, Attributes)>,
}

impl Planner<'_> {
    /// Plan-time value of a reference into an upstream node
    fn lookup(&self, reference: &Reference) -> Resolution {
        let stored = self
            .stored
            .get(&reference.node)
            .and_then(|state| state.attribute(&reference.path));

        match self.planned.get(&reference.node) {
            Some((Action::Create | Action::Replace, _)) => Resolution::Unknown,
            Some((Action::Update, declared)) => {
                let declared = reference
                    .path
                    .split_first()
                    .and_then(|(first, rest)| declared.get(first).map(|value| (value, rest)));
                match (declared, stored) {
                    (Some((value, rest)), _) => match value.get_path(rest) {
                        Some(v) => Resolution::Known(v.clone()),
                        None => Resolution::Unknown,
                    },
                    (None, Some(v)) => Resolution::Known(v.clone()),
                    (None, None) => Resolution::Unknown,
                }
            }
            _ => match stored {
                Some(v) => Resolution::Known(v.clone()),
                None => Resolution::Missing(format!(
                    "{} has no attribute '{}'",
                    reference.node,
                    reference.path.join(".")
                )),
            },
        }
    }

    fn plan_node(&mut self, node: &Node) -> Result<ChangeEntry> {
        let provider = self.providers.for_node(node)?;
        let schema = provider.schema(&node.id.resource_type);
        let resolved = resolve_attributes(&node.id, &node.attributes, &|r| self.lookup(r))?;

        let stored = self.stored.get(&node.id);
        let drift = self.drift.get(&node.id);
        let ignore = &node.lifecycle.ignore_changes;

        let (action, reason, changes) = match stored {
            None => (
                Action::Create,
                "not yet applied".to_string(),
                additions(&resolved),
            ),
            Some(_) if drift.is_some_and(|d| d.gone) => (
                Action::Create,
                "resource no longer exists".to_string(),
                additions(&resolved),
            ),
            Some(state) if state.provider != node.provider => (
                Action::Replace,
                format!(
                    "provider changed from {} to {}",
                    state.provider, node.provider
                ),
                diff_attributes(&state.inputs, &resolved, &schema, ignore),
            ),
            Some(state) => {
                let mut changes = diff_attributes(&state.inputs, &resolved, &schema, ignore);
                let declared_changes = changes.len();
                if let Some(drift) = drift {
                    merge_drift(&mut changes, drift, state, &resolved, &schema, ignore);
                }
                let (action, reason) = classify(&changes, declared_changes == 0);
                (action, reason, changes)
            }
        };

        if action == Action::Replace && node.lifecycle.prevent_destroy {
            return Err(Error::PreventDestroy {
                node: node.id.clone(),
                action,
            });
        }

        log::debug!("{}: {} ({})", node.id, action, reason);
        self.planned.insert(node.id.clone(), (action, resolved));

        Ok(ChangeEntry {
            node: node.id.clone(),
            provider: node.provider.clone(),
            action,
            reason,
            destructive: action == Action::Replace && schema.data_bearing,
            create_before_destroy: action == Action::Replace
                && node.lifecycle.create_before_destroy,
            changes,
            after: Vec::new(),
        })
    }
}

fn additions(attributes: &Attributes) -> Vec<AttributeChange> {
    attributes
        .iter()
        .map(|(name, value)| AttributeChange {
            name: name.clone(),
            before: None,
            after: Some(value.clone()),
            forces_replacement: false,
        })
        .collect()
}

/// Add drifted attributes the declared diff did not already cover
fn merge_drift(
    changes: &mut Vec<AttributeChange>,
    drift: &NodeDrift<'_>,
    state: &AppliedState,
    resolved: &Attributes,
    schema: &ResourceSchema,
    ignore: &[String],
) {
    for &(attribute, actual) in &drift.changed {
        if ignore.iter().any(|i| i == attribute) || changes.iter().any(|c| c.name == attribute) {
            continue;
        }
        let wanted = resolved
            .get(attribute)
            .or_else(|| state.outputs.get(attribute))
            .cloned();
        changes.push(AttributeChange {
            name: attribute.to_string(),
            before: Some(actual.clone()),
            after: wanted,
            forces_replacement: schema.is_immutable(attribute),
        });
    }
    changes.sort_by(|a, b| a.name.cmp(&b.name));
}

fn classify(changes: &[AttributeChange], drift_only: bool) -> (Action, String) {
    if changes.is_empty() {
        return (Action::NoOp, "up to date".to_string());
    }

    let forcing: Vec<&str> = changes
        .iter()
        .filter(|c| c.forces_replacement)
        .map(|c| c.name.as_str())
        .collect();
    if !forcing.is_empty() {
        let reason = format!("{} forces replacement", forcing.join(", "));
        return if drift_only {
            (Action::Replace, format!("drift: {reason}"))
        } else {
            (Action::Replace, reason)
        };
    }

    if drift_only {
        (Action::Update, "drift".to_string())
    } else if changes.len() == 1 {
        (Action::Update, format!("{} changed", changes[0].name))
    } else {
        (Action::Update, format!("{} attributes changed", changes.len()))
    }
}

fn plan_destroy(
    state: &AppliedState,
    graph: &DependencyGraph,
    providers: &ProviderRegistry,
    mode: PlanMode,
) -> Result<ChangeEntry> {
    let provider = providers.resolve(&state.node, &state.provider)?;
    let schema = provider.schema(&state.node.resource_type);

    if let Some(node) = graph.node(&state.node)
        && node.lifecycle.prevent_destroy
    {
        return Err(Error::PreventDestroy {
            node: state.node.clone(),
            action: Action::Destroy,
        });
    }

    let reason = match mode {
        PlanMode::Apply => "no longer declared",
        PlanMode::Destroy => "destroy requested",
    };

    Ok(ChangeEntry {
        node: state.node.clone(),
        provider: state.provider.clone(),
        action: Action::Destroy,
        reason: reason.to_string(),
        destructive: schema.data_bearing,
        create_before_destroy: false,
        changes: state
            .inputs
            .iter()
            .map(|(name, value)| AttributeChange {
                name: name.clone(),
                before: Some(value.clone()),
                after: None,
                forces_replacement: false,
            })
            .collect(),
        after: Vec::new(),
    })
}

/// Removed nodes with dependents first, following stored dependencies
fn teardown_order<'a>(removed: &[&'a AppliedState]) -> Vec<&'a AppliedState> {
    let index: HashMap<&NodeId, usize> = removed
        .iter()
        .enumerate()
        .map(|(i, state)| (&state.node, i))
        .collect();

    let mut successors = vec![Vec::new(); removed.len()];
    for (i, state) in removed.iter().enumerate() {
        for dep in &state.dependencies {
            if let Some(&j) = index.get(dep)
                && j != i
            {
                successors[j].push(i);
            }
        }
    }

    let order = topological_sort(&successors, |i| i).unwrap_or_else(|_| {
        log::warn!("Stored dependencies form a cycle; destroying in id order");
        (0..removed.len()).collect()
    });
    order.into_iter().rev().map(|i| removed[i]).collect()
}

/// Sort entries over the action graph
///
/// Base order is destroys first, then declared nodes in topological order.
/// Edges:
/// - declared dependency `d -> n`
/// - a removed node is destroyed before its removed stored dependencies
/// - a removed node is destroyed before its declared dependency is replaced
/// - a declared node that used to depend on a removed node is applied before
///   that node is destroyed
///
/// The replacement edges are dropped if they would introduce a cycle.
fn order_entries(
    destroys: Vec<ChangeEntry>,
    declared: Vec<ChangeEntry>,
    graph: &DependencyGraph,
    stored: &BTreeMap<NodeId, AppliedState>,
) -> Result<Vec<ChangeEntry>> {
    let mut entries: Vec<ChangeEntry> = destroys.into_iter().chain(declared).collect();
    let index: HashMap<NodeId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.node.clone(), i))
        .collect();

    let mut required = BTreeSet::new();
    let mut optional = BTreeSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let stored_deps = stored
            .get(&entry.node)
            .map(|state| state.dependencies.as_slice())
            .unwrap_or_default();

        if entry.action == Action::Destroy {
            for dep in stored_deps {
                let Some(&j) = index.get(dep) else { continue };
                match entries[j].action {
                    Action::Destroy if j != i => {
                        required.insert((i, j));
                    }
                    Action::Replace => {
                        optional.insert((i, j));
                    }
                    _ => {}
                }
            }
        } else {
            for dep in graph.dependencies_of(&entry.node) {
                if let Some(&j) = index.get(dep) {
                    required.insert((j, i));
                }
            }
            for dep in stored_deps {
                if let Some(&j) = index.get(dep)
                    && entries[j].action == Action::Destroy
                {
                    required.insert((i, j));
                }
            }
        }
    }

    let with_optional: BTreeSet<(usize, usize)> = required.union(&optional).copied().collect();
    let (edges, order) = match sort_edges(entries.len(), &with_optional) {
        Ok(order) => (with_optional, order),
        Err(_) => {
            log::debug!("Dropping destroy-before-replace edges to break a cycle");
            match sort_edges(entries.len(), &required) {
                Ok(order) => (required, order),
                Err(remaining) => {
                    let successors = successors(entries.len(), &required);
                    let cycles = find_cycles(&successors, &remaining).into_iter().map(|cycle| {
                        cycle.into_iter().map(|i| entries[i].node.clone()).collect()
                    });
                    return Err(Error::Cycle(CycleError::from_cycles(cycles)));
                }
            }
        }
    };

    for &(from, to) in &edges {
        let node = entries[from].node.clone();
        entries[to].after.push(node);
    }
    for entry in &mut entries {
        entry.after.sort();
    }

    let mut slots: Vec<Option<ChangeEntry>> = entries.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

fn successors(n: usize, edges: &BTreeSet<(usize, usize)>) -> Vec<Vec<usize>> {
    let mut successors = vec![Vec::new(); n];
    for &(from, to) in edges {
        successors[from].push(to);
    }
    successors
}

fn sort_edges(
    n: usize,
    edges: &BTreeSet<(usize, usize)>,
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    topological_sort(&successors(n, edges), |i| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecuteOptions, execute_simple};
    use crate::state::MemoryStateStore;
    use crate::testing::{RecordingProvider, applied};
    use crate::types::{Lifecycle, Reference};
    use std::sync::Arc;

    fn id(name: &str) -> NodeId {
        NodeId::new("null_resource", name)
    }

    fn reference(name: &str, attr: &str) -> Value {
        Value::Ref(Reference::new(id(name), [attr]))
    }

    fn node(name: &str, attrs: &[(&str, Value)]) -> Node {
        Node::new(
            id(name),
            attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    /// net -> cluster -> pool, with `location` immutable on every node
    fn platform(cluster_location: &str) -> Vec<Node> {
        vec![
            node("net", &[("cidr", "10.0.0.0/16".into())]),
            node(
                "cluster",
                &[
                    ("network", reference("net", "self_link")),
                    ("location", cluster_location.into()),
                ],
            ),
            node(
                "pool",
                &[
                    ("cluster", reference("cluster", "self_link")),
                    ("node_count", Value::Int(2)),
                ],
            ),
        ]
    }

    fn registry() -> (Arc<RecordingProvider>, ProviderRegistry) {
        let provider = Arc::new(
            RecordingProvider::new("null")
                .with_schema("null_resource", ResourceSchema::with_immutable(["location"])),
        );
        let registry = ProviderRegistry::new().with(provider.clone());
        (provider, registry)
    }

    fn plan_nodes(
        nodes: Vec<Node>,
        store: &MemoryStateStore,
        registry: &ProviderRegistry,
    ) -> ChangeSet {
        let graph = DependencyGraph::build(nodes).unwrap();
        plan(&graph, store, registry, PlanOptions::default()).unwrap()
    }

    fn apply_nodes(nodes: Vec<Node>, store: &MemoryStateStore, registry: &ProviderRegistry) {
        let graph = DependencyGraph::build(nodes).unwrap();
        let changes = plan(&graph, store, registry, PlanOptions::default()).unwrap();
        let report =
            execute_simple(&changes, &graph, store, registry, &ExecuteOptions::default()).unwrap();
        assert!(report.is_success(), "{:?}", report.failures);
    }

    #[test]
    fn test_first_plan_creates_in_dependency_order() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let changes = plan_nodes(platform("us-central1-a"), &store, &registry);

        assert_eq!(
            changes.actions(),
            vec![
                (id("net"), Action::Create),
                (id("cluster"), Action::Create),
                (id("pool"), Action::Create),
            ]
        );
        assert_eq!(changes.entry(&id("pool")).unwrap().after, vec![id("cluster")]);
        assert_eq!(changes.summary().create, 3);
    }

    #[test]
    fn test_second_plan_is_all_noop() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        apply_nodes(platform("us-central1-a"), &store, &registry);

        let changes = plan_nodes(platform("us-central1-a"), &store, &registry);
        assert_eq!(changes.entries.len(), 3);
        assert!(changes.entries.iter().all(|e| e.action == Action::NoOp));
        assert!(!changes.has_changes());
    }

    #[test]
    fn test_removed_leaf_is_the_only_change() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        apply_nodes(platform("us-central1-a"), &store, &registry);

        let mut nodes = platform("us-central1-a");
        nodes.pop();
        let changes = plan_nodes(nodes, &store, &registry);
        assert_eq!(changes.actions(), vec![(id("pool"), Action::Destroy)]);
        assert_eq!(changes.entry(&id("pool")).unwrap().reason, "no longer declared");
    }

    #[test]
    fn test_immutable_change_replaces_and_dependent_updates() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        apply_nodes(platform("us-central1-a"), &store, &registry);

        let changes = plan_nodes(platform("us-central1-b"), &store, &registry);
        assert_eq!(
            changes.actions(),
            vec![(id("cluster"), Action::Replace), (id("pool"), Action::Update)]
        );

        let cluster = changes.entry(&id("cluster")).unwrap();
        assert_eq!(cluster.reason, "location forces replacement");
        assert!(!cluster.destructive);

        let pool = changes.entry(&id("pool")).unwrap();
        assert_eq!(pool.changes.len(), 1);
        assert_eq!(pool.changes[0].after, Some(Value::Unknown));
    }

    #[test]
    fn test_mutable_change_updates_and_propagates_declared_value() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let nodes = |size: i64| {
            vec![
                node("disk", &[("size_gb", Value::Int(size))]),
                node("quota", &[("limit", reference("disk", "size_gb"))]),
            ]
        };
        apply_nodes(nodes(100), &store, &registry);

        let changes = plan_nodes(nodes(200), &store, &registry);
        assert_eq!(
            changes.actions(),
            vec![(id("disk"), Action::Update), (id("quota"), Action::Update)]
        );
        let quota = changes.entry(&id("quota")).unwrap();
        assert_eq!(quota.changes[0].after, Some(Value::Int(200)));
    }

    #[test]
    fn test_destroy_is_reverse_of_create_for_chain() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let chain = || {
            vec![
                node("a", &[]),
                node("b", &[("up", reference("a", "id"))]),
                node("c", &[("up", reference("b", "id"))]),
            ]
        };
        let created: Vec<NodeId> = plan_nodes(chain(), &store, &registry)
            .actions()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        apply_nodes(chain(), &store, &registry);

        let graph = DependencyGraph::build(chain()).unwrap();
        let options = PlanOptions {
            mode: PlanMode::Destroy,
            ..Default::default()
        };
        let destroyed: Vec<NodeId> = plan(&graph, &store, &registry, options)
            .unwrap()
            .actions()
            .into_iter()
            .map(|(n, action)| {
                assert_eq!(action, Action::Destroy);
                n
            })
            .collect();

        let mut reversed = created;
        reversed.reverse();
        assert_eq!(destroyed, reversed);
    }

    #[test]
    fn test_removed_node_destroyed_after_dependent_moves_away() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        apply_nodes(
            vec![
                node("old", &[]),
                node("app", &[("backend", reference("old", "id"))]),
            ],
            &store,
            &registry,
        );

        let changes = plan_nodes(
            vec![node("new", &[]), node("app", &[("backend", reference("new", "id"))])],
            &store,
            &registry,
        );
        let order: Vec<NodeId> = changes.actions().into_iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec![id("new"), id("app"), id("old")]);
        assert_eq!(changes.entry(&id("old")).unwrap().after, vec![id("app")]);
    }

    #[test]
    fn test_every_edge_respected_in_plan_order() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let nodes = vec![
            node("d", &[("x", reference("b", "id")), ("y", reference("c", "id"))]),
            node("c", &[("x", reference("a", "id"))]),
            node("b", &[("x", reference("a", "id"))]),
            node("a", &[]),
        ];
        let graph = DependencyGraph::build(nodes).unwrap();
        let changes = plan(&graph, &store, &registry, PlanOptions::default()).unwrap();
        let position = |n: &NodeId| changes.entries.iter().position(|e| &e.node == n).unwrap();
        for (from, to) in graph.edges() {
            assert!(position(from) < position(to), "{from} must precede {to}");
        }
    }

    #[test]
    fn test_prevent_destroy_blocks_replace_and_destroy() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let guarded = |location: &str| {
            node("db", &[("location", location.into())]).with_lifecycle(Lifecycle {
                prevent_destroy: true,
                ..Default::default()
            })
        };
        apply_nodes(vec![guarded("a")], &store, &registry);

        let graph = DependencyGraph::build(vec![guarded("b")]).unwrap();
        let err = plan(&graph, &store, &registry, PlanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PreventDestroy { action: Action::Replace, .. }));

        let graph = DependencyGraph::build(vec![guarded("a")]).unwrap();
        let options = PlanOptions {
            mode: PlanMode::Destroy,
            ..Default::default()
        };
        let err = plan(&graph, &store, &registry, options).unwrap_err();
        assert!(matches!(err, Error::PreventDestroy { action: Action::Destroy, .. }));
    }

    #[test]
    fn test_data_bearing_replace_is_destructive() {
        let provider = Arc::new(RecordingProvider::new("null").with_schema(
            "null_resource",
            ResourceSchema::with_immutable(["tier"]).data_bearing(),
        ));
        let registry = ProviderRegistry::new().with(provider);
        let store = MemoryStateStore::new();
        apply_nodes(vec![node("db", &[("tier", "small".into())])], &store, &registry);

        let changes = plan_nodes(vec![node("db", &[("tier", "large".into())])], &store, &registry);
        let flagged: Vec<_> = changes.destructive().map(|e| e.node.clone()).collect();
        assert_eq!(flagged, vec![id("db")]);
    }

    #[test]
    fn test_ignore_changes_suppresses_update() {
        let (_, registry) = registry();
        let store = MemoryStateStore::new();
        let pool = |count: i64| {
            node("pool", &[("node_count", Value::Int(count))]).with_lifecycle(Lifecycle {
                ignore_changes: vec!["node_count".into()],
                ..Default::default()
            })
        };
        apply_nodes(vec![pool(1)], &store, &registry);
        let changes = plan_nodes(vec![pool(4)], &store, &registry);
        assert!(!changes.has_changes());
    }

    #[test]
    fn test_drift_forces_actions() {
        let (_, registry) = registry();
        let store = MemoryStateStore::from_states([
            applied("gone", &[]),
            applied("moved", &[("location", "a".into())]),
            applied("resized", &[("size", Value::Int(1))]),
        ]);
        let nodes = vec![
            node("gone", &[]),
            node("moved", &[("location", "a".into())]),
            node("resized", &[("size", Value::Int(1))]),
        ];
        let drift = vec![
            Drift {
                node: id("gone"),
                kind: DriftKind::Gone,
            },
            Drift {
                node: id("moved"),
                kind: DriftKind::Changed {
                    attribute: "location".into(),
                    stored: "a".into(),
                    actual: "b".into(),
                },
            },
            Drift {
                node: id("resized"),
                kind: DriftKind::Changed {
                    attribute: "size".into(),
                    stored: Value::Int(1),
                    actual: Value::Int(3),
                },
            },
        ];

        let graph = DependencyGraph::build(nodes).unwrap();
        let options = PlanOptions {
            drift,
            ..Default::default()
        };
        let changes = plan(&graph, &store, &registry, options).unwrap();
        assert_eq!(changes.entry(&id("gone")).unwrap().action, Action::Create);
        assert_eq!(changes.entry(&id("moved")).unwrap().action, Action::Replace);
        let resized = changes.entry(&id("resized")).unwrap();
        assert_eq!(resized.action, Action::Update);
        assert_eq!(resized.reason, "drift");
        assert_eq!(changes.drift.len(), 3);
    }

    #[test]
    fn test_unregistered_provider_fails_planning() {
        let store = MemoryStateStore::new();
        let graph = DependencyGraph::build(vec![node("a", &[])]).unwrap();
        let err = plan(&graph, &store, &ProviderRegistry::new(), PlanOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("no provider named 'null'"));
    }

    #[test]
    fn test_action_display_and_symbols() {
        assert_eq!(Action::NoOp.to_string(), "no-op");
        assert_eq!(Action::Replace.symbol(), "-/+");
        assert_eq!(
            serde_json::to_string(&Action::NoOp).unwrap(),
            "\"no_op\""
        );
    }
}
