//! Dependency graph builder
//!
//! Nodes live in an arena indexed by declaration order. Edges point from a
//! dependency to its dependents and are derived from attribute references
//! plus explicit `depends_on`. The graph is rebuilt from declarations on
//! every run; nothing holds back-pointers into it.

use crate::error::{ConfigError, CycleError, Error, Result};
use crate::types::{Node, NodeId};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fmt::Write as _;

/// Acyclic graph of declared nodes with a deterministic apply order
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// `dependencies[i]`: nodes that must be applied before `i`
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes that wait for `i`
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicates, dangling references and cycles
    pub fn build(nodes: Vec<Node>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateNode(node.id.clone()).into());
            }
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            let mut deps = BTreeSet::new();
            for target in node.references() {
                let Some(&j) = index.get(&target) else {
                    return Err(ConfigError::UnknownReference {
                        node: node.id.clone(),
                        target,
                    }
                    .into());
                };
                deps.insert(j);
            }
            for target in &node.depends_on {
                let Some(&j) = index.get(target) else {
                    return Err(ConfigError::UnknownDependency {
                        node: node.id.clone(),
                        target: target.clone(),
                    }
                    .into());
                };
                deps.insert(j);
            }
            for j in deps {
                dependencies[i].push(j);
                dependents[j].push(i);
            }
        }

        let order = match topological_sort(&dependents, |i| i) {
            Ok(order) => order,
            Err(remaining) => {
                let cycles = find_cycles(&dependents, &remaining)
                    .into_iter()
                    .map(|cycle| cycle.into_iter().map(|i| nodes[i].id.clone()).collect());
                return Err(Error::Cycle(CycleError::from_cycles(cycles)));
            }
        };

        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            nodes.len(),
            dependencies.iter().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            nodes,
            index,
            dependencies,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in apply order; ties keep declaration order
    pub fn topological_order(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbours(id, &self.dependencies)
    }

    /// Direct dependents of a node
    pub fn dependents_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.neighbours(id, &self.dependents)
    }

    /// Every node reachable through dependent edges
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &j in &self.dependents[i] {
                if seen.insert(self.nodes[j].id.clone()) {
                    stack.push(j);
                }
            }
        }
        seen
    }

    /// All edges as `(dependency, dependent)` pairs
    pub fn edges(&self) -> Vec<(&NodeId, &NodeId)> {
        self.dependents
            .iter()
            .enumerate()
            .flat_map(|(i, targets)| {
                targets
                    .iter()
                    .map(move |&j| (&self.nodes[i].id, &self.nodes[j].id))
            })
            .collect()
    }

    /// Render the graph in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n  rankdir = LR;\n");
        for &i in &self.order {
            let _ = writeln!(out, "  \"{}\";", self.nodes[i].id);
        }
        for (from, to) in self.edges() {
            let _ = writeln!(out, "  \"{from}\" -> \"{to}\";");
        }
        out.push_str("}\n");
        out
    }

    fn neighbours(&self, id: &NodeId, adjacency: &[Vec<usize>]) -> Vec<&NodeId> {
        self.index
            .get(id)
            .map(|&i| adjacency[i].iter().map(|&j| &self.nodes[j].id).collect())
            .unwrap_or_default()
    }
}

/// Kahn's algorithm over `successors`; among ready vertices the one with the
/// smallest `priority` goes first
///
/// On a cycle, returns the vertices that could not be ordered.
pub(crate) fn topological_sort<K: Ord>(
    successors: &[Vec<usize>],
    priority: impl Fn(usize) -> K,
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let n = successors.len();
    let mut in_degree = vec![0usize; n];
    for targets in successors {
        for &j in targets {
            in_degree[j] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<(K, usize)>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(|i| Reverse((priority(i), i)))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse((priority(j), j)));
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Every cycle among `candidates`, each sorted by index, ordered by first member
///
/// Uses Tarjan's strongly-connected components; a component counts as a
/// cycle when it has more than one member or a self edge.
pub(crate) fn find_cycles(successors: &[Vec<usize>], candidates: &[usize]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        successors: &'a [Vec<usize>],
        allowed: Vec<bool>,
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next);
            self.low[v] = self.next;
            self.next += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for k in 0..self.successors[v].len() {
                let w = self.successors[v][k];
                if !self.allowed[w] {
                    continue;
                }
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.low[v] = self.low[v].min(self.low[w]);
                    }
                    Some(iw) if self.on_stack[w] => self.low[v] = self.low[v].min(iw),
                    Some(_) => {}
                }
            }

            if Some(self.low[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let n = successors.len();
    let mut allowed = vec![false; n];
    for &c in candidates {
        allowed[c] = true;
    }
    let mut tarjan = Tarjan {
        successors,
        allowed,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for &c in candidates {
        if tarjan.index[c].is_none() {
            tarjan.visit(c);
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|component| {
            component.len() > 1 || successors[component[0]].contains(&component[0])
        })
        .map(|mut component| {
            component.sort_unstable();
            component
        })
        .collect();
    cycles.sort_unstable_by_key(|component| component[0]);
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, Reference, Value};

    fn id(name: &str) -> NodeId {
        NodeId::new("null_resource", name)
    }

    fn node(name: &str, refs: &[&str]) -> Node {
        let attributes: Attributes = refs
            .iter()
            .map(|r| (format!("from_{r}"), Value::Ref(Reference::new(id(r), ["id"]))))
            .collect();
        Node::new(id(name), attributes)
    }

    fn order(graph: &DependencyGraph) -> Vec<String> {
        graph
            .topological_order()
            .map(|n| n.id.name.clone())
            .collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let graph = DependencyGraph::build(vec![
            node("pool", &["cluster"]),
            node("cluster", &["net"]),
            node("net", &[]),
        ])
        .unwrap();
        assert_eq!(order(&graph), vec!["net", "cluster", "pool"]);
        assert_eq!(graph.dependencies_of(&id("cluster")), vec![&id("net")]);
        assert_eq!(graph.dependents_of(&id("cluster")), vec![&id("pool")]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = DependencyGraph::build(vec![
            node("c", &[]),
            node("a", &[]),
            node("b", &["c"]),
            node("d", &[]),
        ])
        .unwrap();
        assert_eq!(order(&graph), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_order_respects_every_edge() {
        let graph = DependencyGraph::build(vec![
            node("ingress", &["frontend", "api"]),
            node("frontend", &["api"]),
            node("api", &["db", "cluster"]),
            node("db", &["net"]),
            node("cluster", &["net"]),
            node("net", &[]),
        ])
        .unwrap();
        let order = order(&graph);
        for (from, to) in graph.edges() {
            let a = order.iter().position(|n| *n == from.name).unwrap();
            let b = order.iter().position(|n| *n == to.name).unwrap();
            assert!(a < b, "{from} must come before {to}");
        }
    }

    #[test]
    fn test_explicit_depends_on_adds_edge() {
        let graph = DependencyGraph::build(vec![
            Node::new(id("cluster"), Attributes::new()).with_depends_on([id("api_enable")]),
            Node::new(id("api_enable"), Attributes::new()),
        ])
        .unwrap();
        assert_eq!(order(&graph), vec!["api_enable", "cluster"]);
    }

    #[test]
    fn test_cycle_names_every_member() {
        let err = DependencyGraph::build(vec![
            node("root", &[]),
            node("a", &["c", "root"]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("downstream", &["c"]),
        ])
        .unwrap_err();
        match err {
            Error::Cycle(cycle) => {
                let names: Vec<_> = cycle.members.iter().map(|m| m.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_every_independent_cycle_is_reported() {
        let err = DependencyGraph::build(vec![
            node("a", &["b"]),
            node("b", &["a"]),
            node("ok", &[]),
            node("x", &["y", "ok"]),
            node("y", &["x"]),
        ])
        .unwrap_err();
        let cycle = match err {
            Error::Cycle(cycle) => cycle,
            other => panic!("expected cycle, got {other}"),
        };
        assert_eq!(cycle.members, vec![id("a"), id("b")]);
        assert_eq!(cycle.others, vec![vec![id("x"), id("y")]]);
        assert_eq!(
            cycle.to_string(),
            "dependency cycle between null_resource.a, null_resource.b; \
             also between null_resource.x, null_resource.y"
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = DependencyGraph::build(vec![node("a", &["a"])]).unwrap_err();
        assert!(matches!(err, Error::Cycle(c) if c.members == vec![id("a")]));
    }

    #[test]
    fn test_unknown_reference_is_config_error() {
        let err = DependencyGraph::build(vec![node("a", &["ghost"])]).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownReference { target, .. }) if target == id("ghost")
        ));
    }

    #[test]
    fn test_duplicate_node_is_config_error() {
        let err = DependencyGraph::build(vec![node("a", &[]), node("a", &[])]).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::DuplicateNode(_))));
    }

    #[test]
    fn test_transitive_dependents_and_dot() {
        let graph = DependencyGraph::build(vec![
            node("net", &[]),
            node("cluster", &["net"]),
            node("pool", &["cluster"]),
            node("bucket", &[]),
        ])
        .unwrap();
        let downstream = graph.transitive_dependents(&id("net"));
        assert_eq!(downstream.len(), 2);
        assert!(downstream.contains(&id("pool")));

        let dot = graph.to_dot();
        assert!(dot.contains("\"null_resource.net\" -> \"null_resource.cluster\";"));
        assert!(dot.contains("\"null_resource.bucket\";"));
    }
}
