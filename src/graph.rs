//! # Graph Reduction
//!
//! Turns a possibly cyclic delegation graph into a DAG and picks its sinks.
//!
//! ```text
//!   A ──► B ──► D            A ──► B ──► D
//!   │                  ==>   │
//!   └───► C ◄─┐              └───► C          terminals: {C, D}
//!         └───┘
//! ```
//!
//! Each strongly connected component collapses into one node. The label kept
//! for a component is its smallest member; callers must not rely on which
//! member stands for a cycle. Tarjan's algorithm comes from `petgraph`,
//! whose implementation is iterative, so deep graphs cannot overflow the
//! stack.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

/// Adjacency sets; every node appears as a key, sinks with an empty set
pub type Graph = BTreeMap<String, BTreeSet<String>>;

/// Build a graph from directed edges
pub fn graph_from_edges<I, S>(edges: I) -> Graph
where
    I: IntoIterator<Item = (S, S)>,
    S: Into<String>,
{
    let mut graph = Graph::new();
    for (from, to) in edges {
        let to = to.into();
        graph.entry(to.clone()).or_default();
        graph.entry(from.into()).or_default().insert(to);
    }
    graph
}

/// Collapse every cycle into a single node
pub fn acyclic(graph: &Graph) -> Graph {
    let mut digraph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (from, targets) in graph {
        digraph.add_node(from.as_str());
        for to in targets {
            digraph.add_edge(from.as_str(), to.as_str(), ());
        }
    }

    let mut representative: HashMap<&str, &str> = HashMap::new();
    for component in tarjan_scc(&digraph) {
        if let Some(label) = component.iter().min().copied() {
            for node in component {
                representative.insert(node, label);
            }
        }
    }
    let rep = |node: &str| -> String {
        representative.get(node).copied().unwrap_or(node).to_string()
    };

    let mut reduced = Graph::new();
    for (from, targets) in graph {
        let from = rep(from);
        let outgoing = reduced.entry(from.clone()).or_default();
        for to in targets {
            let to = rep(to);
            if to != from {
                outgoing.insert(to);
            }
        }
    }
    // Targets that never appear as sources are still nodes
    let sinks: Vec<String> = reduced.values().flatten().cloned().collect();
    for sink in sinks {
        reduced.entry(sink).or_default();
    }
    reduced
}

/// Nodes without outgoing edges once cycles are collapsed
pub fn terminal_nodes(graph: &Graph) -> BTreeSet<String> {
    acyclic(graph)
        .into_iter()
        .filter(|(_, targets)| targets.is_empty())
        .map(|(node, _)| node)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
