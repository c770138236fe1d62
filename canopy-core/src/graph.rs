//! Tree-shaped knowledge graph construction
//!
//! Turns a list of canonical relation edges into a deduplicated node set
//! with computed levels and importance scores:
//! - Node identity is the raw label string, case-sensitive.
//! - The root is the first label that never appears as a relation target;
//!   when every label is a target (cycles), the first created node stands in.
//! - A node's level is raised to the deepest encounter along forward edges
//!   from the root. Traversal runs on an explicit worklist with a visited
//!   set, so cyclic or diamond-shaped input stays O(V+E): each node is
//!   expanded once, and its level can be raised once per push.
//! - Importance is the node's total degree over the full edge list.
//! - An optional node budget keeps the highest-value nodes and drops edges
//!   left dangling by the cut.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::MasteryConfig;
use crate::mastery::{self, MasteryState};
use crate::relation::RelationEdge;
use crate::snippet::extract_snippet;

/// A concept node with mastery tracking. `id` equals `label`; two edges
/// naming the same string denote the same node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub level: i32,
    pub value: i32,
    pub mastered: bool,
    pub mastery_score: f64,
    pub consecutive_correct: i32,
    pub content_snippet: String,
}

impl Node {
    pub fn new(label: impl Into<String>, content_snippet: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: label.clone(),
            label,
            level: 0,
            value: 1,
            mastered: false,
            mastery_score: 0.0,
            consecutive_correct: 0,
            content_snippet: content_snippet.into(),
        }
    }
}

/// A directed graph edge in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<GraphEdge>,
    pub root: Option<String>,
}

impl KnowledgeGraph {
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            root: None,
        }
    }

    pub fn node(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label == label)
    }
}

/// Build a knowledge graph from relation edges.
///
/// `prior` maps labels to mastery state from an earlier build of the same
/// topology; surviving nodes pick their state up verbatim. `max_nodes` of 0
/// means unlimited.
pub fn build_graph(
    edges: &[RelationEdge],
    prior: &HashMap<String, MasteryState>,
    source_text: &str,
    max_nodes: usize,
    mastery_config: &MasteryConfig,
) -> KnowledgeGraph {
    if edges.is_empty() {
        return KnowledgeGraph::empty();
    }

    // Distinct labels in first-appearance order; that order is the
    // deterministic tie-break for root selection and budget pruning.
    let mut order: Vec<String> = Vec::new();
    let mut nodes: HashMap<String, Node> = HashMap::new();
    for edge in edges {
        for label in [&edge.source, &edge.target] {
            if !nodes.contains_key(label) {
                let mut node = Node::new(label.clone(), extract_snippet(source_text, label));
                if mastery_config.seed_from_extraction && edge.highlighted {
                    node.mastered = true;
                }
                order.push(label.clone());
                nodes.insert(label.clone(), node);
            }
        }
    }

    let graph_edges: Vec<GraphEdge> = edges
        .iter()
        .map(|e| GraphEdge {
            from: e.source.clone(),
            to: e.target.clone(),
            label: e.relation.clone(),
        })
        .collect();

    let root = select_root(&order, edges);
    if let Some(root) = &root {
        assign_levels(&mut nodes, &graph_edges, root);
    }

    for label in &order {
        let degree = graph_edges
            .iter()
            .filter(|e| &e.from == label || &e.to == label)
            .count() as i32;
        if let Some(node) = nodes.get_mut(label) {
            node.value = degree.max(1);
        }
    }

    let (mut kept, kept_edges, root) = enforce_budget(order, nodes, graph_edges, root, max_nodes);

    for node in &mut kept {
        mastery::merge(node, prior.get(&node.label));
    }

    KnowledgeGraph {
        nodes: kept,
        edges: kept_edges,
        root,
    }
}

/// First label that never appears as a target; falls back to the first
/// created node so cyclic input still gets a deterministic root.
fn select_root(order: &[String], edges: &[RelationEdge]) -> Option<String> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    order
        .iter()
        .find(|label| !targets.contains(label.as_str()))
        .or_else(|| order.first())
        .cloned()
}

/// Depth-first level assignment from the root over forward edges. Levels are
/// raised (`max`) on every encounter; expansion happens once per node.
fn assign_levels(nodes: &mut HashMap<String, Node>, edges: &[GraphEdge], root: &str) {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        children.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(String, i32)> = vec![(root.to_string(), 0)];
    while let Some((label, depth)) = stack.pop() {
        if let Some(node) = nodes.get_mut(&label) {
            node.level = node.level.max(depth);
        }
        if !visited.insert(label.clone()) {
            continue;
        }
        if let Some(next) = children.get(label.as_str()) {
            for child in next {
                stack.push((child.to_string(), depth + 1));
            }
        }
    }
}

/// Apply the node budget: keep the `max_nodes` highest-value nodes (stable
/// on first appearance for ties) and drop edges with a pruned endpoint.
fn enforce_budget(
    order: Vec<String>,
    mut nodes: HashMap<String, Node>,
    edges: Vec<GraphEdge>,
    root: Option<String>,
    max_nodes: usize,
) -> (Vec<Node>, Vec<GraphEdge>, Option<String>) {
    let mut kept: Vec<Node> = order
        .iter()
        .filter_map(|label| nodes.remove(label))
        .collect();

    if max_nodes == 0 || kept.len() <= max_nodes {
        return (kept, edges, root);
    }

    kept.sort_by(|a, b| b.value.cmp(&a.value));
    kept.truncate(max_nodes);
    tracing::info!(
        kept = kept.len(),
        budget = max_nodes,
        "Pruned graph to node budget"
    );

    let surviving: HashSet<&str> = kept.iter().map(|n| n.label.as_str()).collect();
    let edges: Vec<GraphEdge> = edges
        .into_iter()
        .filter(|e| surviving.contains(e.from.as_str()) && surviving.contains(e.to.as_str()))
        .collect();

    let root = match root {
        Some(r) if surviving.contains(r.as_str()) => Some(r),
        _ => kept.first().map(|n| n.label.clone()),
    };

    (kept, edges, root)
}

/// View-level node filtering: drop the named labels and any edge touching
/// them, without mutating stored data.
pub fn filter_ignored(graph: &KnowledgeGraph, ignored: &[String]) -> KnowledgeGraph {
    let ignored: HashSet<&str> = ignored.iter().map(String::as_str).collect();
    let nodes: Vec<Node> = graph
        .nodes
        .iter()
        .filter(|n| !ignored.contains(n.label.as_str()))
        .cloned()
        .collect();
    let surviving: HashSet<&str> = nodes.iter().map(|n| n.label.as_str()).collect();
    let edges: Vec<GraphEdge> = graph
        .edges
        .iter()
        .filter(|e| surviving.contains(e.from.as_str()) && surviving.contains(e.to.as_str()))
        .cloned()
        .collect();
    let root = nodes
        .iter()
        .find(|n| n.level == 0)
        .or_else(|| nodes.first())
        .map(|n| n.label.clone());
    KnowledgeGraph { nodes, edges, root }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RelationEdge;

    fn edge(source: &str, target: &str) -> RelationEdge {
        RelationEdge::new(source, "contains", target)
    }

    fn build(edges: &[RelationEdge], max_nodes: usize) -> KnowledgeGraph {
        build_graph(
            edges,
            &HashMap::new(),
            "",
            max_nodes,
            &MasteryConfig::default(),
        )
    }

    #[test]
    fn test_two_child_fan_out() {
        let graph = build(&[edge("A", "B"), edge("A", "C")], 0);
        assert_eq!(graph.root.as_deref(), Some("A"));
        assert_eq!(graph.node("A").unwrap().level, 0);
        assert_eq!(graph.node("B").unwrap().level, 1);
        assert_eq!(graph.node("C").unwrap().level, 1);
        assert_eq!(graph.node("A").unwrap().value, 2);
        assert_eq!(graph.node("B").unwrap().value, 1);
        assert_eq!(graph.node("C").unwrap().value, 1);
    }

    #[test]
    fn test_every_edge_endpoint_becomes_a_node() {
        let graph = build(&[edge("A", "B"), edge("C", "D"), edge("B", "C")], 0);
        for e in &graph.edges {
            assert!(graph.node(&e.from).is_some(), "missing node {}", e.from);
            assert!(graph.node(&e.to).is_some(), "missing node {}", e.to);
        }
        assert_eq!(graph.nodes.len(), 4);
    }

    #[test]
    fn test_single_indegree_zero_node_is_root() {
        let graph = build(&[edge("B", "C"), edge("A", "B"), edge("C", "D")], 0);
        assert_eq!(graph.root.as_deref(), Some("A"));
    }

    #[test]
    fn test_cycle_falls_back_to_first_created_node() {
        let graph = build(&[edge("A", "B"), edge("B", "A")], 0);
        assert_eq!(graph.root.as_deref(), Some("A"));
        // Bounded traversal despite the cycle; B still gets a level.
        assert_eq!(graph.node("B").unwrap().level, 1);
    }

    #[test]
    fn test_level_is_max_over_paths() {
        // A -> B -> C and A -> C: C is reachable at depth 1 and depth 2.
        let graph = build(&[edge("A", "C"), edge("A", "B"), edge("B", "C")], 0);
        assert_eq!(graph.node("C").unwrap().level, 2);
    }

    #[test]
    fn test_disconnected_component_keeps_level_zero() {
        let graph = build(&[edge("A", "B"), edge("X", "Y")], 0);
        assert_eq!(graph.root.as_deref(), Some("A"));
        // Unreachable from the root: levels stay at their default.
        assert_eq!(graph.node("X").unwrap().level, 0);
        assert_eq!(graph.node("Y").unwrap().level, 0);
    }

    #[test]
    fn test_empty_edge_list_builds_empty_graph() {
        let graph = build(&[], 0);
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
        assert_eq!(graph.root, None);
    }

    #[test]
    fn test_self_loop_is_a_single_node() {
        let graph = build(&[edge("A", "A")], 0);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.node("A").unwrap().value, 2);
    }

    #[test]
    fn test_budget_keeps_highest_value_node_and_drops_edges() {
        let graph = build(&[edge("A", "B"), edge("A", "C")], 1);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].label, "A");
        assert!(graph.edges.is_empty());
        assert_eq!(graph.root.as_deref(), Some("A"));
    }

    #[test]
    fn test_budget_tie_break_is_first_appearance() {
        // B and C tie on value; B appeared first.
        let graph = build(&[edge("A", "B"), edge("A", "C")], 2);
        let labels: Vec<&str> = graph.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B"]);
    }

    #[test]
    fn test_zero_budget_means_unlimited() {
        let graph = build(&[edge("A", "B"), edge("A", "C"), edge("C", "D")], 0);
        assert_eq!(graph.nodes.len(), 4);
    }

    #[test]
    fn test_prior_mastery_survives_rebuild() {
        let mut prior = HashMap::new();
        prior.insert(
            "B".to_string(),
            MasteryState {
                mastered: true,
                mastery_score: 6.5,
                consecutive_correct: 2,
            },
        );
        let graph = build_graph(
            &[edge("A", "B")],
            &prior,
            "",
            0,
            &MasteryConfig::default(),
        );
        let b = graph.node("B").unwrap();
        assert!(b.mastered);
        assert_eq!(b.mastery_score, 6.5);
        assert_eq!(b.consecutive_correct, 2);
        assert!(!graph.node("A").unwrap().mastered);
    }

    #[test]
    fn test_highlight_seeding_is_off_by_default() {
        let mut e = edge("A", "B");
        e.highlighted = true;
        let graph = build(&[e], 0);
        assert!(!graph.node("A").unwrap().mastered);
        assert!(!graph.node("B").unwrap().mastered);
    }

    #[test]
    fn test_highlight_seeding_marks_nodes_when_enabled() {
        let mut e = edge("A", "B");
        e.highlighted = true;
        let config = MasteryConfig {
            mastery_threshold: 1,
            seed_from_extraction: true,
        };
        let graph = build_graph(&[e], &HashMap::new(), "", 0, &config);
        assert!(graph.node("A").unwrap().mastered);
        assert!(graph.node("B").unwrap().mastered);
    }

    #[test]
    fn test_nodes_get_snippets_from_source_text() {
        let source = "Ownership is the core concept. Borrowing builds on ownership.";
        let graph = build_graph(
            &[edge("Ownership", "Borrowing")],
            &HashMap::new(),
            source,
            0,
            &MasteryConfig::default(),
        );
        assert!(graph.node("Ownership").unwrap().content_snippet.contains("core concept"));
        assert!(graph.node("Borrowing").unwrap().content_snippet.contains("builds on"));
    }

    #[test]
    fn test_filter_ignored_is_non_destructive() {
        let graph = build(&[edge("A", "B"), edge("A", "C")], 0);
        let filtered = filter_ignored(&graph, &["B".to_string()]);
        assert_eq!(filtered.nodes.len(), 2);
        assert_eq!(filtered.edges.len(), 1);
        assert_eq!(graph.nodes.len(), 3, "original is untouched");
        assert_eq!(filtered.root.as_deref(), Some("A"));
    }

    #[test]
    fn test_duplicate_edges_count_toward_degree() {
        // Last-relation-wins applies at persistence; the in-memory build
        // keeps the full list and counts every occurrence.
        let graph = build(&[edge("A", "B"), edge("A", "B")], 0);
        assert_eq!(graph.node("A").unwrap().value, 2);
        assert_eq!(graph.edges.len(), 2);
    }
}
