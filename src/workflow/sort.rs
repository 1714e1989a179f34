/// Topological ordering of workflow nodes
///
/// Linearizes a node/connection graph into a safe execution order. Built on
/// petgraph, but runs Kahn's algorithm by hand so that ties between
/// unconstrained nodes resolve by original input order, keeping the result
/// deterministic across runs. petgraph's own `toposort` gives no such
/// guarantee.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::EngineError;
use crate::workflow::types::{Connection, Node};

/// Compute the execution order for a workflow graph
///
/// With no connections at all, every node is considered independent and the
/// input order is returned unchanged. This is a fallback policy, not a
/// topological property: callers must not read meaning into the relative
/// order of disconnected nodes.
///
/// Nodes that appear in no connection are injected as isolated vertices so
/// they show up exactly once in the output. They are never modeled as
/// self-edges, which would be indistinguishable from a real cycle.
///
/// Any residual vertex after the frontier drains signals a cycle; the error
/// names the first on-cycle node in input order. A connection endpoint that
/// matches no node is an internal graph error, distinct from a cycle.
pub fn sort(nodes: &[Node], connections: &[Connection]) -> Result<Vec<Node>, EngineError> {
    if connections.is_empty() {
        return Ok(nodes.to_vec());
    }

    let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(nodes.len(), connections.len());
    let mut id_to_index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());

    // Insertion order makes NodeIndex ordinals mirror input order, which is
    // what the tie-breaking heap below keys on.
    for node in nodes {
        let index = graph.add_node(());
        id_to_index.insert(node.id.as_str(), index);
    }

    for conn in connections {
        let from = *id_to_index.get(conn.from_node_id.as_str()).ok_or_else(|| {
            EngineError::internal(format!(
                "connection '{}' references unknown source node '{}'",
                conn.id, conn.from_node_id
            ))
        })?;
        let to = *id_to_index.get(conn.to_node_id.as_str()).ok_or_else(|| {
            EngineError::internal(format!(
                "connection '{}' references unknown target node '{}'",
                conn.id, conn.to_node_id
            ))
        })?;
        graph.add_edge(from, to, ());
    }

    // Kahn's algorithm with a min-heap frontier: among ready nodes the one
    // earliest in the input always comes out first.
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.edges_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order: Vec<NodeIndex> = Vec::with_capacity(nodes.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for edge in graph.edges_directed(idx, Direction::Outgoing) {
            let target = edge.target();
            in_degree[target.index()] -= 1;
            if in_degree[target.index()] == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    if order.len() < nodes.len() {
        // Every unemitted vertex sits on or behind a cycle; report the first
        // one in input order.
        let stuck = nodes
            .iter()
            .enumerate()
            .find(|(i, _)| !order.iter().any(|idx| idx.index() == *i))
            .map(|(_, node)| node.id.clone())
            .unwrap_or_default();
        return Err(EngineError::CyclicDependency { node_id: stuck });
    }

    Ok(order.into_iter().map(|idx| nodes[idx.index()].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{NodeType, Position};
    use serde_json::json;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            workflow_id: "wf1".to_string(),
            node_type: NodeType::Trigger,
            config: json!({}),
            position: Position::default(),
            alias: None,
            delay_seconds: None,
        }
    }

    fn conn(id: &str, from: &str, to: &str) -> Connection {
        Connection {
            id: id.to_string(),
            workflow_id: "wf1".to_string(),
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
        }
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn empty_connections_returns_input_order() {
        let nodes = vec![node("c"), node("a"), node("b")];
        let sorted = sort(&nodes, &[]).unwrap();
        assert_eq!(ids(&sorted), vec!["c", "a", "b"]);
    }

    #[test]
    fn chain_follows_edges() {
        let nodes = vec![node("b"), node("a"), node("c")];
        let conns = vec![conn("e1", "a", "b"), conn("e2", "b", "c")];
        let sorted = sort(&nodes, &conns).unwrap();
        assert_eq!(ids(&sorted), vec!["a", "b", "c"]);
    }

    #[test]
    fn every_edge_source_precedes_target() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d"), node("e")];
        let conns = vec![
            conn("e1", "a", "c"),
            conn("e2", "b", "c"),
            conn("e3", "c", "d"),
            conn("e4", "c", "e"),
        ];
        let sorted = sort(&nodes, &conns).unwrap();
        let pos = |id: &str| sorted.iter().position(|n| n.id == id).unwrap();
        for c in &conns {
            assert!(pos(&c.from_node_id) < pos(&c.to_node_id));
        }
        assert_eq!(sorted.len(), 5);
    }

    #[test]
    fn diamond_fan_in_appears_exactly_once() {
        // a -> b, a -> c, b -> d, c -> d: d reachable via two paths
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let conns = vec![
            conn("e1", "a", "b"),
            conn("e2", "a", "c"),
            conn("e3", "b", "d"),
            conn("e4", "c", "d"),
        ];
        let sorted = sort(&nodes, &conns).unwrap();
        assert_eq!(sorted.iter().filter(|n| n.id == "d").count(), 1);
        assert_eq!(sorted.last().unwrap().id, "d");
    }

    #[test]
    fn ties_break_by_input_order() {
        // z and a are both unconstrained roots; z comes first in the input
        let nodes = vec![node("z"), node("a"), node("t")];
        let conns = vec![conn("e1", "z", "t"), conn("e2", "a", "t")];
        let sorted = sort(&nodes, &conns).unwrap();
        assert_eq!(ids(&sorted), vec!["z", "a", "t"]);
    }

    #[test]
    fn isolated_node_is_included_once() {
        let nodes = vec![node("a"), node("lone"), node("b")];
        let conns = vec![conn("e1", "a", "b")];
        let sorted = sort(&nodes, &conns).unwrap();
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted.iter().filter(|n| n.id == "lone").count(), 1);
    }

    #[test]
    fn cycle_is_detected_and_names_an_on_cycle_node() {
        let nodes = vec![node("a"), node("b")];
        let conns = vec![conn("e1", "a", "b"), conn("e2", "b", "a")];
        match sort(&nodes, &conns) {
            Err(EngineError::CyclicDependency { node_id }) => {
                assert!(node_id == "a" || node_id == "b");
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn cycle_behind_a_valid_prefix_still_fails() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let conns = vec![conn("e1", "a", "b"), conn("e2", "b", "c"), conn("e3", "c", "b")];
        assert!(matches!(
            sort(&nodes, &conns),
            Err(EngineError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn unknown_endpoint_is_internal_not_cyclic() {
        let nodes = vec![node("a")];
        let conns = vec![conn("e1", "a", "ghost")];
        match sort(&nodes, &conns) {
            Err(EngineError::Internal(msg)) => assert!(msg.contains("ghost")),
            other => panic!("expected internal error, got {:?}", other),
        }
    }
}
