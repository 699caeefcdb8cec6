//! Model-checked behavior of the in-process graph container.
//!
//! Random operation sequences are applied both to a graph and to a plain
//! model of what should be visible. Nodes may stay unpublished for a while
//! and still take part in edges. After every sequence the graph's node
//! iteration and adjacency must match the model exactly.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use pargraph::primitives::concurrency::MethodFlag;
use pargraph::storage::{Direction, GraphOptions, LocalGraph, NodeStore};
use pargraph::types::NodeHandle;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    AddNode,
    CreateNode,
    Publish(usize),
    RemoveNode(usize),
    AddEdge(usize, usize),
    AddMultiEdge(usize, usize),
    RemoveEdge(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::AddNode),
        1 => Just(Op::CreateNode),
        1 => any::<usize>().prop_map(Op::Publish),
        1 => any::<usize>().prop_map(Op::RemoveNode),
        3 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::AddEdge(a, b)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::AddMultiEdge(a, b)),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::RemoveEdge(a, b)),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Pending,
    Live,
    Removed,
}

/// What a caller should be able to observe.
struct Model {
    direction: Direction,
    nodes: Vec<NodeState>,
    edges: Vec<(usize, usize)>,
}

impl Model {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn is(&self, node: usize, state: NodeState) -> bool {
        self.nodes[node] == state
    }

    fn connects(&self, edge: (usize, usize), src: usize, dst: usize) -> bool {
        match self.direction {
            Direction::Undirected => edge == (src, dst) || edge == (dst, src),
            _ => edge == (src, dst),
        }
    }

    fn position(&self, src: usize, dst: usize) -> Option<usize> {
        self.edges
            .iter()
            .position(|edge| self.connects(*edge, src, dst))
    }

    /// Published far ends of `node`'s out-edges.
    fn neighbors(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        for &(a, b) in &self.edges {
            if a == node {
                out.push(b);
            } else if b == node && self.direction == Direction::Undirected {
                out.push(a);
            }
        }
        out.retain(|n| self.is(*n, NodeState::Live));
        out.sort_unstable();
        out
    }

    /// Published sources of `node`'s in-edges.
    fn in_neighbors(&self, node: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .edges
            .iter()
            .filter(|edge| edge.1 == node && self.is(edge.0, NodeState::Live))
            .map(|edge| edge.0)
            .collect();
        out.sort_unstable();
        out
    }
}

fn run(direction: Direction, ops: &[Op]) -> Result<(), TestCaseError> {
    let graph: LocalGraph<usize, u32> =
        LocalGraph::new(GraphOptions::new().direction(direction).segments(1));
    let mut handles: Vec<NodeHandle> = Vec::new();
    let mut model = Model::new(direction);
    let pick = |handles: &Vec<NodeHandle>, raw: usize| raw % handles.len();

    for op in ops {
        match *op {
            Op::AddNode => {
                let node = graph.create_node(handles.len());
                graph.add_node(node, MethodFlag::All).unwrap();
                handles.push(node);
                model.nodes.push(NodeState::Live);
            }
            Op::CreateNode => {
                handles.push(graph.create_node(handles.len()));
                model.nodes.push(NodeState::Pending);
            }
            _ if handles.is_empty() => {}
            Op::Publish(raw) => {
                let n = pick(&handles, raw);
                graph.add_node(handles[n], MethodFlag::All).unwrap();
                if model.is(n, NodeState::Pending) {
                    model.nodes[n] = NodeState::Live;
                }
            }
            Op::RemoveNode(raw) => {
                let n = pick(&handles, raw);
                graph.remove_node(handles[n], MethodFlag::All).unwrap();
                if model.is(n, NodeState::Live) {
                    model.nodes[n] = NodeState::Removed;
                    model.edges.retain(|&(a, b)| a != n && b != n);
                }
            }
            Op::AddEdge(a, b) | Op::AddMultiEdge(a, b) => {
                let (a, b) = (pick(&handles, a), pick(&handles, b));
                let multi = matches!(op, Op::AddMultiEdge(..));
                let result = if multi {
                    graph.add_multi_edge(handles[a], handles[b], MethodFlag::All, 1)
                } else {
                    graph.add_edge(handles[a], handles[b], MethodFlag::All)
                };
                if model.is(a, NodeState::Removed) || model.is(b, NodeState::Removed) {
                    prop_assert!(result.is_err());
                } else {
                    prop_assert!(result.is_ok());
                    if multi || model.position(a, b).is_none() {
                        model.edges.push((a, b));
                    }
                }
            }
            Op::RemoveEdge(a, b) => {
                let (a, b) = (pick(&handles, a), pick(&handles, b));
                let found = graph
                    .find_edge(handles[a], handles[b], MethodFlag::All)
                    .unwrap();
                let expected = if model.is(b, NodeState::Live) {
                    model.position(a, b)
                } else {
                    None
                };
                prop_assert_eq!(found.is_some(), expected.is_some());
                if let Some(edge) = found {
                    graph.remove_edge(handles[a], &edge, MethodFlag::All).unwrap();
                }
                if let Some(at) = expected {
                    model.edges.remove(at);
                }
            }
        }
    }

    let visited: BTreeSet<usize> = graph
        .iter()
        .map(|node| *graph.get_data(node, MethodFlag::None).unwrap())
        .collect();
    let expected: BTreeSet<usize> = (0..handles.len())
        .filter(|n| model.is(*n, NodeState::Live))
        .collect();
    prop_assert_eq!(&visited, &expected);
    prop_assert_eq!(graph.size(), expected.len());

    let cells = match direction {
        Direction::Directed => 0,
        Direction::Undirected | Direction::Bidirectional => model.edges.len(),
    };
    prop_assert_eq!(graph.store().edge_factory().live(), cells);

    for n in (0..handles.len()).filter(|n| !model.is(*n, NodeState::Removed)) {
        let mut seen: Vec<usize> = graph
            .edges(handles[n], MethodFlag::All)
            .unwrap()
            .map(|edge| *graph.get_data(edge.dst(), MethodFlag::None).unwrap())
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, model.neighbors(n), "out-edges of {}", n);

        if direction == Direction::Bidirectional {
            let mut seen: Vec<usize> = graph
                .in_edges(handles[n], MethodFlag::All)
                .unwrap()
                .map(|edge| *graph.get_data(edge.src(), MethodFlag::None).unwrap())
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, model.in_neighbors(n), "in-edges of {}", n);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn directed_graph_matches_model(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        run(Direction::Directed, &ops)?;
    }

    #[test]
    fn undirected_graph_matches_model(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        run(Direction::Undirected, &ops)?;
    }

    #[test]
    fn bidirectional_graph_matches_model(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        run(Direction::Bidirectional, &ops)?;
    }
}

fn published(graph: &LocalGraph<usize, u32>, data: usize) -> NodeHandle {
    let node = graph.create_node(data);
    graph.add_node(node, MethodFlag::All).unwrap();
    node
}

#[test]
fn only_published_nodes_are_iterated() {
    let graph: LocalGraph<usize, u32> = LocalGraph::new(GraphOptions::new());
    let shown = published(&graph, 1);
    let hidden = graph.create_node(2);
    let nodes: Vec<_> = graph.iter().collect();
    assert_eq!(nodes, vec![shown]);
    assert!(!nodes.contains(&hidden));
}

#[test]
fn removal_leaves_other_nodes_alone() {
    let graph: LocalGraph<usize, u32> =
        LocalGraph::new(GraphOptions::new().direction(Direction::Undirected));
    let nodes: Vec<_> = (0..5).map(|n| published(&graph, n)).collect();
    for pair in nodes.windows(2) {
        graph.add_edge(pair[0], pair[1], MethodFlag::All).unwrap();
    }
    graph.remove_node(nodes[2], MethodFlag::All).unwrap();
    assert!(!graph.contains_node(nodes[2], MethodFlag::All).unwrap());
    for (n, node) in nodes.iter().enumerate().filter(|(n, _)| *n != 2) {
        assert!(graph.contains_node(*node, MethodFlag::All).unwrap(), "node {n}");
    }
    assert!(!graph.iter().any(|node| node == nodes[2]));
    assert_eq!(graph.edges(nodes[1], MethodFlag::All).unwrap().count(), 1);
    assert_eq!(graph.edges(nodes[3], MethodFlag::All).unwrap().count(), 1);
}

#[test]
fn directed_edge_is_seen_from_its_source_only() {
    let graph: LocalGraph<usize, u32> = LocalGraph::new(GraphOptions::new());
    let h1 = published(&graph, 1);
    let h2 = published(&graph, 2);
    graph.add_edge(h1, h2, MethodFlag::All).unwrap();
    let from_h1: Vec<_> = graph.edges(h1, MethodFlag::All).unwrap().collect();
    assert_eq!(from_h1.len(), 1);
    assert_eq!(graph.get_edge_dst(&from_h1[0]), h2);
    assert_eq!(graph.edges(h2, MethodFlag::All).unwrap().count(), 0);
}

#[test]
fn undirected_edge_is_one_value_seen_from_both_ends() {
    let graph: LocalGraph<usize, u32> =
        LocalGraph::new(GraphOptions::new().direction(Direction::Undirected));
    let h1 = published(&graph, 1);
    let h2 = published(&graph, 2);
    graph.add_edge_with(h1, h2, MethodFlag::All, 5).unwrap();
    let from_h1: Vec<_> = graph.edges(h1, MethodFlag::All).unwrap().collect();
    let from_h2: Vec<_> = graph.edges(h2, MethodFlag::All).unwrap().collect();
    assert_eq!(from_h1.len(), 1);
    assert_eq!(from_h2.len(), 1);
    assert!(from_h1[0].same_edge(&from_h2[0]));
    assert_eq!(graph.get_edge_dst(&from_h2[0]), h1);

    let found = graph.find_edge(h2, h1, MethodFlag::All).unwrap().unwrap();
    *graph.get_edge_data_mut(&found, MethodFlag::All).unwrap() += 1;
    assert_eq!(*graph.get_edge_data(&from_h1[0], MethodFlag::None).unwrap(), 6);
}

#[test]
fn graph_from_config_file() {
    let (options, table) = pargraph::storage::GraphConfig::from_toml_str(
        r#"
        direction = "undirected"
        segments = 2

        [gate]
        mode = "abort"
        "#,
    )
    .unwrap()
    .into_options();
    let table = table.unwrap();
    let graph: LocalGraph<usize, u32> = LocalGraph::new(options);
    assert_eq!(graph.direction(), Direction::Undirected);

    let _unit = table.begin_unit();
    let a = published(&graph, 1);
    let b = published(&graph, 2);
    graph.add_edge(a, b, MethodFlag::All).unwrap();
    assert_eq!(table.held_by_current(), 2);
}
