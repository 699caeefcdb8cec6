//! Concurrent stress tests.
//!
//! Worker threads run randomized units of work against one graph through a
//! lock table, retrying whenever the gate reports a conflict. Afterwards the
//! graph must be structurally consistent: undirected edges mirrored on both
//! endpoints with one shared value, and payload updates never lost.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pargraph::primitives::concurrency::{GatePolicy, LockTable, MethodFlag};
use pargraph::storage::{CounterMetrics, Direction, GraphOptions, LocalGraph, NodeStore};
use pargraph::types::{NodeHandle, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const THREADS: u64 = 8;
const OPS_PER_THREAD: usize = 1_500;
const NODE_COUNT: usize = 48;

type Stress = LocalGraph<u64, u64>;

fn with_retry<T>(table: &LockTable, retries: &AtomicU64, mut work: impl FnMut() -> Result<T>) -> T {
    loop {
        let unit = table.begin_unit();
        match work() {
            Ok(value) => return value,
            Err(err) if err.is_retryable() => {
                drop(unit);
                retries.fetch_add(1, Ordering::Relaxed);
                thread::yield_now();
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

fn setup(direction: Direction, policy: GatePolicy) -> (Arc<Stress>, Arc<LockTable>, Vec<NodeHandle>) {
    let table = Arc::new(LockTable::new(policy));
    let graph = Arc::new(LocalGraph::new(
        GraphOptions::new()
            .direction(direction)
            .segments(4)
            .gate(table.clone())
            .metrics(Arc::new(CounterMetrics::default())),
    ));
    let nodes = (0..NODE_COUNT)
        .map(|_| {
            let node = graph.create_node(0);
            graph.add_node(node, MethodFlag::All).unwrap();
            node
        })
        .collect();
    (graph, table, nodes)
}

fn hammer(direction: Direction, policy: GatePolicy) -> (Arc<Stress>, Vec<NodeHandle>, u64) {
    let (graph, table, nodes) = setup(direction, policy);
    let increments = Arc::new(AtomicU64::new(0));
    let retries = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let graph = Arc::clone(&graph);
            let table = Arc::clone(&table);
            let nodes = nodes.clone();
            let increments = Arc::clone(&increments);
            let retries = Arc::clone(&retries);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(0x5EED ^ t);
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    let src = nodes[rng.gen_range(0..nodes.len())];
                    let dst = nodes[rng.gen_range(0..nodes.len())];
                    match rng.gen_range(0..4u8) {
                        0 => {
                            with_retry(&table, &retries, || {
                                graph.add_edge_with(src, dst, MethodFlag::All, t).map(|_| ())
                            });
                        }
                        1 => {
                            with_retry(&table, &retries, || {
                                match graph.find_edge(src, dst, MethodFlag::All)? {
                                    Some(edge) => graph.remove_edge(src, &edge, MethodFlag::All),
                                    None => Ok(()),
                                }
                            });
                        }
                        2 => {
                            with_retry(&table, &retries, || {
                                *graph.get_data_mut(src, MethodFlag::All)? += 1;
                                Ok(())
                            });
                            increments.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            with_retry(&table, &retries, || {
                                let mut total = 0u64;
                                for edge in graph.edges(src, MethodFlag::All)? {
                                    total += *graph.get_edge_data(&edge, MethodFlag::None)?;
                                }
                                Ok(total)
                            });
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(table.snapshot().units, 0);
    assert_eq!(table.snapshot().held, 0);

    let counted: u64 = nodes
        .iter()
        .map(|node| *graph.get_data(*node, MethodFlag::None).unwrap())
        .sum();
    assert_eq!(counted, increments.load(Ordering::Relaxed));
    (graph, nodes, retries.load(Ordering::Relaxed))
}

fn assert_mirrored(graph: &Stress, nodes: &[NodeHandle]) {
    let mut self_records = 0usize;
    let mut other_records = 0usize;
    for &node in nodes {
        for edge in graph.edges(node, MethodFlag::None).unwrap() {
            if edge.dst() == node {
                self_records += 1;
                continue;
            }
            other_records += 1;
            let mirrored = graph
                .edges(edge.dst(), MethodFlag::None)
                .unwrap()
                .any(|back| back.dst() == node && back.same_edge(&edge));
            assert!(mirrored, "edge {} -> {} has no mirror", node, edge.dst());
        }
    }
    assert_eq!(other_records % 2, 0);
    assert_eq!(
        graph.store().edge_factory().live(),
        other_records / 2 + self_records
    );
}

#[test]
fn undirected_abort_policy_stays_consistent() {
    let (graph, nodes, _) = hammer(Direction::Undirected, GatePolicy::Abort);
    assert_mirrored(&graph, &nodes);
}

#[test]
fn undirected_wait_policy_stays_consistent() {
    let (graph, nodes, _) = hammer(
        Direction::Undirected,
        GatePolicy::Wait {
            timeout: Duration::from_millis(5),
        },
    );
    assert_mirrored(&graph, &nodes);
}

#[test]
fn directed_edges_are_never_duplicated() {
    let (graph, nodes, _) = hammer(Direction::Directed, GatePolicy::Abort);
    for &node in &nodes {
        let mut targets: Vec<NodeHandle> = graph
            .edges(node, MethodFlag::None)
            .unwrap()
            .map(|edge| edge.dst())
            .collect();
        let total = targets.len();
        targets.sort_unstable();
        targets.dedup();
        assert_eq!(targets.len(), total, "duplicate edge out of {node}");
    }
}

#[test]
fn concurrent_removal_and_insertion() {
    let (graph, table, nodes) = setup(Direction::Undirected, GatePolicy::Abort);
    let retries = Arc::new(AtomicU64::new(0));
    for pair in nodes.windows(2) {
        graph.add_edge(pair[0], pair[1], MethodFlag::All).unwrap();
    }
    let doomed: Vec<NodeHandle> = nodes.iter().copied().step_by(3).collect();
    let survivors: Vec<NodeHandle> = nodes
        .iter()
        .copied()
        .filter(|node| !doomed.contains(node))
        .collect();

    let remover = {
        let graph = Arc::clone(&graph);
        let table = Arc::clone(&table);
        let retries = Arc::clone(&retries);
        let doomed = doomed.clone();
        thread::spawn(move || {
            for node in doomed {
                with_retry(&table, &retries, || graph.remove_node(node, MethodFlag::All));
            }
        })
    };
    let linker = {
        let graph = Arc::clone(&graph);
        let table = Arc::clone(&table);
        let retries = Arc::clone(&retries);
        let survivors = survivors.clone();
        thread::spawn(move || {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            for _ in 0..2_000 {
                let a = survivors[rng.gen_range(0..survivors.len())];
                let b = survivors[rng.gen_range(0..survivors.len())];
                with_retry(&table, &retries, || {
                    graph.add_edge(a, b, MethodFlag::All).map(|_| ())
                });
            }
        })
    };
    remover.join().unwrap();
    linker.join().unwrap();

    assert_eq!(graph.size(), survivors.len());
    for &node in &survivors {
        for edge in graph.edges(node, MethodFlag::None).unwrap() {
            assert!(!doomed.contains(&edge.dst()));
        }
    }
    assert_mirrored(&graph, &survivors);
}
