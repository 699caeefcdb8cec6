//! Replication ring integration tests.
//!
//! A container created on one partition is shipped to others; every view
//! must iterate the nodes of every partition, and edges may cross
//! partitions freely.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use pargraph::primitives::bytes::{DeserializeBuffer, SerializeBuffer};
use pargraph::primitives::concurrency::{GatePolicy, LockTable, MethodFlag};
use pargraph::storage::{
    Cluster, CounterMetrics, Direction, DistGraph, GraphOptions, NodeStore, PartitionCtx,
};
use pargraph::types::{GraphError, NodeHandle, PartitionId};

type Ring = DistGraph<u32, u32>;

fn ship(graph: &Ring, ctx: &PartitionCtx<u32, u32>) -> Ring {
    let mut buf = SerializeBuffer::new();
    graph.serialize(&mut buf);
    let bytes = buf.into_bytes();
    let mut input = DeserializeBuffer::new(&bytes);
    let received = DistGraph::deserialize(&mut input, ctx).unwrap();
    input.finish().unwrap();
    received
}

fn payloads(graph: &Ring) -> Vec<u32> {
    let mut seen: Vec<u32> = graph
        .iter()
        .map(|node| *graph.get_data(node, MethodFlag::None).unwrap())
        .collect();
    seen.sort_unstable();
    seen
}

fn publish(graph: &Ring, data: u32) -> NodeHandle {
    let node = graph.create_node(data);
    graph.add_node(node, MethodFlag::All).unwrap();
    node
}

#[test]
fn received_view_iterates_every_partition_once() {
    let cluster = Cluster::new(2);
    let a = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0));
    let b = PartitionCtx::new(Arc::clone(&cluster), PartitionId(1));
    let on_a = Ring::new(&a, GraphOptions::new());
    for n in 0..10 {
        publish(&on_a, n);
    }
    let unpublished = on_a.create_node(99);
    let removed = publish(&on_a, 98);
    on_a.remove_node(removed, MethodFlag::All).unwrap();

    let on_b = ship(&on_a, &b);
    assert_eq!(on_b.partition(), PartitionId(1));
    assert_eq!(on_b.master(), on_a.master());
    assert_eq!(payloads(&on_b), (0..10).collect::<Vec<_>>());

    for n in 100..105 {
        let node = publish(&on_b, n);
        assert_eq!(node.partition, PartitionId(1));
    }
    let expected: Vec<u32> = (0..10).chain(100..105).collect();
    assert_eq!(payloads(&on_b), expected);
    assert_eq!(payloads(&on_a), expected);
    assert_eq!(on_b.size(), 15);

    let local: BTreeSet<u32> = on_b
        .local_iter()
        .map(|node| *on_b.get_data(node, MethodFlag::None).unwrap())
        .collect();
    assert_eq!(local, (100..105).collect());
    assert!(!on_b.contains_node(unpublished, MethodFlag::All).unwrap());
}

#[test]
fn master_chain_is_visited_before_replicas() {
    let cluster = Cluster::new(3);
    let ctxs: Vec<_> = (0..3)
        .map(|p| PartitionCtx::new(Arc::clone(&cluster), PartitionId(p)))
        .collect();
    let master = Ring::new(&ctxs[0], GraphOptions::new());
    let views: Vec<Ring> = ctxs[1..].iter().map(|ctx| ship(&master, ctx)).collect();
    publish(&views[0], 1);
    publish(&views[1], 2);
    publish(&master, 0);

    let order: Vec<u32> = views[0]
        .iter()
        .map(|node| *views[0].get_data(node, MethodFlag::None).unwrap())
        .collect();
    assert_eq!(order[0], 0);
    assert_eq!(order.len(), 3);
    let partitions: Vec<_> = master
        .store()
        .states()
        .map(|state| state.id().partition)
        .collect();
    assert_eq!(partitions[0], PartitionId(0));
    assert_eq!(partitions.len(), 3);
}

#[test]
fn undirected_edges_cross_partitions() {
    let cluster = Cluster::new(2);
    let a = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0));
    let b = PartitionCtx::new(Arc::clone(&cluster), PartitionId(1));
    let on_a = Ring::new(&a, GraphOptions::new().direction(Direction::Undirected));
    let on_b = ship(&on_a, &b);
    assert_eq!(on_b.direction(), Direction::Undirected);

    let x = publish(&on_a, 1);
    let y = publish(&on_b, 2);
    let edge = on_b.add_edge_with(y, x, MethodFlag::All, 7).unwrap();
    let back = on_a.find_edge(x, y, MethodFlag::All).unwrap().unwrap();
    assert!(back.same_edge(&edge));
    assert_eq!(on_a.store().edge_factory().live(), 1);

    on_a.remove_node(x, MethodFlag::All).unwrap();
    assert_eq!(on_b.edges(y, MethodFlag::All).unwrap().count(), 0);
    assert_eq!(on_b.store().edge_factory().live(), 0);
}

#[test]
fn reused_slot_does_not_resurrect_stale_edges() {
    let cluster = Cluster::new(1);
    let ctx = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0));
    let graph = Ring::new(&ctx, GraphOptions::new());
    let a = publish(&graph, 1);
    let b = publish(&graph, 2);
    graph.add_edge(a, b, MethodFlag::All).unwrap();
    graph.remove_node(b, MethodFlag::All).unwrap();

    let c = publish(&graph, 3);
    assert_eq!(c.index, b.index);
    assert_ne!(c.generation, b.generation);
    assert!(graph.find_edge(a, c, MethodFlag::All).unwrap().is_none());
    assert_eq!(graph.edges(a, MethodFlag::All).unwrap().count(), 0);
    assert_eq!(payloads(&graph), vec![1, 3]);
}

#[test]
#[should_panic(expected = "stale node handle")]
fn stale_handle_is_fatal() {
    let cluster = Cluster::new(1);
    let ctx = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0));
    let graph = Ring::new(&ctx, GraphOptions::new());
    let a = publish(&graph, 1);
    graph.remove_node(a, MethodFlag::All).unwrap();
    publish(&graph, 2);
    let _ = graph.get_data(a, MethodFlag::All);
}

#[test]
fn concurrent_creation_on_many_partitions() {
    let cluster = Cluster::new(4);
    let metrics = Arc::new(CounterMetrics::default());
    let origin = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0))
        .with_metrics(metrics.clone());
    let master = Arc::new(Ring::new(&origin, GraphOptions::new()));

    let workers: Vec<_> = (1..4u16)
        .map(|p| {
            let master = Arc::clone(&master);
            let ctx = PartitionCtx::new(Arc::clone(&cluster), PartitionId(p))
                .with_metrics(metrics.clone());
            thread::spawn(move || {
                let view = ship(&master, &ctx);
                for n in 0..200 {
                    publish(&view, u32::from(p) * 1_000 + n);
                }
                view.local_iter().count()
            })
        })
        .collect();
    for n in 0..200 {
        publish(&master, n);
    }
    for worker in workers {
        assert_eq!(worker.join().unwrap(), 200);
    }
    assert_eq!(master.size(), 800);
    assert_eq!(CounterMetrics::get(&metrics.rings_spliced), 3);
    assert_eq!(CounterMetrics::get(&metrics.nodes_published), 800);
}

#[test]
fn deserialization_goes_through_the_gate() {
    let cluster = Cluster::new(2);
    let table = Arc::new(LockTable::new(GatePolicy::Abort));
    let origin = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0)).with_gate(table.clone());
    let remote = PartitionCtx::new(Arc::clone(&cluster), PartitionId(1)).with_gate(table.clone());
    let master = Arc::new(Ring::new(&origin, GraphOptions::new()));
    let mut buf = SerializeBuffer::new();
    master.serialize(&mut buf);
    let bytes = buf.into_bytes();

    let _unit = table.begin_unit();
    DistGraph::deserialize(&mut DeserializeBuffer::new(&bytes), &remote).unwrap();
    let result = {
        let table = Arc::clone(&table);
        let bytes = bytes.clone();
        thread::spawn(move || {
            let _unit = table.begin_unit();
            DistGraph::deserialize(&mut DeserializeBuffer::new(&bytes), &remote).map(|_| ())
        })
        .join()
        .unwrap()
    };
    assert!(matches!(result, Err(GraphError::Conflict { .. })));
}

#[test]
fn shipped_node_keeps_its_chain_link() {
    let cluster = Cluster::new(1);
    let ctx = PartitionCtx::new(Arc::clone(&cluster), PartitionId(0));
    let graph = Ring::new(&ctx, GraphOptions::new());
    let first = publish(&graph, 1);
    let second = publish(&graph, 2);
    graph.add_edge_with(second, first, MethodFlag::All, 12).unwrap();

    let mut buf = SerializeBuffer::new();
    graph.serialize_node(second, MethodFlag::All, &mut buf).unwrap();
    let bytes = buf.into_bytes();
    let image = Ring::deserialize_node(&mut DeserializeBuffer::new(&bytes)).unwrap();
    assert_eq!(image.link, Some(first));
    assert!(image.active);
    assert_eq!(image.data, 2);
    assert_eq!(image.edges.len(), 1);
    assert_eq!(image.edges[0].value, 12);

    let mut buf = SerializeBuffer::new();
    graph.serialize_node(first, MethodFlag::All, &mut buf).unwrap();
    let bytes = buf.into_bytes();
    let image = Ring::deserialize_node(&mut DeserializeBuffer::new(&bytes)).unwrap();
    assert_eq!(image.link, None);
}
