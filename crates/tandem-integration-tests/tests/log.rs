//! Log scenarios: replication, rejected writers and swarm ownership.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tandem_base::{Node, Wire, WriterKey};
use tandem_integration_tests::{
    eventually, init_tracing, log_peer, log_peer_on, CONVERGE_TIMEOUT,
};
use tandem_node::{InstanceConfig, Operation, SharedLog};
use tandem_protocols::derive_ids;
use tandem_swarm::{
    Error as SwarmError, MemorySwarm, Rendezvous, Swarm, SwarmHandle, TcpSwarm, TcpSwarmConfig,
};
use tokio::io::AsyncWriteExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn appends_from_two_writers_converge() {
    init_tracing();
    let rendezvous = Rendezvous::new();

    let a = &log_peer(&rendezvous, "a", "room-log", |c| c);
    a.ready().await.unwrap();
    a.append(json!("first")).await.unwrap();
    let base_key = a.base_key().await.unwrap();
    let b = &log_peer(&rendezvous, "b", "room-log", |c| c.with_bootstrap(base_key));
    b.ready().await.unwrap();

    tokio::time::timeout(CONVERGE_TIMEOUT, b.append(json!("second")))
        .await
        .expect("b was never granted")
        .unwrap();

    for peer in [a, b] {
        assert!(eventually(move || async move { peer.len().await.unwrap() == 2 }).await);
    }
    assert_eq!(a.tail(10).await.unwrap(), b.tail(10).await.unwrap());
    assert_eq!(a.tail(1).await.unwrap()[0].data, json!("second"));
    assert_eq!(a.get_hash().await.unwrap(), b.get_hash().await.unwrap());

    b.sync().await.unwrap();
    assert_eq!(b.len().await.unwrap(), 2);

    b.close().await.unwrap();
    a.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_from_ungranted_writer_are_never_applied() {
    init_tracing();
    let rendezvous = Rendezvous::new();

    let a = &log_peer(&rendezvous, "a", "guarded-log", |c| c);
    a.ready().await.unwrap();
    let base_key = a.base_key().await.unwrap();
    a.append(json!("legit")).await.unwrap();

    // Speak the replication wire directly with a key nobody granted.
    let intruder = MemorySwarm::new(&rendezvous, "intruder");
    let (mut conns, _) = intruder
        .join(derive_ids("guarded-log").data)
        .await
        .unwrap()
        .split();
    let mut conn = conns.recv().await.unwrap();

    let forged: Wire<Operation> = Wire::Nodes {
        nodes: vec![Node {
            writer: WriterKey::from_bytes([0xee; 32]),
            seq: 0,
            clock: 1,
            value: Some(Operation::append(json!("forged"))),
        }],
    };
    let hello: Wire<Operation> = Wire::Hello {
        base: base_key,
        have: BTreeMap::new(),
    };
    for msg in [hello, forged] {
        let mut line = serde_json::to_vec(&msg).unwrap();
        line.push(b'\n');
        conn.stream.write_all(&line).await.unwrap();
    }

    let base = &a.base().await.unwrap();
    assert!(eventually(move || async move { base.node_count().await == 2 }).await);

    let tail = a.tail(10).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].data, json!("legit"));

    a.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_leaves_shared_swarm_alone() {
    init_tracing();
    let rendezvous = Rendezvous::new();
    let swarm = Arc::new(MemorySwarm::new(&rendezvous, "shared"));

    let log = log_peer_on("log", "shared-log", SwarmHandle::shared(Arc::clone(&swarm)));
    let other = log_peer_on("other", "shared-other", SwarmHandle::shared(Arc::clone(&swarm)));
    log.ready().await.unwrap();
    other.ready().await.unwrap();
    assert!(!log.swarm().is_owned());

    let log_ids = derive_ids("shared-log");
    let other_ids = derive_ids("shared-other");
    assert_eq!(rendezvous.members(&log_ids.key).await, 1);

    log.close().await.unwrap();
    assert_eq!(rendezvous.members(&log_ids.key).await, 0);
    assert_eq!(rendezvous.members(&log_ids.data).await, 0);
    assert_eq!(rendezvous.members(&other_ids.key).await, 1);
    assert!(swarm.join(derive_ids("still-alive").key).await.is_ok());

    other.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_destroys_owned_swarm() {
    init_tracing();
    let rendezvous = Rendezvous::new();

    let a = log_peer(&rendezvous, "a", "owned-log", |c| c);
    a.ready().await.unwrap();
    assert!(a.swarm().is_owned());

    a.close().await.unwrap();
    assert_eq!(rendezvous.members(&derive_ids("owned-log").key).await, 0);
    assert!(matches!(
        a.swarm().swarm().join(derive_ids("owned-log").key).await,
        Err(SwarmError::Destroyed)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicates_over_tcp() {
    init_tracing();
    let loopback = "127.0.0.1:0".parse().unwrap();

    let swarm_a = TcpSwarm::bind(TcpSwarmConfig {
        listen: loopback,
        ..TcpSwarmConfig::default()
    })
    .await
    .unwrap();
    let addr_a = swarm_a.local_addr();
    let swarm_b = TcpSwarm::bind(TcpSwarmConfig {
        listen: loopback,
        peers: vec![addr_a],
        connect_timeout: Duration::from_secs(2),
    })
    .await
    .unwrap();

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let config = |dir: &tempfile::TempDir| {
        InstanceConfig::new("tcp-log", dir.path())
            .with_pulse_interval(Duration::from_millis(100))
            .with_wait_interval(Duration::from_millis(50))
            .with_flush_timeout(Duration::from_secs(2))
    };

    let a = &SharedLog::new(config(&dir_a), SwarmHandle::owned(swarm_a));
    a.ready().await.unwrap();
    let b = &SharedLog::new(
        config(&dir_b).with_bootstrap(a.base_key().await.unwrap()),
        SwarmHandle::owned(swarm_b),
    );
    b.ready().await.unwrap();

    tokio::time::timeout(CONVERGE_TIMEOUT, b.append(json!({"over": "tcp"})))
        .await
        .expect("b was never granted")
        .unwrap();
    assert!(eventually(move || async move { a.len().await.unwrap() == 1 }).await);

    b.close().await.unwrap();
    a.close().await.unwrap();
}
