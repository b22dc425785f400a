//! Leader election specs
//!
//! Verify a three-node cluster agrees on one leader and fails over.

use crate::prelude::*;

const MEMBERS: [&str; 3] = ["a", "b", "c"];

fn cluster() -> (FakeClock, Elections, Vec<LeaderElection<Elections, FakeClock>>) {
    let clock = FakeClock::new();
    let storage = MemoryElectionStorage::with_clock(clock.clone());
    let nodes = MEMBERS
        .iter()
        .map(|id| {
            LeaderElection::with_clock(
                *id,
                MEMBERS,
                storage.clone(),
                ElectionConfig::default(),
                clock.clone(),
            )
        })
        .collect();
    (clock, storage, nodes)
}

#[tokio::test(start_paused = true)]
async fn first_candidate_is_leader_in_every_view() {
    let (_clock, _storage, nodes) = cluster();

    assert!(nodes[0].start_election().await.unwrap());

    for node in &nodes {
        assert_eq!(node.get_leader().await.unwrap().as_deref(), Some("a"));
    }
    let leaders = nodes.iter().filter(|n| n.is_leader()).count();
    assert_eq!(leaders, 1);
    nodes[0].stop();
}

#[tokio::test(start_paused = true)]
async fn started_cluster_converges_on_one_leader() {
    let (_clock, _storage, nodes) = cluster();
    let mut events: Vec<_> = nodes.iter().map(|n| n.subscribe()).collect();

    for node in &nodes {
        node.start().unwrap();
    }
    tokio::time::sleep(Duration::from_secs(60)).await;

    let leaders: Vec<_> = nodes.iter().filter(|n| n.is_leader()).collect();
    assert_eq!(leaders.len(), 1);
    let leader_id = leaders[0].node_id().to_string();
    for node in &nodes {
        assert_eq!(node.get_leader().await.unwrap(), Some(leader_id.clone()));
    }

    let elected: usize = events
        .iter_mut()
        .map(|rx| {
            drain(rx)
                .iter()
                .filter(|e| e.name() == "elected")
                .count()
        })
        .sum();
    assert!(elected >= 1);
    for node in &nodes {
        node.stop();
    }
}

#[tokio::test(start_paused = true)]
async fn leader_loss_triggers_failover() {
    let (clock, storage, nodes) = cluster();
    assert!(nodes[0].start_election().await.unwrap());
    let mut first = nodes[0].subscribe();

    // The leader's storage link fails; it steps down on its next heartbeat
    storage.set_reachable("a", false);
    wait_for(&mut first, |e| matches!(e, ElectionEvent::SteppedDown { term: 1 })).await;
    assert!(!nodes[0].is_leader());
    // Take the failed node out so it does not campaign against the survivors
    nodes[0].stop();

    clock.advance(Duration::from_secs(30));
    let mut second = nodes[1].subscribe();
    nodes[1].start().unwrap();
    let elected = wait_for(&mut second, |e| matches!(e, ElectionEvent::Elected { .. })).await;

    assert_eq!(elected, ElectionEvent::Elected { term: 2 });
    assert_eq!(nodes[2].get_leader().await.unwrap().as_deref(), Some("b"));
    for node in &nodes {
        node.stop();
    }
}
