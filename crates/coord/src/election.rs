// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Term-based leader election over shared [`ElectionStorage`]
//!
//! A simplified model: majority vote-granting with randomized election
//! timeouts and leader heartbeats, no log matching. It is only safe while all
//! nodes share one storage backend, so two disjoint majorities cannot form.

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ElectionError, StorageError};
use crate::events::{EventHub, EventReceiver, NamedEvent};
use crate::storage::{ElectionStorage, LeaderRecord};
use crate::timer::Ticker;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Election timing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Silence from a leader after which a follower campaigns
    #[serde(with = "humantime_serde")]
    pub election_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Upper bound of the random delay added to each election timeout
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
    /// Bound on each vote request and heartbeat write
    #[serde(with = "humantime_serde")]
    pub vote_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
            jitter: Duration::from_secs(5),
            vote_timeout: Duration::from_secs(2),
        }
    }
}

impl ElectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_vote_timeout(mut self, timeout: Duration) -> Self {
        self.vote_timeout = timeout;
        self
    }

    /// One randomized election delay: `election_timeout + random(0..=jitter)`
    pub fn next_election_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.election_timeout + Duration::from_millis(extra)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "election.election_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.election_timeout {
            return Err(ConfigError::Invalid {
                field: "election.heartbeat_interval",
                reason: format!(
                    "must be non-zero and shorter than the election timeout ({})",
                    humantime::format_duration(self.election_timeout)
                ),
            });
        }
        if self.vote_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "election.vote_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Role of a node in the election protocol
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node's local view of the election
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionState {
    pub term: u64,
    pub leader_id: Option<String>,
    /// Candidate this node voted for at `term`
    pub voted_for: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Lifecycle events emitted by a [`LeaderElection`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionEvent {
    ElectionStarted { term: u64 },
    Elected { term: u64 },
    SteppedDown { term: u64 },
    Heartbeat { term: u64 },
    Error { message: String },
}

impl NamedEvent for ElectionEvent {
    fn name(&self) -> &'static str {
        match self {
            ElectionEvent::ElectionStarted { .. } => "electionStarted",
            ElectionEvent::Elected { .. } => "elected",
            ElectionEvent::SteppedDown { .. } => "steppedDown",
            ElectionEvent::Heartbeat { .. } => "heartbeat",
            ElectionEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Default)]
struct ElectionSlot {
    state: ElectionState,
    role: Role,
    stopped: bool,
    election_timer: Option<Ticker>,
    heartbeat_timer: Option<Ticker>,
}

struct ElectionInner<S: ElectionStorage, C: Clock> {
    node_id: String,
    /// Every member, this node included, sorted
    nodes: Vec<String>,
    config: ElectionConfig,
    storage: Arc<S>,
    clock: C,
    events: EventHub<ElectionEvent>,
    slot: Mutex<ElectionSlot>,
    /// One campaign at a time per node
    campaign: tokio::sync::Mutex<()>,
}

/// Leader election for one node of a fixed membership
///
/// Cloning yields another handle to the same node.
pub struct LeaderElection<S: ElectionStorage, C: Clock = SystemClock> {
    inner: Arc<ElectionInner<S, C>>,
}

impl<S: ElectionStorage, C: Clock> Clone for LeaderElection<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ElectionStorage> LeaderElection<S, SystemClock> {
    pub fn new<I, N>(node_id: impl Into<String>, nodes: I, storage: S, config: ElectionConfig) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self::with_clock(node_id, nodes, storage, config, SystemClock)
    }
}

impl<S: ElectionStorage, C: Clock> LeaderElection<S, C> {
    /// Create a node; `nodes` is the full membership and may omit `node_id`
    pub fn with_clock<I, N>(
        node_id: impl Into<String>,
        nodes: I,
        storage: S,
        config: ElectionConfig,
        clock: C,
    ) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let node_id = node_id.into();
        let mut nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        nodes.push(node_id.clone());
        nodes.sort();
        nodes.dedup();

        Self {
            inner: Arc::new(ElectionInner {
                node_id,
                nodes,
                config,
                storage: Arc::new(storage),
                clock,
                events: EventHub::new(),
                slot: Mutex::new(ElectionSlot::default()),
                campaign: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn nodes(&self) -> &[String] {
        &self.inner.nodes
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.inner.config
    }

    pub fn role(&self) -> Role {
        self.inner.slot().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// Snapshot of the local election state
    pub fn state(&self) -> ElectionState {
        self.inner.slot().state.clone()
    }

    pub fn subscribe(&self) -> EventReceiver<ElectionEvent> {
        self.inner.events.subscribe()
    }

    /// Begin the randomized election-timeout loop. Idempotent while running.
    pub fn start(&self) -> Result<(), ElectionError> {
        let inner = &self.inner;
        let mut slot = inner.slot();
        if slot.stopped {
            return Err(ElectionError::Stopped(inner.node_id.clone()));
        }
        if !inner.arm_election_timer(&mut slot) {
            return Ok(());
        }
        tracing::info!(
            node = %inner.node_id,
            members = inner.nodes.len(),
            election_timeout = %humantime::format_duration(inner.config.election_timeout),
            "election loop started"
        );
        Ok(())
    }

    /// Run one election round now
    ///
    /// Returns whether this node is leader when the round completes.
    pub async fn start_election(&self) -> Result<bool, ElectionError> {
        self.inner.run_election().await
    }

    /// The current leader according to storage; also cached locally
    pub async fn get_leader(&self) -> Result<Option<String>, ElectionError> {
        let leader = self.inner.storage.get_current_leader().await?;
        self.inner.slot().state.leader_id = leader.clone();
        Ok(leader)
    }

    /// Cancel all timers and step down. Terminal.
    pub fn stop(&self) {
        let inner = &self.inner;
        let (was_leader, term, timers) = {
            let mut slot = inner.slot();
            if slot.stopped {
                return;
            }
            slot.stopped = true;
            let was_leader = slot.role == Role::Leader;
            slot.role = Role::Follower;
            if was_leader {
                slot.state.leader_id = None;
            }
            let timers = [slot.election_timer.take(), slot.heartbeat_timer.take()];
            (was_leader, slot.state.term, timers)
        };
        for timer in timers.into_iter().flatten() {
            timer.cancel();
        }

        tracing::info!(node = %inner.node_id, term, "election stopped");
        if was_leader {
            inner.events.publish(ElectionEvent::SteppedDown { term });
        }
    }
}

impl<S: ElectionStorage, C: Clock> ElectionInner<S, C> {
    fn slot(&self) -> std::sync::MutexGuard<'_, ElectionSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn report(&self, message: String) {
        self.events.publish(ElectionEvent::Error { message });
    }

    /// Schedule randomized election attempts unless stopped or already armed
    fn arm_election_timer(self: &Arc<Self>, slot: &mut ElectionSlot) -> bool {
        if slot.stopped || slot.election_timer.is_some() {
            return false;
        }
        let config = self.config.clone();
        let weak = Arc::downgrade(self);
        slot.election_timer = Some(Ticker::spawn(
            move || config.next_election_delay(),
            move |token| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.on_election_timeout(&token).await,
                        None => ControlFlow::Break(()),
                    }
                }
            },
        ));
        true
    }

    /// Election-timer tick: campaign unless a live leader is visible
    async fn on_election_timeout(self: &Arc<Self>, token: &CancellationToken) -> ControlFlow<()> {
        {
            let slot = self.slot();
            if slot.stopped {
                return ControlFlow::Break(());
            }
            if slot.role != Role::Follower {
                return ControlFlow::Continue(());
            }
        }

        match self.storage.get_leader_record().await {
            Ok(Some(record)) if self.follow_if_fresh(&record) => return ControlFlow::Continue(()),
            Ok(_) => {}
            Err(e) => tracing::warn!(node = %self.node_id, error = %e, "leader lookup failed"),
        }
        if token.is_cancelled() {
            return ControlFlow::Break(());
        }

        tracing::debug!(node = %self.node_id, "election timeout");
        if let Err(e) = self.run_election().await {
            tracing::warn!(node = %self.node_id, error = %e, "election round failed");
        }
        ControlFlow::Continue(())
    }

    /// Adopt `record` as leader if it heartbeated recently at a term we accept
    fn follow_if_fresh(&self, record: &LeaderRecord) -> bool {
        if record.node_id == self.node_id {
            return false;
        }
        let age = self.clock.now() - record.last_heartbeat_at;
        let fresh = age < crate::clock::to_chrono(self.config.election_timeout);

        let mut slot = self.slot();
        if !fresh || record.term < slot.state.term || slot.role != Role::Follower {
            return false;
        }
        if record.term > slot.state.term {
            slot.state.voted_for = None;
        }
        slot.state.term = record.term;
        slot.state.leader_id = Some(record.node_id.clone());
        slot.state.last_heartbeat_at = Some(record.last_heartbeat_at);
        tracing::debug!(node = %self.node_id, leader = %record.node_id, term = record.term, "following live leader");
        true
    }

    async fn run_election(self: &Arc<Self>) -> Result<bool, ElectionError> {
        let _campaign = self.campaign.lock().await;

        match self.storage.get_leader_record().await {
            Ok(Some(record)) => {
                let mut slot = self.slot();
                if record.term > slot.state.term {
                    slot.state.term = record.term;
                    slot.state.voted_for = None;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(node = %self.node_id, error = %e, "leader lookup failed"),
        }

        let term = {
            let mut slot = self.slot();
            if slot.stopped {
                return Err(ElectionError::Stopped(self.node_id.clone()));
            }
            if slot.role == Role::Leader {
                return Ok(true);
            }
            slot.state.term += 1;
            slot.state.voted_for = Some(self.node_id.clone());
            slot.state.leader_id = None;
            slot.role = Role::Candidate;
            slot.state.term
        };
        tracing::info!(node = %self.node_id, term, "starting election");
        self.events.publish(ElectionEvent::ElectionStarted { term });

        let votes = self.collect_votes(term).await;
        let won = votes >= self.quorum();

        {
            let mut slot = self.slot();
            if slot.stopped || slot.role != Role::Candidate || slot.state.term != term {
                return Ok(false);
            }
            if !won {
                slot.role = Role::Follower;
                self.arm_election_timer(&mut slot);
            }
        }
        tracing::info!(
            node = %self.node_id,
            term,
            votes,
            members = self.nodes.len(),
            won,
            "election round finished"
        );

        if won {
            self.become_leader(term).await;
        }
        Ok(self.slot().role == Role::Leader)
    }

    /// Request every member's vote at `term`, the self-vote included
    async fn collect_votes(&self, term: u64) -> usize {
        let mut requests = JoinSet::new();
        for node in &self.nodes {
            let storage = Arc::clone(&self.storage);
            let node = node.clone();
            let candidate = self.node_id.clone();
            let timeout = self.config.vote_timeout;
            requests.spawn(async move {
                let result =
                    match tokio::time::timeout(timeout, storage.request_vote(&node, term, &candidate))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StorageError::TimedOut(format!("request_vote to {}", node))),
                    };
                (node, result)
            });
        }

        let mut votes = 0;
        while let Some(joined) = requests.join_next().await {
            let (node, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(node = %self.node_id, error = %e, "vote request task failed");
                    continue;
                }
            };
            match result {
                Ok(true) => votes += 1,
                Ok(false) => {
                    tracing::debug!(node = %self.node_id, peer = %node, term, "vote refused");
                }
                Err(e) => {
                    tracing::warn!(node = %self.node_id, peer = %node, term, error = %e, "vote request failed");
                    self.report(format!("vote request to {} failed: {}", node, e));
                }
            }
        }
        votes
    }

    async fn become_leader(self: &Arc<Self>, term: u64) {
        let weak = Arc::downgrade(self);
        let heartbeat = Ticker::every(self.config.heartbeat_interval, move |token| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.heartbeat(term, &token).await,
                    None => ControlFlow::Break(()),
                }
            }
        });
        {
            let mut slot = self.slot();
            if slot.stopped || slot.state.term != term {
                heartbeat.cancel();
                return;
            }
            slot.role = Role::Leader;
            slot.state.leader_id = Some(self.node_id.clone());
            if let Some(previous) = slot.heartbeat_timer.replace(heartbeat) {
                previous.cancel();
            }
        }
        tracing::info!(node = %self.node_id, term, "elected leader");
        self.events.publish(ElectionEvent::Elected { term });

        // Announce right away rather than after one interval
        let _ = self.heartbeat(term, &CancellationToken::new()).await;
    }

    /// One leader heartbeat at `term`. Steps down on failure.
    async fn heartbeat(self: &Arc<Self>, term: u64, token: &CancellationToken) -> ControlFlow<()> {
        {
            let slot = self.slot();
            if slot.stopped || slot.role != Role::Leader || slot.state.term != term {
                return ControlFlow::Break(());
            }
        }

        let result = match tokio::time::timeout(
            self.config.vote_timeout,
            self.storage.send_heartbeat(&self.node_id, term),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::TimedOut(format!("send_heartbeat from {}", self.node_id))),
        };
        if token.is_cancelled() {
            return ControlFlow::Break(());
        }

        match result {
            Ok(()) => {
                {
                    let mut slot = self.slot();
                    if slot.stopped || slot.role != Role::Leader || slot.state.term != term {
                        return ControlFlow::Break(());
                    }
                    slot.state.last_heartbeat_at = Some(self.clock.now());
                }
                tracing::debug!(node = %self.node_id, term, "leader heartbeat");
                self.events.publish(ElectionEvent::Heartbeat { term });
                ControlFlow::Continue(())
            }
            Err(e) => {
                self.step_down(term, &e);
                ControlFlow::Break(())
            }
        }
    }

    fn step_down(self: &Arc<Self>, term: u64, error: &StorageError) {
        let heartbeat = {
            let mut slot = self.slot();
            if slot.role != Role::Leader || slot.state.term != term {
                return;
            }
            slot.role = Role::Follower;
            slot.state.leader_id = None;
            if let StorageError::StaleTerm { current_term, .. } = error {
                if *current_term > slot.state.term {
                    slot.state.term = *current_term;
                    slot.state.voted_for = None;
                }
            }
            self.arm_election_timer(&mut slot);
            slot.heartbeat_timer.take()
        };
        if let Some(heartbeat) = heartbeat {
            heartbeat.cancel();
        }

        tracing::warn!(node = %self.node_id, term, error = %error, "stepping down");
        self.events.publish(ElectionEvent::SteppedDown { term });
    }
}

impl<S: ElectionStorage, C: Clock> std::fmt::Debug for LeaderElection<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot();
        f.debug_struct("LeaderElection")
            .field("node_id", &self.inner.node_id)
            .field("role", &slot.role)
            .field("term", &slot.state.term)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "election_tests.rs"]
mod tests;
