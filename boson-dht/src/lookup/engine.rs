//! α-parallel lookup driver and write fan-out
//!
//! Runs the iterative Kademlia search: pull the nearest unqueried
//! candidate, keep at most α calls in flight, merge referrals, and stop
//! once nothing waiting can improve the closest set. Value and peer
//! lookups short-circuit per their semantics; writes re-use a
//! token-collecting node lookup and then fan out to the K closest.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::constants::{ALPHA, K, LOOKUP_TIMEOUT};
use crate::error::{Error, Result};
use crate::id::Id;
use crate::lookup::{CandidateQueue, ClosestSet, Responder};
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::routing::{KClosestNodes, RoutingTable};
use crate::rpc::{CallOutcome, RpcServer};
use crate::value::Value;
use crate::wire::{
    AnnouncePeerRequest, Body, FindNodeRequest, FindPeerRequest, FindValueRequest, LookupWant,
    Request, Response, StoreValueRequest,
};

/// Read strategy for mutable values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupMode {
    /// Converge on the closest set before answering, so the highest
    /// sequence number wins regardless of response order
    #[default]
    Conservative,
    /// Answer on the first verified hit
    Efficient,
}

enum Kind {
    Node { want_token: bool },
    Value { cas: Option<u32>, mode: LookupMode },
    Peer { expected: Option<usize> },
}

pub struct LookupEngine {
    server: Arc<RpcServer>,
    routing: Arc<RwLock<RoutingTable>>,
    /// Family bits for outgoing want fields
    want: LookupWant,
    dev_mode: bool,
}

impl LookupEngine {
    pub fn new(
        server: Arc<RpcServer>,
        routing: Arc<RwLock<RoutingTable>>,
        want: LookupWant,
        dev_mode: bool,
    ) -> Self {
        Self {
            server,
            routing,
            want,
            dev_mode,
        }
    }

    /// Iterative closest-node search; `want_token` collects write tokens
    /// from every responder
    pub async fn find_node(&self, target: Id, want_token: bool) -> Result<Vec<Responder>> {
        let run = self.run(target, Kind::Node { want_token }).await?;
        Ok(run.closest.into_responders())
    }

    /// Iterative value search
    pub async fn find_value(
        &self,
        target: Id,
        cas: Option<u32>,
        mode: LookupMode,
    ) -> Result<Option<Value>> {
        let run = self.run(target, Kind::Value { cas, mode }).await?;
        Ok(run.value)
    }

    /// Iterative peer search, accumulating until `expected` results
    pub async fn find_peers(&self, target: Id, expected: Option<usize>) -> Result<Vec<PeerInfo>> {
        let run = self.run(target, Kind::Peer { expected }).await?;
        Ok(run.peers)
    }

    /// Store a value at the K closest nodes; succeeds when at least one
    /// write is acknowledged
    pub async fn store_value(&self, value: &Value, cas: Option<u32>) -> Result<usize> {
        if !value.is_valid() {
            return Err(Error::InvalidRecord("refusing to store invalid value".into()));
        }
        let target = value.id();
        let responders = self.find_node(target, true).await?;
        self.fan_out_write(responders, |token| {
            Request::StoreValue(StoreValueRequest {
                token,
                cas,
                value: value.clone(),
            })
        })
        .await
    }

    /// Announce a peer at the K closest nodes
    pub async fn announce_peer(&self, peer: &PeerInfo) -> Result<usize> {
        if !peer.is_valid() {
            return Err(Error::InvalidRecord("refusing to announce invalid peer".into()));
        }
        let responders = self.find_node(*peer.id(), true).await?;
        self.fan_out_write(responders, |token| {
            Request::AnnouncePeer(AnnouncePeerRequest {
                token,
                cas: None,
                peer: peer.clone(),
            })
        })
        .await
    }

    async fn fan_out_write(
        &self,
        responders: Vec<Responder>,
        build: impl Fn(u32) -> Request,
    ) -> Result<usize> {
        if responders.is_empty() {
            return Err(Error::State("no reachable nodes near the target".into()));
        }

        let mut writes: JoinSet<(NodeInfo, Result<CallOutcome>)> = JoinSet::new();
        let mut dispatched = 0;
        for responder in responders {
            let Some(token) = responder.token else {
                trace!(node = %responder.node, "responder issued no token, skipping write");
                continue;
            };
            let request = build(token);
            let server = Arc::clone(&self.server);
            let node = responder.node;
            writes.spawn(async move {
                let result = server
                    .call(node.socket_addr(), Some(*node.id()), request)
                    .await;
                (node, result)
            });
            dispatched += 1;
        }
        if dispatched == 0 {
            return Err(Error::State("no responder issued a write token".into()));
        }

        let mut acked = 0;
        let mut first_failure: Option<Error> = None;
        while let Some(joined) = writes.join_next().await {
            let Ok((node, result)) = joined else { continue };
            match result {
                Ok(outcome) => {
                    acked += 1;
                    self.routing
                        .write()
                        .await
                        .notify_response(node, Some(outcome.rtt));
                }
                Err(err) => {
                    debug!(node = %node, error = %err, "write rejected");
                    if matches!(err, Error::Timeout) {
                        self.routing.write().await.notify_timeout(node.id());
                    }
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        if acked > 0 {
            Ok(acked)
        } else {
            Err(first_failure.unwrap_or(Error::Timeout))
        }
    }

    // ========== ITERATIVE DRIVER ==========

    async fn run(&self, target: Id, kind: Kind) -> Result<RunOutput> {
        let local_id = *self.server.local_id();
        let allow_bogons = self.dev_mode;

        let mut candidates = CandidateQueue::new(target);
        {
            let table = self.routing.read().await;
            for node in KClosestNodes::new(&table, target, K).fill() {
                candidates.add(node, &local_id, allow_bogons);
            }
        }

        let mut output = RunOutput {
            closest: ClosestSet::new(target, K),
            value: None,
            peers: Vec::new(),
        };
        let mut inflight: JoinSet<(NodeInfo, Result<CallOutcome>)> = JoinSet::new();
        let deadline = Instant::now() + LOOKUP_TIMEOUT;
        let mut finished = false;

        loop {
            while !finished && inflight.len() < ALPHA {
                let Some(head) = candidates.head_distance() else {
                    break;
                };
                if !output.closest.would_admit(&head) {
                    // everything still waiting is farther than the worst
                    // confirmed responder
                    break;
                }
                let Some(node) = candidates.pop() else { break };
                let request = self.build_request(target, &kind, &output.value);
                self.routing.write().await.notify_send(node.id());

                let server = Arc::clone(&self.server);
                let dest = node.socket_addr();
                let expected = Some(*node.id());
                inflight.spawn(async move {
                    let result = server.call(dest, expected, request).await;
                    (node, result)
                });
            }

            if inflight.is_empty() {
                break;
            }

            let joined = match tokio::time::timeout_at(deadline, inflight.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // outer lookup clock: cancel the stragglers
                    warn!(%target, "lookup deadline reached");
                    inflight.abort_all();
                    break;
                }
            };
            let Some(Ok((node, result))) = joined else {
                continue;
            };

            match result {
                Ok(outcome) => {
                    {
                        let mut table = self.routing.write().await;
                        let mut confirmed = node.clone();
                        confirmed.set_version(outcome.response.version);
                        table.notify_response(confirmed, Some(outcome.rtt));
                    }
                    if let Body::Response(response) = outcome.response.body {
                        finished |= self.fold(
                            &kind,
                            target,
                            node,
                            response,
                            &mut candidates,
                            &mut output,
                            &local_id,
                            allow_bogons,
                        );
                        if finished {
                            inflight.abort_all();
                            break;
                        }
                    }
                }
                Err(Error::Timeout) => {
                    self.routing.write().await.notify_timeout(node.id());
                }
                Err(Error::Remote { code, message }) => {
                    // it answered, just unhelpfully
                    debug!(node = %node, code, message = %message, "lookup peer answered with error");
                    self.routing.write().await.notify_response(node, None);
                }
                Err(err) => {
                    trace!(node = %node, error = %err, "lookup call failed");
                }
            }
        }

        Ok(output)
    }

    fn build_request(&self, target: Id, kind: &Kind, best_value: &Option<Value>) -> Request {
        match kind {
            Kind::Node { want_token } => Request::FindNode(FindNodeRequest {
                target,
                want: LookupWant {
                    want_token: *want_token,
                    ..self.want
                },
            }),
            Kind::Value { cas, .. } => {
                // advertise the best sequence seen so far, so responders
                // holding nothing newer answer with nodes only
                let seen = best_value
                    .as_ref()
                    .filter(|v| v.is_mutable())
                    .map(Value::sequence_number);
                Request::FindValue(FindValueRequest {
                    target,
                    want: self.want,
                    cas: cas.or(seen),
                })
            }
            Kind::Peer { expected } => Request::FindPeer(FindPeerRequest {
                target,
                want: LookupWant {
                    want_token: true,
                    ..self.want
                },
                cas: None,
                expected_count: expected.map(|e| e as u32),
            }),
        }
    }

    /// Merge one response; returns whether the lookup can finish early
    #[allow(clippy::too_many_arguments)]
    fn fold(
        &self,
        kind: &Kind,
        target: Id,
        node: NodeInfo,
        response: Response,
        candidates: &mut CandidateQueue,
        output: &mut RunOutput,
        local_id: &Id,
        allow_bogons: bool,
    ) -> bool {
        let mut merge = |nodes4: Vec<NodeInfo>, nodes6: Vec<NodeInfo>| {
            if self.want.want4 {
                for n in nodes4 {
                    candidates.add(n, local_id, allow_bogons);
                }
            }
            if self.want.want6 {
                for n in nodes6 {
                    candidates.add(n, local_id, allow_bogons);
                }
            }
        };

        match (kind, response) {
            (Kind::Node { .. }, Response::FindNode(rsp)) => {
                merge(rsp.nodes4, rsp.nodes6);
                output.closest.insert(node, rsp.token);
                false
            }
            (Kind::Value { mode, .. }, Response::FindValue(rsp)) => {
                merge(rsp.nodes4, rsp.nodes6);
                output.closest.insert(node.clone(), rsp.token);
                let Some(value) = rsp.value else {
                    return false;
                };
                if !value.is_valid() || value.id() != target {
                    warn!(node = %node, "discarding invalid value from lookup");
                    return false;
                }
                if !value.is_mutable() {
                    // immutable: the first verified hit is the answer
                    output.value = Some(value);
                    return true;
                }
                let better = output
                    .value
                    .as_ref()
                    .map_or(true, |best| value.sequence_number() > best.sequence_number());
                if better {
                    output.value = Some(value);
                }
                *mode == LookupMode::Efficient
            }
            (Kind::Peer { expected }, Response::FindPeer(rsp)) => {
                merge(rsp.nodes4, rsp.nodes6);
                output.closest.insert(node.clone(), rsp.token);
                for peer in rsp.peers {
                    if peer.id() != &target {
                        warn!(node = %node, "discarding peer for foreign target");
                        continue;
                    }
                    if !output.peers.iter().any(|p| p.key() == peer.key()) {
                        output.peers.push(peer);
                    }
                }
                matches!(expected, Some(expected) if output.peers.len() >= *expected)
            }
            (_, _) => {
                debug!(node = %node, "response body does not match the lookup kind");
                false
            }
        }
    }
}

struct RunOutput {
    closest: ClosestSet,
    value: Option<Value>,
    peers: Vec<PeerInfo>,
}
