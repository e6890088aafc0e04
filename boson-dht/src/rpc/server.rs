//! UDP RPC server
//!
//! Owns one socket for one address family. Outbound calls register a
//! pending entry keyed by `(destination, txid)`; a response only resolves
//! a call when it arrives from exactly that address and carries the
//! expected sender id. Inbound requests pass throttling and the Sybil
//! filter, then go to the [`RpcHandler`]; failures map to wire error
//! replies or silent drops per the error taxonomy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::constants::{MAX_PACKET_SIZE, MIN_MESSAGE_SIZE, RPC_CALL_TIMEOUT_MAX};
use crate::error::{codes, Error, Result};
use crate::id::Id;
use crate::rpc::call::{CallOutcome, CallState, RttEstimator};
use crate::rpc::throttle::{SybilFilter, Throttle, ThrottleConfig};
use crate::rpc::token::TokenManager;
use crate::wire::{cbor, Body, Message, Method, Request, Response};

/// Consumer of verified inbound traffic
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle an inbound request; the returned response (or typed failure)
    /// is written back to the requester
    async fn handle_request(
        &self,
        from: SocketAddr,
        from_id: Id,
        version: Option<u32>,
        request: Request,
    ) -> Result<Response>;

    /// A response landed after its call's deadline; useful for bucket
    /// liveness only, never surfaced to the original caller
    async fn on_late_response(&self, _from: SocketAddr, _from_id: Id) {}
}

/// Drop/traffic counters, exported for diagnostics and tests
#[derive(Debug, Default)]
pub struct RpcStats {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub timeouts: AtomicU64,
    pub late_responses: AtomicU64,
    pub dropped_throttled: AtomicU64,
    pub dropped_inconsistent: AtomicU64,
    pub dropped_no_matched_call: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_sybil: AtomicU64,
}

impl RpcStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct PendingCall {
    expected_id: Option<Id>,
    method: Method,
    sent_at: Instant,
    state: CallState,
    tx: Option<oneshot::Sender<Result<CallOutcome>>>,
}

pub struct RpcServer {
    socket: UdpSocket,
    local_id: Id,
    local_addr: SocketAddr,
    txid: AtomicU32,
    pending: Mutex<HashMap<(SocketAddr, u32), PendingCall>>,
    tokens: Mutex<TokenManager>,
    throttle: Mutex<Throttle>,
    sybil: Mutex<SybilFilter>,
    rtt: Mutex<RttEstimator>,
    stats: RpcStats,
}

impl RpcServer {
    pub async fn bind(
        local_id: Id,
        bind_addr: SocketAddr,
        throttle_config: ThrottleConfig,
        dev_mode: bool,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Arc::new(Self {
            socket,
            local_id,
            local_addr,
            txid: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            tokens: Mutex::new(TokenManager::new()),
            throttle: Mutex::new(Throttle::new(throttle_config)),
            sybil: Mutex::new(SybilFilter::new(dev_mode)),
            rtt: Mutex::new(RttEstimator::new()),
            stats: RpcStats::default(),
        }))
    }

    pub fn local_id(&self) -> &Id {
        &self.local_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &RpcStats {
        &self.stats
    }

    /// Monotonically increasing transaction id; 0 is reserved and skipped
    /// on wrap-around
    fn next_txid(&self) -> u32 {
        loop {
            let txid = self.txid.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if txid != 0 {
                return txid;
            }
        }
    }

    // ========== OUTBOUND ==========

    /// Issue a request and await its response within the adaptive budget.
    ///
    /// `expected_id` pins the responder identity; `None` (bootstrap ping)
    /// learns it from the response instead. Past the budget the call
    /// reports [`Error::Timeout`] and only keeps listening for bucket
    /// liveness until the hard cap.
    pub async fn call(
        self: &Arc<Self>,
        dest: SocketAddr,
        expected_id: Option<Id>,
        request: Request,
    ) -> Result<CallOutcome> {
        if let Some(delay) = self.throttle.lock().await.outgoing(dest.ip()) {
            trace!(%dest, ?delay, "outbound budget exhausted");
            return Err(Error::Throttled);
        }

        let txid = self.next_txid();
        let method = request.method();
        let message = Message::request(self.local_id, txid, request);
        let bytes = cbor::encode(&message)?;

        let budget = self.rtt.lock().await.timeout();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            (dest, txid),
            PendingCall {
                expected_id,
                method,
                sent_at: Instant::now(),
                state: CallState::Sent,
                tx: Some(tx),
            },
        );
        // hard-cap sweeper; also covers callers that drop the future early
        self.spawn_reaper(dest, txid, RPC_CALL_TIMEOUT_MAX);

        if let Err(e) = self.socket.send_to(&bytes, dest).await {
            self.pending.lock().await.remove(&(dest, txid));
            return Err(e.into());
        }
        RpcStats::bump(&self.stats.sent);

        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(outcome)) => outcome,
            // the server dropped the matcher (shutdown)
            Ok(Err(_)) => Err(Error::Canceled),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if let Some(call) = pending.get_mut(&(dest, txid)) {
                    call.state = CallState::Stalled;
                    call.tx = None;
                }
                drop(pending);
                self.rtt.lock().await.update_timeout(budget);
                Err(Error::Timeout)
            }
        }
    }

    /// Removes a stalled call once the hard cap elapses
    fn spawn_reaper(self: &Arc<Self>, dest: SocketAddr, txid: u32, delay: Duration) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(call) = server.pending.lock().await.remove(&(dest, txid)) {
                if !call.state.is_terminal() {
                    RpcStats::bump(&server.stats.timeouts);
                }
            }
        });
    }

    /// Fail every pending call as canceled; used on shutdown
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, mut call) in pending.drain() {
            call.state = CallState::Canceled;
            if let Some(tx) = call.tx.take() {
                let _ = tx.send(Err(Error::Canceled));
            }
        }
    }

    // ========== TOKENS ==========

    pub async fn issue_token(&self, remote: &SocketAddr, target: &Id) -> u32 {
        self.tokens.lock().await.issue(remote, target)
    }

    pub async fn verify_token(&self, token: u32, remote: &SocketAddr, target: &Id) -> bool {
        self.tokens.lock().await.verify(token, remote, target)
    }

    /// Maintenance hook: rotate the token secret when due and decay idle
    /// throttle bookkeeping
    pub async fn periodic(&self) {
        self.tokens.lock().await.maybe_rotate();
        self.throttle.lock().await.decay();
    }

    // ========== INBOUND ==========

    /// Socket read loop; runs until the owning task is aborted
    pub async fn run(self: Arc<Self>, handler: Arc<dyn RpcHandler>) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // transient errors (e.g. ICMP-induced) must not kill
                    // the server
                    warn!(error = %e, "socket receive failed");
                    continue;
                }
            };
            self.handle_datagram(&handler, &buf[..len], from).await;
        }
    }

    async fn handle_datagram(
        self: &Arc<Self>,
        handler: &Arc<dyn RpcHandler>,
        bytes: &[u8],
        from: SocketAddr,
    ) {
        if bytes.len() < MIN_MESSAGE_SIZE {
            RpcStats::bump(&self.stats.dropped_malformed);
            return;
        }
        if self.throttle.lock().await.incoming(from.ip()) {
            RpcStats::bump(&self.stats.dropped_throttled);
            return;
        }
        let message = match cbor::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed datagram");
                RpcStats::bump(&self.stats.dropped_malformed);
                return;
            }
        };
        if message.txid == 0 || message.id == self.local_id {
            RpcStats::bump(&self.stats.dropped_inconsistent);
            return;
        }
        RpcStats::bump(&self.stats.received);

        match message.body {
            Body::Request(_) => self.handle_request(handler, from, message).await,
            Body::Response(_) | Body::Error(_) => self.handle_reply(handler, from, message).await,
        }
    }

    async fn handle_request(
        self: &Arc<Self>,
        handler: &Arc<dyn RpcHandler>,
        from: SocketAddr,
        message: Message,
    ) {
        let from_id = message.id;
        if self.sybil.lock().await.observe(from_id, from) {
            // no reply: do not amplify
            RpcStats::bump(&self.stats.dropped_sybil);
            return;
        }

        let txid = message.txid;
        let method = message.method();
        let Body::Request(request) = message.body else {
            return;
        };

        match handler.handle_request(from, from_id, message.version, request).await {
            Ok(response) => {
                self.send_message(Message::response(self.local_id, txid, response), from)
                    .await;
            }
            Err(err) => {
                // internal failures stay opaque on the wire
                let (code, text) = match &err {
                    Error::Io(_) | Error::Storage(_) | Error::State(_) => {
                        (codes::GENERIC, "internal error".to_string())
                    }
                    e => (e.wire_code(), e.to_string()),
                };
                debug!(%from, method = ?method, error = %err, "request failed");
                self.send_message(Message::error(self.local_id, txid, method, code, text), from)
                    .await;
            }
        }
    }

    async fn handle_reply(
        self: &Arc<Self>,
        handler: &Arc<dyn RpcHandler>,
        from: SocketAddr,
        message: Message,
    ) {
        let key = (from, message.txid);
        let mut pending = self.pending.lock().await;
        let Some(call) = pending.get_mut(&key) else {
            drop(pending);
            RpcStats::bump(&self.stats.dropped_no_matched_call);
            return;
        };

        // the responder must be who the call was addressed to
        if let Some(expected) = call.expected_id {
            if message.id != expected {
                drop(pending);
                debug!(%from, "response with unexpected sender id");
                RpcStats::bump(&self.stats.dropped_inconsistent);
                return;
            }
        }
        if message.method() != call.method {
            drop(pending);
            RpcStats::bump(&self.stats.dropped_inconsistent);
            return;
        }

        let was_stalled = call.state == CallState::Stalled;
        let mut call = pending
            .remove(&key)
            .expect("entry held under the same lock");
        drop(pending);

        let rtt = call.sent_at.elapsed();
        if was_stalled {
            call.state = CallState::Responded;
            RpcStats::bump(&self.stats.late_responses);
            handler.on_late_response(from, message.id).await;
            return;
        }

        self.rtt.lock().await.update(rtt);
        let outcome = match &message.body {
            Body::Error(err) => {
                call.state = CallState::Error;
                Err(Error::Remote {
                    code: err.code,
                    message: err.message.clone(),
                })
            }
            _ => {
                call.state = CallState::Responded;
                let responder = message.id;
                Ok(CallOutcome {
                    response: message,
                    rtt,
                    responder,
                })
            }
        };
        if let Some(tx) = call.tx.take() {
            let _ = tx.send(outcome);
        }
    }

    async fn send_message(&self, message: Message, dest: SocketAddr) {
        let bytes = match cbor::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return;
            }
        };
        if bytes.len() > MAX_PACKET_SIZE {
            warn!(len = bytes.len(), "refusing oversized datagram");
            return;
        }
        match self.socket.send_to(&bytes, dest).await {
            Ok(_) => RpcStats::bump(&self.stats.sent),
            Err(e) => warn!(%dest, error = %e, "send failed"),
        }
    }

    #[cfg(test)]
    pub(crate) fn seed_txid(&self, value: u32) {
        self.txid.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FindNodeRequest, FindNodeResponse, LookupWant};

    struct EchoHandler {
        nodes: Vec<crate::node_info::NodeInfo>,
    }

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle_request(
            &self,
            _from: SocketAddr,
            _from_id: Id,
            _version: Option<u32>,
            request: Request,
        ) -> Result<Response> {
            match request {
                Request::Ping => Ok(Response::Ping),
                Request::FindNode(_) => Ok(Response::FindNode(FindNodeResponse {
                    nodes4: self.nodes.clone(),
                    nodes6: Vec::new(),
                    token: Some(7),
                })),
                _ => Err(Error::InvalidToken),
            }
        }
    }

    async fn spawn_server(
        handler: Arc<dyn RpcHandler>,
    ) -> (Arc<RpcServer>, Id, SocketAddr, tokio::task::JoinHandle<()>) {
        let id = Id::random();
        let server = RpcServer::bind(
            id,
            "127.0.0.1:0".parse().unwrap(),
            ThrottleConfig::default(),
            false,
        )
        .await
        .unwrap();
        let addr = server.local_addr();
        let task = tokio::spawn(Arc::clone(&server).run(handler));
        (server, id, addr, task)
    }

    #[tokio::test]
    async fn test_txid_wraps_skipping_zero() {
        let server = RpcServer::bind(
            Id::random(),
            "127.0.0.1:0".parse().unwrap(),
            ThrottleConfig::default(),
            false,
        )
        .await
        .unwrap();

        server.seed_txid(u32::MAX - 1);
        assert_eq!(server.next_txid(), u32::MAX);
        assert_eq!(server.next_txid(), 1);
    }

    #[tokio::test]
    async fn test_txid_zero_dropped_as_inconsistent() {
        let (server, _, _, task) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;
        let handler: Arc<dyn RpcHandler> = Arc::new(EchoHandler { nodes: vec![] });

        let spoofed = Message::response(Id::random(), 0, Response::Ping);
        let bytes = cbor::encode(&spoofed).unwrap();
        let from: SocketAddr = "198.51.100.77:4000".parse().unwrap();
        server.handle_datagram(&handler, &bytes, from).await;

        assert_eq!(
            server
                .stats()
                .dropped_inconsistent
                .load(Ordering::Relaxed),
            1
        );
        task.abort();
    }

    #[tokio::test]
    async fn test_ping_round_trip_learns_id() {
        let (_server_b, id_b, addr_b, task) =
            spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;
        let (server_a, _, _, task_a) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;

        let outcome = server_a.call(addr_b, None, Request::Ping).await.unwrap();
        assert_eq!(outcome.responder, id_b);
        assert!(matches!(outcome.response.body, Body::Response(Response::Ping)));

        task.abort();
        task_a.abort();
    }

    #[tokio::test]
    async fn test_expected_id_mismatch_times_out() {
        let (_server_b, _id_b, addr_b, task) =
            spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;
        let (server_a, _, _, task_a) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;

        // expect a different id: the response must be dropped as
        // inconsistent and the call must time out
        let wrong = Id::random();
        let result = server_a.call(addr_b, Some(wrong), Request::Ping).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(
            server_a
                .stats()
                .dropped_inconsistent
                .load(Ordering::Relaxed),
            1
        );

        task.abort();
        task_a.abort();
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_as_remote() {
        let (_server_b, id_b, addr_b, task) =
            spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;
        let (server_a, _, _, task_a) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;

        let value = crate::value::Value::create_value(b"x".to_vec()).unwrap();
        let result = server_a
            .call(
                addr_b,
                Some(id_b),
                Request::StoreValue(crate::wire::StoreValueRequest {
                    token: 0,
                    cas: None,
                    value,
                }),
            )
            .await;
        match result {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, codes::PROTOCOL);
                assert!(message.starts_with("invalid token"));
            }
            other => panic!("expected remote error, got {:?}", other.map(|_| ())),
        }

        task.abort();
        task_a.abort();
    }

    #[tokio::test]
    async fn test_find_node_round_trip() {
        let nodes = vec![crate::node_info::NodeInfo::new(
            Id::random(),
            "198.51.100.3:3900".parse().unwrap(),
        )];
        let (_server_b, id_b, addr_b, task) =
            spawn_server(Arc::new(EchoHandler { nodes: nodes.clone() })).await;
        let (server_a, _, _, task_a) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;

        let outcome = server_a
            .call(
                addr_b,
                Some(id_b),
                Request::FindNode(FindNodeRequest {
                    target: Id::random(),
                    want: LookupWant::nodes4(),
                }),
            )
            .await
            .unwrap();
        match outcome.response.body {
            Body::Response(Response::FindNode(rsp)) => {
                assert_eq!(rsp.nodes4, nodes);
                assert_eq!(rsp.token, Some(7));
            }
            other => panic!("unexpected body: {:?}", other),
        }

        task.abort();
        task_a.abort();
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (server_a, _, _, task_a) = spawn_server(Arc::new(EchoHandler { nodes: vec![] })).await;

        // a call toward a black hole; cancel before the timeout fires
        let unreachable: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let server = Arc::clone(&server_a);
        let call = tokio::spawn(async move { server.call(unreachable, None, Request::Ping).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        server_a.cancel_all().await;
        let result = call.await.unwrap();
        assert!(matches!(result, Err(Error::Canceled)));

        task_a.abort();
    }
}
