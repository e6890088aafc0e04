//! Node runtime
//!
//! Boots one DHT instance per configured address family, serves inbound
//! requests out of the routing table and the record storage, and drives
//! the maintenance loop: bucket refresh, persistent re-announce, cache
//! snapshots, token rotation and storage expiry.
//!
//! Ownership is strictly hierarchical: the node owns the per-family DHT
//! instances, each of which owns its RPC server and lookup engine. The
//! only backward edge is the sibling link between the two families, held
//! weakly for cross-family lookup answers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use boson_crypto::{KeyPair, Nonce, Signature};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::constants::{
    CACHE_FILE_V4, CACHE_FILE_V6, CACHE_SAVE_INTERVAL, K, MAINTENANCE_INTERVAL,
    RE_ANNOUNCE_INTERVAL,
};
use crate::crypto_cache::CryptoCache;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::lookup::{LookupEngine, LookupMode};
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::routing::{KClosestNodes, RoutingTable};
use crate::rpc::{RpcHandler, RpcServer, ThrottleConfig};
use crate::storage::{DataStorage, MemoryStorage};
use crate::util;
use crate::value::Value;
use crate::wire::{
    FindNodeResponse, FindPeerResponse, FindValueResponse, LookupWant, Request, Response,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Overlay connectivity of one address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    /// At least one verified round trip completed
    Connected,
    /// A bootstrap self-lookup converged with a non-empty closest set
    Profound,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusEvent {
    pub family: AddressFamily,
    pub status: ConnectionStatus,
}

/// Options for value reads
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    pub mode: LookupMode,
    /// Sequence number already held by the caller
    pub cas: Option<u32>,
}

/// Options for writes
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Keep the record re-announced by the maintenance loop
    pub persistent: bool,
    /// Write only to local storage, skipping the overlay
    pub local_only: bool,
    pub cas: Option<u32>,
}

// ========== PER-FAMILY DHT INSTANCE ==========

struct Dht {
    family: AddressFamily,
    server: Arc<RpcServer>,
    routing: Arc<RwLock<RoutingTable>>,
    engine: LookupEngine,
    storage: Arc<dyn DataStorage>,
    cache_path: Option<PathBuf>,
    dev_mode: bool,
    sibling: OnceLock<Weak<Dht>>,
    self_ref: OnceLock<Weak<Dht>>,
    /// Contacts currently being verified by a reverse ping
    verifying: Mutex<std::collections::HashSet<Id>>,
    status: Mutex<ConnectionStatus>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl Dht {
    async fn bind(
        family: AddressFamily,
        local_id: Id,
        bind_addr: SocketAddr,
        storage: Arc<dyn DataStorage>,
        cache_path: Option<PathBuf>,
        dev_mode: bool,
        status_tx: broadcast::Sender<StatusEvent>,
    ) -> Result<Arc<Self>> {
        let want = match family {
            AddressFamily::V4 => LookupWant {
                want4: true,
                want6: false,
                want_token: false,
            },
            AddressFamily::V6 => LookupWant {
                want4: false,
                want6: true,
                want_token: false,
            },
        };
        let server =
            RpcServer::bind(local_id, bind_addr, ThrottleConfig::default(), dev_mode).await?;
        let routing = Arc::new(RwLock::new(RoutingTable::new(local_id)));
        let engine = LookupEngine::new(
            Arc::clone(&server),
            Arc::clone(&routing),
            want,
            dev_mode,
        );

        let dht = Arc::new(Self {
            family,
            server,
            routing,
            engine,
            storage,
            cache_path,
            dev_mode,
            sibling: OnceLock::new(),
            self_ref: OnceLock::new(),
            verifying: Mutex::new(std::collections::HashSet::new()),
            status: Mutex::new(ConnectionStatus::Disconnected),
            status_tx,
        });
        let _ = dht.self_ref.set(Arc::downgrade(&dht));

        if let Some(path) = &dht.cache_path {
            if path.exists() {
                let mut table = dht.routing.write().await;
                if let Err(e) = table.load(path) {
                    warn!(path = %path.display(), error = %e, "routing cache unusable");
                }
            }
        }
        Ok(dht)
    }

    async fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.lock().await;
        if *current == status {
            return;
        }
        // connectivity only ratchets down on an explicit disconnect
        if status != ConnectionStatus::Disconnected && (*current as u8) > (status as u8) {
            return;
        }
        *current = status;
        let _ = self.status_tx.send(StatusEvent {
            family: self.family,
            status,
        });
    }

    async fn closest_nodes(&self, target: &Id) -> Vec<NodeInfo> {
        let table = self.routing.read().await;
        KClosestNodes::new(&table, *target, K).fill()
    }

    fn sibling(&self) -> Option<Arc<Dht>> {
        self.sibling.get().and_then(Weak::upgrade)
    }

    /// Node lists for a response, honoring the requested families
    async fn nodes_for(&self, want: LookupWant, target: &Id) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
        let mut nodes4 = Vec::new();
        let mut nodes6 = Vec::new();
        if want.want4 {
            nodes4 = match self.family {
                AddressFamily::V4 => self.closest_nodes(target).await,
                AddressFamily::V6 => match self.sibling() {
                    Some(sibling) => sibling.closest_nodes(target).await,
                    None => Vec::new(),
                },
            };
        }
        if want.want6 {
            nodes6 = match self.family {
                AddressFamily::V6 => self.closest_nodes(target).await,
                AddressFamily::V4 => match self.sibling() {
                    Some(sibling) => sibling.closest_nodes(target).await,
                    None => Vec::new(),
                },
            };
        }
        (nodes4, nodes6)
    }

    async fn ping(&self, node: &NodeInfo) -> Result<()> {
        self.routing.write().await.notify_send(node.id());
        match self
            .server
            .call(node.socket_addr(), Some(*node.id()), Request::Ping)
            .await
        {
            Ok(outcome) => {
                self.routing
                    .write()
                    .await
                    .notify_response(node.clone(), Some(outcome.rtt));
                self.set_status(ConnectionStatus::Connected).await;
                Ok(())
            }
            Err(err) => {
                if matches!(err, Error::Timeout) {
                    self.routing.write().await.notify_timeout(node.id());
                }
                Err(err)
            }
        }
    }

    async fn bootstrap(&self, seeds: &[NodeInfo]) -> Result<()> {
        let seeds: Vec<&NodeInfo> = seeds
            .iter()
            .filter(|seed| match self.family {
                AddressFamily::V4 => seed.is_ipv4(),
                AddressFamily::V6 => seed.is_ipv6(),
            })
            .collect();
        if seeds.is_empty() {
            return Ok(());
        }
        self.set_status(ConnectionStatus::Connecting).await;

        let mut any = false;
        for seed in seeds {
            match self.ping(seed).await {
                Ok(()) => any = true,
                Err(err) => debug!(seed = %seed, error = %err, "bootstrap ping failed"),
            }
        }
        if !any {
            return Err(Error::State("no bootstrap seed answered".into()));
        }

        // fill the neighborhood around the local id
        let local = *self.server.local_id();
        let closest = self.engine.find_node(local, false).await?;
        if !closest.is_empty() {
            self.set_status(ConnectionStatus::Profound).await;
        }
        Ok(())
    }

    async fn save_cache(&self) {
        if let Some(path) = &self.cache_path {
            let table = self.routing.read().await;
            if let Err(e) = table.save(path) {
                warn!(path = %path.display(), error = %e, "failed to save routing cache");
            }
        }
    }

    async fn maintenance_tick(&self) {
        self.server.periodic().await;

        let (to_ping, refresh_targets) = {
            let mut table = self.routing.write().await;
            table.maintain();
            (table.nodes_to_ping(), table.refresh_targets())
        };

        // a couple of liveness probes per tick is enough; the back-off
        // logic keeps the rest queued
        for node in to_ping.into_iter().take(2) {
            let _ = self.ping(&node).await;
        }

        for target in refresh_targets {
            if let Err(e) = self.engine.find_node(target, false).await {
                debug!(error = %e, "bucket refresh lookup failed");
            }
        }
    }
}

#[async_trait]
impl RpcHandler for Dht {
    async fn handle_request(
        &self,
        from: SocketAddr,
        from_id: Id,
        version: Option<u32>,
        request: Request,
    ) -> Result<Response> {
        // first useful contact: enters the table as unverified hearsay,
        // then a reverse ping promotes it once the round trip completes
        if self.dev_mode || !util::is_bogon(&from) {
            let node = NodeInfo::with_version(from_id, from, version);
            {
                let mut table = self.routing.write().await;
                table.observe(node.clone());
            }
            let unverified = {
                let table = self.routing.read().await;
                table.bucket_of(&from_id).find(&from_id).is_none()
            };
            if unverified && self.verifying.lock().await.insert(from_id) {
                if let Some(me) = self.self_ref.get().and_then(Weak::upgrade) {
                    tokio::spawn(async move {
                        let _ = me.ping(&node).await;
                        me.verifying.lock().await.remove(node.id());
                    });
                }
            }
        }

        match request {
            Request::Ping => Ok(Response::Ping),
            Request::FindNode(req) => {
                let (nodes4, nodes6) = self.nodes_for(req.want, &req.target).await;
                let token = if req.want.want_token {
                    Some(self.server.issue_token(&from, &req.target).await)
                } else {
                    None
                };
                Ok(Response::FindNode(FindNodeResponse {
                    nodes4,
                    nodes6,
                    token,
                }))
            }
            Request::FindValue(req) => {
                // token issuance is implicit for value lookups
                let token = Some(self.server.issue_token(&from, &req.target).await);
                let stored = self.storage.value(&req.target).await?;
                let value = stored.filter(|value| match (req.cas, value.is_mutable()) {
                    // nothing newer than what the caller already has
                    (Some(cas), true) => value.sequence_number() > cas,
                    _ => true,
                });
                if let Some(value) = value {
                    return Ok(Response::FindValue(FindValueResponse {
                        nodes4: Vec::new(),
                        nodes6: Vec::new(),
                        token,
                        value: Some(value),
                    }));
                }
                let (nodes4, nodes6) = self.nodes_for(req.want, &req.target).await;
                Ok(Response::FindValue(FindValueResponse {
                    nodes4,
                    nodes6,
                    token,
                    value: None,
                }))
            }
            Request::FindPeer(req) => {
                let token = if req.want.want_token {
                    Some(self.server.issue_token(&from, &req.target).await)
                } else {
                    None
                };
                let max = req.expected_count.map(|e| e as usize).unwrap_or(K).max(1);
                let peers = self.storage.peers(&req.target, max).await?;
                if !peers.is_empty() {
                    return Ok(Response::FindPeer(FindPeerResponse {
                        nodes4: Vec::new(),
                        nodes6: Vec::new(),
                        peers,
                        token,
                    }));
                }
                let (nodes4, nodes6) = self.nodes_for(req.want, &req.target).await;
                Ok(Response::FindPeer(FindPeerResponse {
                    nodes4,
                    nodes6,
                    peers: Vec::new(),
                    token,
                }))
            }
            Request::StoreValue(req) => {
                let target = req.value.id();
                if !self.server.verify_token(req.token, &from, &target).await {
                    return Err(Error::InvalidToken);
                }
                if !req.value.is_valid() {
                    return Err(Error::InvalidRecord("value signature invalid".into()));
                }
                self.storage.put_value(&req.value, req.cas, false).await?;
                Ok(Response::StoreValue)
            }
            Request::AnnouncePeer(req) => {
                if !self
                    .server
                    .verify_token(req.token, &from, req.peer.id())
                    .await
                {
                    return Err(Error::InvalidToken);
                }
                // peer signatures were verified at parse time
                self.storage.put_peer(&req.peer, false).await?;
                Ok(Response::AnnouncePeer)
            }
        }
    }

    async fn on_late_response(&self, from: SocketAddr, from_id: Id) {
        // liveness only, never surfaced to the original caller
        let mut table = self.routing.write().await;
        table.notify_response(NodeInfo::new(from_id, from), None);
    }
}

// ========== NODE ==========

struct NodeInner {
    keypair: KeyPair,
    id: Id,
    dht4: Option<Arc<Dht>>,
    dht6: Option<Arc<Dht>>,
    storage: Arc<dyn DataStorage>,
    crypto: Mutex<CryptoCache>,
    status_tx: broadcast::Sender<StatusEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

/// A running Boson DHT node
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Start a node with in-memory storage
    pub async fn start(config: NodeConfig) -> Result<Node> {
        Self::start_with_storage(config, Arc::new(MemoryStorage::new())).await
    }

    /// Start a node against an external storage backend
    pub async fn start_with_storage(
        config: NodeConfig,
        storage: Arc<dyn DataStorage>,
    ) -> Result<Node> {
        let keypair = config.keypair()?;
        let id = Id::of_keypair(&keypair);
        let (status_tx, _) = broadcast::channel(16);

        if let Some(path) = &config.data_path {
            std::fs::create_dir_all(path)?;
        }
        let cache_path = |file: &str| config.data_path.as_ref().map(|dir| dir.join(file));

        let mut dht4 = None;
        if let Some(addr) = config.addr4()? {
            dht4 = Some(
                Dht::bind(
                    AddressFamily::V4,
                    id,
                    addr,
                    Arc::clone(&storage),
                    cache_path(CACHE_FILE_V4),
                    config.developer_mode,
                    status_tx.clone(),
                )
                .await?,
            );
        }
        let mut dht6 = None;
        if let Some(addr) = config.addr6()? {
            dht6 = Some(
                Dht::bind(
                    AddressFamily::V6,
                    id,
                    addr,
                    Arc::clone(&storage),
                    cache_path(CACHE_FILE_V6),
                    config.developer_mode,
                    status_tx.clone(),
                )
                .await?,
            );
        }
        if dht4.is_none() && dht6.is_none() {
            return Err(Error::State("no address family configured".into()));
        }
        if let (Some(v4), Some(v6)) = (&dht4, &dht6) {
            let _ = v4.sibling.set(Arc::downgrade(v6));
            let _ = v6.sibling.set(Arc::downgrade(v4));
        }

        let inner = Arc::new(NodeInner {
            keypair: keypair.clone(),
            id,
            dht4,
            dht6,
            storage,
            crypto: Mutex::new(CryptoCache::new(keypair)),
            status_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        });
        let node = Node { inner };

        // socket read loops
        {
            let mut tasks = node.inner.tasks.lock().await;
            for dht in node.dhts() {
                let handler: Arc<dyn RpcHandler> = Arc::clone(&dht) as Arc<dyn RpcHandler>;
                tasks.push(tokio::spawn(
                    Arc::clone(&dht.server).run(handler),
                ));
            }
            tasks.push(tokio::spawn(maintenance_loop(Arc::downgrade(&node.inner))));
        }

        // seed contacts from the configuration
        let seeds = config.bootstrap_nodes()?;
        if !seeds.is_empty() {
            let bootstrap_node = node.clone();
            let mut tasks = node.inner.tasks.lock().await;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = bootstrap_node.bootstrap(&seeds).await {
                    warn!(error = %e, "initial bootstrap failed");
                }
            }));
        }

        info!(id = %id, "node started");
        Ok(node)
    }

    fn dhts(&self) -> Vec<Arc<Dht>> {
        self.inner
            .dht4
            .iter()
            .chain(self.inner.dht6.iter())
            .cloned()
            .collect()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    pub fn id(&self) -> &Id {
        &self.inner.id
    }

    /// Socket address of the IPv4 server, when that family is enabled
    pub fn addr4(&self) -> Option<SocketAddr> {
        self.inner.dht4.as_ref().map(|d| d.server.local_addr())
    }

    pub fn addr6(&self) -> Option<SocketAddr> {
        self.inner.dht6.as_ref().map(|d| d.server.local_addr())
    }

    pub fn storage(&self) -> Arc<dyn DataStorage> {
        Arc::clone(&self.inner.storage)
    }

    /// Connection status events for both families
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.status_tx.subscribe()
    }

    /// Ping the given seeds and run a self-lookup on every family
    pub async fn bootstrap(&self, seeds: &[NodeInfo]) -> Result<()> {
        self.ensure_running()?;
        let mut last_err = None;
        let mut any = false;
        for dht in self.dhts() {
            match dht.bootstrap(seeds).await {
                Ok(()) => any = true,
                Err(e) => last_err = Some(e),
            }
        }
        match (any, last_err) {
            (true, _) | (false, None) => Ok(()),
            (false, Some(e)) => Err(e),
        }
    }

    /// Locate a specific node by id; returns its contact per family
    pub async fn find_node(&self, target: &Id) -> Result<Vec<NodeInfo>> {
        self.ensure_running()?;
        let mut found = Vec::new();
        for dht in self.dhts() {
            let responders = dht.engine.find_node(*target, false).await?;
            found.extend(
                responders
                    .into_iter()
                    .map(|r| r.node)
                    .filter(|n| n.id() == target),
            );
        }
        Ok(found)
    }

    /// Fetch a value from the overlay, preferring the highest sequence
    /// number for mutable records
    pub async fn find_value(&self, target: &Id, options: LookupOptions) -> Result<Option<Value>> {
        self.ensure_running()?;
        // a locally stored copy still participates in the freshness race
        let mut best = self.inner.storage.value(target).await?;
        for dht in self.dhts() {
            let cas = options
                .cas
                .or_else(|| best.as_ref().filter(|v| v.is_mutable()).map(Value::sequence_number));
            if let Some(found) = dht.engine.find_value(*target, cas, options.mode).await? {
                if !found.is_mutable() {
                    return Ok(Some(found));
                }
                let better = best
                    .as_ref()
                    .map_or(true, |b| found.sequence_number() > b.sequence_number());
                if better {
                    best = Some(found);
                }
            }
        }
        Ok(best)
    }

    /// Publish a value
    pub async fn store_value(&self, value: &Value, options: StoreOptions) -> Result<()> {
        self.ensure_running()?;
        if !value.is_valid() {
            return Err(Error::InvalidRecord("value signature invalid".into()));
        }
        self.inner
            .storage
            .put_value(value, options.cas, options.persistent)
            .await?;
        if options.local_only {
            return Ok(());
        }

        let mut stored = 0;
        let mut last_err = None;
        for dht in self.dhts() {
            match dht.engine.store_value(value, options.cas).await {
                Ok(n) => stored += n,
                Err(e) => last_err = Some(e),
            }
        }
        if stored > 0 {
            Ok(())
        } else {
            Err(last_err.unwrap_or(Error::Timeout))
        }
    }

    /// Find service peers announced under `target`
    pub async fn find_peer(
        &self,
        target: &Id,
        expected: Option<usize>,
    ) -> Result<Vec<PeerInfo>> {
        self.ensure_running()?;
        let mut peers = self.inner.storage.peers(target, expected.unwrap_or(K)).await?;
        for dht in self.dhts() {
            for peer in dht.engine.find_peers(*target, expected).await? {
                if !peers.iter().any(|p| p.key() == peer.key()) {
                    peers.push(peer);
                }
            }
            if matches!(expected, Some(e) if peers.len() >= e) {
                break;
            }
        }
        Ok(peers)
    }

    /// Announce a service peer owned by this node's identity (or a
    /// service key the caller controls)
    pub async fn announce_peer(&self, peer: &PeerInfo, options: StoreOptions) -> Result<()> {
        self.ensure_running()?;
        if !peer.is_valid() {
            return Err(Error::InvalidRecord("peer signature invalid".into()));
        }
        self.inner
            .storage
            .put_peer(peer, options.persistent)
            .await?;
        if options.local_only {
            return Ok(());
        }

        let mut stored = 0;
        let mut last_err = None;
        for dht in self.dhts() {
            match dht.engine.announce_peer(peer).await {
                Ok(n) => stored += n,
                Err(e) => last_err = Some(e),
            }
        }
        if stored > 0 {
            Ok(())
        } else {
            Err(last_err.unwrap_or(Error::Timeout))
        }
    }

    // ========== IDENTITY CRYPTO SURFACE ==========

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.inner.keypair.sign(data)
    }

    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.inner.keypair.public_key().verify(data, signature)
    }

    /// Seal `data` toward another identity
    pub async fn encrypt_to(&self, remote: &Id, nonce: &Nonce, data: &[u8]) -> Result<Vec<u8>> {
        let context = self.inner.crypto.lock().await.get(remote)?;
        Ok(context.encrypt(nonce, data)?)
    }

    /// Open a sealed payload from another identity
    pub async fn decrypt_from(&self, remote: &Id, nonce: &Nonce, data: &[u8]) -> Result<Vec<u8>> {
        let context = self.inner.crypto.lock().await.get(remote)?;
        Ok(context.decrypt(nonce, data)?)
    }

    /// Stop the node: cancel in-flight calls, snapshot routing tables,
    /// release the storage backend
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        for dht in self.dhts() {
            dht.server.cancel_all().await;
            dht.save_cache().await;
            dht.set_status(ConnectionStatus::Disconnected).await;
        }
        self.inner.storage.close().await?;
        info!(id = %self.inner.id, "node stopped");
        Ok(())
    }
}

// ========== MAINTENANCE ==========

async fn maintenance_loop(inner: Weak<NodeInner>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_cache_save = tokio::time::Instant::now();

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let node = Node { inner };

        for dht in node.dhts() {
            dht.maintenance_tick().await;
        }

        if let Err(e) = republish(&node).await {
            debug!(error = %e, "republish pass failed");
        }
        if let Err(e) = node.inner.storage.purge_expired().await {
            debug!(error = %e, "storage purge failed");
        }

        if last_cache_save.elapsed() >= CACHE_SAVE_INTERVAL {
            last_cache_save = tokio::time::Instant::now();
            for dht in node.dhts() {
                dht.save_cache().await;
            }
        }
    }
}

/// Re-run the write protocol for persistent records whose last announce
/// is older than the re-announce interval
async fn republish(node: &Node) -> Result<()> {
    let before = SystemTime::now() - RE_ANNOUNCE_INTERVAL;

    for value in node.inner.storage.values_to_announce(before).await? {
        let mut announced = false;
        for dht in node.dhts() {
            if dht.engine.store_value(&value, None).await.is_ok() {
                announced = true;
            }
        }
        if announced {
            node.inner.storage.mark_value_announced(&value.id()).await?;
        }
    }

    for peer in node.inner.storage.peers_to_announce(before).await? {
        let mut announced = false;
        for dht in node.dhts() {
            if dht.engine.announce_peer(&peer).await.is_ok() {
                announced = true;
            }
        }
        if announced {
            node.inner
                .storage
                .mark_peer_announced(peer.id(), peer.fingerprint())
                .await?;
        }
    }
    Ok(())
}
