//! Multi-node scenarios over loopback UDP

use std::time::Duration;

use boson_crypto::{KeyPair, Nonce};
use boson_dht::{
    Id, LookupOptions, Node, NodeConfig, NodeInfo, PeerInfo, StoreOptions, Value,
};

fn test_config() -> NodeConfig {
    NodeConfig {
        host4: Some("127.0.0.1".to_string()),
        host6: None,
        port: 0,
        private_key: None,
        generate_private_key: true,
        data_path: None,
        bootstrap: Vec::new(),
        developer_mode: true,
    }
}

async fn start_node() -> Node {
    Node::start(test_config()).await.expect("node starts")
}

fn contact(node: &Node) -> NodeInfo {
    NodeInfo::new(*node.id(), node.addr4().expect("ipv4 enabled"))
}

/// A hub plus `n` members all bootstrapped through the hub
async fn mesh(n: usize) -> (Node, Vec<Node>) {
    let hub = start_node().await;
    let mut members = Vec::with_capacity(n);
    for _ in 0..n {
        let member = start_node().await;
        member
            .bootstrap(&[contact(&hub)])
            .await
            .expect("bootstrap succeeds");
        members.push(member);
    }
    // let the hub's reverse-verification pings settle so every member is
    // a referrable main entry
    tokio::time::sleep(Duration::from_millis(300)).await;
    (hub, members)
}

#[tokio::test]
async fn test_store_then_find_across_nodes() {
    let (hub, members) = mesh(2).await;
    let writer = &members[0];
    let reader = &members[1];

    let kp = KeyPair::random();
    let value =
        Value::create_signed_value(&kp, Nonce::random(), 10, b"hello overlay".to_vec()).unwrap();
    writer
        .store_value(&value, StoreOptions::default())
        .await
        .expect("store succeeds");

    let found = reader
        .find_value(&value.id(), LookupOptions::default())
        .await
        .expect("lookup succeeds")
        .expect("value found");
    assert_eq!(found, value);
    assert_eq!(found.sequence_number(), 10);

    for node in members.iter().chain([&hub]) {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_update_chain_and_stale_write() {
    let (hub, members) = mesh(1).await;
    let writer = &members[0];

    let kp = KeyPair::random();
    let nonce = Nonce::random();
    let v0 = Value::create_signed_value(&kp, nonce, 10, b"v0".to_vec()).unwrap();
    assert_eq!(v0.id(), Id::of_sha256(kp.public_key().as_bytes()));
    writer.store_value(&v0, StoreOptions::default()).await.unwrap();

    let v1 = v0.update(b"v1".to_vec()).unwrap();
    assert_eq!(v1.sequence_number(), 11);
    assert!(v1.is_valid());
    writer.store_value(&v1, StoreOptions::default()).await.unwrap();

    // a stale sequence number is refused
    let stale = Value::create_signed_value(&kp, nonce, 9, b"bad".to_vec()).unwrap();
    let err = writer
        .store_value(&stale, StoreOptions::default())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("not monotonic"),
        "unexpected error: {}",
        err
    );

    let read_back = hub
        .find_value(&v0.id(), LookupOptions::default())
        .await
        .unwrap()
        .expect("value present");
    assert_eq!(read_back.sequence_number(), 11);

    for node in members.iter().chain([&hub]) {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_conservative_read_prefers_highest_seq() {
    // three holders primed with seq 3, 5 and 4 for the same id
    let (hub, members) = mesh(3).await;

    let kp = KeyPair::random();
    let nonce = Nonce::random();
    let seqs = [3u32, 5, 4];
    let mut target = None;
    for (node, seq) in members.iter().zip(seqs) {
        let value = Value::create_signed_value(
            &kp,
            nonce,
            seq,
            format!("payload-{}", seq).into_bytes(),
        )
        .unwrap();
        target = Some(value.id());
        node.store_value(
            &value,
            StoreOptions {
                local_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }
    let target = target.unwrap();

    // the hub knows all three members; a conservative lookup must surface
    // seq 5 regardless of who answers first
    let found = hub
        .find_value(&target, LookupOptions::default())
        .await
        .unwrap()
        .expect("some holder answers");
    assert_eq!(found.sequence_number(), 5);

    for node in members.iter().chain([&hub]) {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_announce_and_find_peer() {
    let (hub, members) = mesh(2).await;
    let announcer = &members[0];
    let seeker = &members[1];

    let service = KeyPair::random();
    let peer = PeerInfo::create(&service, None, "udp://203.0.113.5:7000", None).unwrap();
    announcer
        .announce_peer(&peer, StoreOptions::default())
        .await
        .expect("announce succeeds");

    let found = seeker
        .find_peer(peer.id(), Some(1))
        .await
        .expect("lookup succeeds");
    assert!(!found.is_empty());
    assert_eq!(found[0], peer);
    assert!(found[0].is_valid());

    for node in members.iter().chain([&hub]) {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_find_node_locates_member() {
    let (hub, members) = mesh(2).await;
    let target = &members[1];

    let found = members[0].find_node(target.id()).await.unwrap();
    assert!(found.iter().any(|n| n.id() == target.id()));

    for node in members.iter().chain([&hub]) {
        node.stop().await.unwrap();
    }
}

#[tokio::test]
async fn test_status_progression() {
    let hub = start_node().await;
    let member = start_node().await;
    let mut events = member.subscribe_status();

    member.bootstrap(&[contact(&hub)]).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        seen.push(event.status);
    }
    use boson_dht::ConnectionStatus::*;
    assert!(seen.contains(&Connecting));
    assert!(seen.contains(&Connected));
    assert!(seen.contains(&Profound));

    member.stop().await.unwrap();
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn test_encrypt_between_nodes() {
    let a = start_node().await;
    let b = start_node().await;

    let nonce = Nonce::random();
    let sealed = a.encrypt_to(b.id(), &nonce, b"between nodes").await.unwrap();
    let opened = b.decrypt_from(a.id(), &nonce, &sealed).await.unwrap();
    assert_eq!(opened, b"between nodes");

    // node signatures verify against the node id
    let signature = a.sign(b"statement");
    assert!(a.verify(b"statement", &signature));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopped_node_refuses_operations() {
    let node = start_node().await;
    node.stop().await.unwrap();

    let err = node.find_node(&Id::random()).await.unwrap_err();
    assert!(matches!(err, boson_dht::Error::NotRunning));
}
