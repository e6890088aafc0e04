//! Wire codec round-trips across both encodings

use boson_crypto::{KeyPair, Nonce};
use boson_dht::id::Id;
use boson_dht::node_info::NodeInfo;
use boson_dht::peer_info::PeerInfo;
use boson_dht::value::Value;
use boson_dht::wire::{
    cbor, json, AnnouncePeerRequest, ErrorResult, FindNodeRequest, FindNodeResponse,
    FindPeerRequest, FindPeerResponse, FindValueRequest, FindValueResponse, LookupWant, Message,
    Method, Request, Response, StoreValueRequest,
};

fn node(port: u16) -> NodeInfo {
    NodeInfo::new(Id::random(), format!("198.51.100.7:{}", port).parse().unwrap())
}

fn node6(port: u16) -> NodeInfo {
    NodeInfo::new(
        Id::random(),
        format!("[2001:db8::1]:{}", port).parse().unwrap(),
    )
}

fn assert_round_trip(message: Message) {
    // parse(encode(m)) == m, and encode is idempotent over a re-parse
    let bytes = cbor::encode(&message).unwrap();
    let parsed = cbor::decode(&bytes).unwrap();
    assert_eq!(parsed, message);
    assert_eq!(cbor::encode(&parsed).unwrap(), bytes);

    let text = json::encode(&message).unwrap();
    let parsed = json::decode(&text).unwrap();
    assert_eq!(parsed, message);
    assert_eq!(json::encode(&parsed).unwrap(), text);
}

#[test]
fn test_ping_round_trip() {
    assert_round_trip(Message::request(Id::random(), 1, Request::Ping));
    assert_round_trip(Message::response(Id::random(), 1, Response::Ping));
}

#[test]
fn test_find_node_round_trip() {
    assert_round_trip(Message::request(
        Id::random(),
        42,
        Request::FindNode(FindNodeRequest {
            target: Id::random(),
            want: LookupWant {
                want4: true,
                want6: true,
                want_token: true,
            },
        }),
    ));
    assert_round_trip(Message::response(
        Id::random(),
        42,
        Response::FindNode(FindNodeResponse {
            nodes4: vec![node(1), node(2), node(3)],
            nodes6: vec![node6(4)],
            token: Some(0xDEAD_BEEF),
        }),
    ));
    // empty node lists are omitted on the wire and come back empty
    assert_round_trip(Message::response(
        Id::random(),
        43,
        Response::FindNode(FindNodeResponse::default()),
    ));
}

#[test]
fn test_find_value_round_trip() {
    assert_round_trip(Message::request(
        Id::random(),
        7,
        Request::FindValue(FindValueRequest {
            target: Id::random(),
            want: LookupWant::nodes4(),
            cas: Some(12),
        }),
    ));

    let kp = KeyPair::random();
    let signed = Value::create_signed_value(&kp, Nonce::random(), 9, b"payload".to_vec()).unwrap();
    assert_round_trip(Message::response(
        Id::random(),
        7,
        Response::FindValue(FindValueResponse {
            nodes4: Vec::new(),
            nodes6: Vec::new(),
            token: Some(5),
            value: Some(signed),
        }),
    ));

    let immutable = Value::create_value(b"immutable blob".to_vec()).unwrap();
    assert_round_trip(Message::response(
        Id::random(),
        8,
        Response::FindValue(FindValueResponse {
            nodes4: vec![node(9)],
            nodes6: Vec::new(),
            token: None,
            value: Some(immutable),
        }),
    ));
}

#[test]
fn test_store_value_round_trip() {
    let kp = KeyPair::random();
    let recipient = KeyPair::random();
    let encrypted = Value::create_encrypted_value(
        &kp,
        &Id::of_keypair(&recipient),
        Nonce::random(),
        3,
        b"sealed".to_vec(),
    )
    .unwrap();

    assert_round_trip(Message::request(
        Id::random(),
        11,
        Request::StoreValue(StoreValueRequest {
            token: 991,
            cas: Some(2),
            value: encrypted,
        }),
    ));
    assert_round_trip(Message::response(Id::random(), 11, Response::StoreValue));
}

#[test]
fn test_announce_peer_round_trip() {
    let owner = KeyPair::random();
    let origin = KeyPair::random();
    let peer = PeerInfo::create_with(
        &owner,
        Some(&origin),
        Some(-77),
        4,
        "udp://198.51.100.9:9999",
        Some(b"extra".to_vec()),
    )
    .unwrap();

    assert_round_trip(Message::request(
        Id::random(),
        12,
        Request::AnnouncePeer(AnnouncePeerRequest {
            token: 5150,
            cas: None,
            peer,
        }),
    ));
    assert_round_trip(Message::response(Id::random(), 12, Response::AnnouncePeer));
}

#[test]
fn test_error_round_trip() {
    assert_round_trip(Message {
        id: Id::random(),
        txid: 99,
        version: Some(1),
        body: boson_dht::wire::Body::Error(ErrorResult {
            method: Method::StoreValue,
            code: 203,
            message: "invalid token".to_string(),
        }),
    });
}

#[test]
fn test_compact_peer_list() {
    // five peers sharing one id; the wire form carries the id only once
    let owner = KeyPair::random();
    let peers: Vec<PeerInfo> = (1..=5)
        .map(|i| {
            PeerInfo::create_with(
                &owner,
                None,
                Some(i as i64),
                0,
                &format!("udp://198.51.100.{}:9000", i),
                None,
            )
            .unwrap()
        })
        .collect();
    let shared_id = *peers[0].id();

    let message = Message::response(
        Id::random(),
        21,
        Response::FindPeer(FindPeerResponse {
            nodes4: Vec::new(),
            nodes6: Vec::new(),
            peers: peers.clone(),
            token: None,
        }),
    );

    let bytes = cbor::encode(&message).unwrap();

    // inspect the raw tree: "id" is present at index 0 and absent after
    let tree: ciborium::Value = ciborium::from_reader(&bytes[..]).unwrap();
    let ciborium::Value::Map(envelope) = tree else {
        panic!("message is a map")
    };
    let body = envelope
        .iter()
        .find(|(k, _)| matches!(k, ciborium::Value::Text(t) if t == "r"))
        .map(|(_, v)| v.clone())
        .expect("response body present");
    let ciborium::Value::Map(body) = body else {
        panic!("body is a map")
    };
    let peer_array = body
        .iter()
        .find(|(k, _)| matches!(k, ciborium::Value::Text(t) if t == "p"))
        .map(|(_, v)| v.clone())
        .expect("peer list present");
    let ciborium::Value::Array(entries) = peer_array else {
        panic!("peer list is an array")
    };
    assert_eq!(entries.len(), 5);
    for (index, entry) in entries.iter().enumerate() {
        let ciborium::Value::Map(fields) = entry else {
            panic!("peer entry is a map")
        };
        let has_id = fields
            .iter()
            .any(|(k, _)| matches!(k, ciborium::Value::Text(t) if t == "id"));
        assert_eq!(has_id, index == 0, "peer {} id presence", index);
    }

    // every decoded peer reconstructs the shared id
    let decoded = cbor::decode(&bytes).unwrap();
    assert_eq!(decoded, message);
    let boson_dht::wire::Body::Response(Response::FindPeer(rsp)) = decoded.body else {
        panic!("find peer response")
    };
    assert_eq!(rsp.peers.len(), 5);
    for peer in &rsp.peers {
        assert_eq!(*peer.id(), shared_id);
        assert!(peer.is_valid());
    }

    // same property through the textual codec
    let text = json::encode(&message).unwrap();
    assert_eq!(json::decode(&text).unwrap(), message);
}

#[test]
fn test_strict_schema_rejects_unknown_key() {
    let message = Message::request(Id::random(), 3, Request::Ping);
    let bytes = cbor::encode(&message).unwrap();

    let mut tree: ciborium::Value = ciborium::from_reader(&bytes[..]).unwrap();
    if let ciborium::Value::Map(entries) = &mut tree {
        entries.push((
            ciborium::Value::Text("zz".to_string()),
            ciborium::Value::Integer(1.into()),
        ));
    }
    let mut tampered = Vec::new();
    ciborium::into_writer(&tree, &mut tampered).unwrap();
    assert!(cbor::decode(&tampered).is_err());
}

#[test]
fn test_unknown_composite_rejected() {
    let message = Message::request(Id::random(), 3, Request::Ping);
    let bytes = cbor::encode(&message).unwrap();

    let mut tree: ciborium::Value = ciborium::from_reader(&bytes[..]).unwrap();
    if let ciborium::Value::Map(entries) = &mut tree {
        for (k, v) in entries.iter_mut() {
            if matches!(k, ciborium::Value::Text(t) if t == "y") {
                // method bits 0x1F are unassigned
                *v = ciborium::Value::Integer(0x3F.into());
            }
        }
    }
    let mut tampered = Vec::new();
    ciborium::into_writer(&tree, &mut tampered).unwrap();
    assert!(cbor::decode(&tampered).is_err());
}

#[test]
fn test_codecs_agree_on_model() {
    let kp = KeyPair::random();
    let value = Value::create_signed_value(&kp, Nonce::random(), 2, b"cross".to_vec()).unwrap();
    let message = Message::response(
        Id::random(),
        17,
        Response::FindValue(FindValueResponse {
            nodes4: vec![node(1)],
            nodes6: vec![node6(2)],
            token: Some(3),
            value: Some(value),
        }),
    );

    // binary and textual modes read the same logical model
    let via_cbor = cbor::decode(&cbor::encode(&message).unwrap()).unwrap();
    let via_json = json::decode(&json::encode(&message).unwrap()).unwrap();
    assert_eq!(via_cbor, via_json);
}
