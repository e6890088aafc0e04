//! Binary codec
//!
//! Strict CBOR encoding of the wire model. Everything is built from and
//! parsed into explicit value trees: the envelope is polymorphic on the
//! composite type byte, the schema rejects unknown keys, and the compact
//! peer-list form needs decode-time context, none of which fits a derived
//! serializer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use boson_crypto::{Nonce, Signature};
use ciborium::value::{Integer, Value as Cbor};

use crate::error::{Error, Result};
use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::value::Value;
use crate::wire::*;

pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let tree = message_tree(message);
    let mut buf = Vec::new();
    ciborium::into_writer(&tree, &mut buf)
        .map_err(|e| Error::Protocol(format!("cbor encode: {}", e)))?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Message> {
    let tree: Cbor = ciborium::from_reader(bytes)
        .map_err(|e| Error::Protocol(format!("cbor decode: {}", e)))?;
    message_from_tree(tree)
}

// ========== ENCODING ==========

fn uint(v: u64) -> Cbor {
    Cbor::Integer(Integer::from(v))
}

fn int(v: i64) -> Cbor {
    Cbor::Integer(Integer::from(v))
}

fn bytes(b: &[u8]) -> Cbor {
    Cbor::Bytes(b.to_vec())
}

fn text(s: &str) -> Cbor {
    Cbor::Text(s.to_string())
}

struct MapBuilder(Vec<(Cbor, Cbor)>);

impl MapBuilder {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn put(&mut self, key: &str, value: Cbor) -> &mut Self {
        self.0.push((text(key), value));
        self
    }

    fn put_opt(&mut self, key: &str, value: Option<Cbor>) -> &mut Self {
        if let Some(value) = value {
            self.put(key, value);
        }
        self
    }

    fn build(self) -> Cbor {
        Cbor::Map(self.0)
    }
}

fn ip_octets(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn node_tree(node: &NodeInfo) -> Cbor {
    Cbor::Array(vec![
        bytes(node.id().as_bytes()),
        bytes(&ip_octets(&node.host())),
        uint(node.port() as u64),
    ])
}

fn node_list(nodes: &[NodeInfo]) -> Option<Cbor> {
    if nodes.is_empty() {
        None
    } else {
        Some(Cbor::Array(nodes.iter().map(node_tree).collect()))
    }
}

/// Peers in a response share one id: only the entry at index 0 carries it
fn peer_tree(peer: &PeerInfo, carry_id: bool) -> Cbor {
    let mut map = MapBuilder::new();
    if carry_id {
        map.put("id", bytes(peer.id().as_bytes()));
    }
    map.put("n", bytes(peer.nonce().as_bytes()));
    if peer.sequence_number() != 0 {
        map.put("seq", uint(peer.sequence_number() as u64));
    }
    map.put_opt("o", peer.origin().map(|o| bytes(o.as_bytes())));
    map.put_opt(
        "os",
        peer.origin_signature().map(|s| bytes(s.as_bytes())),
    );
    map.put("sig", bytes(peer.signature().as_bytes()));
    map.put("f", int(peer.fingerprint()));
    map.put("e", text(peer.endpoint()));
    map.put_opt("ex", peer.extra().map(bytes));
    map.build()
}

/// Flat value fields shared by `FindValueResponse` and `StoreValueRequest`
fn put_value_fields(map: &mut MapBuilder, value: &Value) {
    map.put_opt("k", value.public_key().map(|k| bytes(k.as_bytes())));
    map.put_opt("rec", value.recipient().map(|r| bytes(r.as_bytes())));
    map.put_opt("n", value.nonce().map(|n| bytes(n.as_bytes())));
    if value.sequence_number() != 0 {
        map.put("seq", uint(value.sequence_number() as u64));
    }
    map.put_opt("sig", value.signature().map(|s| bytes(s.as_bytes())));
    map.put("v", bytes(value.data()));
}

fn body_tree(body: &Body) -> Option<Cbor> {
    match body {
        Body::Request(Request::Ping) => None,
        Body::Request(Request::FindNode(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", bytes(req.target.as_bytes()));
            map.put("w", uint(req.want.to_bits() as u64));
            Some(map.build())
        }
        Body::Request(Request::FindPeer(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", bytes(req.target.as_bytes()));
            map.put("w", uint(req.want.to_bits() as u64));
            map.put_opt("cas", req.cas.map(|c| uint(c as u64)));
            map.put_opt("e", req.expected_count.map(|e| uint(e as u64)));
            Some(map.build())
        }
        Body::Request(Request::FindValue(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", bytes(req.target.as_bytes()));
            map.put("w", uint(req.want.to_bits() as u64));
            map.put_opt("cas", req.cas.map(|c| uint(c as u64)));
            Some(map.build())
        }
        Body::Request(Request::StoreValue(req)) => {
            let mut map = MapBuilder::new();
            map.put("tok", uint(req.token as u64));
            map.put_opt("cas", req.cas.map(|c| uint(c as u64)));
            put_value_fields(&mut map, &req.value);
            Some(map.build())
        }
        Body::Request(Request::AnnouncePeer(req)) => {
            let peer = &req.peer;
            let mut map = MapBuilder::new();
            map.put("tok", uint(req.token as u64));
            map.put_opt("cas", req.cas.map(|c| uint(c as u64)));
            map.put("t", bytes(peer.id().as_bytes()));
            map.put("n", bytes(peer.nonce().as_bytes()));
            if peer.sequence_number() != 0 {
                map.put("seq", uint(peer.sequence_number() as u64));
            }
            map.put_opt("o", peer.origin().map(|o| bytes(o.as_bytes())));
            map.put_opt(
                "os",
                peer.origin_signature().map(|s| bytes(s.as_bytes())),
            );
            map.put("sig", bytes(peer.signature().as_bytes()));
            map.put("f", int(peer.fingerprint()));
            map.put("e", text(peer.endpoint()));
            map.put_opt("ex", peer.extra().map(bytes));
            Some(map.build())
        }
        Body::Response(Response::Ping)
        | Body::Response(Response::StoreValue)
        | Body::Response(Response::AnnouncePeer) => None,
        Body::Response(Response::FindNode(rsp)) => {
            let mut map = MapBuilder::new();
            map.put_opt("n4", node_list(&rsp.nodes4));
            map.put_opt("n6", node_list(&rsp.nodes6));
            map.put_opt("tok", rsp.token.map(|t| uint(t as u64)));
            Some(map.build())
        }
        Body::Response(Response::FindPeer(rsp)) => {
            let mut map = MapBuilder::new();
            map.put_opt("n4", node_list(&rsp.nodes4));
            map.put_opt("n6", node_list(&rsp.nodes6));
            map.put_opt("tok", rsp.token.map(|t| uint(t as u64)));
            if !rsp.peers.is_empty() {
                let peers = rsp
                    .peers
                    .iter()
                    .enumerate()
                    .map(|(i, p)| peer_tree(p, i == 0))
                    .collect();
                map.put("p", Cbor::Array(peers));
            }
            Some(map.build())
        }
        Body::Response(Response::FindValue(rsp)) => {
            let mut map = MapBuilder::new();
            map.put_opt("n4", node_list(&rsp.nodes4));
            map.put_opt("n6", node_list(&rsp.nodes6));
            map.put_opt("tok", rsp.token.map(|t| uint(t as u64)));
            if let Some(value) = &rsp.value {
                put_value_fields(&mut map, value);
            }
            Some(map.build())
        }
        Body::Error(err) => {
            let mut map = MapBuilder::new();
            map.put("c", int(err.code as i64));
            map.put("m", text(&err.message));
            Some(map.build())
        }
    }
}

fn message_tree(message: &Message) -> Cbor {
    let mut map = MapBuilder::new();
    map.put("y", uint(message.type_byte() as u64));
    map.put("t", uint(message.txid as u64));
    map.put("i", bytes(message.id.as_bytes()));
    if let Some(body) = body_tree(&message.body) {
        let key = match message.body {
            Body::Request(_) => "q",
            Body::Response(_) => "r",
            Body::Error(_) => "e",
        };
        map.put(key, body);
    }
    map.put_opt("v", message.version.map(|v| uint(v as u64)));
    map.build()
}

// ========== DECODING ==========

/// Strict map reader: text keys, no duplicates, and nothing may be left
/// over once the schema consumed its fields
struct MapReader {
    entries: Vec<(String, Cbor)>,
}

impl MapReader {
    fn new(value: Cbor, context: &str) -> Result<Self> {
        let Cbor::Map(raw) = value else {
            return Err(Error::Protocol(format!("{}: expected a map", context)));
        };
        let mut entries: Vec<(String, Cbor)> = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let Cbor::Text(key) = key else {
                return Err(Error::Protocol(format!("{}: non-text map key", context)));
            };
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(Error::Protocol(format!("{}: duplicate key '{}'", context, key)));
            }
            entries.push((key, value));
        }
        Ok(Self { entries })
    }

    fn take(&mut self, key: &str) -> Option<Cbor> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    fn finish(self, context: &str) -> Result<()> {
        if let Some((key, _)) = self.entries.first() {
            return Err(Error::Protocol(format!(
                "{}: unexpected key '{}'",
                context, key
            )));
        }
        Ok(())
    }
}

fn as_u64(value: Cbor, context: &str) -> Result<u64> {
    let Cbor::Integer(i) = value else {
        return Err(Error::Protocol(format!("{}: expected an integer", context)));
    };
    u64::try_from(i128::from(i))
        .map_err(|_| Error::Protocol(format!("{}: integer out of range", context)))
}

fn as_u32(value: Cbor, context: &str) -> Result<u32> {
    let v = as_u64(value, context)?;
    u32::try_from(v).map_err(|_| Error::Protocol(format!("{}: integer out of range", context)))
}

fn as_i64(value: Cbor, context: &str) -> Result<i64> {
    let Cbor::Integer(i) = value else {
        return Err(Error::Protocol(format!("{}: expected an integer", context)));
    };
    i64::try_from(i128::from(i))
        .map_err(|_| Error::Protocol(format!("{}: integer out of range", context)))
}

fn as_bytes(value: Cbor, context: &str) -> Result<Vec<u8>> {
    let Cbor::Bytes(b) = value else {
        return Err(Error::Protocol(format!("{}: expected a byte string", context)));
    };
    Ok(b)
}

fn as_text(value: Cbor, context: &str) -> Result<String> {
    let Cbor::Text(s) = value else {
        return Err(Error::Protocol(format!("{}: expected a text string", context)));
    };
    Ok(s)
}

fn as_array(value: Cbor, context: &str) -> Result<Vec<Cbor>> {
    let Cbor::Array(a) = value else {
        return Err(Error::Protocol(format!("{}: expected an array", context)));
    };
    Ok(a)
}

fn id_from(value: Cbor, context: &str) -> Result<Id> {
    Id::from_bytes(&as_bytes(value, context)?)
        .map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn nonce_from(value: Cbor, context: &str) -> Result<Nonce> {
    Nonce::from_bytes(&as_bytes(value, context)?)
        .map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn signature_from(value: Cbor, context: &str) -> Result<Signature> {
    Signature::from_bytes(&as_bytes(value, context)?)
        .map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn node_from(value: Cbor) -> Result<NodeInfo> {
    let mut parts = as_array(value, "node")?;
    if parts.len() != 3 {
        return Err(Error::Protocol(format!(
            "node: expected 3 elements, got {}",
            parts.len()
        )));
    }
    let port = as_u64(parts.pop().expect("len checked"), "node port")?;
    let port = u16::try_from(port)
        .map_err(|_| Error::Protocol("node port out of range".into()))?;
    let ip_bytes = as_bytes(parts.pop().expect("len checked"), "node address")?;
    let ip = match ip_bytes.len() {
        4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(&ip_bytes[..]).expect("len checked"))),
        16 => IpAddr::V6(Ipv6Addr::from(
            <[u8; 16]>::try_from(&ip_bytes[..]).expect("len checked"),
        )),
        n => return Err(Error::Protocol(format!("node address: {} bytes", n))),
    };
    let id = id_from(parts.pop().expect("len checked"), "node id")?;
    Ok(NodeInfo::new(id, SocketAddr::new(ip, port)))
}

fn node_list_from(value: Option<Cbor>, context: &str) -> Result<Vec<NodeInfo>> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => as_array(v, context)?.into_iter().map(node_from).collect(),
    }
}

fn peer_from(value: Cbor, expected_id: Option<Id>) -> Result<PeerInfo> {
    let mut map = MapReader::new(value, "peer")?;
    let id = match map.take("id") {
        Some(v) => {
            let explicit = id_from(v, "peer id")?;
            if let Some(expected) = expected_id {
                if explicit != expected {
                    return Err(Error::Protocol("peer id diverges from list head".into()));
                }
            }
            explicit
        }
        None => expected_id.ok_or_else(|| Error::Protocol("first peer must carry its id".into()))?,
    };
    let nonce = nonce_from(
        map.take("n")
            .ok_or_else(|| Error::Protocol("peer: missing nonce".into()))?,
        "peer nonce",
    )?;
    let seq = match map.take("seq") {
        Some(v) => as_u32(v, "peer seq")?,
        None => 0,
    };
    let origin = map.take("o").map(|v| id_from(v, "peer origin")).transpose()?;
    let origin_signature = map
        .take("os")
        .map(|v| signature_from(v, "peer origin signature"))
        .transpose()?;
    let signature = signature_from(
        map.take("sig")
            .ok_or_else(|| Error::Protocol("peer: missing signature".into()))?,
        "peer signature",
    )?;
    let fingerprint = as_i64(
        map.take("f")
            .ok_or_else(|| Error::Protocol("peer: missing fingerprint".into()))?,
        "peer fingerprint",
    )?;
    let endpoint = as_text(
        map.take("e")
            .ok_or_else(|| Error::Protocol("peer: missing endpoint".into()))?,
        "peer endpoint",
    )?;
    let extra = map.take("ex").map(|v| as_bytes(v, "peer extra")).transpose()?;
    map.finish("peer")?;

    PeerInfo::from_parts(
        id,
        nonce,
        seq,
        origin,
        origin_signature,
        signature,
        fingerprint,
        endpoint,
        extra,
    )
}

fn peer_list_from(value: Cbor) -> Result<Vec<PeerInfo>> {
    let raw = as_array(value, "peers")?;
    let mut peers = Vec::with_capacity(raw.len());
    let mut expected_id = None;
    for entry in raw {
        let peer = peer_from(entry, expected_id)?;
        expected_id.get_or_insert(*peer.id());
        peers.push(peer);
    }
    Ok(peers)
}

/// Flat value fields; `required` demands a value be present
fn value_from(map: &mut MapReader, required: bool) -> Result<Option<Value>> {
    let public_key = map.take("k").map(|v| id_from(v, "value key")).transpose()?;
    let recipient = map
        .take("rec")
        .map(|v| id_from(v, "value recipient"))
        .transpose()?;
    let nonce = map
        .take("n")
        .map(|v| nonce_from(v, "value nonce"))
        .transpose()?;
    let seq = match map.take("seq") {
        Some(v) => as_u32(v, "value seq")?,
        None => 0,
    };
    let signature = map
        .take("sig")
        .map(|v| signature_from(v, "value signature"))
        .transpose()?;
    let data = map.take("v").map(|v| as_bytes(v, "value data")).transpose()?;

    match data {
        Some(data) => Ok(Some(Value::from_parts(
            public_key, recipient, nonce, seq, signature, data,
        )?)),
        None => {
            let stray_field = public_key.is_some()
                || recipient.is_some()
                || nonce.is_some()
                || signature.is_some()
                || seq != 0;
            if required || stray_field {
                return Err(Error::Protocol("value: missing data".into()));
            }
            Ok(None)
        }
    }
}

fn request_from(method: Method, body: Option<Cbor>) -> Result<Request> {
    match (method, body) {
        (Method::Ping, None) => Ok(Request::Ping),
        (Method::Ping, Some(_)) => Err(Error::Protocol("ping request carries a body".into())),
        (_, None) => Err(Error::Protocol("request body missing".into())),
        (Method::FindNode, Some(body)) => {
            let mut map = MapReader::new(body, "findNode")?;
            let target = id_from(
                map.take("t")
                    .ok_or_else(|| Error::Protocol("findNode: missing target".into()))?,
                "findNode target",
            )?;
            let want = want_from(&mut map)?;
            map.finish("findNode")?;
            Ok(Request::FindNode(FindNodeRequest { target, want }))
        }
        (Method::FindPeer, Some(body)) => {
            let mut map = MapReader::new(body, "findPeer")?;
            let target = id_from(
                map.take("t")
                    .ok_or_else(|| Error::Protocol("findPeer: missing target".into()))?,
                "findPeer target",
            )?;
            let want = want_from(&mut map)?;
            let cas = map.take("cas").map(|v| as_u32(v, "cas")).transpose()?;
            let expected_count = map
                .take("e")
                .map(|v| as_u32(v, "expected count"))
                .transpose()?;
            map.finish("findPeer")?;
            Ok(Request::FindPeer(FindPeerRequest {
                target,
                want,
                cas,
                expected_count,
            }))
        }
        (Method::FindValue, Some(body)) => {
            let mut map = MapReader::new(body, "findValue")?;
            let target = id_from(
                map.take("t")
                    .ok_or_else(|| Error::Protocol("findValue: missing target".into()))?,
                "findValue target",
            )?;
            let want = want_from(&mut map)?;
            let cas = map.take("cas").map(|v| as_u32(v, "cas")).transpose()?;
            map.finish("findValue")?;
            Ok(Request::FindValue(FindValueRequest { target, want, cas }))
        }
        (Method::StoreValue, Some(body)) => {
            let mut map = MapReader::new(body, "storeValue")?;
            let token = as_u32(
                map.take("tok")
                    .ok_or_else(|| Error::Protocol("storeValue: missing token".into()))?,
                "token",
            )?;
            let cas = map.take("cas").map(|v| as_u32(v, "cas")).transpose()?;
            let value = match value_from(&mut map, true)? {
                Some(value) => value,
                None => return Err(Error::Protocol("storeValue: missing value".into())),
            };
            map.finish("storeValue")?;
            Ok(Request::StoreValue(StoreValueRequest { token, cas, value }))
        }
        (Method::AnnouncePeer, Some(body)) => {
            let mut map = MapReader::new(body, "announcePeer")?;
            let token = as_u32(
                map.take("tok")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing token".into()))?,
                "token",
            )?;
            let cas = map.take("cas").map(|v| as_u32(v, "cas")).transpose()?;
            let id = id_from(
                map.take("t")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing peer id".into()))?,
                "peer id",
            )?;
            let nonce = nonce_from(
                map.take("n")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing nonce".into()))?,
                "peer nonce",
            )?;
            let seq = match map.take("seq") {
                Some(v) => as_u32(v, "peer seq")?,
                None => 0,
            };
            let origin = map.take("o").map(|v| id_from(v, "peer origin")).transpose()?;
            let origin_signature = map
                .take("os")
                .map(|v| signature_from(v, "peer origin signature"))
                .transpose()?;
            let signature = signature_from(
                map.take("sig")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing signature".into()))?,
                "peer signature",
            )?;
            let fingerprint = as_i64(
                map.take("f")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing fingerprint".into()))?,
                "peer fingerprint",
            )?;
            let endpoint = as_text(
                map.take("e")
                    .ok_or_else(|| Error::Protocol("announcePeer: missing endpoint".into()))?,
                "peer endpoint",
            )?;
            let extra = map.take("ex").map(|v| as_bytes(v, "peer extra")).transpose()?;
            map.finish("announcePeer")?;
            let peer = PeerInfo::from_parts(
                id,
                nonce,
                seq,
                origin,
                origin_signature,
                signature,
                fingerprint,
                endpoint,
                extra,
            )?;
            Ok(Request::AnnouncePeer(AnnouncePeerRequest { token, cas, peer }))
        }
    }
}

fn want_from(map: &mut MapReader) -> Result<LookupWant> {
    match map.take("w") {
        Some(v) => {
            let bits = as_u64(v, "want bits")?;
            let bits = u8::try_from(bits)
                .map_err(|_| Error::Protocol("want bits out of range".into()))?;
            LookupWant::from_bits(bits)
        }
        None => Ok(LookupWant::default()),
    }
}

fn response_from(method: Method, body: Option<Cbor>) -> Result<Response> {
    match (method, body) {
        (Method::Ping, None) => Ok(Response::Ping),
        (Method::StoreValue, None) => Ok(Response::StoreValue),
        (Method::AnnouncePeer, None) => Ok(Response::AnnouncePeer),
        (Method::Ping | Method::StoreValue | Method::AnnouncePeer, Some(_)) => {
            Err(Error::Protocol("void response carries a body".into()))
        }
        (_, None) => Err(Error::Protocol("response body missing".into())),
        (Method::FindNode, Some(body)) => {
            let mut map = MapReader::new(body, "findNode response")?;
            let nodes4 = node_list_from(map.take("n4"), "n4")?;
            let nodes6 = node_list_from(map.take("n6"), "n6")?;
            let token = map.take("tok").map(|v| as_u32(v, "token")).transpose()?;
            map.finish("findNode response")?;
            Ok(Response::FindNode(FindNodeResponse {
                nodes4,
                nodes6,
                token,
            }))
        }
        (Method::FindPeer, Some(body)) => {
            let mut map = MapReader::new(body, "findPeer response")?;
            let nodes4 = node_list_from(map.take("n4"), "n4")?;
            let nodes6 = node_list_from(map.take("n6"), "n6")?;
            let token = map.take("tok").map(|v| as_u32(v, "token")).transpose()?;
            let peers = match map.take("p") {
                Some(v) => peer_list_from(v)?,
                None => Vec::new(),
            };
            map.finish("findPeer response")?;
            Ok(Response::FindPeer(FindPeerResponse {
                nodes4,
                nodes6,
                peers,
                token,
            }))
        }
        (Method::FindValue, Some(body)) => {
            let mut map = MapReader::new(body, "findValue response")?;
            let nodes4 = node_list_from(map.take("n4"), "n4")?;
            let nodes6 = node_list_from(map.take("n6"), "n6")?;
            let token = map.take("tok").map(|v| as_u32(v, "token")).transpose()?;
            let value = value_from(&mut map, false)?;
            map.finish("findValue response")?;
            Ok(Response::FindValue(FindValueResponse {
                nodes4,
                nodes6,
                token,
                value,
            }))
        }
    }
}

fn message_from_tree(tree: Cbor) -> Result<Message> {
    let mut map = MapReader::new(tree, "message")?;
    let y = as_u64(
        map.take("y")
            .ok_or_else(|| Error::Protocol("message: missing type".into()))?,
        "message type",
    )?;
    let y = u8::try_from(y).map_err(|_| Error::Protocol("message type out of range".into()))?;
    let (kind, method) = parse_type_byte(y)?;

    // txid 0 is reserved; the RPC layer drops it as inconsistent rather
    // than failing the parse
    let txid = as_u32(
        map.take("t")
            .ok_or_else(|| Error::Protocol("message: missing transaction id".into()))?,
        "transaction id",
    )?;

    let id = id_from(
        map.take("i")
            .ok_or_else(|| Error::Protocol("message: missing sender id".into()))?,
        "sender id",
    )?;

    let version = map.take("v").map(|v| as_u32(v, "version")).transpose()?;

    let body = match kind {
        KIND_REQUEST => {
            if map.take("r").is_some() || map.take("e").is_some() {
                return Err(Error::Protocol("request with foreign body key".into()));
            }
            Body::Request(request_from(method, map.take("q"))?)
        }
        KIND_RESPONSE => {
            if map.take("q").is_some() || map.take("e").is_some() {
                return Err(Error::Protocol("response with foreign body key".into()));
            }
            Body::Response(response_from(method, map.take("r"))?)
        }
        _ => {
            let body = map
                .take("e")
                .ok_or_else(|| Error::Protocol("error message without body".into()))?;
            let mut emap = MapReader::new(body, "error")?;
            let code = as_i64(
                emap.take("c")
                    .ok_or_else(|| Error::Protocol("error: missing code".into()))?,
                "error code",
            )? as i32;
            let message = as_text(
                emap.take("m")
                    .ok_or_else(|| Error::Protocol("error: missing message".into()))?,
                "error message",
            )?;
            emap.finish("error")?;
            Body::Error(ErrorResult {
                method,
                code,
                message,
            })
        }
    };
    map.finish("message")?;

    Ok(Message {
        id,
        txid,
        version,
        body,
    })
}
