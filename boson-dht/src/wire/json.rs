//! Textual codec
//!
//! JSON rendition of the wire model for interop and diagnostics. Ids are
//! Base58 strings, addresses are dotted/colon literals, and every binary
//! field is URL-safe Base64 without padding. The schema is as strict as
//! the binary codec's.

use std::net::SocketAddr;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use boson_crypto::{Nonce, Signature};
use serde_json::{Map as JsonMap, Value as Json};

use crate::error::{Error, Result};
use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::value::Value;
use crate::wire::*;

pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let tree = message_tree(message);
    serde_json::to_vec(&tree).map_err(|e| Error::Protocol(format!("json encode: {}", e)))
}

pub fn decode(bytes: &[u8]) -> Result<Message> {
    let tree: Json = serde_json::from_slice(bytes)
        .map_err(|e| Error::Protocol(format!("json decode: {}", e)))?;
    message_from_tree(tree)
}

// ========== ENCODING ==========

fn uint(v: u64) -> Json {
    Json::Number(v.into())
}

fn int(v: i64) -> Json {
    Json::Number(v.into())
}

fn b64(bytes: &[u8]) -> Json {
    Json::String(URL_SAFE_NO_PAD.encode(bytes))
}

fn text(s: &str) -> Json {
    Json::String(s.to_string())
}

fn id_str(id: &Id) -> Json {
    Json::String(id.to_base58())
}

struct MapBuilder(JsonMap<String, Json>);

impl MapBuilder {
    fn new() -> Self {
        Self(JsonMap::new())
    }

    fn put(&mut self, key: &str, value: Json) -> &mut Self {
        self.0.insert(key.to_string(), value);
        self
    }

    fn put_opt(&mut self, key: &str, value: Option<Json>) -> &mut Self {
        if let Some(value) = value {
            self.put(key, value);
        }
        self
    }

    fn build(self) -> Json {
        Json::Object(self.0)
    }
}

fn node_tree(node: &NodeInfo) -> Json {
    Json::Array(vec![
        id_str(node.id()),
        Json::String(node.host().to_string()),
        uint(node.port() as u64),
    ])
}

fn node_list(nodes: &[NodeInfo]) -> Option<Json> {
    if nodes.is_empty() {
        None
    } else {
        Some(Json::Array(nodes.iter().map(node_tree).collect()))
    }
}

fn peer_tree(peer: &PeerInfo, carry_id: bool) -> Json {
    let mut map = MapBuilder::new();
    if carry_id {
        map.put("id", id_str(peer.id()));
    }
    map.put("n", b64(peer.nonce().as_bytes()));
    if peer.sequence_number() != 0 {
        map.put("seq", uint(peer.sequence_number() as u64));
    }
    map.put_opt("o", peer.origin().map(id_str));
    map.put_opt("os", peer.origin_signature().map(|s| b64(s.as_bytes())));
    map.put("sig", b64(peer.signature().as_bytes()));
    map.put("f", int(peer.fingerprint()));
    map.put("e", text(peer.endpoint()));
    map.put_opt("ex", peer.extra().map(b64));
    map.build()
}

fn put_value_fields(map: &mut MapBuilder, value: &Value) {
    map.put_opt("k", value.public_key().map(id_str));
    map.put_opt("rec", value.recipient().map(id_str));
    map.put_opt("n", value.nonce().map(|n| b64(n.as_bytes())));
    if value.sequence_number() != 0 {
        map.put("seq", uint(value.sequence_number() as u64));
    }
    map.put_opt("sig", value.signature().map(|s| b64(s.as_bytes())));
    map.put("v", b64(value.data()));
}

fn body_tree(body: &Body) -> Option<Json> {
    match body {
        Body::Request(Request::Ping) => None,
        Body::Request(Request::FindNode(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", id_str(&req.target));
            map.put("w", uint(req.want.to_bits() as u64));
            Some(map.build())
        }
        Body::Request(Request::FindPeer(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", id_str(&req.target));
            map.put("w", uint(req.want.to_bits() as u64));
            map.put_opt("cas", req.cas.map(|c| uint(c as u64)));
            map.put_opt("e", req.expected_count.map(|e| uint(e as u64)));
            Some(map.build())
        }
        Body::Request(Request::FindValue(req)) => {
            let mut map = MapBuilder::new();
            map.put("t", id_str(&req.target));
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
            map.put("t", id_str(peer.id()));
            map.put("n", b64(peer.nonce().as_bytes()));
            if peer.sequence_number() != 0 {
                map.put("seq", uint(peer.sequence_number() as u64));
            }
            map.put_opt("o", peer.origin().map(id_str));
            map.put_opt("os", peer.origin_signature().map(|s| b64(s.as_bytes())));
            map.put("sig", b64(peer.signature().as_bytes()));
            map.put("f", int(peer.fingerprint()));
            map.put("e", text(peer.endpoint()));
            map.put_opt("ex", peer.extra().map(b64));
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
                map.put("p", Json::Array(peers));
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

fn message_tree(message: &Message) -> Json {
    let mut map = MapBuilder::new();
    map.put("y", uint(message.type_byte() as u64));
    map.put("t", uint(message.txid as u64));
    map.put("i", id_str(&message.id));
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

struct MapReader {
    entries: JsonMap<String, Json>,
}

impl MapReader {
    fn new(value: Json, context: &str) -> Result<Self> {
        let Json::Object(entries) = value else {
            return Err(Error::Protocol(format!("{}: expected an object", context)));
        };
        Ok(Self { entries })
    }

    fn take(&mut self, key: &str) -> Option<Json> {
        self.entries.remove(key)
    }

    fn finish(self, context: &str) -> Result<()> {
        if let Some(key) = self.entries.keys().next() {
            return Err(Error::Protocol(format!(
                "{}: unexpected key '{}'",
                context, key
            )));
        }
        Ok(())
    }
}

fn as_u64(value: Json, context: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::Protocol(format!("{}: expected an unsigned integer", context)))
}

fn as_u32(value: Json, context: &str) -> Result<u32> {
    let v = as_u64(value, context)?;
    u32::try_from(v).map_err(|_| Error::Protocol(format!("{}: integer out of range", context)))
}

fn as_i64(value: Json, context: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::Protocol(format!("{}: expected an integer", context)))
}

fn as_text(value: Json, context: &str) -> Result<String> {
    match value {
        Json::String(s) => Ok(s),
        _ => Err(Error::Protocol(format!("{}: expected a string", context))),
    }
}

fn as_array(value: Json, context: &str) -> Result<Vec<Json>> {
    match value {
        Json::Array(a) => Ok(a),
        _ => Err(Error::Protocol(format!("{}: expected an array", context))),
    }
}

fn as_bytes(value: Json, context: &str) -> Result<Vec<u8>> {
    let s = as_text(value, context)?;
    URL_SAFE_NO_PAD
        .decode(s.as_bytes())
        .map_err(|e| Error::Protocol(format!("{}: invalid base64: {}", context, e)))
}

fn id_from(value: Json, context: &str) -> Result<Id> {
    let s = as_text(value, context)?;
    Id::from_str(&s).map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn nonce_from(value: Json, context: &str) -> Result<Nonce> {
    Nonce::from_bytes(&as_bytes(value, context)?)
        .map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn signature_from(value: Json, context: &str) -> Result<Signature> {
    Signature::from_bytes(&as_bytes(value, context)?)
        .map_err(|e| Error::Protocol(format!("{}: {}", context, e)))
}

fn node_from(value: Json) -> Result<NodeInfo> {
    let mut parts = as_array(value, "node")?;
    if parts.len() != 3 {
        return Err(Error::Protocol(format!(
            "node: expected 3 elements, got {}",
            parts.len()
        )));
    }
    let port = as_u64(parts.pop().expect("len checked"), "node port")?;
    let port =
        u16::try_from(port).map_err(|_| Error::Protocol("node port out of range".into()))?;
    let host = as_text(parts.pop().expect("len checked"), "node address")?;
    let ip = host
        .parse()
        .map_err(|_| Error::Protocol(format!("node address: '{}'", host)))?;
    let id = id_from(parts.pop().expect("len checked"), "node id")?;
    Ok(NodeInfo::new(id, SocketAddr::new(ip, port)))
}

fn node_list_from(value: Option<Json>, context: &str) -> Result<Vec<NodeInfo>> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => as_array(v, context)?.into_iter().map(node_from).collect(),
    }
}

fn peer_from(value: Json, expected_id: Option<Id>) -> Result<PeerInfo> {
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

fn peer_list_from(value: Json) -> Result<Vec<PeerInfo>> {
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

fn want_from(map: &mut MapReader) -> Result<LookupWant> {
    match map.take("w") {
        Some(v) => {
            let bits = as_u64(v, "want bits")?;
            let bits =
                u8::try_from(bits).map_err(|_| Error::Protocol("want bits out of range".into()))?;
            LookupWant::from_bits(bits)
        }
        None => Ok(LookupWant::default()),
    }
}

fn request_from(method: Method, body: Option<Json>) -> Result<Request> {
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

fn response_from(method: Method, body: Option<Json>) -> Result<Response> {
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

fn message_from_tree(tree: Json) -> Result<Message> {
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
