//! Wire protocol
//!
//! Every datagram is a single self-describing map with four possible keys:
//!
//! | key | meaning |
//! |-----|---------|
//! | `y` | composite type byte: kind bits or'ed with method bits |
//! | `t` | non-zero transaction id |
//! | `i` | sender node id |
//! | `q` / `r` / `e` | request / response / error body (absent for void bodies) |
//! | `v` | optional version tag |
//!
//! The sender id is what lets the RPC layer verify responses against the
//! expected remote identity, learn ids on bootstrap pings, and feed bucket
//! liveness from inbound requests.
//!
//! The same logical model reads and writes through two codecs: [`cbor`]
//! for the binary wire and [`json`] for textual interop. Both are strict:
//! unknown composite bytes, unknown keys and missing mandatory fields all
//! fail the parse.

pub mod cbor;
pub mod json;

use crate::error::Error;
use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::value::Value;

/// Version tag attached to outbound messages
pub const VERSION: u32 = 1;

/// Kind bits of the composite type byte
pub const KIND_ERROR: u8 = 0x00;
pub const KIND_REQUEST: u8 = 0x20;
pub const KIND_RESPONSE: u8 = 0x40;
pub const KIND_MASK: u8 = 0xE0;
pub const METHOD_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Ping = 0x01,
    FindNode = 0x02,
    AnnouncePeer = 0x03,
    FindPeer = 0x04,
    StoreValue = 0x05,
    FindValue = 0x06,
}

impl Method {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0x01 => Ok(Method::Ping),
            0x02 => Ok(Method::FindNode),
            0x03 => Ok(Method::AnnouncePeer),
            0x04 => Ok(Method::FindPeer),
            0x05 => Ok(Method::StoreValue),
            0x06 => Ok(Method::FindValue),
            other => Err(Error::Protocol(format!("unknown method bits {:#04x}", other))),
        }
    }
}

/// Which result families the requester wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LookupWant {
    pub want4: bool,
    pub want6: bool,
    pub want_token: bool,
}

impl LookupWant {
    pub fn nodes4() -> Self {
        Self {
            want4: true,
            ..Default::default()
        }
    }

    pub fn to_bits(self) -> u8 {
        (self.want4 as u8) | ((self.want6 as u8) << 1) | ((self.want_token as u8) << 2)
    }

    pub fn from_bits(bits: u8) -> Result<Self, Error> {
        if bits > 0x07 {
            return Err(Error::Protocol(format!("invalid want bits {:#04x}", bits)));
        }
        Ok(Self {
            want4: bits & 0x01 != 0,
            want6: bits & 0x02 != 0,
            want_token: bits & 0x04 != 0,
        })
    }
}

// ========== BODY TYPES ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNodeRequest {
    pub target: Id,
    pub want: LookupWant,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindNodeResponse {
    pub nodes4: Vec<NodeInfo>,
    pub nodes6: Vec<NodeInfo>,
    pub token: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindPeerRequest {
    pub target: Id,
    pub want: LookupWant,
    pub cas: Option<u32>,
    /// Result-count hint: how many peers the requester hopes to collect
    pub expected_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindPeerResponse {
    pub nodes4: Vec<NodeInfo>,
    pub nodes6: Vec<NodeInfo>,
    pub peers: Vec<PeerInfo>,
    pub token: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindValueRequest {
    pub target: Id,
    pub want: LookupWant,
    /// Highest sequence number already seen; responders holding nothing
    /// newer answer with nodes only
    pub cas: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindValueResponse {
    pub nodes4: Vec<NodeInfo>,
    pub nodes6: Vec<NodeInfo>,
    pub token: Option<u32>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreValueRequest {
    pub token: u32,
    pub cas: Option<u32>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePeerRequest {
    pub token: u32,
    pub cas: Option<u32>,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResult {
    pub method: Method,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    FindNode(FindNodeRequest),
    FindPeer(FindPeerRequest),
    FindValue(FindValueRequest),
    StoreValue(StoreValueRequest),
    AnnouncePeer(AnnouncePeerRequest),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Ping => Method::Ping,
            Request::FindNode(_) => Method::FindNode,
            Request::FindPeer(_) => Method::FindPeer,
            Request::FindValue(_) => Method::FindValue,
            Request::StoreValue(_) => Method::StoreValue,
            Request::AnnouncePeer(_) => Method::AnnouncePeer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ping,
    FindNode(FindNodeResponse),
    FindPeer(FindPeerResponse),
    FindValue(FindValueResponse),
    StoreValue,
    AnnouncePeer,
}

impl Response {
    pub fn method(&self) -> Method {
        match self {
            Response::Ping => Method::Ping,
            Response::FindNode(_) => Method::FindNode,
            Response::FindPeer(_) => Method::FindPeer,
            Response::FindValue(_) => Method::FindValue,
            Response::StoreValue => Method::StoreValue,
            Response::AnnouncePeer => Method::AnnouncePeer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Request(Request),
    Response(Response),
    Error(ErrorResult),
}

impl Body {
    pub fn method(&self) -> Method {
        match self {
            Body::Request(r) => r.method(),
            Body::Response(r) => r.method(),
            Body::Error(e) => e.method,
        }
    }

    pub fn kind_bits(&self) -> u8 {
        match self {
            Body::Request(_) => KIND_REQUEST,
            Body::Response(_) => KIND_RESPONSE,
            Body::Error(_) => KIND_ERROR,
        }
    }
}

/// One wire message: envelope plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender node id
    pub id: Id,
    pub txid: u32,
    pub version: Option<u32>,
    pub body: Body,
}

impl Message {
    pub fn request(id: Id, txid: u32, request: Request) -> Self {
        Self {
            id,
            txid,
            version: Some(VERSION),
            body: Body::Request(request),
        }
    }

    pub fn response(id: Id, txid: u32, response: Response) -> Self {
        Self {
            id,
            txid,
            version: Some(VERSION),
            body: Body::Response(response),
        }
    }

    pub fn error(
        id: Id,
        txid: u32,
        method: Method,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            txid,
            version: Some(VERSION),
            body: Body::Error(ErrorResult {
                method,
                code,
                message: message.into(),
            }),
        }
    }

    pub fn method(&self) -> Method {
        self.body.method()
    }

    /// Composite type byte
    pub fn type_byte(&self) -> u8 {
        self.body.kind_bits() | self.method().bits()
    }
}

/// Split and validate a composite type byte
pub fn parse_type_byte(y: u8) -> Result<(u8, Method), Error> {
    let kind = y & KIND_MASK;
    match kind {
        KIND_ERROR | KIND_REQUEST | KIND_RESPONSE => {}
        other => {
            return Err(Error::Protocol(format!(
                "unknown message kind bits {:#04x}",
                other
            )))
        }
    }
    let method = Method::from_bits(y & METHOD_MASK)?;
    Ok((kind, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_byte_composition() {
        let msg = Message::request(
            Id::random(),
            7,
            Request::FindNode(FindNodeRequest {
                target: Id::random(),
                want: LookupWant::nodes4(),
            }),
        );
        assert_eq!(msg.type_byte(), 0x22);

        let (kind, method) = parse_type_byte(0x22).unwrap();
        assert_eq!(kind, KIND_REQUEST);
        assert_eq!(method, Method::FindNode);
    }

    #[test]
    fn test_unknown_composites_rejected() {
        // kind bits 0x60 are unassigned
        assert!(parse_type_byte(0x61).is_err());
        // method 0 and 7 are unassigned
        assert!(parse_type_byte(KIND_REQUEST).is_err());
        assert!(parse_type_byte(KIND_REQUEST | 0x07).is_err());
    }

    #[test]
    fn test_want_bits_round_trip() {
        for bits in 0..=7u8 {
            assert_eq!(LookupWant::from_bits(bits).unwrap().to_bits(), bits);
        }
        assert!(LookupWant::from_bits(8).is_err());
    }
}
