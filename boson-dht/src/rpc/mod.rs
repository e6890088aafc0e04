//! RPC layer
//!
//! One UDP socket per address family. Outbound calls are matched to
//! responses by `(destination address, transaction id)` and verified
//! against the expected remote identity; inbound traffic passes the
//! throttling and Sybil filters before it reaches the request handler.

pub mod call;
pub mod server;
pub mod throttle;
pub mod token;

pub use call::{CallOutcome, CallState, RttEstimator};
pub use server::{RpcHandler, RpcServer, RpcStats};
pub use throttle::{SybilFilter, Throttle, ThrottleConfig};
pub use token::TokenManager;
