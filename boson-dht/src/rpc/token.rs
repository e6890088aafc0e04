//! Write tokens
//!
//! A token proves the requester recently completed a lookup toward the
//! target from the same endpoint, authorizing a follow-up write. Tokens
//! are a keyed-BLAKE3 MAC over `(remote ip, remote port, target id)`
//! truncated to 32 bits. The secret rotates on an interval; the previous
//! secret stays valid for one further interval so tokens issued right
//! before a rotation still verify.

use std::net::SocketAddr;

use boson_crypto::random;
use subtle::ConstantTimeEq;
use tokio::time::Instant;

use crate::constants::TOKEN_ROTATION_INTERVAL;
use crate::id::Id;

pub struct TokenManager {
    current: [u8; 32],
    previous: [u8; 32],
    rotated_at: Instant,
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            current: random::random_bytes(),
            previous: random::random_bytes(),
            rotated_at: Instant::now(),
        }
    }

    /// Rotate if the interval elapsed; returns whether a rotation happened
    pub fn maybe_rotate(&mut self) -> bool {
        if self.rotated_at.elapsed() < TOKEN_ROTATION_INTERVAL {
            return false;
        }
        self.rotate();
        true
    }

    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = random::random_bytes();
        self.rotated_at = Instant::now();
    }

    /// Token for a lookup from `remote` toward `target`
    pub fn issue(&self, remote: &SocketAddr, target: &Id) -> u32 {
        compute(&self.current, remote, target)
    }

    /// A write token verifies against the current or the previous secret
    pub fn verify(&self, token: u32, remote: &SocketAddr, target: &Id) -> bool {
        let current = compute(&self.current, remote, target).to_be_bytes();
        let previous = compute(&self.previous, remote, target).to_be_bytes();
        let given = token.to_be_bytes();
        bool::from(given.ct_eq(&current) | given.ct_eq(&previous))
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

fn compute(secret: &[u8; 32], remote: &SocketAddr, target: &Id) -> u32 {
    let mut hasher = blake3::Hasher::new_keyed(secret);
    match remote.ip() {
        std::net::IpAddr::V4(v4) => hasher.update(&v4.octets()),
        std::net::IpAddr::V6(v6) => hasher.update(&v6.octets()),
    };
    hasher.update(&remote.port().to_be_bytes());
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes(
        digest.as_bytes()[..4]
            .try_into()
            .expect("digest is 32 bytes"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_verify() {
        let manager = TokenManager::new();
        let remote = addr("198.51.100.4:3900");
        let target = Id::random();

        let token = manager.issue(&remote, &target);
        assert!(manager.verify(token, &remote, &target));

        // bound to endpoint and target
        assert!(!manager.verify(token, &addr("198.51.100.5:3900"), &target));
        assert!(!manager.verify(token, &addr("198.51.100.4:3901"), &target));
        assert!(!manager.verify(token, &remote, &Id::random()));
        assert!(!manager.verify(token.wrapping_add(1), &remote, &target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window() {
        let mut manager = TokenManager::new();
        let remote = addr("198.51.100.4:3900");
        let target = Id::random();

        let token = manager.issue(&remote, &target);
        manager.rotate();
        // one rotation back: still in the grace window
        assert!(manager.verify(token, &remote, &target));

        manager.rotate();
        // two rotations back: expired
        assert!(!manager.verify(token, &remote, &target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_interval() {
        let mut manager = TokenManager::new();
        assert!(!manager.maybe_rotate());
        tokio::time::advance(TOKEN_ROTATION_INTERVAL + std::time::Duration::from_secs(1)).await;
        assert!(manager.maybe_rotate());
        assert!(!manager.maybe_rotate());
    }
}
