//! Ephemeral ECDH state and data-plane key derivation.
//!
//! Each in-flight exchange owns a move-only [`Ecdh`] handle created when
//! we emit our signed public point and consumed when the peer's point
//! arrives and the shared secret is computed. The shared secret is then
//! expanded with a PRF into two directional key blocks whose order on
//! the wire is tie-broken by comparing node names.

use hkdf::Hkdf;
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of a serialized ephemeral public point.
pub const ECDH_SIZE: usize = 33;

/// Length of the computed shared secret.
pub const ECDH_SHARED_SIZE: usize = 32;

/// Seed prefix for the data-plane key expansion. Fixed by the wire
/// protocol; both sides must derive from the identical string.
pub const KEY_EXPANSION_LABEL: &str = "tinc UDP key expansion";

/// Errors related to the ephemeral exchange.
#[derive(Debug, Error)]
pub enum KexError {
    #[error("invalid ECDH public point: {0}")]
    InvalidPoint(#[from] secp256k1::Error),

    #[error("requested key material exceeds PRF output limit")]
    OutputLength,
}

/// In-progress ECDH state: the private scalar plus the serialized public
/// point we sent (or are about to send) to the peer.
pub struct Ecdh {
    secret: SecretKey,
    public: [u8; ECDH_SIZE],
}

impl Ecdh {
    /// Generate a fresh ephemeral key pair.
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut secret_bytes);
        let secret = SecretKey::from_slice(&secret_bytes)
            .expect("32 random bytes is a valid secret key");
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret).serialize();
        Self { secret, public }
    }

    /// The serialized public point to put on the wire.
    pub fn public(&self) -> &[u8; ECDH_SIZE] {
        &self.public
    }

    /// Compute the shared secret from the peer's serialized point,
    /// consuming the ephemeral state.
    pub fn compute_shared(
        self,
        peer_point: &[u8],
    ) -> Result<Zeroizing<[u8; ECDH_SHARED_SIZE]>, KexError> {
        let peer = PublicKey::from_slice(peer_point)?;
        let shared = SharedSecret::new(&peer, &self.secret);
        Ok(Zeroizing::new(shared.secret_bytes()))
    }
}

impl fmt::Debug for Ecdh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ecdh")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Deterministic PRF expansion of `secret` keyed by `seed` into `out`.
pub fn prf(secret: &[u8], seed: &[u8], out: &mut [u8]) -> Result<(), KexError> {
    Hkdf::<Sha256>::new(None, secret)
        .expand(seed, out)
        .map_err(|_| KexError::OutputLength)
}

/// Directional key material expanded from a shared secret.
///
/// `local` keys inbound packets (first half cipher key, second half MAC
/// key); `peer` keys outbound packets, laid out the same way.
pub struct PacketKeys {
    pub local: Zeroizing<Vec<u8>>,
    pub peer: Zeroizing<Vec<u8>>,
}

/// Expand `shared` into the two directional key blocks.
///
/// Both sides run the PRF over the same seed, built from the two node
/// names in lexicographic order; the lexicographically smaller name owns
/// the first block of the output. `local_keylen` is our inbound cipher's
/// key length, `peer_keylen` the peer's; each side receives twice that
/// many bytes (cipher key plus MAC key).
pub fn derive_packet_keys(
    shared: &[u8],
    local_name: &str,
    peer_name: &str,
    local_keylen: usize,
    peer_keylen: usize,
) -> Result<PacketKeys, KexError> {
    let (first, second) = if local_name < peer_name {
        (local_name, peer_name)
    } else {
        (peer_name, local_name)
    };
    let seed = format!("{} {} {}", KEY_EXPANSION_LABEL, first, second);

    let mut out = Zeroizing::new(vec![0u8; local_keylen * 2 + peer_keylen * 2]);
    prf(shared, seed.as_bytes(), &mut out)?;

    let (local, peer) = if local_name < peer_name {
        let (mine, his) = out.split_at(local_keylen * 2);
        (mine.to_vec(), his.to_vec())
    } else {
        let (his, mine) = out.split_at(peer_keylen * 2);
        (mine.to_vec(), his.to_vec())
    };

    Ok(PacketKeys {
        local: Zeroizing::new(local),
        peer: Zeroizing::new(peer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdh_agreement() {
        let a = Ecdh::generate();
        let b = Ecdh::generate();
        let a_public = *a.public();
        let b_public = *b.public();

        let shared_a = a.compute_shared(&b_public).unwrap();
        let shared_b = b.compute_shared(&a_public).unwrap();
        assert_eq!(&shared_a[..], &shared_b[..]);
    }

    #[test]
    fn test_compute_shared_rejects_bad_point() {
        let a = Ecdh::generate();
        assert!(a.compute_shared(&[0u8; ECDH_SIZE]).is_err());
    }

    #[test]
    fn test_prf_deterministic_and_seed_sensitive() {
        let secret = [3u8; 32];
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        prf(&secret, b"seed one", &mut a).unwrap();
        prf(&secret, b"seed one", &mut b).unwrap();
        assert_eq!(a, b);
        prf(&secret, b"seed two", &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derivation_uses_canonical_seed() {
        // The seed must be the literal label plus the two names in
        // lexicographic order, space separated.
        let shared = [9u8; ECDH_SHARED_SIZE];
        let keys = derive_packet_keys(&shared, "alice", "bob", 32, 32).unwrap();

        let mut expected = [0u8; 128];
        prf(&shared, b"tinc UDP key expansion alice bob", &mut expected).unwrap();
        assert_eq!(&keys.local[..], &expected[..64]);
        assert_eq!(&keys.peer[..], &expected[64..]);
    }

    #[test]
    fn test_derivation_role_symmetry() {
        // What one side installs inbound, the other installs outbound.
        let shared = [0xC4u8; ECDH_SHARED_SIZE];
        let at_alice = derive_packet_keys(&shared, "alice", "bob", 32, 32).unwrap();
        let at_bob = derive_packet_keys(&shared, "bob", "alice", 32, 32).unwrap();

        assert_eq!(&at_alice.local[..], &at_bob.peer[..]);
        assert_eq!(&at_alice.peer[..], &at_bob.local[..]);
    }

    #[test]
    fn test_derivation_asymmetric_key_lengths() {
        let shared = [0x11u8; ECDH_SHARED_SIZE];
        let at_small = derive_packet_keys(&shared, "aa", "zz", 16, 32).unwrap();
        let at_large = derive_packet_keys(&shared, "zz", "aa", 32, 16).unwrap();

        assert_eq!(at_small.local.len(), 32);
        assert_eq!(at_small.peer.len(), 64);
        assert_eq!(&at_small.local[..], &at_large.peer[..]);
        assert_eq!(&at_small.peer[..], &at_large.local[..]);
    }
}
