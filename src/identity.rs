//! Long-term ECDSA identities.
//!
//! Every node holds a secp256k1 keypair used to authenticate ECDH
//! exchanges over the control overlay. Public keys travel base64-encoded
//! in `ANS_PUBKEY` extensions and are persisted as `ECDSAPublicKey`
//! lines in the peer's host file.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest as _, Sha256};
use std::fmt;
use thiserror::Error;

/// Length of a compact ECDSA signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Length of a serialized (compressed) public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Errors related to identity keys.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid key encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("invalid key: {0}")]
    Key(#[from] secp256k1::Error),
}

/// This node's long-term signing identity.
pub struct Identity {
    secret: SecretKey,
    public: PublicKey,
}

impl Identity {
    /// Create a new random identity.
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut secret_bytes);
        let secret = SecretKey::from_slice(&secret_bytes)
            .expect("32 random bytes is a valid secret key");
        Self::from_secret_key(secret)
    }

    /// Create an identity from an existing secret key.
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secret, public }
    }

    /// Create an identity from secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, IdentityError> {
        Ok(Self::from_secret_key(SecretKey::from_slice(bytes)?))
    }

    /// The public half of this identity.
    pub fn public(&self) -> PeerKey {
        PeerKey {
            public: self.public,
        }
    }

    /// The public key, base64-encoded for the wire and host files.
    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public.serialize())
    }

    /// Length of signatures produced by [`sign`](Self::sign).
    pub fn signature_size(&self) -> usize {
        SIGNATURE_SIZE
    }

    /// Sign arbitrary data with this identity's secret key.
    ///
    /// The signature covers the SHA-256 digest of `data`.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let secp = Secp256k1::new();
        let msg = message_digest(data);
        secp.sign_ecdsa(&msg, &self.secret).serialize_compact()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// A peer's long-term verification key.
#[derive(Clone, Debug)]
pub struct PeerKey {
    public: PublicKey,
}

impl PeerKey {
    /// Decode a base64 public key as carried by `ANS_PUBKEY`.
    pub fn from_base64(s: &str) -> Result<Self, IdentityError> {
        let bytes = BASE64.decode(s)?;
        Ok(Self {
            public: PublicKey::from_slice(&bytes)?,
        })
    }

    /// Encode back to the wire/host-file form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.public.serialize())
    }

    /// Length of signatures this key verifies.
    pub fn signature_size(&self) -> usize {
        SIGNATURE_SIZE
    }

    /// Verify a compact signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = <&[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_compact(signature) else {
            return false;
        };
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&message_digest(data), &signature, &self.public)
            .is_ok()
    }
}

fn message_digest(data: &[u8]) -> Message {
    Message::from_digest(Sha256::digest(data).into())
}
