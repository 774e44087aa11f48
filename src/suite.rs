//! Data-plane cipher and MAC contexts.
//!
//! The UDP packet path lives outside this crate; what the key exchange
//! installs here are keyed contexts the data plane picks up. Contexts
//! are opened by the numeric algorithm id carried in `ANS_KEY` frames
//! and hold no key until `set_key` runs.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Highest compression level accepted from a peer.
pub const MAX_COMPRESSION_LEVEL: i32 = 11;

/// Errors related to cipher and digest contexts.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("unknown cipher id {0}")]
    UnknownCipher(u32),

    #[error("unknown digest id {0}")]
    UnknownDigest(u32),

    #[error("cipher key length mismatch: expected {expected}, got {got}")]
    CipherKeyLength { expected: usize, got: usize },

    #[error("invalid MAC key")]
    MacKey,

    #[error("context has no key installed")]
    NoKey,

    #[error("wrong nonce length: expected {expected}, got {got}")]
    NonceLength { expected: usize, got: usize },

    #[error("AEAD operation failed")]
    Aead,
}

/// Data-plane cipher algorithms, by wire id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherAlgorithm {
    ChaCha20Poly1305 = 1,
    XChaCha20Poly1305 = 2,
}

impl CipherAlgorithm {
    /// Look up an algorithm by its wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(CipherAlgorithm::ChaCha20Poly1305),
            2 => Some(CipherAlgorithm::XChaCha20Poly1305),
            _ => None,
        }
    }

    /// The wire id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Key length in bytes.
    pub fn keylength(self) -> usize {
        32
    }
}

enum CipherBackend {
    ChaCha(Box<ChaCha20Poly1305>),
    XChaCha(Box<XChaCha20Poly1305>),
}

/// A data-plane cipher context: an algorithm choice plus, once keyed,
/// the ready-to-use AEAD instance.
pub struct Cipher {
    algorithm: CipherAlgorithm,
    backend: Option<CipherBackend>,
    key: Option<Zeroizing<Vec<u8>>>,
    for_encryption: bool,
}

impl Cipher {
    /// Open an unkeyed context for `algorithm`.
    pub fn new(algorithm: CipherAlgorithm) -> Self {
        Self {
            algorithm,
            backend: None,
            key: None,
            for_encryption: false,
        }
    }

    /// Open an unkeyed context by wire id.
    pub fn open_by_id(id: u32) -> Result<Self, SuiteError> {
        CipherAlgorithm::from_id(id)
            .map(Self::new)
            .ok_or(SuiteError::UnknownCipher(id))
    }

    /// The algorithm this context was opened with.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// The wire id of the opened algorithm.
    pub fn id(&self) -> u32 {
        self.algorithm.id()
    }

    /// Key length in bytes.
    pub fn keylength(&self) -> usize {
        self.algorithm.keylength()
    }

    /// Nonce length in bytes.
    pub fn nonce_size(&self) -> usize {
        match self.algorithm {
            CipherAlgorithm::ChaCha20Poly1305 => 12,
            CipherAlgorithm::XChaCha20Poly1305 => 24,
        }
    }

    /// Install key material into the context.
    ///
    /// `for_encryption` records which direction the installer intends;
    /// the AEAD backends here are direction-agnostic, but backends with
    /// direction-specific setup must honor the flag.
    pub fn set_key(&mut self, material: &[u8], for_encryption: bool) -> Result<(), SuiteError> {
        if material.len() != self.keylength() {
            return Err(SuiteError::CipherKeyLength {
                expected: self.keylength(),
                got: material.len(),
            });
        }
        let backend = match self.algorithm {
            CipherAlgorithm::ChaCha20Poly1305 => CipherBackend::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(material)
                    .map_err(|_| SuiteError::CipherKeyLength {
                        expected: self.keylength(),
                        got: material.len(),
                    })?,
            )),
            CipherAlgorithm::XChaCha20Poly1305 => CipherBackend::XChaCha(Box::new(
                XChaCha20Poly1305::new_from_slice(material)
                    .map_err(|_| SuiteError::CipherKeyLength {
                        expected: self.keylength(),
                        got: material.len(),
                    })?,
            )),
        };
        self.backend = Some(backend);
        self.key = Some(Zeroizing::new(material.to_vec()));
        self.for_encryption = for_encryption;
        Ok(())
    }

    /// Whether key material has been installed.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// The installed key material, if any.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref().map(|k| &k[..])
    }

    /// The direction recorded at install time.
    pub fn for_encryption(&self) -> bool {
        self.for_encryption
    }

    /// Seal a packet payload, appending the authentication tag.
    pub fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SuiteError> {
        if nonce.len() != self.nonce_size() {
            return Err(SuiteError::NonceLength {
                expected: self.nonce_size(),
                got: nonce.len(),
            });
        }
        match self.backend.as_ref().ok_or(SuiteError::NoKey)? {
            CipherBackend::ChaCha(aead) => aead
                .encrypt(Nonce::from_slice(nonce), plaintext)
                .map_err(|_| SuiteError::Aead),
            CipherBackend::XChaCha(aead) => aead
                .encrypt(XNonce::from_slice(nonce), plaintext)
                .map_err(|_| SuiteError::Aead),
        }
    }

    /// Open a sealed packet payload, verifying the trailing tag.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SuiteError> {
        if nonce.len() != self.nonce_size() {
            return Err(SuiteError::NonceLength {
                expected: self.nonce_size(),
                got: nonce.len(),
            });
        }
        match self.backend.as_ref().ok_or(SuiteError::NoKey)? {
            CipherBackend::ChaCha(aead) => aead
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| SuiteError::Aead),
            CipherBackend::XChaCha(aead) => aead
                .decrypt(XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| SuiteError::Aead),
        }
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &self.algorithm)
            .field("has_key", &self.has_key())
            .finish()
    }
}

/// Data-plane MAC algorithms, by wire id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    HmacSha256 = 1,
    HmacSha512 = 2,
}

impl DigestAlgorithm {
    /// Look up an algorithm by its wire id.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(DigestAlgorithm::HmacSha256),
            2 => Some(DigestAlgorithm::HmacSha512),
            _ => None,
        }
    }

    /// The wire id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Untruncated MAC length in bytes.
    pub fn natural_length(self) -> usize {
        match self {
            DigestAlgorithm::HmacSha256 => 32,
            DigestAlgorithm::HmacSha512 => 64,
        }
    }
}

enum MacBackend {
    Sha256(Box<Hmac<Sha256>>),
    Sha512(Box<Hmac<Sha512>>),
}

/// A data-plane MAC context opened at a possibly truncated length.
///
/// A requested length outside `0..=natural` is clamped to the natural
/// length at open; the `ANS_KEY` handler then compares the requested
/// length against [`length`](Self::length) to reject bogus values.
pub struct Digest {
    algorithm: DigestAlgorithm,
    maclength: usize,
    backend: Option<MacBackend>,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl Digest {
    /// Open an unkeyed context for `algorithm`, truncating the MAC to
    /// at most the natural length.
    pub fn new(algorithm: DigestAlgorithm, maclength: usize) -> Self {
        Self {
            algorithm,
            maclength: maclength.min(algorithm.natural_length()),
            backend: None,
            key: None,
        }
    }

    /// Open an unkeyed context by wire id.
    pub fn open_by_id(id: u32, maclength: i32) -> Result<Self, SuiteError> {
        let algorithm = DigestAlgorithm::from_id(id).ok_or(SuiteError::UnknownDigest(id))?;
        let natural = algorithm.natural_length();
        let maclength = if maclength < 0 || maclength as usize > natural {
            natural
        } else {
            maclength as usize
        };
        Ok(Self {
            algorithm,
            maclength,
            backend: None,
            key: None,
        })
    }

    /// The algorithm this context was opened with.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The wire id of the opened algorithm.
    pub fn id(&self) -> u32 {
        self.algorithm.id()
    }

    /// The MAC length this context was opened with.
    pub fn length(&self) -> usize {
        self.maclength
    }

    /// Install the MAC key.
    pub fn set_key(&mut self, material: &[u8]) -> Result<(), SuiteError> {
        let backend = match self.algorithm {
            DigestAlgorithm::HmacSha256 => MacBackend::Sha256(Box::new(
                <Hmac<Sha256> as Mac>::new_from_slice(material)
                    .map_err(|_| SuiteError::MacKey)?,
            )),
            DigestAlgorithm::HmacSha512 => MacBackend::Sha512(Box::new(
                <Hmac<Sha512> as Mac>::new_from_slice(material)
                    .map_err(|_| SuiteError::MacKey)?,
            )),
        };
        self.backend = Some(backend);
        self.key = Some(Zeroizing::new(material.to_vec()));
        Ok(())
    }

    /// Whether a MAC key has been installed.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// The installed MAC key, if any.
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref().map(|k| &k[..])
    }

    /// Compute the (possibly truncated) MAC over `data`.
    pub fn mac(&self, data: &[u8]) -> Result<Vec<u8>, SuiteError> {
        let tag = match self.backend.as_ref().ok_or(SuiteError::NoKey)? {
            MacBackend::Sha256(mac) => {
                let mut mac = (**mac).clone();
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            MacBackend::Sha512(mac) => {
                let mut mac = (**mac).clone();
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(tag[..self.maclength].to_vec())
    }

    /// Check a received MAC in constant time.
    pub fn verify_mac(&self, data: &[u8], tag: &[u8]) -> Result<bool, SuiteError> {
        let expected = self.mac(data)?;
        if expected.len() != tag.len() {
            return Ok(false);
        }
        let mut diff = 0u8;
        for (a, b) in expected.iter().zip(tag) {
            diff |= a ^ b;
        }
        Ok(diff == 0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest")
            .field("algorithm", &self.algorithm)
            .field("maclength", &self.maclength)
            .field("has_key", &self.has_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_open_by_id() {
        assert_eq!(
            Cipher::open_by_id(1).unwrap().algorithm(),
            CipherAlgorithm::ChaCha20Poly1305
        );
        assert_eq!(
            Cipher::open_by_id(2).unwrap().algorithm(),
            CipherAlgorithm::XChaCha20Poly1305
        );
        assert!(matches!(
            Cipher::open_by_id(99),
            Err(SuiteError::UnknownCipher(99))
        ));
    }

    #[test]
    fn test_cipher_set_key() {
        let mut cipher = Cipher::open_by_id(1).unwrap();
        assert!(!cipher.has_key());

        assert!(matches!(
            cipher.set_key(&[0u8; 16], true),
            Err(SuiteError::CipherKeyLength {
                expected: 32,
                got: 16
            })
        ));
        assert!(!cipher.has_key());

        cipher.set_key(&[0xAAu8; 32], true).unwrap();
        assert!(cipher.has_key());
        assert!(cipher.for_encryption());
        assert_eq!(cipher.key(), Some(&[0xAAu8; 32][..]));
    }

    #[test]
    fn test_digest_open_clamps_maclength() {
        let digest = Digest::open_by_id(1, 16).unwrap();
        assert_eq!(digest.length(), 16);

        // Out-of-range requests clamp to the natural length, which the
        // handler's equality check then rejects.
        let digest = Digest::open_by_id(1, 48).unwrap();
        assert_eq!(digest.length(), 32);
        let digest = Digest::open_by_id(1, -1).unwrap();
        assert_eq!(digest.length(), 32);

        let digest = Digest::open_by_id(2, 16).unwrap();
        assert_eq!(digest.length(), 16);

        assert!(matches!(
            Digest::open_by_id(7, 16),
            Err(SuiteError::UnknownDigest(7))
        ));
    }

    #[test]
    fn test_digest_set_key() {
        let mut digest = Digest::open_by_id(2, 16).unwrap();
        digest.set_key(&[0x55u8; 32]).unwrap();
        assert!(digest.has_key());
        assert_eq!(digest.key(), Some(&[0x55u8; 32][..]));
    }

    #[test]
    fn test_cipher_seal_open() {
        let mut cipher = Cipher::open_by_id(1).unwrap();
        assert!(matches!(
            cipher.encrypt(&[0u8; 12], b"payload"),
            Err(SuiteError::NoKey)
        ));

        cipher.set_key(&[0x11u8; 32], true).unwrap();
        assert!(matches!(
            cipher.encrypt(&[0u8; 24], b"payload"),
            Err(SuiteError::NonceLength {
                expected: 12,
                got: 24
            })
        ));

        let nonce = [7u8; 12];
        let sealed = cipher.encrypt(&nonce, b"payload").unwrap();
        assert_ne!(&sealed[..7], b"payload");
        assert_eq!(cipher.decrypt(&nonce, &sealed).unwrap(), b"payload");

        let mut tampered = sealed;
        tampered[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&nonce, &tampered),
            Err(SuiteError::Aead)
        ));
    }

    #[test]
    fn test_digest_mac_truncation_and_verify() {
        let mut digest = Digest::open_by_id(1, 16).unwrap();
        digest.set_key(&[0x55u8; 32]).unwrap();

        let tag = digest.mac(b"packet").unwrap();
        assert_eq!(tag.len(), 16);
        assert!(digest.verify_mac(b"packet", &tag).unwrap());
        assert!(!digest.verify_mac(b"other packet", &tag).unwrap());

        let mut flipped = tag;
        flipped[3] ^= 0x80;
        assert!(!digest.verify_mac(b"packet", &flipped).unwrap());
        // Wrong-length tags never verify
        assert!(!digest.verify_mac(b"packet", &flipped[..8]).unwrap());
    }
}
