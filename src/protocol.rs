//! Meta-protocol request codes and frame grammar.
//!
//! Control frames are ASCII lines of space-separated tokens. The first
//! token is the decimal request code; the external framer strips the
//! trailing newline before handing the line to [`Mesh::handle_request`].
//!
//! [`Mesh::handle_request`]: crate::mesh::Mesh::handle_request

use std::fmt;
use thiserror::Error;

/// Upper bound on any single frame field, large enough for the base64
/// encoding of an ECDH public point plus the longest signature.
pub const MAX_STRING: usize = 2048;

/// Upper bound on a node identifier.
pub const MAX_ID_LENGTH: usize = 46;

/// Request codes carried as the first frame token.
///
/// `ReqPubkey` and `AnsPubkey` never appear as top-level codes; they are
/// extension selectors carried in the optional fourth `REQ_KEY` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestCode {
    KeyChanged = 14,
    ReqKey = 15,
    AnsKey = 16,
    ReqPubkey = 19,
    AnsPubkey = 20,
}

impl RequestCode {
    /// Parse a decimal request code.
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            14 => Some(RequestCode::KeyChanged),
            15 => Some(RequestCode::ReqKey),
            16 => Some(RequestCode::AnsKey),
            19 => Some(RequestCode::ReqPubkey),
            20 => Some(RequestCode::AnsPubkey),
            _ => None,
        }
    }

    /// The decimal wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestCode::KeyChanged => "KEY_CHANGED",
            RequestCode::ReqKey => "REQ_KEY",
            RequestCode::AnsKey => "ANS_KEY",
            RequestCode::ReqPubkey => "REQ_PUBKEY",
            RequestCode::AnsPubkey => "ANS_PUBKEY",
        };
        write!(f, "{}", s)
    }
}

/// Extension selector carried as the optional fourth `REQ_KEY` field.
///
/// `REQ_KEY` is overloaded to route arbitrary requests between two
/// nodes; unknown selectors are logged and dropped so future extensions
/// stay backward compatible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReqKeyExtension {
    /// No extension: a plain key request.
    Plain,
    /// Sender asks for our long-term ECDSA public key.
    ReqPubkey,
    /// Sender announces its long-term ECDSA public key.
    AnsPubkey,
    /// Selector we do not understand.
    Unknown(u32),
}

impl ReqKeyExtension {
    /// Classify the `reqno` field (0 means absent).
    pub fn from_reqno(reqno: u32) -> Self {
        match reqno {
            0 => ReqKeyExtension::Plain,
            19 => ReqKeyExtension::ReqPubkey,
            20 => ReqKeyExtension::AnsPubkey,
            other => ReqKeyExtension::Unknown(other),
        }
    }
}

/// Validate a node identifier: a non-empty bounded token of ASCII
/// alphanumerics and underscores.
pub fn check_id(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ID_LENGTH
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Hard protocol errors.
///
/// Returning one of these from a handler tells the dispatcher to tear
/// down the offending connection. Soft errors (unknown nodes, invalid
/// signatures, bogus compression) are logged and swallowed instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed {request} request")]
    Malformed { request: &'static str },

    #[error("invalid node name in {request} request")]
    InvalidName { request: &'static str },

    #[error("field too long in {request} request")]
    FieldTooLong { request: &'static str },

    #[error("node {node} uses unknown cipher {id}")]
    UnknownCipher { node: String, id: i32 },

    #[error("node {node} uses unknown digest {id}")]
    UnknownDigest { node: String, id: i32 },

    #[error("node {node} uses bogus MAC length {maclength}")]
    BogusMacLength { node: String, maclength: i32 },

    #[error("unknown request code {0}")]
    UnknownRequest(u32),
}
