//! Per-peer node records.
//!
//! Node entries are created and destroyed by the external graph layer;
//! the key exchange only transitions their key state. Fields mirror what
//! the handlers mutate: status bits, crypto contexts for both
//! directions, anti-replay counters, and the last known UDP endpoint.

use crate::identity::PeerKey;
use crate::kex::Ecdh;
use crate::mesh::ConnectionId;
use crate::suite::{Cipher, Digest};
use std::net::SocketAddr;
use std::time::Instant;

/// Option bits advertised by a node. The top byte carries the protocol
/// version; versions 2 and later select the ECDH/ECDSA exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeOptions(pub u32);

impl NodeOptions {
    /// The node wants path-MTU discovery probes after a key exchange.
    pub const PMTU_DISCOVERY: u32 = 0x0004;

    /// The protocol version embedded in the top byte.
    pub fn version(self) -> u32 {
        self.0 >> 24
    }

    /// Replace the embedded protocol version.
    pub fn with_version(self, version: u32) -> Self {
        Self((self.0 & 0x00ff_ffff) | (version << 24))
    }

    /// Whether the path-MTU discovery bit is set.
    pub fn pmtu_discovery(self) -> bool {
        self.0 & Self::PMTU_DISCOVERY != 0
    }

    /// Set the path-MTU discovery bit.
    pub fn with_pmtu_discovery(self) -> Self {
        Self(self.0 | Self::PMTU_DISCOVERY)
    }
}

/// Node status bits mutated by the key exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStatus {
    /// Control-plane routing has a next hop for this node.
    pub reachable: bool,
    /// An outbound data-plane key is installed and usable.
    pub validkey: bool,
}

/// A participant in the mesh.
pub struct Node {
    // === Identity ===
    /// Globally unique name.
    pub name: String,
    /// Remote address string, for log messages.
    pub hostname: String,

    // === Status ===
    pub status: NodeStatus,
    pub options: NodeOptions,
    /// When we last sent a REQ_KEY; consulted by the external rate
    /// limiter, cleared on KEY_CHANGED.
    pub last_req_key: Option<Instant>,

    // === Routing ===
    /// Directly connected neighbor toward this node.
    pub nexthop: Option<String>,
    /// Control connection, for directly connected nodes.
    pub connection: Option<ConnectionId>,

    // === Long-term and ephemeral keys ===
    /// The peer's long-term verification key, fetched lazily.
    pub ecdsa: Option<PeerKey>,
    /// In-progress ECDH state, consumed on shared-secret computation.
    pub ecdh: Option<Ecdh>,

    // === Data-plane crypto, peer's view of our inbound direction ===
    pub incipher: Option<Cipher>,
    pub indigest: Option<Digest>,
    pub incompression: i32,

    // === Data-plane crypto, our outbound direction toward the peer ===
    pub outcipher: Option<Cipher>,
    pub outdigest: Option<Digest>,
    pub outcompression: i32,

    // === Anti-replay state, reset on rekey ===
    pub received_seqno: u32,
    pub sent_seqno: u32,
    /// Late-packet bitmap, `replaywin` bytes.
    pub late: Vec<u8>,

    // === Data plane ===
    /// Last known UDP endpoint.
    pub address: Option<SocketAddr>,
}

impl Node {
    /// Create a fresh node record with no key state.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            hostname: String::new(),
            name,
            status: NodeStatus::default(),
            options: NodeOptions::default(),
            last_req_key: None,
            nexthop: None,
            connection: None,
            ecdsa: None,
            ecdh: None,
            incipher: None,
            indigest: None,
            incompression: 0,
            outcipher: None,
            outdigest: None,
            outcompression: 0,
            received_seqno: 0,
            sent_seqno: 0,
            late: Vec::new(),
            address: None,
        }
    }

    /// Reset the inbound sequence counter and zero the late-packet
    /// window. Runs in the same step that installs new keys.
    pub(crate) fn reset_incoming(&mut self, replaywin: usize) {
        self.received_seqno = 0;
        self.late.clear();
        self.late.resize(replaywin, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_version() {
        let options = NodeOptions::default().with_version(2);
        assert_eq!(options.version(), 2);
        assert!(!options.pmtu_discovery());

        let options = options.with_pmtu_discovery();
        assert_eq!(options.version(), 2);
        assert!(options.pmtu_discovery());

        // Version replacement keeps the low bits
        let options = options.with_version(3);
        assert_eq!(options.version(), 3);
        assert!(options.pmtu_discovery());
    }

    #[test]
    fn test_reset_incoming() {
        let mut node = Node::new("bob");
        node.received_seqno = 17;
        node.late = vec![0xFF; 4];
        node.reset_incoming(16);
        assert_eq!(node.received_seqno, 0);
        assert_eq!(node.late, vec![0u8; 16]);
    }
}
