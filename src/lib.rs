//! SEAM: Session-key Exchange for Authenticated Meshes
//!
//! The key-exchange core of a mesh VPN meta-protocol. Nodes keep
//! authenticated control connections to their direct neighbors and need
//! symmetric keys for the UDP data packets they exchange with every
//! reachable node, possibly many hops away through the control overlay.
//!
//! This crate implements the four-message state machine that makes that
//! work: `KEY_CHANGED` floods key-invalidation notices through the
//! mesh, `REQ_KEY` asks a possibly distant node for its key (and
//! doubles as a carrier for ECDSA public-key discovery), and `ANS_KEY`
//! ships either a legacy raw key or a signed ephemeral ECDH point from
//! which both directions' packet keys are derived. Relaying, reflexive
//! UDP address hints for NAT traversal, and MTU probe scheduling ride
//! along.
//!
//! The meta-protocol framer, the node graph, routing, and the UDP data
//! path live outside this crate; [`mesh::Mesh`] models exactly the
//! state the key exchange reads and writes.

pub mod config;
pub mod identity;
pub mod kex;
pub mod mesh;
pub mod protocol;
pub mod suite;

// Re-export config types
pub use config::{Config, ConfigError};

// Re-export identity types
pub use identity::{Identity, IdentityError, PeerKey, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

// Re-export key-exchange types
pub use kex::{derive_packet_keys, prf, Ecdh, KexError, PacketKeys, ECDH_SHARED_SIZE, ECDH_SIZE};

// Re-export mesh types
pub use mesh::{Connection, ConnectionId, Mesh, MeshError, Node, NodeOptions, NodeStatus, SeenRequests};

// Re-export protocol types
pub use protocol::{check_id, ProtocolError, ReqKeyExtension, RequestCode, MAX_STRING};

// Re-export cipher suite types
pub use suite::{Cipher, CipherAlgorithm, Digest, DigestAlgorithm, SuiteError};
