//! Mesh state container and meta-protocol services.
//!
//! [`Mesh`] holds everything the key-exchange handlers touch: the node
//! map, the control connections with their outbound frame queues, the
//! seen-request cache, and the process-wide flags. The meta-protocol
//! dispatcher is single-threaded and cooperative; handlers run to
//! completion, so node mutations need no locking.

mod connection;
mod handlers;
mod node;
mod seen;

pub use connection::{Connection, ConnectionId};
pub use node::{Node, NodeOptions, NodeStatus};
pub use seen::SeenRequests;

use crate::config::{Config, ConfigError};
use crate::identity::{Identity, IdentityError, PeerKey};
use crate::kex::KexError;
use crate::suite::{Cipher, CipherAlgorithm, Digest, DigestAlgorithm, SuiteError};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, trace};

/// Retained broadcast frames for flood termination.
const SEEN_REQUEST_CAPACITY: usize = 1024;

/// Errors related to mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("no route to node: {0}")]
    NoRoute(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("invalid node name: {0}")]
    InvalidName(String),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("key exchange error: {0}")]
    Kex(#[from] KexError),

    #[error("cipher suite error: {0}")]
    Suite(#[from] SuiteError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Our advertised data-plane input parameters, fixed at startup.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LocalParams {
    pub cipher: CipherAlgorithm,
    pub digest: DigestAlgorithm,
    pub maclength: usize,
    pub compression: i32,
    pub keylength: usize,
}

/// A running mesh instance, from the key exchange's point of view.
pub struct Mesh {
    // === Identity ===
    name: String,
    identity: Identity,

    // === Configuration ===
    config: Config,
    pub(crate) local: LocalParams,

    // === Peers ===
    nodes: HashMap<String, Node>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection_id: u32,

    // === Broadcast dedup ===
    pub(crate) seen: SeenRequests,

    // === Data-plane coupling ===
    /// Set once our own key material is handed out; external cleanup
    /// wipes session keys on shutdown when this is set.
    mykeyused: bool,
    /// Peers queued for an MTU probe, drained by the data plane.
    mtu_probes: Vec<String>,
}

impl Mesh {
    /// Create a mesh instance named `name` with the given long-term
    /// identity. Validates the configured data-plane parameters and
    /// installs the self node record.
    pub fn new(
        name: impl Into<String>,
        identity: Identity,
        config: Config,
    ) -> Result<Self, MeshError> {
        let name = name.into();
        if !crate::protocol::check_id(&name) {
            return Err(MeshError::InvalidName(name));
        }

        let cipher = Cipher::open_by_id(config.cipher)?;
        let digest = Digest::open_by_id(config.digest, config.maclength)?;
        let local = LocalParams {
            cipher: cipher.algorithm(),
            digest: digest.algorithm(),
            maclength: digest.length(),
            compression: config.compression,
            keylength: cipher.keylength(),
        };

        let mut myself = Node::new(&name);
        myself.status.reachable = true;
        if config.experimental {
            myself.options = myself.options.with_version(2);
        }
        let mut nodes = HashMap::new();
        nodes.insert(name.clone(), myself);

        Ok(Self {
            name,
            identity,
            config,
            local,
            nodes,
            connections: BTreeMap::new(),
            next_connection_id: 0,
            seen: SeenRequests::new(SEEN_REQUEST_CAPACITY),
            mykeyused: false,
            mtu_probes: Vec::new(),
        })
    }

    /// This node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This node's long-term identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The runtime options.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether our own key material has been handed out since startup.
    pub fn mykeyused(&self) -> bool {
        self.mykeyused
    }

    pub(crate) fn set_mykeyused(&mut self) {
        self.mykeyused = true;
    }

    // === Node map (owned by the external graph layer) ===

    /// Install a node record.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Remove a node record.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        self.nodes.remove(name)
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Look up a node by name, mutably.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    /// Number of known nodes, including ourselves.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // === Connections ===

    /// Register a control connection.
    pub fn add_connection(
        &mut self,
        name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;
        self.connections.insert(id, Connection::new(id, name, hostname));
        id
    }

    /// Remove a control connection.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Look up a connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Look up a connection, mutably.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Iterate over all connections in id order.
    pub fn connections_iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Drain the outbound frame queue of a connection.
    pub fn take_outbound(&mut self, id: ConnectionId) -> Vec<String> {
        self.connections
            .get_mut(&id)
            .map(|c| c.take_outbound())
            .unwrap_or_default()
    }

    /// Display string for a connection, for log messages.
    pub(crate) fn conn_display(&self, id: ConnectionId) -> String {
        match self.connections.get(&id) {
            Some(c) => format!("{} ({})", c.name, c.hostname),
            None => id.to_string(),
        }
    }

    // === Frame services ===

    /// Queue a frame on a connection. Non-blocking; the external writer
    /// drains the queue.
    pub(crate) fn send_request(
        &mut self,
        id: ConnectionId,
        frame: String,
    ) -> Result<(), MeshError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(MeshError::ConnectionNotFound(id))?;
        trace!(conn = %id, frame = %frame, "Queueing control frame");
        connection.enqueue(frame);
        Ok(())
    }

    /// Queue a frame on every active connection.
    pub(crate) fn broadcast_request(&mut self, frame: &str) {
        for connection in self.connections.values_mut().filter(|c| c.active) {
            connection.enqueue(frame.to_string());
        }
    }

    /// Queue a frame on every active connection except `inbound`.
    pub(crate) fn forward_request(&mut self, inbound: ConnectionId, frame: &str) {
        for connection in self
            .connections
            .values_mut()
            .filter(|c| c.active && c.id != inbound)
        {
            connection.enqueue(frame.to_string());
        }
    }

    /// Resolve the control connection toward `name` via its next hop.
    pub(crate) fn nexthop_connection(&self, name: &str) -> Result<ConnectionId, MeshError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| MeshError::UnknownNode(name.to_string()))?;
        let nexthop = node
            .nexthop
            .as_deref()
            .ok_or_else(|| MeshError::NoRoute(name.to_string()))?;
        self.nodes
            .get(nexthop)
            .and_then(|n| n.connection)
            .ok_or_else(|| MeshError::NoRoute(name.to_string()))
    }

    // === Data-plane coupling ===

    /// Record a new UDP endpoint for `name`.
    pub fn update_node_udp(&mut self, name: &str, address: SocketAddr) {
        if let Some(node) = self.nodes.get_mut(name) {
            debug!(node = %name, address = %address, "Updating UDP endpoint");
            node.address = Some(address);
        }
    }

    /// Queue an MTU probe toward `name`; the data plane drains the
    /// queue and sends the initial UDP traffic.
    pub(crate) fn send_mtu_probe(&mut self, name: &str) {
        debug!(node = %name, "Scheduling MTU probe");
        self.mtu_probes.push(name.to_string());
    }

    /// Drain the queued MTU probes.
    pub fn take_mtu_probes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.mtu_probes)
    }

    // === Long-term keys ===

    /// Ensure the ECDSA public key for `name` is loaded, trying the
    /// host file when none is installed. Returns whether a key is now
    /// available.
    pub(crate) fn load_node_ecdsa_key(&mut self, name: &str) -> bool {
        let Some(node) = self.nodes.get_mut(name) else {
            return false;
        };
        if node.ecdsa.is_some() {
            return true;
        }
        let Some(encoded) = self.config.read_host_line(name, "ECDSAPublicKey") else {
            return false;
        };
        match PeerKey::from_base64(&encoded) {
            Ok(key) => {
                debug!(node = %name, "Loaded ECDSA public key from host file");
                node.ecdsa = Some(key);
                true
            }
            Err(e) => {
                debug!(node = %name, error = %e, "Ignoring invalid ECDSA public key in host file");
                false
            }
        }
    }
}
