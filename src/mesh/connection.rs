//! Meta-protocol connections.
//!
//! A connection is the authenticated TCP control channel to a direct
//! neighbor. Outbound frames are queued per connection; the external
//! meta-protocol writer drains the queue, so senders never block.

use std::collections::VecDeque;
use std::fmt;

/// Opaque identifier for a control connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An authenticated control connection to a direct neighbor.
pub struct Connection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Peer name announced during the meta-protocol handshake.
    pub name: String,
    /// Remote address string, for log messages.
    pub hostname: String,
    /// Whether the meta-protocol handshake has completed.
    pub active: bool,
    /// The node record this connection belongs to, once authenticated.
    pub node: Option<String>,
    /// Outbound frame queue drained by the external writer.
    outbound: VecDeque<String>,
}

impl Connection {
    pub fn new(id: ConnectionId, name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            hostname: hostname.into(),
            active: false,
            node: None,
            outbound: VecDeque::new(),
        }
    }

    /// Queue a frame for the external writer.
    pub(crate) fn enqueue(&mut self, frame: String) {
        self.outbound.push_back(frame);
    }

    /// Frames queued but not yet drained.
    pub fn outbound(&self) -> impl Iterator<Item = &str> {
        self.outbound.iter().map(String::as_str)
    }

    /// Number of queued frames.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drain the queued frames in send order.
    pub fn take_outbound(&mut self) -> Vec<String> {
        self.outbound.drain(..).collect()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("active", &self.active)
            .field("node", &self.node)
            .field("queued", &self.outbound.len())
            .finish()
    }
}
