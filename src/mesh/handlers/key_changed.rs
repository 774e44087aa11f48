//! KEY_CHANGED broadcast and handling.
//!
//! A node that rekeys floods `KEY_CHANGED <random-tag> <origin>` through
//! the mesh so every holder of its old key drops it and re-requests.
//! The random tag makes each broadcast's text unique for the
//! seen-request cache, which terminates the flood.

use crate::mesh::{ConnectionId, Mesh, MeshError};
use crate::protocol::{ProtocolError, RequestCode};
use tracing::{debug, error};

impl Mesh {
    /// Announce that our key material changed, then immediately send
    /// fresh keys to directly connected nodes to keep their NAT UDP
    /// mappings alive.
    pub fn broadcast_key_changed(&mut self) -> Result<(), MeshError> {
        let frame = format!(
            "{} {:x} {}",
            RequestCode::KeyChanged.as_u32(),
            rand::random::<u32>(),
            self.name()
        );
        self.broadcast_request(&frame);

        let neighbors: Vec<String> = self
            .connections_active_nodes()
            .filter(|name| {
                self.node(name)
                    .map(|n| n.status.reachable)
                    .unwrap_or(false)
            })
            .collect();
        for name in neighbors {
            if let Err(e) = self.send_ans_key(&name) {
                debug!(node = %name, error = %e, "Failed to re-key direct neighbor");
            }
        }
        Ok(())
    }

    /// Names of nodes behind active connections.
    fn connections_active_nodes(&self) -> impl Iterator<Item = String> + '_ {
        self.connections_iter()
            .filter(|c| c.active)
            .filter_map(|c| c.node.clone())
    }

    /// Handle `KEY_CHANGED <random-tag> <origin>`.
    pub(in crate::mesh) fn key_changed_h(
        &mut self,
        conn: ConnectionId,
        request: &str,
    ) -> Result<(), ProtocolError> {
        let mut fields = request.split_whitespace();
        fields.next(); // code
        let name = match (fields.next(), fields.next()) {
            (Some(_tag), Some(name)) => name.to_string(),
            _ => {
                error!(from = %self.conn_display(conn), "Got bad KEY_CHANGED request");
                return Err(ProtocolError::Malformed {
                    request: "KEY_CHANGED",
                });
            }
        };

        if self.seen.check_and_insert(request) {
            return Ok(());
        }

        match self.node_mut(&name) {
            Some(node) => {
                node.status.validkey = false;
                node.last_req_key = None;
            }
            None => {
                error!(
                    from = %self.conn_display(conn),
                    origin = %name,
                    "Got KEY_CHANGED with unknown origin"
                );
                return Ok(());
            }
        }

        // Tell the others
        if !self.config().tunnelserver {
            self.forward_request(conn, request);
        }

        Ok(())
    }
}
