//! REQ_KEY handling and the nested public-key discovery sub-protocol.
//!
//! `REQ_KEY <from> <to>` asks `to` for its data-plane key and is relayed
//! hop by hop until it reaches its destination. The optional fourth
//! field overloads the message to route arbitrary sub-requests between
//! two nodes; today that carries ECDSA public-key discovery.

use crate::identity::PeerKey;
use crate::mesh::{ConnectionId, Mesh, MeshError};
use crate::protocol::{check_id, ProtocolError, ReqKeyExtension, RequestCode};
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl Mesh {
    /// Ask `to` for its data-plane key.
    ///
    /// In modern mode, when we do not yet know the peer's ECDSA public
    /// key, a REQ_PUBKEY extension is sent first so the answer can be
    /// verified once it arrives.
    pub fn send_req_key(&mut self, to: &str) -> Result<(), MeshError> {
        let options = self
            .node(to)
            .ok_or_else(|| MeshError::UnknownNode(to.to_string()))?
            .options;

        if self.config().experimental && options.version() >= 2 && !self.load_node_ecdsa_key(to) {
            let frame = format!(
                "{} {} {} {}",
                RequestCode::ReqKey.as_u32(),
                self.name(),
                to,
                RequestCode::ReqPubkey.as_u32()
            );
            let conn = self.nexthop_connection(to)?;
            self.send_request(conn, frame)?;
        }

        let frame = format!(
            "{} {} {}",
            RequestCode::ReqKey.as_u32(),
            self.name(),
            to
        );
        let conn = self.nexthop_connection(to)?;
        self.send_request(conn, frame)?;

        if let Some(node) = self.node_mut(to) {
            node.last_req_key = Some(Instant::now());
        }
        Ok(())
    }

    /// Handle `REQ_KEY <from> <to> [<reqno>]`.
    pub(in crate::mesh) fn req_key_h(
        &mut self,
        conn: ConnectionId,
        request: &str,
    ) -> Result<(), ProtocolError> {
        let mut fields = request.split_whitespace();
        fields.next(); // code
        let (from_name, to_name) = match (fields.next(), fields.next()) {
            (Some(from), Some(to)) => (from.to_string(), to.to_string()),
            _ => {
                error!(from = %self.conn_display(conn), "Got bad REQ_KEY request");
                return Err(ProtocolError::Malformed { request: "REQ_KEY" });
            }
        };
        // An unparseable reqno token degrades to the plain form
        let reqno: u32 = fields.next().and_then(|tok| tok.parse().ok()).unwrap_or(0);

        if !check_id(&from_name) || !check_id(&to_name) {
            error!(from = %self.conn_display(conn), "Got bad REQ_KEY request: invalid name");
            return Err(ProtocolError::InvalidName { request: "REQ_KEY" });
        }

        if self.node(&from_name).is_none() {
            error!(
                from = %self.conn_display(conn),
                origin = %from_name,
                "Got REQ_KEY with unknown origin"
            );
            return Ok(());
        }
        if self.node(&to_name).is_none() {
            error!(
                from = %self.conn_display(conn),
                destination = %to_name,
                "Got REQ_KEY with unknown destination"
            );
            return Ok(());
        }

        // Check if this key request is for us
        if to_name == self.name() {
            if self.config().experimental && reqno != 0 {
                return self.req_key_ext_h(conn, request, &from_name, reqno);
            }
            if let Err(e) = self.send_ans_key(&from_name) {
                debug!(node = %from_name, error = %e, "Failed to answer key request");
            }
            return Ok(());
        }

        if self.config().tunnelserver {
            return Ok(());
        }

        let reachable = self
            .node(&to_name)
            .map(|n| n.status.reachable)
            .unwrap_or(false);
        if !reachable {
            warn!(
                from = %self.conn_display(conn),
                destination = %to_name,
                "Got REQ_KEY for unreachable destination"
            );
            return Ok(());
        }

        // Relay verbatim toward the destination
        match self.nexthop_connection(&to_name) {
            Ok(next) => {
                if let Err(e) = self.send_request(next, request.to_string()) {
                    debug!(destination = %to_name, error = %e, "Failed to relay REQ_KEY");
                }
            }
            Err(e) => {
                debug!(destination = %to_name, error = %e, "Failed to relay REQ_KEY");
            }
        }
        Ok(())
    }

    /// Handle the extended forms of REQ_KEY addressed to us.
    fn req_key_ext_h(
        &mut self,
        conn: ConnectionId,
        request: &str,
        from_name: &str,
        reqno: u32,
    ) -> Result<(), ProtocolError> {
        match ReqKeyExtension::from_reqno(reqno) {
            ReqKeyExtension::ReqPubkey => {
                let frame = format!(
                    "{} {} {} {} {}",
                    RequestCode::ReqKey.as_u32(),
                    self.name(),
                    from_name,
                    RequestCode::AnsPubkey.as_u32(),
                    self.identity().public_base64()
                );
                match self.nexthop_connection(from_name) {
                    Ok(next) => {
                        if let Err(e) = self.send_request(next, frame) {
                            debug!(node = %from_name, error = %e, "Failed to send ANS_PUBKEY");
                        }
                    }
                    Err(e) => {
                        debug!(node = %from_name, error = %e, "Failed to send ANS_PUBKEY");
                    }
                }
                Ok(())
            }

            ReqKeyExtension::AnsPubkey => {
                if self.load_node_ecdsa_key(from_name) {
                    warn!(
                        node = %from_name,
                        "Got ANS_PUBKEY even though we already have the pubkey"
                    );
                    return Ok(());
                }

                let encoded = request.split_whitespace().nth(4);
                let key = encoded.and_then(|tok| PeerKey::from_base64(tok).ok());
                let (Some(encoded), Some(key)) = (encoded, key) else {
                    error!(
                        from = %self.conn_display(conn),
                        node = %from_name,
                        "Got bad ANS_PUBKEY: invalid pubkey"
                    );
                    return Ok(());
                };

                let encoded = encoded.to_string();
                if let Some(node) = self.node_mut(from_name) {
                    node.ecdsa = Some(key);
                }
                info!(node = %from_name, "Learned ECDSA public key");
                if let Err(e) =
                    self.config()
                        .append_host_line(from_name, "ECDSAPublicKey", &encoded)
                {
                    warn!(node = %from_name, error = %e, "Failed to persist ECDSA public key");
                }
                Ok(())
            }

            ReqKeyExtension::Unknown(reqno) => {
                error!(
                    from = %self.conn_display(conn),
                    node = %from_name,
                    reqno = reqno,
                    "Unknown extended REQ_KEY request"
                );
                Ok(())
            }

            // reqno 0 never reaches the extension path
            ReqKeyExtension::Plain => Ok(()),
        }
    }
}
