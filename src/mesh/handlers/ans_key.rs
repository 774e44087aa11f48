//! ANS_KEY sending and handling.
//!
//! `ANS_KEY` carries key material from one node to another through the
//! control overlay. In legacy mode the field is a hex-encoded symmetric
//! key generated by the sender; in modern mode it is the base64 of a
//! signed ephemeral ECDH point, and both directions' packet keys are
//! derived from the shared secret. Intermediate relays forward the
//! frame verbatim, except that they may append the origin's observed
//! UDP endpoint as a NAT-traversal hint.

use crate::identity::SIGNATURE_SIZE;
use crate::kex::{derive_packet_keys, Ecdh, ECDH_SHARED_SIZE, ECDH_SIZE};
use crate::mesh::{ConnectionId, Mesh, MeshError};
use crate::protocol::{check_id, ProtocolError, RequestCode, MAX_STRING};
use crate::suite::{Cipher, CipherAlgorithm, Digest, SuiteError, MAX_COMPRESSION_LEVEL};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

impl Mesh {
    /// Send our data-plane key material to `to`, picking the legacy or
    /// modern form from the peer's advertised protocol version.
    pub fn send_ans_key(&mut self, to: &str) -> Result<(), MeshError> {
        let options = self
            .node(to)
            .ok_or_else(|| MeshError::UnknownNode(to.to_string()))?
            .options;
        if self.config().experimental && options.version() >= 2 {
            return self.send_ans_key_ecdh(to);
        }

        // Legacy: generate the key the peer will use toward us and ship
        // it inside the authenticated control channel.
        let local = self.local;
        let replaywin = self.config().replaywin;

        let mut key = Zeroizing::new(vec![0u8; local.keylength]);
        rand::rng().fill_bytes(&mut key);

        let mut incipher = Cipher::new(local.cipher);
        let mut indigest = Digest::new(local.digest, local.maclength);
        incipher.set_key(&key, false)?;
        indigest.set_key(&key)?;
        let maclength = indigest.length();

        {
            let node = self
                .node_mut(to)
                .ok_or_else(|| MeshError::UnknownNode(to.to_string()))?;
            node.incipher = Some(incipher);
            node.indigest = Some(indigest);
            node.incompression = local.compression;
            node.reset_incoming(replaywin);
        }
        self.set_mykeyused();

        let frame = format!(
            "{} {} {} {} {} {} {} {}",
            RequestCode::AnsKey.as_u32(),
            self.name(),
            to,
            hex::encode(&key[..]),
            local.cipher.id(),
            local.digest.id(),
            maclength,
            local.compression
        );
        let conn = self.nexthop_connection(to)?;
        self.send_request(conn, frame)
    }

    /// Send a signed ephemeral ECDH point to `to`, opening (or
    /// restarting) the exchange from our side.
    pub fn send_ans_key_ecdh(&mut self, to: &str) -> Result<(), MeshError> {
        let local = self.local;

        let ecdh = Ecdh::generate();
        let mut blob = Vec::with_capacity(ECDH_SIZE + SIGNATURE_SIZE);
        blob.extend_from_slice(ecdh.public());
        let signature = self.identity().sign(ecdh.public());
        blob.extend_from_slice(&signature);
        let encoded = BASE64.encode(&blob);

        {
            let node = self
                .node_mut(to)
                .ok_or_else(|| MeshError::UnknownNode(to.to_string()))?;
            node.ecdh = Some(ecdh);
        }

        let frame = format!(
            "{} {} {} {} {} {} {} {}",
            RequestCode::AnsKey.as_u32(),
            self.name(),
            to,
            encoded,
            local.cipher.id(),
            local.digest.id(),
            local.maclength,
            local.compression
        );
        let conn = self.nexthop_connection(to)?;
        self.send_request(conn, frame)
    }

    /// Handle `ANS_KEY <from> <to> <key> <cipher> <digest> <maclength>
    /// <compression> [<address> <port>]`.
    pub(in crate::mesh) fn ans_key_h(
        &mut self,
        conn: ConnectionId,
        request: &str,
    ) -> Result<(), ProtocolError> {
        let fields: Vec<&str> = request.split_whitespace().collect();
        if fields.len() < 8 {
            error!(from = %self.conn_display(conn), "Got bad ANS_KEY request");
            return Err(ProtocolError::Malformed { request: "ANS_KEY" });
        }
        let from_name = fields[1].to_string();
        let to_name = fields[2].to_string();
        let key_field = fields[3];
        let (Ok(cipher), Ok(digest), Ok(maclength), Ok(compression)) = (
            fields[4].parse::<i32>(),
            fields[5].parse::<i32>(),
            fields[6].parse::<i32>(),
            fields[7].parse::<i32>(),
        ) else {
            error!(from = %self.conn_display(conn), "Got bad ANS_KEY request");
            return Err(ProtocolError::Malformed { request: "ANS_KEY" });
        };
        let address = fields.get(8).copied();
        let port = fields.get(9).copied();

        if key_field.len() > MAX_STRING {
            error!(from = %self.conn_display(conn), "Got bad ANS_KEY request: oversized key field");
            return Err(ProtocolError::FieldTooLong { request: "ANS_KEY" });
        }

        if !check_id(&from_name) || !check_id(&to_name) {
            error!(from = %self.conn_display(conn), "Got bad ANS_KEY request: invalid name");
            return Err(ProtocolError::InvalidName { request: "ANS_KEY" });
        }

        if self.node(&from_name).is_none() {
            error!(
                from = %self.conn_display(conn),
                origin = %from_name,
                "Got ANS_KEY with unknown origin"
            );
            return Ok(());
        }
        if self.node(&to_name).is_none() {
            error!(
                from = %self.conn_display(conn),
                destination = %to_name,
                "Got ANS_KEY with unknown destination"
            );
            return Ok(());
        }

        // Forward it if necessary
        if to_name != self.name() {
            return self.relay_ans_key(conn, request, &from_name, &to_name, address.is_some());
        }

        // Check and lookup cipher and digest algorithms
        let Some(outcipher_alg) = u32::try_from(cipher)
            .ok()
            .and_then(CipherAlgorithm::from_id)
        else {
            error!(node = %from_name, id = cipher, "Node uses unknown cipher");
            return Err(ProtocolError::UnknownCipher {
                node: from_name,
                id: cipher,
            });
        };
        let outcipher = Cipher::new(outcipher_alg);

        let Some(Ok(outdigest)) = u32::try_from(digest)
            .ok()
            .map(|id| Digest::open_by_id(id, maclength))
        else {
            error!(node = %from_name, id = digest, "Node uses unknown digest");
            return Err(ProtocolError::UnknownDigest {
                node: from_name,
                id: digest,
            });
        };

        if maclength < 0 || maclength as usize != outdigest.length() {
            error!(node = %from_name, maclength = maclength, "Node uses bogus MAC length");
            return Err(ProtocolError::BogusMacLength {
                node: from_name,
                maclength,
            });
        }

        if !(0..=MAX_COMPRESSION_LEVEL).contains(&compression) {
            error!(node = %from_name, compression = compression, "Node uses bogus compression level");
            return Ok(());
        }

        // ECDH or old-style key exchange?
        let options = self.node(&from_name).map(|n| n.options).unwrap_or_default();
        let modern = self.config().experimental && options.version() >= 2;
        let installed = if modern {
            self.ans_key_modern(&from_name, key_field, outcipher, outdigest, compression)
        } else {
            self.ans_key_legacy(&from_name, key_field, outcipher, outdigest, compression)
        };
        if !installed {
            return Ok(());
        }

        {
            let Some(node) = self.node_mut(&from_name) else {
                return Ok(());
            };
            node.status.validkey = true;
            node.sent_seqno = 0;
        }

        if let (Some(address), Some(port)) = (address, port) {
            match (address.parse::<IpAddr>(), port.parse::<u16>()) {
                (Ok(ip), Ok(port)) => {
                    debug!(
                        node = %from_name,
                        address = %address,
                        port = port,
                        "Using reflexive UDP address"
                    );
                    self.update_node_udp(&from_name, SocketAddr::new(ip, port));
                }
                _ => {
                    debug!(node = %from_name, "Ignoring unparseable reflexive address");
                }
            }
        }

        if options.pmtu_discovery() {
            self.send_mtu_probe(&from_name);
        }
        Ok(())
    }

    /// Relay an ANS_KEY addressed to a third party, appending the
    /// origin's observed UDP endpoint when the frame carries none.
    fn relay_ans_key(
        &mut self,
        conn: ConnectionId,
        request: &str,
        from_name: &str,
        to_name: &str,
        has_reflexive: bool,
    ) -> Result<(), ProtocolError> {
        if self.config().tunnelserver {
            return Ok(());
        }

        let reachable = self
            .node(to_name)
            .map(|n| n.status.reachable)
            .unwrap_or(false);
        if !reachable {
            warn!(
                from = %self.conn_display(conn),
                destination = %to_name,
                "Got ANS_KEY for unreachable destination"
            );
            return Ok(());
        }

        let next = match self.nexthop_connection(to_name) {
            Ok(next) => next,
            Err(e) => {
                debug!(destination = %to_name, error = %e, "Failed to relay ANS_KEY");
                return Ok(());
            }
        };

        let frame = match self.node(from_name).and_then(|n| n.address) {
            Some(address) if !has_reflexive => {
                debug!(
                    origin = %from_name,
                    destination = %to_name,
                    "Appending reflexive UDP address to ANS_KEY"
                );
                format!("{} {} {}", request, address.ip(), address.port())
            }
            _ => request.to_string(),
        };
        if let Err(e) = self.send_request(next, frame) {
            debug!(destination = %to_name, error = %e, "Failed to relay ANS_KEY");
        }
        Ok(())
    }

    /// Verify and complete a modern exchange, installing all four
    /// crypto contexts. Returns false on any (soft) failure, leaving
    /// the node's key state untouched.
    fn ans_key_modern(
        &mut self,
        from_name: &str,
        key_field: &str,
        mut outcipher: Cipher,
        mut outdigest: Digest,
        compression: i32,
    ) -> bool {
        if !self.load_node_ecdsa_key(from_name) {
            error!(
                node = %from_name,
                "No ECDSA public key known, cannot verify ECDH key exchange"
            );
            return false;
        }

        let blob = match BASE64.decode(key_field) {
            Ok(blob) => blob,
            Err(_) => {
                error!(node = %from_name, "Got bad ANS_KEY: invalid base64 key");
                return false;
            }
        };
        let siglen = self
            .node(from_name)
            .and_then(|n| n.ecdsa.as_ref())
            .map(|k| k.signature_size())
            .unwrap_or(SIGNATURE_SIZE);
        if blob.len() != ECDH_SIZE + siglen {
            error!(
                node = %from_name,
                got = blob.len(),
                expected = ECDH_SIZE + siglen,
                "Node uses wrong key length"
            );
            return false;
        }

        if ECDH_SHARED_SIZE < outcipher.keylength() {
            error!(node = %from_name, "ECDH shared secret too short for cipher");
            return false;
        }

        let verified = self
            .node(from_name)
            .and_then(|n| n.ecdsa.as_ref())
            .map(|k| k.verify(&blob[..ECDH_SIZE], &blob[ECDH_SIZE..]))
            .unwrap_or(false);
        if !verified {
            warn!(node = %from_name, "Possible intruder: invalid ECDSA signature");
            return false;
        }

        // The peer initiated; answer with our own point before
        // completing the exchange.
        if self.node(from_name).map(|n| n.ecdh.is_none()).unwrap_or(true) {
            if let Err(e) = self.send_ans_key_ecdh(from_name) {
                debug!(node = %from_name, error = %e, "Failed to answer ECDH exchange");
                return false;
            }
        }

        let Some(ecdh) = self.node_mut(from_name).and_then(|n| n.ecdh.take()) else {
            return false;
        };
        let shared = match ecdh.compute_shared(&blob[..ECDH_SIZE]) {
            Ok(shared) => shared,
            Err(e) => {
                error!(node = %from_name, error = %e, "Failed to compute ECDH shared secret");
                return false;
            }
        };

        // Update our crypto end
        let local = self.local;
        let mykeylen = local.keylength;
        let hiskeylen = outcipher.keylength();
        let my_name = self.name().to_string();
        let keys = match derive_packet_keys(&shared[..], &my_name, from_name, mykeylen, hiskeylen)
        {
            Ok(keys) => keys,
            Err(e) => {
                error!(node = %from_name, error = %e, "Failed to expand packet keys");
                return false;
            }
        };

        // Mirror our own inbound parameters onto the peer's record
        let mut incipher = Cipher::new(local.cipher);
        let mut indigest = Digest::new(local.digest, local.maclength);

        let install = (|| -> Result<(), SuiteError> {
            incipher.set_key(&keys.local[..mykeylen], false)?;
            indigest.set_key(&keys.local[mykeylen..])?;
            outcipher.set_key(&keys.peer[..hiskeylen], true)?;
            outdigest.set_key(&keys.peer[hiskeylen..])?;
            Ok(())
        })();
        if let Err(e) = install {
            error!(node = %from_name, error = %e, "Failed to install derived keys");
            return false;
        }

        let replaywin = self.config().replaywin;
        let Some(node) = self.node_mut(from_name) else {
            return false;
        };
        node.incipher = Some(incipher);
        node.indigest = Some(indigest);
        node.incompression = local.compression;
        node.outcipher = Some(outcipher);
        node.outdigest = Some(outdigest);
        node.outcompression = compression;
        node.reset_incoming(replaywin);
        self.set_mykeyused();
        true
    }

    /// Consume a legacy raw key, installing the outbound contexts.
    /// Returns false on any (soft) failure.
    fn ans_key_legacy(
        &mut self,
        from_name: &str,
        key_field: &str,
        mut outcipher: Cipher,
        mut outdigest: Digest,
        compression: i32,
    ) -> bool {
        let key = match hex::decode(key_field) {
            Ok(key) => key,
            Err(_) => {
                error!(node = %from_name, "Got bad ANS_KEY: invalid hex key");
                return false;
            }
        };
        if key.len() != outcipher.keylength() {
            error!(
                node = %from_name,
                got = key.len(),
                expected = outcipher.keylength(),
                "Node uses wrong key length"
            );
            return false;
        }

        // Update our copy of the origin's packet key
        if outcipher.set_key(&key, true).is_err() || outdigest.set_key(&key).is_err() {
            return false;
        }

        let Some(node) = self.node_mut(from_name) else {
            return false;
        };
        node.outcipher = Some(outcipher);
        node.outdigest = Some(outdigest);
        node.outcompression = compression;
        true
    }
}
