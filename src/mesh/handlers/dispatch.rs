//! Control-frame dispatch.

use crate::mesh::{ConnectionId, Mesh};
use crate::protocol::{ProtocolError, RequestCode};
use tracing::error;

impl Mesh {
    /// Handle one control frame from `conn`.
    ///
    /// The external framer strips the newline and hands over the raw
    /// line; the first token is the decimal request code. Returns `Err`
    /// on a hard protocol error, upon which the caller must tear down
    /// the connection. Soft errors are logged and swallowed.
    pub fn handle_request(
        &mut self,
        conn: ConnectionId,
        request: &str,
    ) -> Result<(), ProtocolError> {
        let code = request
            .split_whitespace()
            .next()
            .and_then(|tok| tok.parse::<u32>().ok());
        let Some(code) = code else {
            error!(from = %self.conn_display(conn), "Got unparseable request code");
            return Err(ProtocolError::Malformed { request: "control" });
        };

        match RequestCode::from_u32(code) {
            Some(RequestCode::KeyChanged) => self.key_changed_h(conn, request),
            Some(RequestCode::ReqKey) => self.req_key_h(conn, request),
            Some(RequestCode::AnsKey) => self.ans_key_h(conn, request),
            // REQ_PUBKEY/ANS_PUBKEY only occur nested inside REQ_KEY
            _ => {
                error!(
                    from = %self.conn_display(conn),
                    code = code,
                    "Got unknown request code"
                );
                Err(ProtocolError::UnknownRequest(code))
            }
        }
    }
}
