//! Keep-alive (CS_10100 -> SC_10101)

use chrono::Utc;
use prost::Message;

use crate::net::registry::{HandlerError, HandlerResult};
use crate::net::session::Session;
use crate::protocol::messages::{HeartbeatRequest, HeartbeatResponse, SC_HEARTBEAT};

/// Answer a heartbeat with the current server time
pub fn handle(payload: &[u8], session: &mut Session) -> HandlerResult {
    let _request =
        HeartbeatRequest::decode(payload).map_err(|e| HandlerError::new(SC_HEARTBEAT, e))?;

    let response = HeartbeatResponse {
        state: 0,
        server_time: wire_time(Utc::now().timestamp()),
    };
    session.send_message(SC_HEARTBEAT, &response)
}

/// Unix seconds clamped into the 32-bit wire field
fn wire_time(timestamp: i64) -> u32 {
    u32::try_from(timestamp.max(0)).unwrap_or(u32::MAX)
}
