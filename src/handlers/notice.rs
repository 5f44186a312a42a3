//! Server notice board (CS_10802 -> SC_10803)
//!
//! Only some regions show the board; see [`super::NOTICE_REGIONS`].

use prost::Message;

use crate::net::registry::{HandlerError, HandlerResult};
use crate::net::session::Session;
use crate::protocol::messages::{
    ServerNotice, ServerNoticeRequest, ServerNoticeResponse, SC_SERVER_NOTICE,
};

/// Notices shown to every client
pub fn notices() -> Vec<ServerNotice> {
    vec![ServerNotice {
        id: 1,
        title: "Welcome".to_string(),
        content: format!("Dockyard server {}", crate::VERSION),
    }]
}

pub fn handle(payload: &[u8], session: &mut Session) -> HandlerResult {
    ServerNoticeRequest::decode(payload).map_err(|e| HandlerError::new(SC_SERVER_NOTICE, e))?;

    let response = ServerNoticeResponse { notices: notices() };
    session.send_message(SC_SERVER_NOTICE, &response)
}
