//! Protobuf messages owned by the server core
//!
//! Game payloads are opaque to the dispatch layer. The few messages here are
//! the ones the server itself needs: keep-alive and disconnect notices.

/// Opcode of the client heartbeat
pub const CS_HEARTBEAT: u16 = 10100;
/// Opcode of the heartbeat reply
pub const SC_HEARTBEAT: u16 = 10101;
/// Opcode of the server notice request
pub const CS_SERVER_NOTICE: u16 = 10802;
/// Opcode of the server notice reply
pub const SC_SERVER_NOTICE: u16 = 10803;
/// Opcode of the disconnect notice sent before the server drops a client
pub const SC_DISCONNECT: u16 = 10999;

/// CS_10100
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeartbeatRequest {
    #[prost(uint32, tag = "1")]
    pub need_request: u32,
}

/// SC_10101
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeartbeatResponse {
    #[prost(uint32, tag = "1")]
    pub state: u32,
    /// Unix timestamp in seconds
    #[prost(uint32, tag = "2")]
    pub server_time: u32,
}

/// CS_10802
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerNoticeRequest {
    #[prost(uint32, tag = "1")]
    pub platform: u32,
}

/// SC_10803
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerNoticeResponse {
    #[prost(message, repeated, tag = "1")]
    pub notices: Vec<ServerNotice>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerNotice {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub title: String,
    #[prost(string, tag = "3")]
    pub content: String,
}

/// SC_10999
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectNotice {
    #[prost(uint32, tag = "1")]
    pub reason: u32,
}
