//! Session management module
//!
//! Manages client sessions including:
//! - Per-connection state (identity, outbound buffer, sequence index)
//! - Buffered response writing and flushing
//! - Per-session error accounting
//!
//! The registry of live connections lives in [`crate::net::manager`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::{NetworkError, Result, ServerError};
use crate::net::capture::{Direction, NoopCapture, PacketObserver};
use crate::net::manager::SessionManager;
use crate::net::registry::{HandlerError, HandlerOutcome, HandlerResult};
use crate::protocol::frame::{self, HEADER_SIZE};

/// Unique session identifier
pub type SessionId = u64;

/// Socket write half owned by a session
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Initial capacity of the outbound buffer
const OUTBOUND_CAPACITY: usize = 4096;

/// Account and commander bound to a session after login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub account_id: u32,
    pub commander_id: u32,
}

/// Point-in-time copy of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub handler_errors: u64,
    pub write_errors: u64,
    pub packets: u64,
    pub flushes: u64,
}

/// A connected client session.
///
/// Owned by the task driving the connection; never shared.
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time of session creation
    pub connected_at: Instant,
    identity: Option<Identity>,
    /// Sequence index of the last decoded frame, echoed in responses
    sequence: u16,
    outbound: BytesMut,
    writer: SessionWriter,
    capture: Arc<dyn PacketObserver>,
    /// Registry this session is listed in, when it runs under a server
    manager: Option<Arc<SessionManager>>,
    metrics: MetricsSnapshot,
    close_reason: Option<String>,
    closed: bool,
}

impl Session {
    /// Create a new session writing to `writer`
    pub fn new(id: SessionId, address: SocketAddr, writer: SessionWriter) -> Self {
        Self {
            id,
            address,
            connected_at: Instant::now(),
            identity: None,
            sequence: 0,
            outbound: BytesMut::with_capacity(OUTBOUND_CAPACITY),
            writer,
            capture: Arc::new(NoopCapture),
            manager: None,
            metrics: MetricsSnapshot::default(),
            close_reason: None,
            closed: false,
        }
    }

    /// Create a session that also reports outbound frames to `capture`
    pub fn with_capture(
        id: SessionId,
        address: SocketAddr,
        writer: SessionWriter,
        capture: Arc<dyn PacketObserver>,
    ) -> Self {
        let mut session = Self::new(id, address, writer);
        session.capture = capture;
        session
    }

    /// A session whose writes go nowhere, for exercising handlers in isolation
    pub fn detached() -> Self {
        Self::new(
            0,
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Box::new(tokio::io::sink()),
        )
    }

    /// Attach the connection registry so handlers can reach other sessions
    pub fn with_manager(mut self, manager: Arc<SessionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Connection registry, for handlers that bind identities, join rooms
    /// or message other connections
    pub fn manager(&self) -> Option<&Arc<SessionManager>> {
        self.manager.as_ref()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    /// Bind the logged-in account to this session
    pub fn set_identity(&mut self, identity: Identity) {
        debug!(
            session_id = self.id,
            account_id = identity.account_id,
            commander_id = identity.commander_id,
            "Identity bound to session"
        );
        self.identity = Some(identity);
    }

    /// Bind the logged-in identity and kick any older connection of the
    /// same commander.
    ///
    /// Returns whether another connection was kicked. Without a registry
    /// only the identity is recorded.
    pub fn claim_commander(&mut self, identity: Identity) -> bool {
        match self.manager.clone() {
            Some(manager) => manager.claim_commander(self, identity),
            None => {
                self.set_identity(identity);
                false
            }
        }
    }

    /// Sequence index of the last inbound frame
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u16) {
        self.sequence = sequence;
    }

    /// Bytes waiting for the next flush
    pub fn pending(&self) -> &[u8] {
        &self.outbound
    }

    /// Frame `message` and append it to the outbound buffer.
    ///
    /// Never touches the socket. Fails only when the message cannot be
    /// encoded into a single frame.
    pub fn send_message<M: prost::Message>(&mut self, opcode: u16, message: &M) -> HandlerResult {
        let payload_len = message.encoded_len();
        let start = self.outbound.len();

        frame::encode_header(&mut self.outbound, opcode, payload_len, self.sequence)
            .map_err(|e| self.reject_outbound(opcode, e.into()))?;
        self.outbound.reserve(payload_len);
        if let Err(e) = message.encode(&mut self.outbound) {
            self.outbound.truncate(start);
            return Err(self.reject_outbound(opcode, e.into()));
        }

        Ok(self.finish_outbound(opcode, start))
    }

    /// Frame an already-encoded payload and append it to the outbound buffer
    pub fn send_raw(&mut self, opcode: u16, payload: &[u8]) -> HandlerResult {
        let start = self.outbound.len();
        frame::encode_frame(&mut self.outbound, opcode, payload, self.sequence)
            .map_err(|e| self.reject_outbound(opcode, e.into()))?;
        Ok(self.finish_outbound(opcode, start))
    }

    fn finish_outbound(&mut self, opcode: u16, start: usize) -> HandlerOutcome {
        let written = self.outbound.len() - start;
        let payload = &self.outbound[start + HEADER_SIZE..];
        if let Err(e) = self.capture.on_frame(Direction::Outbound, opcode, payload) {
            warn!(session_id = self.id, opcode = opcode, error = %e, "Packet capture failed");
        }
        debug!(
            session_id = self.id,
            opcode = opcode,
            bytes = written,
            "SC_{} buffered",
            opcode
        );
        HandlerOutcome::new(written, opcode)
    }

    fn reject_outbound(&self, opcode: u16, err: ServerError) -> HandlerError {
        error!(session_id = self.id, opcode = opcode, error = %err, "Failed to buffer SC_{}", opcode);
        HandlerError::new(opcode, err)
    }

    /// Write the outbound buffer to the socket and reset it.
    ///
    /// The buffer is emptied whether or not the write succeeds. A failed
    /// write counts as a write error and closes the session.
    pub async fn flush(&mut self) -> Result<()> {
        self.metrics.flushes += 1;
        if self.outbound.is_empty() {
            return Ok(());
        }

        let result = match self.writer.write_all(&self.outbound).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        let len = self.outbound.len();
        self.outbound.clear();

        match result {
            Ok(()) => {
                debug!(session_id = self.id, bytes = len, "Flushed outbound buffer");
                Ok(())
            }
            Err(e) => {
                self.record_write_error();
                let err = ServerError::Network(NetworkError::WriteError(e));
                debug!(session_id = self.id, bytes = len, "Flush failed");
                self.close_with_error(Some(&err));
                Err(err)
            }
        }
    }

    /// Shut down the write half of the socket
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn record_handler_error(&mut self) {
        self.metrics.handler_errors += 1;
    }

    pub fn record_write_error(&mut self) {
        self.metrics.write_errors += 1;
    }

    /// Count one dispatched inbound frame
    pub fn record_packet(&mut self) {
        self.metrics.packets += 1;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reason recorded by the first close, if it carried an error
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    /// Close without an error
    pub fn close(&mut self) {
        self.close_with_error(None);
    }

    /// Mark the session closed. Only the first call has any effect.
    pub fn close_with_error(&mut self, err: Option<&ServerError>) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(err) = err {
            self.close_reason = Some(err.to_string());
            if !err.is_disconnect() {
                error!(
                    session_id = self.id,
                    address = %self.address,
                    error = %err,
                    "Closing session"
                );
            }
        }

        let m = self.metrics;
        info!(
            session_id = self.id,
            address = %self.address,
            handler_errors = m.handler_errors,
            write_errors = m.write_errors,
            packets = m.packets,
            flushes = m.flushes,
            "Session stats"
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("identity", &self.identity)
            .field("sequence", &self.sequence)
            .field("pending", &self.outbound.len())
            .field("closed", &self.closed)
            .finish()
    }
}
