//! Connection handler module
//!
//! Handles the lifecycle of client connections including:
//! - Admission checks and session registration
//! - Reassembling socket reads into whole frames
//! - Handing each batch of frames to the dispatcher
//! - Server-initiated disconnects with a notice to the client
//! - Writing frames other connections deliver to this one
//! - Cleanup when the connection ends

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{DisconnectReason, NetworkError, ProtocolError, Result, ServerError};
use crate::net::manager::{ControlMessage, Registration};
use crate::net::session::{Session, SessionWriter};
use crate::protocol::frame::{self, MIN_DECLARED_SIZE, SIZE_FIELD_LEN};
use crate::protocol::messages::{DisconnectNotice, SC_DISCONNECT};
use crate::AppState;

/// Collects raw socket bytes until they form whole frames
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: BytesMut,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take every complete frame at the front of the buffer.
    ///
    /// A declared size too small to cover the header is rejected as soon as
    /// its two bytes arrive, without waiting for a body.
    pub fn split_complete(&mut self) -> std::result::Result<Option<BytesMut>, ProtocolError> {
        let mut end = 0;
        while self.buffer.len() - end >= SIZE_FIELD_LEN {
            let declared = frame::decode_size(end, &self.buffer) as usize;
            if declared < MIN_DECLARED_SIZE {
                return Err(ProtocolError::InvalidFrameSize {
                    size: declared,
                    min: MIN_DECLARED_SIZE,
                });
            }
            let total = declared + SIZE_FIELD_LEN;
            if self.buffer.len() - end < total {
                break;
            }
            end += total;
        }

        if end == 0 {
            Ok(None)
        } else {
            Ok(Some(self.buffer.split_to(end)))
        }
    }
}

/// Send the disconnect notice and flush it straight away
pub async fn send_disconnect(session: &mut Session, reason: DisconnectReason) -> Result<()> {
    let notice = DisconnectNotice {
        reason: reason.as_u8() as u32,
    };
    session
        .send_message(SC_DISCONNECT, &notice)
        .map_err(|e| e.source)?;
    session.flush().await
}

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle an accepted TCP connection
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");

        self.state
            .session_manager
            .admit(addr, self.state.config.require_private_clients)?;

        // Set TCP options
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        self.handle_connection(reader, Box::new(writer), addr).await
    }

    /// Register a session for the connection and run it until it ends
    pub async fn handle_connection<R>(
        &self,
        reader: R,
        writer: SessionWriter,
        addr: SocketAddr,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let Registration { id, mut control } = self.state.session_manager.create_session(addr)?;
        let mut session = Session::with_capture(id, addr, writer, self.state.capture.clone())
            .with_manager(self.state.session_manager.clone());

        debug!(session_id = id, address = %addr, "Starting connection handler");

        let result = self.process_connection(reader, &mut session, &mut control).await;

        debug!(session_id = id, "Connection handler ending");

        self.state.session_manager.remove(id);

        if let Err(e) = session.shutdown().await {
            trace!(session_id = id, error = %e, "Error during socket shutdown");
        }

        match result {
            Err(e) if e.is_disconnect() => {
                debug!(session_id = id, "Connection closed by peer");
                Ok(())
            }
            other => other,
        }
    }

    /// Read, reassemble and dispatch until the peer leaves, a frame or
    /// handler fails, or the server asks the client to go.
    async fn process_connection<R>(
        &self,
        mut reader: R,
        session: &mut Session,
        control: &mut mpsc::Receiver<ControlMessage>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut read_buf = vec![0u8; self.state.config.read_buffer_size];
        let mut frames = FrameAccumulator::new();

        loop {
            tokio::select! {
                read = reader.read(&mut read_buf) => {
                    let n = match read {
                        Ok(0) => return Err(close(session, NetworkError::ConnectionClosed.into())),
                        Ok(n) => n,
                        Err(e) => return Err(close(session, e.into())),
                    };
                    trace!(session_id = session.id, bytes = n, "Read from socket");

                    frames.extend(&read_buf[..n]);
                    let batch = match frames.split_complete() {
                        Ok(batch) => batch,
                        Err(e) => {
                            if let Err(notice_err) =
                                send_disconnect(session, DisconnectReason::InvalidPacket).await
                            {
                                debug!(
                                    session_id = session.id,
                                    error = %notice_err,
                                    "Could not send invalid packet notice"
                                );
                            }
                            return Err(close(session, e.into()));
                        }
                    };
                    if let Some(batch) = batch {
                        self.state.dispatcher.dispatch(&batch, batch.len(), session).await?;
                    }
                }
                Some(message) = control.recv() => match message {
                    ControlMessage::Deliver { opcode, payload } => {
                        if let Err(e) = session.send_raw(opcode, &payload) {
                            warn!(
                                session_id = session.id,
                                opcode = opcode,
                                error = %e.source,
                                "Dropping delivered frame"
                            );
                            continue;
                        }
                        session.flush().await?;
                    }
                    ControlMessage::Disconnect(reason) => {
                        info!(
                            session_id = session.id,
                            address = %session.address,
                            reason = reason.describe(),
                            "Disconnecting client"
                        );
                        send_disconnect(session, reason).await?;
                        session.close();
                        return Ok(());
                    }
                },
            }
        }
    }
}

fn close(session: &mut Session, err: ServerError) -> ServerError {
    session.close_with_error(Some(&err));
    err
}
