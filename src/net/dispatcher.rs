//! Packet dispatcher
//!
//! Splits one inbound read into frames and runs each frame's handler chain
//! against the session. Responses accumulate in the session's outbound buffer
//! and go out in a single flush once the whole read has been handled.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::error::{NetworkError, ProtocolError, Result, ServerError};
use crate::net::capture::{Direction, PacketObserver};
use crate::net::registry::HandlerRegistry;
use crate::net::session::Session;
use crate::protocol::frame::{FrameHeader, HEADER_SIZE};

/// Routes inbound frames to registered handlers
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    capture: Arc<dyn PacketObserver>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, capture: Arc<dyn PacketObserver>) -> Self {
        Self { registry, capture }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn capture(&self) -> &Arc<dyn PacketObserver> {
        &self.capture
    }

    /// Handle every frame in `buffer[..n]` and flush the responses once.
    ///
    /// Returns the number of frames handled. On error the session is already
    /// closed and nothing has been flushed for this read, except for a flush
    /// failure itself.
    pub async fn dispatch(&self, buffer: &[u8], n: usize, session: &mut Session) -> Result<usize> {
        let frames = self.process(buffer, n, session)?;
        session.flush().await?;
        Ok(frames)
    }

    /// Run the frame loop without flushing.
    ///
    /// Frames run in buffer order and each chain runs in registration order.
    /// An unknown opcode skips its frame. The first handler error stops the
    /// whole read.
    pub fn process(&self, buffer: &[u8], n: usize, session: &mut Session) -> Result<usize> {
        if session.is_closed() {
            return Err(NetworkError::SessionClosed.into());
        }
        if n > buffer.len() {
            return Err(self.framing_error(
                session,
                ProtocolError::ReadOutOfBounds {
                    n,
                    len: buffer.len(),
                },
            ));
        }

        let mut offset = 0;
        let mut frames = 0;

        while offset < n {
            let header = match FrameHeader::parse(buffer, offset, n) {
                Ok(header) => header,
                Err(e) => return Err(self.framing_error(session, e)),
            };
            session.set_sequence(header.sequence);
            session.record_packet();
            frames += 1;

            let opcode = header.opcode;
            let end = offset + header.total_size();
            let payload = &buffer[offset + HEADER_SIZE..end];

            let chain = self.registry.get(opcode);
            if chain.is_none() {
                error!(
                    session_id = session.id,
                    opcode = opcode,
                    len = payload.len(),
                    "Unhandled packet CS_{}",
                    opcode
                );
            }
            self.observe(session, opcode, payload);

            for handler in chain.unwrap_or_default() {
                let started = Instant::now();
                match handler(payload, session) {
                    Ok(outcome) => {
                        debug!(
                            session_id = session.id,
                            opcode = opcode,
                            response_opcode = outcome.response_opcode,
                            bytes = outcome.bytes_written,
                            elapsed_us = started.elapsed().as_micros() as u64,
                            "Handled CS_{}",
                            opcode
                        );
                    }
                    Err(e) => {
                        session.record_handler_error();
                        error!(
                            session_id = session.id,
                            opcode = opcode,
                            response_opcode = e.response_opcode,
                            error = %e.source,
                            "Handler failed for CS_{} while producing SC_{}",
                            opcode,
                            e.response_opcode
                        );
                        session.close_with_error(Some(&e.source));
                        return Err(e.source);
                    }
                }
            }

            offset = end;
        }

        Ok(frames)
    }

    fn observe(&self, session: &Session, opcode: u16, payload: &[u8]) {
        if let Err(e) = self.capture.on_frame(Direction::Inbound, opcode, payload) {
            warn!(session_id = session.id, opcode = opcode, error = %e, "Packet capture failed");
        }
    }

    fn framing_error(&self, session: &mut Session, err: ProtocolError) -> ServerError {
        let err = ServerError::Protocol(err);
        session.close_with_error(Some(&err));
        err
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}
