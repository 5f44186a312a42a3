//! Packet capture
//!
//! Side channel that sees every frame the dispatcher handles, known opcode or
//! not, plus every frame the server buffers for sending. Capture is advisory:
//! an observer failure is logged by the caller and never affects dispatch.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{trace, Level};

/// Direction of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server
    Inbound,
    /// Server to client
    Outbound,
}

/// Capture failure
#[derive(Error, Debug)]
#[error("capture failed: {0}")]
pub struct CaptureError(pub String);

/// Observer invoked for each frame
pub trait PacketObserver: Send + Sync {
    fn on_frame(&self, direction: Direction, opcode: u16, payload: &[u8])
        -> Result<(), CaptureError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCapture;

impl PacketObserver for NoopCapture {
    fn on_frame(&self, _: Direction, _: u16, _: &[u8]) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Dumps frames as hex at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCapture;

impl PacketObserver for TracingCapture {
    fn on_frame(
        &self,
        direction: Direction,
        opcode: u16,
        payload: &[u8],
    ) -> Result<(), CaptureError> {
        let Some(dump) = Self::dump(payload) else {
            return Ok(());
        };
        trace!(
            direction = ?direction,
            opcode = opcode,
            len = payload.len(),
            payload = %dump,
            "Captured frame"
        );
        Ok(())
    }
}

impl TracingCapture {
    /// Hex dump of `payload`, or `None` when trace output is off
    fn dump(payload: &[u8]) -> Option<String> {
        tracing::enabled!(Level::TRACE).then(|| hex::encode(payload))
    }
}

/// A frame retained by [`MemoryCapture`]
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub direction: Direction,
    pub opcode: u16,
    pub payload: Vec<u8>,
    pub captured_at: Instant,
}

/// Keeps the most recent frames in a bounded ring
pub struct MemoryCapture {
    frames: Mutex<VecDeque<CapturedFrame>>,
    capacity: usize,
}

impl MemoryCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Copy of the retained frames, oldest first
    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames.lock().iter().cloned().collect()
    }

    /// Opcodes of the retained frames for one direction, oldest first
    pub fn opcodes(&self, direction: Direction) -> Vec<u16> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.direction == direction)
            .map(|f| f.opcode)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl PacketObserver for MemoryCapture {
    fn on_frame(
        &self,
        direction: Direction,
        opcode: u16,
        payload: &[u8],
    ) -> Result<(), CaptureError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut frames = self.frames.lock();
        while frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(CapturedFrame {
            direction,
            opcode,
            payload: payload.to_vec(),
            captured_at: Instant::now(),
        });
        Ok(())
    }
}
