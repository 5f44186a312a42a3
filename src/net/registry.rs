//! Handler registry
//!
//! Maps client opcodes to ordered handler chains. One opcode can fan out to
//! many handlers; each writes its own response frames into the session.
//! The registry is built once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::ServerError;
use crate::net::session::Session;
use crate::region::Region;

/// What a handler reports on success.
///
/// Both fields are informational and only feed logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerOutcome {
    /// Bytes appended to the session's outbound buffer
    pub bytes_written: usize,
    /// Opcode of the response the handler produced
    pub response_opcode: u16,
}

impl HandlerOutcome {
    pub fn new(bytes_written: usize, response_opcode: u16) -> Self {
        Self {
            bytes_written,
            response_opcode,
        }
    }
}

/// A handler failure, tagged with the response opcode the handler was producing
#[derive(Debug)]
pub struct HandlerError {
    pub response_opcode: u16,
    pub source: ServerError,
}

impl HandlerError {
    pub fn new(response_opcode: u16, source: impl Into<ServerError>) -> Self {
        Self {
            response_opcode,
            source: source.into(),
        }
    }

    /// Failure described by a message rather than an underlying error
    pub fn msg(response_opcode: u16, message: impl Into<String>) -> Self {
        Self::new(response_opcode, ServerError::Handler(message.into()))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SC_{}: {}", self.response_opcode, self.source)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result of a single handler invocation. Only `Err` changes control flow.
pub type HandlerResult = std::result::Result<HandlerOutcome, HandlerError>;

/// A packet handler: receives the headerless payload and the session
pub type Handler = Arc<dyn Fn(&[u8], &mut Session) -> HandlerResult + Send + Sync>;

/// Wrap a function or closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&[u8], &mut Session) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-region handler chains for one opcode
#[derive(Default, Clone)]
pub struct LocalizedHandlers {
    by_region: HashMap<Region, Vec<Handler>>,
    default: Option<Vec<Handler>>,
}

impl LocalizedHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain used when the server runs as `region`
    pub fn region(mut self, region: Region, handlers: Vec<Handler>) -> Self {
        self.by_region.insert(region, handlers);
        self
    }

    /// Same chain for several regions
    pub fn regions(mut self, regions: &[Region], handlers: Vec<Handler>) -> Self {
        for region in regions {
            self.by_region.insert(*region, handlers.clone());
        }
        self
    }

    /// Chain used when the current region has none of its own
    pub fn fallback(mut self, handlers: Vec<Handler>) -> Self {
        self.default = Some(handlers);
        self
    }

    /// Pick the chain for `region`: its own, else the default, else none
    pub fn resolve(mut self, region: Region) -> Option<Vec<Handler>> {
        self.by_region.remove(&region).or(self.default)
    }
}

/// Opcode to handler-chain table
pub struct HandlerRegistry {
    region: Region,
    table: HashMap<u16, Vec<Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry for a server running as `region`
    pub fn new(region: Region) -> Self {
        Self {
            region,
            table: HashMap::new(),
        }
    }

    /// Region localized registrations resolve against
    pub fn region(&self) -> Region {
        self.region
    }

    /// Install `handlers` for `opcode`, replacing any previous chain
    pub fn register(&mut self, opcode: u16, handlers: Vec<Handler>) {
        debug!(opcode = opcode, handlers = handlers.len(), "Registered CS_{}", opcode);
        self.table.insert(opcode, handlers);
    }

    /// Install the chain matching this registry's region.
    ///
    /// Resolution happens now, not per request. Returns whether a chain was
    /// installed; when neither a region chain nor a default exists the opcode
    /// stays unhandled.
    pub fn register_localized(&mut self, opcode: u16, handlers: LocalizedHandlers) -> bool {
        match handlers.resolve(self.region) {
            Some(chain) => {
                self.register(opcode, chain);
                true
            }
            None => {
                debug!(
                    opcode = opcode,
                    region = %self.region,
                    "No localized chain for CS_{}, leaving it unhandled",
                    opcode
                );
                false
            }
        }
    }

    /// Chain registered for `opcode`
    pub fn get(&self, opcode: u16) -> Option<&[Handler]> {
        self.table.get(&opcode).map(Vec::as_slice)
    }

    pub fn contains(&self, opcode: u16) -> bool {
        self.table.contains_key(&opcode)
    }

    /// Number of registered opcodes
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Registered opcodes in ascending order
    pub fn opcodes(&self) -> Vec<u16> {
        let mut opcodes: Vec<u16> = self.table.keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("region", &self.region)
            .field("opcodes", &self.table.len())
            .finish()
    }
}
