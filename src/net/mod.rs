//! Networking module
//!
//! This module handles all network-related functionality for the Dockyard server:
//! - Connection lifecycle and frame reassembly
//! - Handler registry and frame dispatch
//! - Session state and the live connection registry
//! - Rooms and cross-connection delivery
//! - Packet capture

pub mod capture;
pub mod connection;
pub mod dispatcher;
pub mod manager;
pub mod registry;
pub mod session;

pub use dispatcher::Dispatcher;
pub use registry::{handler, Handler, HandlerError, HandlerOutcome, HandlerRegistry, HandlerResult};
pub use manager::{ControlMessage, SessionManager};
pub use session::Session;
