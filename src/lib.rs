//! Dockyard Game Server Library
//!
//! This library provides the connection core of the Dockyard game server:
//! packet framing, handler dispatch and per-connection sessions.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `handlers` - Built-in packet handlers and registry construction
//! - `net` - Connection handling, dispatch and session management
//! - `protocol` - Frame codec and server-owned messages
//! - `region` - Server region codes

pub mod config;
pub mod error;
pub mod handlers;
pub mod net;
pub mod protocol;
pub mod region;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use handlers::build_registry;
pub use region::Region;
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
