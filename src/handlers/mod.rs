//! Built-in packet handlers
//!
//! Handlers the server core answers itself. Game features register their own
//! chains on top of the registry returned by [`build_registry`].

pub mod heartbeat;
pub mod notice;

use tracing::info;

use crate::net::registry::{handler, HandlerRegistry, LocalizedHandlers};
use crate::protocol::messages::{CS_HEARTBEAT, CS_SERVER_NOTICE};
use crate::region::Region;

/// Regions that show the server notice board
pub const NOTICE_REGIONS: [Region; 4] = [Region::CN, Region::JP, Region::KR, Region::TW];

/// Build the handler table for a server running as `region`
pub fn build_registry(region: Region) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new(region);

    registry.register(CS_HEARTBEAT, vec![handler(heartbeat::handle)]);
    registry.register_localized(
        CS_SERVER_NOTICE,
        LocalizedHandlers::new().regions(&NOTICE_REGIONS, vec![handler(notice::handle)]),
    );

    info!(
        region = %region,
        opcodes = registry.len(),
        "Handler registry built"
    );
    registry
}
