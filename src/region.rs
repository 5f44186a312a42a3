//! Server region
//!
//! The client ships in five regional builds. The server runs as exactly one
//! of them for its whole lifetime; the region picks localized handler chains
//! when the registry is built.

use std::fmt;
use std::str::FromStr;

use crate::error::ServerError;

/// Client region served by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    CN,
    EN,
    JP,
    KR,
    TW,
}

impl Region {
    /// All supported regions
    pub const ALL: [Region; 5] = [Region::CN, Region::EN, Region::JP, Region::KR, Region::TW];

    /// Region code as it appears in configuration
    pub fn code(&self) -> &'static str {
        match self {
            Region::CN => "CN",
            Region::EN => "EN",
            Region::JP => "JP",
            Region::KR => "KR",
            Region::TW => "TW",
        }
    }

    /// Parse a configured region value.
    ///
    /// An empty value selects `EN`. Codes are case-sensitive.
    pub fn from_config(value: &str) -> Result<Self, ServerError> {
        if value.is_empty() {
            return Ok(Region::default());
        }
        value.parse()
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::EN
    }
}

impl FromStr for Region {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .iter()
            .copied()
            .find(|region| region.code() == s)
            .ok_or_else(|| ServerError::Config(format!("invalid region '{}'", s)))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
