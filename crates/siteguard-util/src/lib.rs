//! Shared utilities for siteguardd
//!
//! This crate provides:
//! - ID types (HostName, TabId, WindowId, ClientId)
//! - Time utilities (mockable wall clock, clock ranges with midnight wraparound, day types)
//! - Host extraction from browser URLs
//! - Default paths for socket, data, and config files

mod host;
mod ids;
mod paths;
mod time;

pub use host::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
