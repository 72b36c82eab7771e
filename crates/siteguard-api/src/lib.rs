//! Protocol types for siteguardd
//!
//! This crate defines the stable types shared between siteguardd and clients:
//! - Site rules, global limits, operation mode, temporary disable window
//! - Policy verdicts and block reasons
//! - Raw browser events reported by the browser bridge
//! - Commands, responses and pushed events
//! - Versioning

mod commands;
mod events;
mod rules;
mod types;

pub use commands::*;
pub use events::*;
pub use rules::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
