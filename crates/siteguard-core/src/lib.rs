//! Core policy engine for siteguardd
//!
//! This crate is the heart of siteguardd, containing:
//! - Usage ledger (per-day, per-host dwell time and activations)
//! - Session tracker (which host is accruing time right now)
//! - Policy resolver (allow or block, walking the layered rules)
//! - The engine tying them together with the reconciliation loop
//! - Usage and activation reports

mod engine;
mod events;
mod ledger;
mod report;
mod resolver;
mod tracker;

pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use report::*;
pub use resolver::*;
pub use tracker::*;
