//! Browser collaborator interfaces for siteguardd
//!
//! This crate defines what the core needs from the browser side: a view of
//! the open tabs and a way to redirect a tab to the block page. It contains
//! no browser code itself; the bridge process talks to siteguardd over IPC.

mod mock;
mod registry;
mod traits;

pub use mock::*;
pub use registry::*;
pub use traits::*;
