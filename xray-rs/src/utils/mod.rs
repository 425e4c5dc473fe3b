//! Shared utilities for the xray-rs CLI

pub mod format;
pub mod progress;
pub mod table;
pub mod tree;

pub use format::*;
pub use progress::*;
pub use table::*;
pub use tree::*;
