//! xray-rs library
//!
//! Command implementations behind the `xray-rs` binary.

pub mod cli;
pub mod commands;
pub mod utils;
