//! Shellcast core library: run shell commands posted in one chat conversation
//! and reply with their output.
//!
//! Inbound messages arrive from a channel ([`channels`]), pass the [`filter`],
//! run through the [`exec`] layer, are rendered by [`format`] and sent back by
//! the [`dispatch`] loop. [`bridge`] wires these together for the CLI.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod filter;
pub mod format;
pub mod init;
