//! `econpipe` crate (library surface).
//!
//! The primary entrypoint is the `econpipe` binary (CLI + MCP stdio). This module re-exports
//! the core types and the dedup layer so embedders do not depend on the internal crate layout.

pub use econpipe_core as core;
pub use econpipe_local as local;
