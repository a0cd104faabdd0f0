//! File-backed reference adapters for the change feed and the message bus.

pub mod jsonl;
pub mod spool;

pub use jsonl::JsonlChangeStream;
pub use spool::SpoolBus;
