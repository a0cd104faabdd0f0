//! # FeedRelay Testkit
//!
//! Test utilities for FeedRelay.
//!
//! This crate provides:
//! - Test fixtures and an in-memory pipeline
//! - Property-based test generators using proptest
//! - Crash recovery harnesses for the delivery guarantee
//! - Log capture for asserting on emitted events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use feedrelay_testkit::prelude::*;
//!
//! #[test]
//! fn forwards_an_insert() {
//!     let pipeline = TestPipeline::new();
//!     pipeline.insert(json!({"_id": "a"}));
//!     pipeline.run_until_published(pipeline.forwarder(), 1).unwrap();
//!     assert_eq!(pipeline.published_ids(), vec!["a"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod logs;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logs::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use logs::*;
