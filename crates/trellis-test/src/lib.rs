//! Trellis Test - Shared test utilities for the Trellis bridge.
//!
//! Mock script contexts and permission hosts, a handful of demo features
//! covering every invocation mode, and [`TestBridge`], a dispatcher over
//! those features with one attached application.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! trellis-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use trellis_test::{DELIVERY_TIMEOUT, TestBridge};
//!
//! #[test]
//! fn test_long_task_delivers() {
//!     let bridge = TestBridge::new();
//!     let ack = bridge.dispatch("longTask", "run", r#"{"ms":10,"value":1}"#, Some("cb"));
//!     assert!(ack.is_success());
//!     assert_eq!(bridge.script.wait_for(1, DELIVERY_TIMEOUT).len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod features;
pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use features::*;
pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
