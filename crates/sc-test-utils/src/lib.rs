//! # Session Coordinator Test Utilities
//!
//! Mocks and fixtures for driving the session coordinator without a real
//! media engine or real devices.
//!
//! ## Modules
//!
//! - `mock_transport` - Scriptable transport with gated joins and call counters
//! - `mock_capture` - Mock camera/microphone with recorded tracks
//! - `fixtures` - Config and membership builders
//! - `harness` - Spawns a coordinator wired to the mocks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = CoordinatorHarness::start();
//!     let gate = harness.transport.push_gated_join();
//!
//!     let join = harness.spawn_join(host_membership("room1"));
//!     harness.wait_for(|s| s.joining).await;
//!
//!     gate.succeed();
//!     assert!(join.await.unwrap().is_some());
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_capture;
pub mod mock_transport;

pub use fixtures::*;
pub use harness::CoordinatorHarness;
pub use mock_capture::{CaptureGate, MockDevices, MockTrack};
pub use mock_transport::{JoinGate, MockTransport};
