//! Stagecast Session Coordinator Library
//!
//! Client-side lifecycle coordinator for a live-streaming room. It sits
//! between the application (which wants to "be in room X, publishing") and
//! the real-time media transport (which only offers asynchronous, fallible
//! `join`/`leave`/`publish`/`unpublish` primitives), and keeps the two
//! consistent under rapid, overlapping user actions:
//!
//! - Session fencing: every join mints a monotonic session id; results of
//!   superseded joins and publishes are discarded and their resources freed
//! - Join/leave/publish/unpublish with overlap rules (one join in flight,
//!   no leave mid-join, no double publish)
//! - Local capture with camera+mic to mic-only fallback
//! - Remote peer registry as a pure reducer over transport events
//!
//! # Architecture
//!
//! ```text
//! SessionCoordinatorHandle ──▶ SessionCoordinator (actor, single writer)
//!                               ├── SessionFence
//!                               ├── LocalCaptureManager ──▶ CaptureDevices
//!                               ├── PeerRegistry
//!                               └── Transport (trait)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, handle and message types
//! - [`fence`] - Session ids and freshness checks
//! - [`capture`] - Local capture with audio-only fallback
//! - [`peers`] - Remote peer registry
//! - [`transport`] - Transport abstraction and the simulated engine
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types

pub mod actors;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod errors;
pub mod fence;
pub mod membership;
pub mod observability;
pub mod peers;
pub mod transport;
