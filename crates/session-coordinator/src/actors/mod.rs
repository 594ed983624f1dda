//! Session coordinator actor.
//!
//! ```text
//! SessionCoordinatorHandle (cloneable, any task)
//!        │ mpsc
//!        ▼
//! SessionCoordinator (single owner of session state)
//! ├── join workflow tasks   ──JoinSettled──▶ mailbox
//! ├── publish workflow tasks ─PublishSettled─▶ mailbox
//! └── transport events (broadcast)
//! ```

pub mod coordinator;
pub mod messages;

pub use coordinator::{SessionCoordinator, SessionCoordinatorHandle};
pub use messages::{
    ConnectionPhase, FailureCallback, IgnoreReason, JoinMode, PublishOutcome, PublishRejection,
    SessionSnapshot, TeardownOutcome, UserNotice,
};
