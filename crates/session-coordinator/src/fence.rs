//! Session fence: decides whether an asynchronous operation is still in charge.
//!
//! Every `join` mints a new [`SessionId`] which unconditionally becomes the
//! active session, implicitly invalidating all older ids. Work that runs
//! across a suspension point carries a [`SessionToken`] and re-checks it
//! before touching shared state. A failed check means the caller must
//! abstain: no mutation, no retry, no error to the user.
//!
//! ```text
//! mint() -> 1   active = 1
//! mint() -> 2   active = 2   token(1).is_current() == false
//! clear()       active = none
//! ```
//!
//! The coordinator actor is the only writer (`mint`, `clear`). Tokens held by
//! in-flight join/publish tasks only read.

use serde::Serialize;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::observability::metrics::record_fenced_out;

/// Register value meaning "no active session".
const NO_SESSION: u64 = 0;

/// Strictly increasing identifier of one join attempt. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(NonZeroU64);

impl SessionId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic session counter plus the active session register.
#[derive(Debug)]
pub struct SessionFence {
    /// Last minted id.
    minted: AtomicU64,
    /// Active session register (`NO_SESSION` when none).
    active: AtomicU64,
}

impl SessionFence {
    /// Create an empty fence. No session is active.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            minted: AtomicU64::new(NO_SESSION),
            active: AtomicU64::new(NO_SESSION),
        })
    }

    /// Mint a new session id and make it the active one.
    pub(crate) fn mint(self: &Arc<Self>) -> SessionToken {
        let raw = self.minted.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.active.store(raw, Ordering::SeqCst);

        // `raw` is at least 1 after the increment.
        let id = SessionId(NonZeroU64::MIN.saturating_add(raw.saturating_sub(1)));

        debug!(target: "sc.fence", session_id = %id, "Minted session");

        SessionToken {
            id,
            fence: Arc::clone(self),
        }
    }

    /// Set the register to "none".
    pub(crate) fn clear(&self) {
        let previous = self.active.swap(NO_SESSION, Ordering::SeqCst);
        debug!(target: "sc.fence", previous = previous, "Cleared active session");
    }

    /// Whether `id` is the active session.
    #[must_use]
    pub fn is_active(&self, id: SessionId) -> bool {
        self.active.load(Ordering::SeqCst) == id.get()
    }

    /// The active session, if any.
    #[must_use]
    pub fn active(&self) -> Option<SessionId> {
        SessionId::from_raw(self.active.load(Ordering::SeqCst))
    }

    /// A token for the active session, if any.
    #[must_use]
    pub fn active_token(self: &Arc<Self>) -> Option<SessionToken> {
        self.active().map(|id| SessionToken {
            id,
            fence: Arc::clone(self),
        })
    }

    /// Whether a caller naming `requested` (or the active session when
    /// `None`) is addressing the active session.
    #[must_use]
    pub fn targets_active(&self, requested: Option<SessionId>) -> bool {
        match requested {
            None => true,
            Some(id) => self.is_active(id),
        }
    }
}

/// Explicit cancellation token for one session.
///
/// Carried through every suspension point of a join or publish. There is no
/// cancel call: a token is cancelled by minting a newer session or clearing
/// the fence.
#[derive(Clone)]
pub struct SessionToken {
    id: SessionId,
    fence: Arc<SessionFence>,
}

impl SessionToken {
    /// Session id this token stands for.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether this token's session is still the active one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.fence.is_active(self.id)
    }

    /// Freshness check after a suspension point.
    ///
    /// `stage` names the suspension point for logs and metrics.
    pub fn ensure_current(&self, stage: &'static str) -> Result<(), Superseded> {
        if self.is_current() {
            return Ok(());
        }

        let active = self.fence.active();
        debug!(
            target: "sc.fence",
            session_id = %self.id,
            active = ?active.map(SessionId::get),
            stage = stage,
            "Session superseded, abstaining"
        );
        record_fenced_out(stage);

        Err(Superseded {
            session: self.id,
            active,
            stage,
        })
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("id", &self.id)
            .field("current", &self.is_current())
            .finish()
    }
}

/// A fenced operation discovered that its session is no longer active.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Session {session} superseded at {stage}")]
pub struct Superseded {
    /// The session that lost the fence.
    pub session: SessionId,
    /// The session active at check time, if any.
    pub active: Option<SessionId>,
    /// Suspension point where the check failed.
    pub stage: &'static str,
}
