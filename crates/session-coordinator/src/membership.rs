//! Room membership: the declared target of one join attempt.

use common::secret::{normalize_credential, SecretString};
use common::types::{PeerId, RoomId};

use crate::transport::ClientRole;

/// Target of a join. Immutable for the lifetime of one join attempt.
///
/// The credential is normalized on construction: empty, `"null"` and
/// `"undefined"` become `None`.
#[derive(Debug, Clone)]
pub struct RoomMembership {
    room: RoomId,
    credential: Option<SecretString>,
    local_uid: Option<PeerId>,
    role: ClientRole,
}

impl RoomMembership {
    #[must_use]
    pub fn new(
        room: impl Into<RoomId>,
        credential: Option<&str>,
        local_uid: Option<u64>,
        role: ClientRole,
    ) -> Self {
        Self {
            room: room.into(),
            credential: normalize_credential(credential),
            local_uid: local_uid.map(PeerId),
            role,
        }
    }

    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Join credential, if any. Never log the exposed value.
    #[must_use]
    pub fn credential(&self) -> Option<&SecretString> {
        self.credential.as_ref()
    }

    #[must_use]
    pub fn local_uid(&self) -> Option<PeerId> {
        self.local_uid
    }

    #[must_use]
    pub fn role(&self) -> ClientRole {
        self.role
    }
}
