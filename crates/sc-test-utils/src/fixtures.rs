//! Test fixtures for session coordinator tests.

use session_coordinator::config::Config;
use session_coordinator::membership::RoomMembership;
use session_coordinator::transport::ClientRole;
use std::collections::HashMap;

/// App id used by [`test_config`].
pub const TEST_APP_ID: &str = "test-app";

/// Config with small buffers and the default audience role.
pub fn test_config() -> Config {
    let vars = HashMap::from([
        ("SC_APP_ID".to_string(), format!("  {TEST_APP_ID}  ")),
        ("SC_MAILBOX_CAPACITY".to_string(), "32".to_string()),
        ("SC_NOTICE_CAPACITY".to_string(), "8".to_string()),
    ]);
    Config::from_vars(&vars).expect("test config should be valid")
}

/// Host membership for `room` with no credential and uid 42.
pub fn host_membership(room: &str) -> RoomMembership {
    RoomMembership::new(room, None, Some(42), ClientRole::Host)
}

/// Audience membership for `room` with no credential and no uid.
pub fn audience_membership(room: &str) -> RoomMembership {
    RoomMembership::new(room, None, None, ClientRole::Audience)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_trimmed() {
        assert_eq!(test_config().app_id, TEST_APP_ID);
        assert_eq!(test_config().default_role, ClientRole::Audience);
    }

    #[test]
    fn test_memberships() {
        assert_eq!(host_membership("r").role(), ClientRole::Host);
        assert_eq!(audience_membership("r").local_uid(), None);
    }
}
