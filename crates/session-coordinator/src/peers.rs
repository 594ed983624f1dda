//! Remote peer registry.
//!
//! A pure reducer over transport peer events. It performs no transport calls
//! and can be rebuilt at any time by replaying the events the transport
//! emitted ([`PeerRegistry::replay`]).
//!
//! Reduction rules:
//!
//! | Event | Effect |
//! |-------|--------|
//! | joined | insert if absent |
//! | published(kind) | insert if absent, mark `kind` published |
//! | left | remove the peer |
//! | unpublished(kind) | remove the peer |
//!
//! "Published" before "joined" is accepted and still yields a present entry.
//! A peer with no published media after an unpublish is dropped, not kept as
//! an empty entry.

use common::types::PeerId;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

use crate::transport::MediaKind;

/// Remote presence or publish change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    Joined { peer: PeerId },
    Left { peer: PeerId },
    Published { peer: PeerId, kind: MediaKind },
    Unpublished { peer: PeerId, kind: MediaKind },
}

impl PeerEvent {
    /// The peer this event concerns.
    #[must_use]
    pub const fn peer(&self) -> PeerId {
        match self {
            PeerEvent::Joined { peer }
            | PeerEvent::Left { peer }
            | PeerEvent::Published { peer, .. }
            | PeerEvent::Unpublished { peer, .. } => *peer,
        }
    }
}

/// Another participant's presence and published media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemotePeer {
    pub peer_id: PeerId,
    pub has_published_audio: bool,
    pub has_published_video: bool,
}

impl RemotePeer {
    fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            has_published_audio: false,
            has_published_video: false,
        }
    }

    fn mark_published(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Audio => self.has_published_audio = true,
            MediaKind::Video => self.has_published_video = true,
        }
    }
}

/// Live set of remote peers, keyed by peer id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, RemotePeer>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry by replaying `events` in order.
    #[must_use]
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a PeerEvent>) -> Self {
        let mut registry = Self::new();
        for event in events {
            registry.apply(event);
        }
        registry
    }

    /// Apply one event. Returns whether the registry changed.
    pub fn apply(&mut self, event: &PeerEvent) -> bool {
        let changed = match *event {
            PeerEvent::Joined { peer } => {
                if self.peers.contains_key(&peer) {
                    false
                } else {
                    self.peers.insert(peer, RemotePeer::new(peer));
                    true
                }
            }
            PeerEvent::Published { peer, kind } => {
                let entry = self
                    .peers
                    .entry(peer)
                    .or_insert_with(|| RemotePeer::new(peer));
                let before = *entry;
                entry.mark_published(kind);
                before != *entry
            }
            PeerEvent::Left { peer } | PeerEvent::Unpublished { peer, .. } => {
                self.peers.remove(&peer).is_some()
            }
        };

        trace!(
            target: "sc.peers",
            peer_id = %event.peer(),
            event = ?event,
            changed = changed,
            peers = self.peers.len(),
            "Applied peer event"
        );

        changed
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    #[must_use]
    pub fn get(&self, peer: PeerId) -> Option<&RemotePeer> {
        self.peers.get(&peer)
    }

    #[must_use]
    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Entries in peer id order.
    pub fn iter(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    /// Copy of all entries in peer id order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<RemotePeer> {
        self.peers.values().copied().collect()
    }
}
