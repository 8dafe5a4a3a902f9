//! Presence handling.
//!
//! The bridge answers the RFC 6121 subscription handshake on its own and
//! records what it hears about peers in an externally owned
//! [`PresenceStore`].

pub mod handler;

pub use handler::PresenceSubscriptionHandler;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jid::BareJid;
use serde::{Deserialize, Serialize};
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};

/// What an inbound presence stanza means to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Error,
    Probe,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Unavailable,
    /// No type attribute: the peer is available, optionally with a show state.
    Available(Option<Show>),
}

impl PresenceEvent {
    /// Classify a presence stanza.
    pub fn from_presence(presence: &Presence) -> Self {
        match presence.type_ {
            PresenceType::Error => PresenceEvent::Error,
            PresenceType::Probe => PresenceEvent::Probe,
            PresenceType::Subscribe => PresenceEvent::Subscribe,
            PresenceType::Subscribed => PresenceEvent::Subscribed,
            PresenceType::Unsubscribe => PresenceEvent::Unsubscribe,
            PresenceType::Unsubscribed => PresenceEvent::Unsubscribed,
            PresenceType::Unavailable => PresenceEvent::Unavailable,
            PresenceType::None => PresenceEvent::Available(presence.show.clone()),
        }
    }

    /// Event name for tracing.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceEvent::Error => "error",
            PresenceEvent::Probe => "probe",
            PresenceEvent::Subscribe => "subscribe",
            PresenceEvent::Subscribed => "subscribed",
            PresenceEvent::Unsubscribe => "unsubscribe",
            PresenceEvent::Unsubscribed => "unsubscribed",
            PresenceEvent::Unavailable => "unavailable",
            PresenceEvent::Available(_) => "available",
        }
    }
}

/// Last known state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerPresence {
    /// Available with no show state
    #[default]
    Online,
    Away,
    Chat,
    Dnd,
    Xa,
    Unavailable,
}

impl PeerPresence {
    /// State for an available presence with an optional show.
    pub fn from_show(show: Option<&Show>) -> Self {
        match show {
            None => PeerPresence::Online,
            Some(Show::Away) => PeerPresence::Away,
            Some(Show::Chat) => PeerPresence::Chat,
            Some(Show::Dnd) => PeerPresence::Dnd,
            Some(Show::Xa) => PeerPresence::Xa,
        }
    }

    /// Whether the peer is reachable.
    pub fn is_available(&self) -> bool {
        !matches!(self, PeerPresence::Unavailable)
    }
}

impl std::fmt::Display for PeerPresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerPresence::Online => write!(f, "online"),
            PeerPresence::Away => write!(f, "away"),
            PeerPresence::Chat => write!(f, "chat"),
            PeerPresence::Dnd => write!(f, "dnd"),
            PeerPresence::Xa => write!(f, "xa"),
            PeerPresence::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A stored peer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// State
    pub state: PeerPresence,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Per-peer presence state, owned by the hosting application.
///
/// Implementations must serialize their own writes; the bridge calls
/// [`set_presence`](Self::set_presence) from concurrent tasks.
pub trait PresenceStore: Send + Sync + 'static {
    /// Last known state of `peer`.
    fn presence(&self, peer: &BareJid) -> Option<PresenceRecord>;

    /// Record a new state for `peer`.
    fn set_presence(&self, peer: &BareJid, state: PeerPresence);
}

/// Presence store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    peers: DashMap<BareJid, PresenceRecord>,
}

impl InMemoryPresenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers with a recorded state.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has been recorded.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl PresenceStore for InMemoryPresenceStore {
    fn presence(&self, peer: &BareJid) -> Option<PresenceRecord> {
        self.peers.get(peer).map(|r| r.value().clone())
    }

    fn set_presence(&self, peer: &BareJid, state: PeerPresence) {
        self.peers.insert(
            peer.clone(),
            PresenceRecord {
                state,
                updated_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_presence() {
        let mut pres = Presence::new(PresenceType::None);
        pres.show = Some(Show::Dnd);
        assert_eq!(
            PresenceEvent::from_presence(&pres),
            PresenceEvent::Available(Some(Show::Dnd))
        );

        let pres = Presence::new(PresenceType::Probe);
        assert_eq!(PresenceEvent::from_presence(&pres), PresenceEvent::Probe);
    }

    #[test]
    fn test_peer_presence_from_show() {
        assert_eq!(PeerPresence::from_show(None), PeerPresence::Online);
        assert_eq!(PeerPresence::from_show(Some(&Show::Xa)), PeerPresence::Xa);
        assert_eq!(PeerPresence::Away.to_string(), "away");
        assert!(!PeerPresence::Unavailable.is_available());
    }

    #[test]
    fn test_in_memory_store_overwrites() {
        let store = InMemoryPresenceStore::new();
        let peer: BareJid = "alice@example.com".parse().unwrap();

        assert!(store.presence(&peer).is_none());
        store.set_presence(&peer, PeerPresence::Away);
        store.set_presence(&peer, PeerPresence::Unavailable);

        assert_eq!(store.len(), 1);
        assert_eq!(store.presence(&peer).unwrap().state, PeerPresence::Unavailable);
    }
}
