//! Presence subscription handshake.
//!
//! ## Reactions
//!
//! | Inbound        | Outbound                                                  |
//! |----------------|-----------------------------------------------------------|
//! | `probe`        | available presence with status, id echoed                 |
//! | `subscribe`    | `subscribed` (id echoed), own presence, `subscribe` back  |
//! | `unsubscribe`  | `unsubscribed`, id echoed                                 |
//! | `subscribed`   | nothing                                                   |
//! | `unsubscribed` | nothing                                                   |
//! | `unavailable`  | nothing; peer recorded as unavailable                     |
//! | `error`        | nothing; logged                                           |
//! | available      | nothing; peer recorded per `<show/>`                      |
//!
//! The three subscribe replies are returned in the order they must be sent;
//! peers may rely on seeing `subscribed` first.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use super::{PeerPresence, PresenceEvent, PresenceStore};

/// Answers presence stanzas addressed to the bridge.
///
/// Never touches the content store.
pub struct PresenceSubscriptionHandler {
    status: String,
    store: Arc<dyn PresenceStore>,
}

impl PresenceSubscriptionHandler {
    /// Create a handler announcing `status` in its own presence.
    pub fn new(status: impl Into<String>, store: Arc<dyn PresenceStore>) -> Self {
        Self {
            status: status.into(),
            store,
        }
    }

    /// Status text sent with the bridge's presence.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Generate a unique stanza ID for presences the bridge initiates.
    fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Presence of `type_` addressed back to the sender of `inbound`.
    fn reply(inbound: &Presence, type_: PresenceType, id: Option<String>) -> Presence {
        let mut pres = Presence::new(type_);
        pres.from = inbound.to.clone();
        pres.to = inbound.from.clone();
        pres.id = id;
        pres
    }

    /// The bridge's own available presence.
    fn own_presence(&self, inbound: &Presence, id: Option<String>) -> Presence {
        let mut pres = Self::reply(inbound, PresenceType::None, id);
        if !self.status.is_empty() {
            pres.statuses.insert(String::new(), self.status.clone());
        }
        pres
    }

    /// React to one inbound presence. Returns the presences to send, in order.
    #[instrument(
        name = "perch.presence.handle",
        skip(self, presence),
        fields(from = ?presence.from, presence_type = ?presence.type_)
    )]
    pub fn handle(&self, presence: &Presence) -> Vec<Presence> {
        let event = PresenceEvent::from_presence(presence);

        match event {
            PresenceEvent::Probe => {
                vec![self.own_presence(presence, presence.id.clone())]
            }
            PresenceEvent::Subscribe => vec![
                Self::reply(presence, PresenceType::Subscribed, presence.id.clone()),
                self.own_presence(presence, Some(Self::generate_id())),
                Self::reply(presence, PresenceType::Subscribe, Some(Self::generate_id())),
            ],
            PresenceEvent::Unsubscribe => {
                vec![Self::reply(presence, PresenceType::Unsubscribed, presence.id.clone())]
            }
            PresenceEvent::Subscribed | PresenceEvent::Unsubscribed => {
                debug!(event = event.as_str(), "Subscription state change acknowledged");
                Vec::new()
            }
            PresenceEvent::Error => {
                warn!(id = ?presence.id, "Received presence error");
                Vec::new()
            }
            PresenceEvent::Unavailable => {
                self.record(presence, PeerPresence::Unavailable);
                Vec::new()
            }
            PresenceEvent::Available(ref show) => {
                self.record(presence, PeerPresence::from_show(show.as_ref()));
                Vec::new()
            }
        }
    }

    fn record(&self, presence: &Presence, state: PeerPresence) {
        match &presence.from {
            Some(from) => {
                let peer = from.to_bare();
                debug!(peer = %peer, state = %state, "Recording peer presence");
                self.store.set_presence(&peer, state);
            }
            None => debug!(state = %state, "Presence without sender not recorded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::InMemoryPresenceStore;
    use jid::{BareJid, Jid};
    use xmpp_parsers::presence::Show;

    fn inbound(type_: PresenceType, id: Option<&str>) -> Presence {
        let mut pres = Presence::new(type_);
        pres.from = Some("alice@example.com/phone".parse::<Jid>().unwrap());
        pres.to = Some("pubsub.example.com".parse::<Jid>().unwrap());
        pres.id = id.map(String::from);
        pres
    }

    fn handler() -> (PresenceSubscriptionHandler, Arc<InMemoryPresenceStore>) {
        let store = Arc::new(InMemoryPresenceStore::new());
        (PresenceSubscriptionHandler::new("Bridging", store.clone()), store)
    }

    #[test]
    fn test_probe_echoes_id_with_status() {
        let (handler, _) = handler();
        let replies = handler.handle(&inbound(PresenceType::Probe, Some("p1")));

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].type_, PresenceType::None);
        assert_eq!(replies[0].id.as_deref(), Some("p1"));
        assert_eq!(replies[0].statuses.values().next().map(String::as_str), Some("Bridging"));
        assert_eq!(replies[0].to.as_ref().map(|j| j.to_string()), Some("alice@example.com/phone".to_string()));
    }

    #[test]
    fn test_subscribe_sends_three_in_order() {
        let (handler, _) = handler();
        let replies = handler.handle(&inbound(PresenceType::Subscribe, Some("X")));

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].type_, PresenceType::Subscribed);
        assert_eq!(replies[0].id.as_deref(), Some("X"));
        assert_eq!(replies[1].type_, PresenceType::None);
        assert_eq!(replies[1].statuses.values().next().map(String::as_str), Some("Bridging"));
        assert_eq!(replies[2].type_, PresenceType::Subscribe);

        let fresh_1 = replies[1].id.as_deref().expect("fresh id");
        let fresh_2 = replies[2].id.as_deref().expect("fresh id");
        assert_ne!(fresh_1, "X");
        assert_ne!(fresh_2, "X");
        assert_ne!(fresh_1, fresh_2);
    }

    #[test]
    fn test_unsubscribe_echoes_id() {
        let (handler, _) = handler();
        let replies = handler.handle(&inbound(PresenceType::Unsubscribe, Some("u1")));

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].type_, PresenceType::Unsubscribed);
        assert_eq!(replies[0].id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_informational_types_get_no_reply() {
        let (handler, store) = handler();
        for type_ in [PresenceType::Subscribed, PresenceType::Unsubscribed, PresenceType::Error] {
            assert!(handler.handle(&inbound(type_, Some("i"))).is_empty());
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_availability_is_recorded_by_bare_jid() {
        let (handler, store) = handler();
        let peer: BareJid = "alice@example.com".parse().unwrap();

        let mut away = inbound(PresenceType::None, None);
        away.show = Some(Show::Away);
        assert!(handler.handle(&away).is_empty());
        assert_eq!(store.presence(&peer).unwrap().state, PeerPresence::Away);

        assert!(handler.handle(&inbound(PresenceType::Unavailable, None)).is_empty());
        assert_eq!(store.presence(&peer).unwrap().state, PeerPresence::Unavailable);

        handler.handle(&inbound(PresenceType::None, None));
        assert_eq!(store.presence(&peer).unwrap().state, PeerPresence::Online);
    }
}
