//! Inbound stanza routing.
//!
//! The `StanzaRouter` classifies each inbound stanza and hands it to the
//! component that answers it.
//!
//! # Routing Logic
//!
//! 1. Presence goes to the [`PresenceSubscriptionHandler`].
//! 2. A get/set IQ carrying `<pubsub/>` goes to the
//!    [`PubSubRequestTranslator`].
//! 3. Any other get/set IQ is answered `feature-not-implemented`, as is one
//!    with no payload. Several payloads are answered `bad-request`.
//! 4. Result and error IQs are replies themselves and are dropped.

use std::sync::Arc;

use tracing::{debug, instrument};
use xmpp_parsers::iq::{Iq, IqType};

use crate::error::ErrorCondition;
use crate::presence::PresenceSubscriptionHandler;
use crate::pubsub::stanzas::{build_error, pubsub_payload};
use crate::pubsub::PubSubRequestTranslator;
use crate::types::{iq_type_name, Stanza};

/// Where an inbound stanza is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Presence handshake or availability update
    Presence,
    /// Get/set IQ with a pubsub payload
    PubSub,
    /// Get/set IQ the bridge does not implement
    Unsupported,
    /// Result or error IQ, never answered
    Ignore,
}

impl Route {
    /// Route name for tracing.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Presence => "presence",
            Route::PubSub => "pubsub",
            Route::Unsupported => "unsupported",
            Route::Ignore => "ignore",
        }
    }
}

/// Dispatches inbound stanzas and collects their replies.
pub struct StanzaRouter {
    presence: Arc<PresenceSubscriptionHandler>,
    translator: Arc<PubSubRequestTranslator>,
}

impl StanzaRouter {
    /// Create a router over the two handlers.
    pub fn new(
        presence: Arc<PresenceSubscriptionHandler>,
        translator: Arc<PubSubRequestTranslator>,
    ) -> Self {
        Self {
            presence,
            translator,
        }
    }

    /// Classify a stanza without handling it.
    pub fn classify(stanza: &Stanza) -> Route {
        match stanza {
            Stanza::Presence(_) => Route::Presence,
            Stanza::Iq(iq) => Self::classify_iq(iq),
            Stanza::InvalidIq(_) => Route::Unsupported,
        }
    }

    fn classify_iq(iq: &Iq) -> Route {
        match &iq.payload {
            IqType::Result(_) | IqType::Error(_) => Route::Ignore,
            IqType::Get(_) | IqType::Set(_) => {
                if pubsub_payload(iq).is_some() {
                    Route::PubSub
                } else {
                    Route::Unsupported
                }
            }
        }
    }

    /// Handle one inbound stanza and return its replies, in send order.
    ///
    /// Every get/set IQ yields exactly one reply.
    #[instrument(
        name = "perch.router.route",
        skip(self, stanza),
        fields(stanza = stanza.name(), id = ?stanza.id())
    )]
    pub async fn route(&self, stanza: Stanza) -> Vec<Stanza> {
        let route = Self::classify(&stanza);
        debug!(route = route.as_str(), "Routing inbound stanza");

        match stanza {
            Stanza::InvalidIq(invalid) => {
                let condition = invalid.condition();
                debug!(payloads = invalid.payload_count, condition = %condition, "Answering unreadable IQ");
                vec![Stanza::Iq(invalid.error_reply())]
            }
            Stanza::Presence(presence) => self
                .presence
                .handle(&presence)
                .into_iter()
                .map(Stanza::Presence)
                .collect(),
            Stanza::Iq(iq) => match pubsub_payload(&iq) {
                Some(pubsub) => vec![Stanza::Iq(self.translator.handle_iq(&iq, pubsub).await)],
                None if route == Route::Ignore => {
                    debug!(iq_type = iq_type_name(&iq), "Dropping reply IQ");
                    Vec::new()
                }
                None => {
                    let payload = match &iq.payload {
                        IqType::Get(e) | IqType::Set(e) => Some(format!("{{{}}}{}", e.ns(), e.name())),
                        _ => None,
                    };
                    debug!(payload = ?payload, "IQ payload not implemented");
                    vec![Stanza::Iq(build_error(
                        &iq,
                        &ErrorCondition::feature_not_implemented(),
                    ))]
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_element;
    use crate::presence::InMemoryPresenceStore;
    use crate::pubsub::TranslatorConfig;
    use crate::store::InMemoryContentStore;

    fn router() -> StanzaRouter {
        StanzaRouter::new(
            Arc::new(PresenceSubscriptionHandler::new(
                "",
                Arc::new(InMemoryPresenceStore::new()),
            )),
            Arc::new(PubSubRequestTranslator::new(
                Arc::new(InMemoryContentStore::new()),
                TranslatorConfig::default(),
            )),
        )
    }

    fn stanza(xml: &str) -> Stanza {
        Stanza::from_element(parse_element(xml).unwrap())
            .unwrap()
            .expect("stanza")
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            StanzaRouter::classify(&stanza("<presence xmlns='jabber:client'/>")),
            Route::Presence
        );
        assert_eq!(
            StanzaRouter::classify(&stanza(
                "<iq xmlns='jabber:client' type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq>"
            )),
            Route::Unsupported
        );
        assert_eq!(
            StanzaRouter::classify(&stanza("<iq xmlns='jabber:client' type='result' id='1'/>")),
            Route::Ignore
        );
    }

    #[tokio::test]
    async fn test_non_pubsub_iq_is_not_implemented() {
        let replies = router()
            .route(stanza(
                "<iq xmlns='jabber:client' type='get' id='v1' from='a@b/c' to='ps.b'><query xmlns='jabber:iq:version'/></iq>",
            ))
            .await;

        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Stanza::Iq(iq) => {
                assert_eq!(iq.id, "v1");
                assert!(matches!(iq.payload, IqType::Error(_)));
            }
            other => panic!("Expected iq, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_iq_without_payload_still_answered() {
        let replies = router()
            .route(stanza("<iq xmlns='jabber:client' type='set' id='empty1' from='a@b/c' to='ps.b'/>"))
            .await;

        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Stanza::Iq(iq) => {
                assert_eq!(iq.id, "empty1");
                assert!(matches!(iq.payload, IqType::Error(_)));
            }
            other => panic!("Expected iq, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_result_iq_gets_no_reply() {
        let replies = router()
            .route(stanza("<iq xmlns='jabber:client' type='result' id='r1' from='a@b'/>"))
            .await;
        assert!(replies.is_empty());
    }
}
