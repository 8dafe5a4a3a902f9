//! Test utilities for bridge integration tests.
//!
//! Provides a recording content store double and stanza builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use minidom::Element;
use perch_xmpp::pubsub::stanzas::NS_PUBSUB;
use perch_xmpp::{
    InMemoryPresenceStore, PresenceSubscriptionHandler, PubSubRequestTranslator, Stanza,
    StanzaRouter, StoreError, StoreGateway, StoreRequest, StoreResponse, TranslatorConfig,
};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::DefinedCondition;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Status text the test bridge announces.
pub const STATUS: &str = "Bridging notes";

/// Content store double that records every request.
pub struct RecordingStore {
    response: Result<StoreResponse, StoreError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<StoreRequest>>,
}

impl RecordingStore {
    /// Store answering every request with `status` and `body`.
    pub fn responding(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self::new(Ok(StoreResponse::new(status, body)), None))
    }

    /// Store failing every request at the transport level.
    pub fn failing(error: StoreError) -> Arc<Self> {
        Arc::new(Self::new(Err(error), None))
    }

    /// Store answering 200 only after `delay`.
    pub fn slow(delay: Duration, body: &str) -> Arc<Self> {
        Arc::new(Self::new(Ok(StoreResponse::new(200, body)), Some(delay)))
    }

    fn new(response: Result<StoreResponse, StoreError>, delay: Option<Duration>) -> Self {
        Self {
            response,
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far, including ones still in progress.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<StoreRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreGateway for RecordingStore {
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}

/// Router over `store` with an in-memory presence store.
pub fn router_with(store: Arc<dyn StoreGateway>, config: TranslatorConfig) -> StanzaRouter {
    StanzaRouter::new(
        Arc::new(PresenceSubscriptionHandler::new(
            STATUS,
            Arc::new(InMemoryPresenceStore::new()),
        )),
        Arc::new(PubSubRequestTranslator::new(store, config)),
    )
}

/// Router over `store` with default settings.
pub fn router(store: Arc<dyn StoreGateway>) -> StanzaRouter {
    router_with(store, TranslatorConfig::default())
}

/// Parse a stanza from XML, defaulting to the client namespace.
pub fn stanza(xml: &str) -> Stanza {
    let xml = perch_xmpp::parser::ensure_default_namespace(xml, perch_xmpp::ns::JABBER_CLIENT);
    Stanza::from_element(perch_xmpp::parser::parse_element(&xml).unwrap())
        .unwrap()
        .expect("presence or iq")
}

/// A pubsub IQ from alice to the bridge.
pub fn pubsub_iq(kind: &str, id: &str, inner: &str) -> Stanza {
    stanza(&format!(
        "<iq type='{}' id='{}' from='alice@example.com/desk' to='pubsub.example.com'><pubsub xmlns='{}'>{}</pubsub></iq>",
        kind, id, NS_PUBSUB, inner
    ))
}

/// A presence from alice to the bridge.
pub fn presence(type_attr: Option<&str>, id: &str) -> Stanza {
    let type_attr = type_attr
        .map(|t| format!(" type='{}'", t))
        .unwrap_or_default();
    stanza(&format!(
        "<presence{} id='{}' from='alice@example.com/desk' to='pubsub.example.com'/>",
        type_attr, id
    ))
}

/// The single reply IQ, panicking on anything else.
pub fn single_iq(replies: Vec<Stanza>) -> Iq {
    assert_eq!(replies.len(), 1, "expected exactly one reply, got {:?}", replies);
    match replies.into_iter().next() {
        Some(Stanza::Iq(iq)) => iq,
        other => panic!("Expected iq, got {:?}", other),
    }
}

/// Defined condition and application condition of an error reply.
pub fn error_of(iq: &Iq) -> (DefinedCondition, Option<Element>) {
    match &iq.payload {
        IqType::Error(e) => (e.defined_condition.clone(), e.other.clone()),
        other => panic!("Expected error reply, got {:?}", other),
    }
}

/// The `<pubsub/>` child of a result reply.
pub fn result_child<'a>(iq: &'a Iq, name: &str) -> &'a Element {
    match &iq.payload {
        IqType::Result(Some(pubsub)) => pubsub
            .get_child(name, NS_PUBSUB)
            .unwrap_or_else(|| panic!("result has no <{}/>", name)),
        other => panic!("Expected result with payload, got {:?}", other),
    }
}

/// Item ids under a result child, in order.
pub fn item_ids(elem: &Element) -> Vec<Option<String>> {
    elem.children()
        .filter(|c| c.is("item", NS_PUBSUB))
        .map(|c| c.attr("id").map(String::from))
        .collect()
}
