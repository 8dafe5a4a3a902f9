//! # perch-xmpp
//!
//! XMPP component that exposes a CRUD content store as XEP-0060 pubsub.
//!
//! ## Architecture
//!
//! - **Component**: XEP-0114 session to the XMPP server (`component`)
//! - **Router**: classifies inbound stanzas (`routing`)
//! - **Presence**: answers the subscription handshake (`presence`)
//! - **PubSub**: translates items/create/publish/retract into store calls
//!   and store responses back into replies (`pubsub`)
//! - **Store**: the content store boundary, over HTTP or in memory (`store`)
//! - **Bridge**: one task per inbound stanza, replies to a [`Deliverer`]
//!   (`bridge`)
//!
//! ```text
//! stanza → StanzaRouter → PresenceSubscriptionHandler
//!                       → PubSubRequestTranslator → StoreGateway → map_response
//!        → replies → Deliverer
//! ```

pub mod bridge;
pub mod component;
pub mod config;
pub mod parser;
pub mod presence;
pub mod pubsub;
pub mod routing;
pub mod store;

mod error;
mod types;

pub use bridge::{Bridge, ChannelDeliverer, Deliverer};
pub use component::{ComponentReader, ComponentStream, ComponentWriter};
pub use config::{ComponentConfig, StoreBackend, StoreConfig};
pub use error::{
    BadRequestDetail, BridgeError, ErrorCategory, ErrorCondition, NotAllowedDetail, StoreError,
};
pub use parser::ns;
pub use presence::{
    InMemoryPresenceStore, PeerPresence, PresenceEvent, PresenceRecord, PresenceStore,
    PresenceSubscriptionHandler,
};
pub use pubsub::{
    AcknowledgeNodeCreation, Item, ItemPayload, NodeCreationPolicy, PubSubRequest,
    PubSubRequestTranslator, StoreNodeCreation, TranslatorConfig,
};
pub use routing::{Route, StanzaRouter};
pub use store::{
    HttpStoreGateway, InMemoryContentStore, StoreGateway, StoreMethod, StoreRequest,
    StoreResponse,
};
pub use types::*;
