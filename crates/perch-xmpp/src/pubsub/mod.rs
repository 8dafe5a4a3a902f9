//! XEP-0060 Publish-Subscribe over a content store.
//!
//! Four requests are bridged; everything else is `feature-not-implemented`:
//!
//! | Request   | Store call                          | Reply                      |
//! |-----------|-------------------------------------|----------------------------|
//! | `items`   | `GET node[?limit=max_items]`        | items found in the body    |
//! | `create`  | per [`NodeCreationPolicy`]          | empty result               |
//! | `publish` | `PUT node/id` or `POST node`        | item carrying resolved id  |
//! | `retract` | `DELETE node/id`                    | item carrying retracted id |
//!
//! Publish and retract accept at most one item; larger batches are refused
//! with `not-allowed`/`max-items-exceeded` before the store is called.

pub mod node;
pub mod response;
pub mod stanzas;
pub mod translator;

pub use node::{AcknowledgeNodeCreation, NodeCreationPolicy, StoreNodeCreation};
pub use response::{map_response, ResponseContext};
pub use stanzas::{
    is_pubsub_payload, parse_pubsub_request, pubsub_payload, Item, ItemPayload, PubSubRequest,
    NS_PUBSUB,
};
pub use translator::{PubSubRequestTranslator, TranslatorConfig};
