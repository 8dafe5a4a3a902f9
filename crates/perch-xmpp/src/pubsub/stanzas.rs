//! PubSub stanza parsing and building.
//!
//! Handles XML parsing of PubSub IQ payloads and building of replies.

use minidom::{Element, Node};
use xmpp_parsers::iq::{Iq, IqType};

use crate::error::{BadRequestDetail, ErrorCondition};
use crate::parser::{element_to_string, ns};
use crate::BridgeError;

/// Main PubSub namespace (XEP-0060).
pub const NS_PUBSUB: &str = ns::PUBSUB;

/// Payload carried by an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPayload {
    /// Structured document.
    Element(Element),
    /// Raw text, used when the store body is not XML.
    Text(String),
}

impl ItemPayload {
    /// Payload rendered as the store request body, unescaped.
    pub fn to_body(&self) -> Result<String, BridgeError> {
        match self {
            ItemPayload::Element(elem) => element_to_string(elem),
            ItemPayload::Text(text) => Ok(text.clone()),
        }
    }
}

/// A PubSub item with optional ID and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Item ID. If None on publish, the store assigns one.
    pub id: Option<String>,
    /// The item payload.
    pub payload: Option<ItemPayload>,
}

impl Item {
    /// Create a new item.
    pub fn new(id: Option<String>, payload: Option<ItemPayload>) -> Self {
        Self { id, payload }
    }

    /// Item carrying only an id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            payload: None,
        }
    }

    /// Create an item from an `<item/>` element.
    ///
    /// The first child element is the payload; an item with only text content
    /// carries that text.
    pub fn from_element(elem: &Element) -> Self {
        let id = elem.attr("id").map(String::from);
        let payload = match elem.children().next() {
            Some(child) => Some(ItemPayload::Element(child.clone())),
            None => {
                let text = elem.text();
                if text.trim().is_empty() {
                    None
                } else {
                    Some(ItemPayload::Text(text))
                }
            }
        };
        Self { id, payload }
    }

    /// Build an item element for inclusion in replies.
    pub fn to_element(&self, ns: &str) -> Element {
        let mut builder = Element::builder("item", ns);

        if let Some(ref id) = self.id {
            builder = builder.attr("id", id.as_str());
        }

        match &self.payload {
            Some(ItemPayload::Element(payload)) => builder = builder.append(payload.clone()),
            Some(ItemPayload::Text(text)) => builder = builder.append(Node::Text(text.clone())),
            None => {}
        }

        builder.build()
    }
}

/// Parsed PubSub request types.
#[derive(Debug, Clone, PartialEq)]
pub enum PubSubRequest {
    /// Retrieve items from a node.
    FetchItems {
        /// Node name.
        node: String,
        /// Maximum number of items to return.
        max_items: Option<u32>,
    },
    /// Create a new node.
    CreateNode {
        /// Node name.
        node: String,
    },
    /// Publish an item to a node.
    PublishItem {
        /// Node name to publish to.
        node: String,
        /// The item to publish; `None` when the publish carried no item.
        item: Option<Item>,
    },
    /// Retract (delete) an item from a node.
    RetractItem {
        /// Node name.
        node: String,
        /// Item ID to retract.
        item_id: String,
    },
}

impl PubSubRequest {
    /// Operation name for tracing.
    pub fn operation(&self) -> &'static str {
        match self {
            PubSubRequest::FetchItems { .. } => "items",
            PubSubRequest::CreateNode { .. } => "create",
            PubSubRequest::PublishItem { .. } => "publish",
            PubSubRequest::RetractItem { .. } => "retract",
        }
    }

    /// Target node.
    pub fn node(&self) -> &str {
        match self {
            PubSubRequest::FetchItems { node, .. }
            | PubSubRequest::CreateNode { node }
            | PubSubRequest::PublishItem { node, .. }
            | PubSubRequest::RetractItem { node, .. } => node,
        }
    }
}

/// Check if an element is a `<pubsub/>` payload.
pub fn is_pubsub_payload(elem: &Element) -> bool {
    elem.is("pubsub", NS_PUBSUB)
}

/// The `<pubsub/>` payload of a get/set IQ.
pub fn pubsub_payload(iq: &Iq) -> Option<&Element> {
    match &iq.payload {
        IqType::Get(elem) | IqType::Set(elem) if is_pubsub_payload(elem) => Some(elem),
        _ => None,
    }
}

fn required_node(elem: &Element) -> Result<String, ErrorCondition> {
    elem.attr("node")
        .filter(|n| !n.is_empty())
        .map(String::from)
        .ok_or(ErrorCondition::BadRequest(BadRequestDetail::NodeIdRequired))
}

/// Item ids travel to the store as one path segment; dot segments would
/// address the node itself.
fn checked_item_id(id: String) -> Result<String, ErrorCondition> {
    if id == "." || id == ".." {
        return Err(ErrorCondition::bad_request(BadRequestDetail::InvalidItemId));
    }
    Ok(id)
}

fn max_items(elem: &Element) -> Result<Option<u32>, ErrorCondition> {
    elem.attr("max_items")
        .map(|value| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| ErrorCondition::bad_request(BadRequestDetail::InvalidMaxItems))
        })
        .transpose()
}

fn item_children(elem: &Element) -> Vec<&Element> {
    elem.children().filter(|c| c.is("item", NS_PUBSUB)).collect()
}

/// Parse the `<pubsub/>` payload into a structured request.
///
/// Only the first child is considered. Publish and retract are rejected when
/// they carry more than one item.
pub fn parse_pubsub_request(pubsub: &Element) -> Result<PubSubRequest, ErrorCondition> {
    let Some(child) = pubsub.children().next() else {
        return Err(ErrorCondition::feature_not_implemented());
    };

    if child.ns() != NS_PUBSUB {
        return Err(ErrorCondition::unsupported_feature(child.name()));
    }

    match child.name() {
        "items" => {
            let node = required_node(child)?;
            let max_items = max_items(child)?;
            Ok(PubSubRequest::FetchItems { node, max_items })
        }
        "create" => {
            let node = required_node(child)?;
            Ok(PubSubRequest::CreateNode { node })
        }
        "publish" => {
            let node = required_node(child)?;
            let items = item_children(child);
            if items.len() > 1 {
                return Err(ErrorCondition::max_items_exceeded());
            }
            let mut item = items.first().map(|e| Item::from_element(e));
            if let Some(item) = item.as_mut() {
                item.id = item
                    .id
                    .take()
                    .filter(|id| !id.is_empty())
                    .map(checked_item_id)
                    .transpose()?;
            }
            Ok(PubSubRequest::PublishItem { node, item })
        }
        "retract" => {
            let node = required_node(child)?;
            let items = item_children(child);
            if items.len() > 1 {
                return Err(ErrorCondition::max_items_exceeded());
            }
            let item_id = items
                .first()
                .and_then(|e| e.attr("id"))
                .filter(|id| !id.is_empty())
                .map(String::from)
                .ok_or(ErrorCondition::BadRequest(BadRequestDetail::ItemRequired))
                .and_then(checked_item_id)?;
            Ok(PubSubRequest::RetractItem { node, item_id })
        }
        other => Err(ErrorCondition::unsupported_feature(other)),
    }
}

fn result_iq(original_iq: &Iq, payload: Option<Element>) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: IqType::Result(payload),
    }
}

fn pubsub_wrap(child: Element) -> Element {
    Element::builder("pubsub", NS_PUBSUB).append(child).build()
}

/// Build a PubSub items result IQ.
pub fn build_items_result(original_iq: &Iq, node: &str, items: &[Item]) -> Iq {
    let items_elem = Element::builder("items", NS_PUBSUB)
        .attr("node", node)
        .append_all(items.iter().map(|item| item.to_element(NS_PUBSUB)))
        .build();

    result_iq(original_iq, Some(pubsub_wrap(items_elem)))
}

/// Build a PubSub publish result IQ.
///
/// The item element is present even when the store returned no id.
pub fn build_publish_result(original_iq: &Iq, node: &str, item_id: Option<&str>) -> Iq {
    let mut item = Element::builder("item", NS_PUBSUB);
    if let Some(id) = item_id {
        item = item.attr("id", id);
    }

    let publish_elem = Element::builder("publish", NS_PUBSUB)
        .attr("node", node)
        .append(item.build())
        .build();

    result_iq(original_iq, Some(pubsub_wrap(publish_elem)))
}

/// Build a PubSub retract result IQ.
pub fn build_retract_result(original_iq: &Iq, node: &str, item_id: &str) -> Iq {
    let retract_elem = Element::builder("retract", NS_PUBSUB)
        .attr("node", node)
        .append(Item::with_id(item_id).to_element(NS_PUBSUB))
        .build();

    result_iq(original_iq, Some(pubsub_wrap(retract_elem)))
}

/// Build an empty result IQ for simple success replies.
pub fn build_success(original_iq: &Iq) -> Iq {
    result_iq(original_iq, None)
}

/// Build an error IQ reply.
pub fn build_error(original_iq: &Iq, condition: &ErrorCondition) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: IqType::Error(condition.to_stanza_error()),
    }
}
