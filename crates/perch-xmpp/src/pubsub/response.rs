//! Interpretation of content store responses.
//!
//! [`map_response`] turns one [`StoreResponse`] into the items of a pubsub
//! reply or the [`ErrorCondition`] to answer with. It is pure: no I/O, no
//! logging, no state.
//!
//! ## Shape detection
//!
//! A fetch body is a collection when its root is explicitly marked
//! (`type="array"` or `collection="true"`), or when it has children named as
//! the singular of its own tag (`<notes><note/>…</notes>`). The singular form
//! is derived with plain English suffix rules, so irregular plurals
//! (`people`/`person`) are only recognised through the explicit marker.

use minidom::Element;

use super::stanzas::{Item, ItemPayload};
use crate::error::ErrorCondition;
use crate::parser::{ensure_default_namespace, ns, parse_element, strip_xml_declaration};
use crate::store::StoreResponse;

/// What the response is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseContext<'a> {
    /// GET of a node.
    Fetch,
    /// PUT or POST of one item.
    Publish {
        /// Id supplied by the publisher, if any.
        caller_id: Option<&'a str>,
    },
    /// DELETE of one item.
    Retract {
        /// Id of the retracted item.
        item_id: &'a str,
    },
}

/// Map a store response onto reply items.
///
/// - `404` is `item-not-found`; any other non-2xx is `internal-server-error`
///   carrying the status.
/// - Fetch yields the items found in the body.
/// - Publish yields one item whose id is the body's `id` descendant, falling
///   back to the caller's id.
/// - Retract yields one item carrying the retracted id.
pub fn map_response(
    response: &StoreResponse,
    context: ResponseContext<'_>,
) -> Result<Vec<Item>, ErrorCondition> {
    if response.status == 404 {
        return Err(ErrorCondition::ItemNotFound);
    }
    if !response.is_success() {
        return Err(ErrorCondition::backend_status(response.status));
    }

    match context {
        ResponseContext::Fetch => Ok(fetch_items(&response.body)),
        ResponseContext::Publish { caller_id } => {
            let id = parse_document(&response.body)
                .and_then(|doc| first_id(&doc))
                .or_else(|| caller_id.map(String::from));
            Ok(vec![Item::new(id, None)])
        }
        ResponseContext::Retract { item_id } => Ok(vec![Item::with_id(item_id)]),
    }
}

/// Parsed body, if it is an XML document.
///
/// Documents without a default namespace are placed in the store namespace.
fn parse_document(body: &str) -> Option<Element> {
    let body = strip_xml_declaration(body);
    if !body.starts_with('<') {
        return None;
    }
    parse_element(&ensure_default_namespace(body, ns::STORE)).ok()
}

fn fetch_items(body: &str) -> Vec<Item> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let Some(root) = parse_document(body) else {
        return vec![Item::new(None, Some(ItemPayload::Text(body.to_string())))];
    };

    if let Some(members) = collection_members(&root) {
        return members
            .into_iter()
            .map(|member| Item::new(first_id(member), Some(ItemPayload::Element(member.clone()))))
            .collect();
    }

    if root.children().next().is_none() && root.text().trim().is_empty() {
        return Vec::new();
    }

    let id = first_id(&root);
    vec![Item::new(id, Some(ItemPayload::Element(root)))]
}

/// Members of a collection document, or `None` for a single document.
fn collection_members(root: &Element) -> Option<Vec<&Element>> {
    let marked = root.attr("type") == Some("array") || root.attr("collection") == Some("true");
    if marked {
        return Some(root.children().collect());
    }

    let singular = singularize(root.name())?;
    let members: Vec<&Element> = root.children().filter(|c| c.name() == singular).collect();
    if members.is_empty() {
        None
    } else {
        Some(members)
    }
}

/// Text of the first `id` element below `elem`, in document order.
pub fn first_id(elem: &Element) -> Option<String> {
    for child in elem.children() {
        if child.name() == "id" {
            let text = child.text();
            let text = text.trim();
            return if text.is_empty() { None } else { Some(text.to_string()) };
        }
        if let Some(id) = first_id(child) {
            return Some(id);
        }
    }
    None
}

/// Singular of an English plural tag name, or `None` if it does not look
/// plural.
pub fn singularize(word: &str) -> Option<String> {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return Some(format!("{}y", stem));
        }
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return Some(word[..word.len() - 2].to_string());
        }
    }
    if word.ends_with("ss") {
        return None;
    }
    word.strip_suffix('s')
        .filter(|stem| !stem.is_empty())
        .map(String::from)
}
