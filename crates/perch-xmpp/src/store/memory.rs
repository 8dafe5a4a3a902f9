//! In-process content store.
//!
//! Speaks the same request/response contract as a remote store so the bridge
//! can run without one, and so tests can exercise full publish/fetch cycles.
//!
//! Documents are rendered in the collection convention the response mapper
//! understands:
//!
//! ```text
//! <notes type='array'>
//!   <note><id>…</id>payload</note>
//! </notes>
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use minidom::Element;
use tracing::{debug, warn};

use super::{StoreGateway, StoreMethod, StoreRequest, StoreResponse};
use crate::error::StoreError;
use crate::BridgeError;
use crate::parser::{element_to_string, ensure_default_namespace, ns, parse_element, strip_xml_declaration};
use crate::pubsub::response::singularize;

/// One stored resource.
#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    payload: String,
}

/// Thread-safe in-memory store keyed by node path.
pub struct InMemoryContentStore {
    /// node -> documents in publish order
    nodes: DashMap<String, Vec<StoredDocument>>,
    /// Query parameter limiting collection size
    page_size_param: String,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            page_size_param: "limit".to_string(),
        }
    }

    /// Use a different page-size query parameter.
    pub fn with_page_size_param(mut self, param: impl Into<String>) -> Self {
        self.page_size_param = param.into();
        self
    }

    /// Number of documents stored under a node.
    pub fn len(&self, node: &str) -> usize {
        self.nodes.get(node).map(|docs| docs.len()).unwrap_or(0)
    }

    /// Whether the node holds no documents.
    pub fn is_empty(&self, node: &str) -> bool {
        self.len(node) == 0
    }

    /// Generate a unique item ID.
    fn generate_item_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn get(&self, request: &StoreRequest) -> StoreResponse {
        let node = request.node.as_str();
        match &request.item_id {
            Some(id) => match self.find(node, id) {
                Some(doc) => respond(200, render_single(node, &doc)),
                None => not_found(),
            },
            None => match self.nodes.get(node) {
                Some(docs) => {
                    let limit = request
                        .query_param(&self.page_size_param)
                        .and_then(|v| v.parse::<usize>().ok());
                    let skip = limit.map(|n| docs.len().saturating_sub(n)).unwrap_or(0);
                    respond(200, render_collection(node, &docs[skip..]))
                }
                None => not_found(),
            },
        }
    }

    fn post(&self, request: &StoreRequest) -> StoreResponse {
        let doc = StoredDocument {
            id: Self::generate_item_id(),
            payload: request.body.clone(),
        };
        let body = render_single(&request.node, &doc);
        self.nodes
            .entry(request.node.clone())
            .or_default()
            .push(doc);
        respond(201, body)
    }

    fn put(&self, request: &StoreRequest) -> StoreResponse {
        let node = request.node.as_str();
        let Some(id) = request.item_id.as_deref() else {
            let created = !self.nodes.contains_key(node);
            self.nodes.entry(node.to_string()).or_default();
            let status = if created { 201 } else { 200 };
            return respond(status, render_collection(node, &[]));
        };

        let doc = StoredDocument {
            id: id.to_string(),
            payload: request.body.clone(),
        };
        let body = render_single(node, &doc);

        let mut docs = self.nodes.entry(node.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                *existing = doc;
                respond(200, body)
            }
            None => {
                docs.push(doc);
                respond(201, body)
            }
        }
    }

    fn delete(&self, request: &StoreRequest) -> StoreResponse {
        let node = request.node.as_str();
        let Some(id) = request.item_id.as_deref() else {
            return StoreResponse::new(405, "");
        };

        let Some(mut docs) = self.nodes.get_mut(node) else {
            return not_found();
        };
        match docs.iter().position(|d| d.id == id) {
            Some(index) => {
                let removed = docs.remove(index);
                respond(200, render_single(node, &removed))
            }
            None => not_found(),
        }
    }

    fn find(&self, node: &str, id: &str) -> Option<StoredDocument> {
        self.nodes
            .get(node)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }
}

#[async_trait]
impl StoreGateway for InMemoryContentStore {
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        let response = match request.method {
            StoreMethod::Get => self.get(&request),
            StoreMethod::Post => self.post(&request),
            StoreMethod::Put => self.put(&request),
            StoreMethod::Delete => self.delete(&request),
        };
        debug!(
            method = %request.method,
            path = %request.path(),
            status = response.status,
            "In-memory store handled request"
        );
        Ok(response)
    }
}

fn not_found() -> StoreResponse {
    StoreResponse::new(404, "")
}

/// Collection tag for a node: its last path or URN segment.
fn collection_tag(node: &str) -> String {
    let tag: String = node
        .rsplit(|c| c == '/' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or("items")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if tag.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        tag
    } else {
        format!("n{}", tag)
    }
}

/// Member tag for a node's documents.
fn member_tag(node: &str) -> String {
    singularize(&collection_tag(node)).unwrap_or_else(|| "item".to_string())
}

fn document_element(tag: &str, doc: &StoredDocument) -> Element {
    let mut builder = Element::builder(tag, ns::STORE)
        .append(Element::builder("id", ns::STORE).append(doc.id.clone()).build());

    let payload = strip_xml_declaration(&doc.payload);
    if !payload.is_empty() {
        let parsed = if payload.starts_with('<') {
            parse_element(&ensure_default_namespace(payload, ns::STORE)).ok()
        } else {
            None
        };
        builder = match parsed {
            Some(element) => builder.append(element),
            None => builder.append(
                Element::builder("content", ns::STORE)
                    .append(payload.to_string())
                    .build(),
            ),
        };
    }

    builder.build()
}

fn render_single(node: &str, doc: &StoredDocument) -> Result<String, BridgeError> {
    let element = document_element(&member_tag(node), doc);
    element_to_string(&element)
}

fn render_collection(node: &str, docs: &[StoredDocument]) -> Result<String, BridgeError> {
    let member = member_tag(node);
    let root = Element::builder(collection_tag(node), ns::STORE)
        .attr("type", "array")
        .append_all(docs.iter().map(|doc| document_element(&member, doc)))
        .build();
    element_to_string(&root)
}

/// `status` with the rendered body, or 500 when rendering failed.
fn respond(status: u16, body: Result<String, BridgeError>) -> StoreResponse {
    match body {
        Ok(body) => StoreResponse::new(status, body),
        Err(e) => {
            warn!(error = %e, "Failed to render stored document");
            StoreResponse::new(500, "")
        }
    }
}
