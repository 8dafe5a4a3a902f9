//! Content store boundary.
//!
//! The bridge talks to its backend only through [`StoreGateway`]: one
//! abstract CRUD request in, one status + body out. Implementations decide
//! whether that is an HTTP endpoint, an embedded store or a test double.
//!
//! ## Body convention
//!
//! - Success documents carry an `id` descendant naming the resource.
//! - Collection documents nest children named as the singular of the root's
//!   own tag, or mark the root with `type="array"`.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;

pub use http::HttpStoreGateway;
pub use memory::InMemoryContentStore;

/// CRUD verb of a store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl StoreMethod {
    /// Upper-case verb name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMethod::Get => "GET",
            StoreMethod::Post => "POST",
            StoreMethod::Put => "PUT",
            StoreMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for StoreMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One request against the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    /// Verb
    pub method: StoreMethod,
    /// Node the request addresses
    pub node: String,
    /// Item within the node, kept verbatim as a single path segment
    pub item_id: Option<String>,
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// Request body, empty for GET and DELETE
    pub body: String,
    /// Content type of `body`
    pub content_type: Option<String>,
}

impl StoreRequest {
    fn new(method: StoreMethod, node: &str, item_id: Option<&str>) -> Self {
        Self {
            method,
            node: node.trim_end_matches('/').to_string(),
            item_id: item_id.map(String::from),
            query: Vec::new(),
            body: String::new(),
            content_type: None,
        }
    }

    /// `GET node`
    pub fn get(node: &str) -> Self {
        Self::new(StoreMethod::Get, node, None)
    }

    /// `GET node/item_id`
    pub fn get_item(node: &str, item_id: &str) -> Self {
        Self::new(StoreMethod::Get, node, Some(item_id))
    }

    /// `POST node`, the store assigns the id.
    pub fn post(node: &str) -> Self {
        Self::new(StoreMethod::Post, node, None)
    }

    /// `PUT node/item_id`, update in place.
    pub fn put(node: &str, item_id: &str) -> Self {
        Self::new(StoreMethod::Put, node, Some(item_id))
    }

    /// `PUT node`
    pub fn put_node(node: &str) -> Self {
        Self::new(StoreMethod::Put, node, None)
    }

    /// `DELETE node/item_id`
    pub fn delete(node: &str, item_id: &str) -> Self {
        Self::new(StoreMethod::Delete, node, Some(item_id))
    }

    /// `node` or `node/item_id`, for logging.
    pub fn path(&self) -> String {
        match &self.item_id {
            Some(id) => format!("{}/{}", self.node, id),
            None => self.node.clone(),
        }
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the body and its content type.
    pub fn with_body(mut self, body: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.body = body.into();
        self.content_type = Some(content_type.into());
        self
    }

    /// Value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Raw body
    pub body: String,
}

impl StoreResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one request against the content store.
///
/// Non-2xx statuses are returned as `Ok`; `Err` is reserved for calls that
/// produced no status at all.
#[async_trait]
pub trait StoreGateway: Send + Sync + 'static {
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_paths() {
        assert_eq!(StoreRequest::put("notes", "7").path(), "notes/7");
        assert_eq!(StoreRequest::delete("notes/", "7").path(), "notes/7");
        assert_eq!(StoreRequest::get("notes").path(), "notes");
    }

    #[test]
    fn test_item_id_kept_verbatim() {
        let request = StoreRequest::delete("notes", "a/b");
        assert_eq!(request.node, "notes");
        assert_eq!(request.item_id.as_deref(), Some("a/b"));
    }

    #[test]
    fn test_query_param_lookup() {
        let request = StoreRequest::get("notes").with_query("limit", "5");
        assert_eq!(request.query_param("limit"), Some("5"));
        assert_eq!(request.query_param("page"), None);
    }

    #[test]
    fn test_response_success_range() {
        assert!(StoreResponse::new(201, "").is_success());
        assert!(!StoreResponse::new(302, "").is_success());
        assert!(!StoreResponse::new(404, "").is_success());
    }
}
