//! Error types for the bridge.
//!
//! Two layers live here. [`BridgeError`] is the library error returned by
//! fallible plumbing (session, configuration, delivery). [`ErrorCondition`]
//! is the protocol outcome of a pubsub request; it never propagates as a Rust
//! error past the translator and is always turned into an IQ error reply.

use minidom::Element;
use thiserror::Error;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use crate::parser::ns;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// IO error (network, file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML parsing error
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Component handshake rejected by the server
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Stream error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound stanza could not be handed to the session
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create a new XML parse error.
    pub fn xml_parse(msg: impl Into<String>) -> Self {
        Self::XmlParse(msg.into())
    }

    /// Create a new handshake error.
    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// Create a new stream error.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new delivery error.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Failure of a single content store call, distinct from a non-2xx status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the exchange broke mid-way.
    #[error("store transport failure: {0}")]
    Transport(String),

    /// The call did not complete within its deadline.
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The request could not be expressed against this store (bad path, URL).
    #[error("invalid store request: {0}")]
    InvalidRequest(String),
}

/// Where an [`ErrorCondition`] originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unsupported or malformed stanza shape.
    Protocol,
    /// Request rejected before any backend call.
    Validation,
    /// The store answered 404.
    BackendNotFound,
    /// Any other non-2xx status, transport failure or timeout.
    BackendFailure,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::BackendNotFound => write!(f, "backend-not-found"),
            ErrorCategory::BackendFailure => write!(f, "backend-failure"),
        }
    }
}

/// Detail attached to `not-allowed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAllowedDetail {
    /// A publish or retract carried more than one item.
    MaxItemsExceeded,
}

impl NotAllowedDetail {
    /// Element name in the `pubsub#errors` namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotAllowedDetail::MaxItemsExceeded => "max-items-exceeded",
        }
    }
}

/// Detail attached to `bad-request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestDetail {
    /// The pubsub child had no `node` attribute.
    NodeIdRequired,
    /// A retract carried no item id.
    ItemRequired,
    /// An item id that cannot address a single store resource (`.`, `..`).
    InvalidItemId,
    /// `max_items` was not a non-negative integer.
    InvalidMaxItems,
    /// A get/set IQ carried more than one payload element.
    InvalidPayload,
}

impl BadRequestDetail {
    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            BadRequestDetail::NodeIdRequired => "nodeid-required",
            BadRequestDetail::ItemRequired => "item-required",
            BadRequestDetail::InvalidItemId => "invalid-item-id",
            BadRequestDetail::InvalidMaxItems => "invalid-max-items",
            BadRequestDetail::InvalidPayload => "invalid-payload",
        }
    }

    /// Element name in the `pubsub#errors` namespace, where XEP-0060 defines one.
    pub fn pubsub_condition(&self) -> Option<&'static str> {
        match self {
            BadRequestDetail::NodeIdRequired | BadRequestDetail::ItemRequired => {
                Some(self.as_str())
            }
            BadRequestDetail::InvalidItemId
            | BadRequestDetail::InvalidMaxItems
            | BadRequestDetail::InvalidPayload => None,
        }
    }
}

/// Protocol outcome of a failed pubsub request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCondition {
    /// The stanza asks for something the bridge does not do.
    FeatureNotImplemented {
        /// The pubsub feature name, when the request named one.
        feature: Option<String>,
    },
    /// The store answered 404.
    ItemNotFound,
    /// The request was refused before reaching the store.
    NotAllowed(NotAllowedDetail),
    /// The request was malformed.
    BadRequest(BadRequestDetail),
    /// The store failed. `status` is absent for transport failures and timeouts.
    InternalServerError {
        /// Status code returned by the store, if any.
        status: Option<u16>,
    },
}

impl ErrorCondition {
    /// `feature-not-implemented` without a named feature.
    pub fn feature_not_implemented() -> Self {
        Self::FeatureNotImplemented { feature: None }
    }

    /// `feature-not-implemented` naming the unsupported pubsub feature.
    pub fn unsupported_feature(feature: impl Into<String>) -> Self {
        Self::FeatureNotImplemented {
            feature: Some(feature.into()),
        }
    }

    /// `not-allowed` with `max-items-exceeded`.
    pub fn max_items_exceeded() -> Self {
        Self::NotAllowed(NotAllowedDetail::MaxItemsExceeded)
    }

    /// `internal-server-error` carrying a store status.
    pub fn backend_status(status: u16) -> Self {
        Self::InternalServerError {
            status: Some(status),
        }
    }

    /// `internal-server-error` for a call that never produced a status.
    pub fn backend_unavailable() -> Self {
        Self::InternalServerError { status: None }
    }

    /// `bad-request` with the given detail.
    pub fn bad_request(detail: BadRequestDetail) -> Self {
        Self::BadRequest(detail)
    }

    /// Taxonomy bucket, used for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FeatureNotImplemented { .. } | Self::BadRequest(_) => ErrorCategory::Protocol,
            Self::NotAllowed(_) => ErrorCategory::Validation,
            Self::ItemNotFound => ErrorCategory::BackendNotFound,
            Self::InternalServerError { .. } => ErrorCategory::BackendFailure,
        }
    }

    /// RFC 6120 defined condition.
    pub fn defined_condition(&self) -> DefinedCondition {
        match self {
            Self::FeatureNotImplemented { .. } => DefinedCondition::FeatureNotImplemented,
            Self::ItemNotFound => DefinedCondition::ItemNotFound,
            Self::NotAllowed(_) => DefinedCondition::NotAllowed,
            Self::BadRequest(_) => DefinedCondition::BadRequest,
            Self::InternalServerError { .. } => DefinedCondition::InternalServerError,
        }
    }

    /// RFC 6120 error type.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::FeatureNotImplemented { .. } | Self::ItemNotFound | Self::NotAllowed(_) => {
                ErrorType::Cancel
            }
            Self::BadRequest(_) => ErrorType::Modify,
            Self::InternalServerError { .. } => ErrorType::Wait,
        }
    }

    /// Human-readable text for the `<text/>` child.
    pub fn text(&self) -> String {
        match self {
            Self::FeatureNotImplemented { feature: Some(f) } => {
                format!("pubsub feature '{}' is not implemented", f)
            }
            Self::FeatureNotImplemented { feature: None } => {
                "request is not implemented".to_string()
            }
            Self::ItemNotFound => "content store has no such resource".to_string(),
            Self::NotAllowed(NotAllowedDetail::MaxItemsExceeded) => {
                "only one item may be published or retracted per request".to_string()
            }
            Self::BadRequest(BadRequestDetail::NodeIdRequired) => {
                "node attribute is required".to_string()
            }
            Self::BadRequest(BadRequestDetail::ItemRequired) => "item id is required".to_string(),
            Self::BadRequest(BadRequestDetail::InvalidItemId) => {
                "item id cannot address a store resource".to_string()
            }
            Self::BadRequest(BadRequestDetail::InvalidMaxItems) => {
                "max_items must be a non-negative integer".to_string()
            }
            Self::BadRequest(BadRequestDetail::InvalidPayload) => {
                "iq must carry exactly one payload element".to_string()
            }
            Self::InternalServerError { status: Some(s) } => {
                format!("content store responded with status {}", s)
            }
            Self::InternalServerError { status: None } => {
                "content store request failed".to_string()
            }
        }
    }

    /// Application-specific condition element, if any.
    fn application_condition(&self) -> Option<Element> {
        match self {
            Self::FeatureNotImplemented { feature: Some(f) } => Some(
                Element::builder("unsupported", ns::PUBSUB_ERRORS)
                    .attr("feature", f.as_str())
                    .build(),
            ),
            Self::FeatureNotImplemented { feature: None } | Self::ItemNotFound => None,
            Self::NotAllowed(detail) => {
                Some(Element::builder(detail.as_str(), ns::PUBSUB_ERRORS).build())
            }
            Self::BadRequest(detail) => detail
                .pubsub_condition()
                .map(|name| Element::builder(name, ns::PUBSUB_ERRORS).build()),
            Self::InternalServerError { status } => {
                let mut builder = Element::builder("store-status", ns::STORE_ERRORS);
                if let Some(code) = status {
                    builder = builder.attr("code", code.to_string());
                }
                Some(builder.build())
            }
        }
    }

    /// Build the `<error/>` payload for an IQ reply.
    pub fn to_stanza_error(&self) -> StanzaError {
        let mut error = StanzaError::new(
            self.error_type(),
            self.defined_condition(),
            "en",
            self.text(),
        );
        error.other = self.application_condition();
        error
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeatureNotImplemented { .. } => write!(f, "feature-not-implemented"),
            Self::ItemNotFound => write!(f, "item-not-found"),
            Self::NotAllowed(detail) => write!(f, "not-allowed ({})", detail.as_str()),
            Self::BadRequest(detail) => write!(f, "bad-request ({})", detail.as_str()),
            Self::InternalServerError { status: Some(s) } => {
                write!(f, "internal-server-error (status {})", s)
            }
            Self::InternalServerError { status: None } => write!(f, "internal-server-error"),
        }
    }
}

impl From<StoreError> for ErrorCondition {
    fn from(_: StoreError) -> Self {
        ErrorCondition::backend_unavailable()
    }
}
