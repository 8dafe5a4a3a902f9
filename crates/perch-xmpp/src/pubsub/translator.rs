//! Translation of pubsub IQs into content store calls.

use std::sync::Arc;
use std::time::Duration;

use minidom::Element;
use tracing::{debug, instrument, warn};
use xmpp_parsers::iq::Iq;

use super::node::{AcknowledgeNodeCreation, NodeCreationPolicy};
use super::response::{map_response, ResponseContext};
use super::stanzas::{
    build_error, build_items_result, build_publish_result, build_retract_result, build_success,
    parse_pubsub_request, Item, ItemPayload, PubSubRequest,
};
use crate::config::StoreConfig;
use crate::error::ErrorCondition;
use crate::store::{StoreGateway, StoreRequest, StoreResponse};

/// Store call parameters used by the translator.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Deadline for one store call
    pub store_timeout: Duration,
    /// Query parameter carrying `max_items`
    pub page_size_param: String,
    /// Content type of published bodies
    pub content_type: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for TranslatorConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            store_timeout: config.timeout(),
            page_size_param: config.page_size_param.clone(),
            content_type: config.content_type.clone(),
        }
    }
}

/// Turns one pubsub IQ into exactly one reply IQ.
///
/// All failures, including store timeouts, become error replies; nothing
/// escapes as a Rust error.
pub struct PubSubRequestTranslator {
    gateway: Arc<dyn StoreGateway>,
    node_creation: Arc<dyn NodeCreationPolicy>,
    config: TranslatorConfig,
}

impl PubSubRequestTranslator {
    /// Create a translator that acknowledges node creation without a store call.
    pub fn new(gateway: Arc<dyn StoreGateway>, config: TranslatorConfig) -> Self {
        Self {
            gateway,
            node_creation: Arc::new(AcknowledgeNodeCreation),
            config,
        }
    }

    /// Replace the node creation policy.
    pub fn with_node_creation(mut self, policy: Arc<dyn NodeCreationPolicy>) -> Self {
        self.node_creation = policy;
        self
    }

    /// Translator settings.
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Handle a get/set IQ whose payload is `pubsub`.
    #[instrument(
        name = "perch.pubsub.translate",
        skip(self, iq, pubsub),
        fields(iq_id = %iq.id, from = ?iq.from)
    )]
    pub async fn handle_iq(&self, iq: &Iq, pubsub: &Element) -> Iq {
        let request = match parse_pubsub_request(pubsub) {
            Ok(request) => request,
            Err(condition) => {
                debug!(condition = %condition, category = %condition.category(), "Rejected pubsub request");
                return build_error(iq, &condition);
            }
        };

        debug!(operation = request.operation(), node = %request.node(), "Translating pubsub request");

        let reply = match &request {
            PubSubRequest::FetchItems { node, max_items } => self
                .fetch_items(node, *max_items)
                .await
                .map(|items| build_items_result(iq, node, &items)),
            PubSubRequest::CreateNode { node } => self
                .node_creation
                .create_node(node)
                .await
                .map(|_| build_success(iq)),
            PubSubRequest::PublishItem { node, item } => self
                .publish_item(node, item.as_ref())
                .await
                .map(|id| build_publish_result(iq, node, id.as_deref())),
            PubSubRequest::RetractItem { node, item_id } => self
                .retract_item(node, item_id)
                .await
                .map(|_| build_retract_result(iq, node, item_id)),
        };

        reply.unwrap_or_else(|condition| {
            match condition {
                ErrorCondition::InternalServerError { .. } => warn!(
                    operation = request.operation(),
                    node = %request.node(),
                    condition = %condition,
                    "Store failure answered with error"
                ),
                _ => debug!(
                    operation = request.operation(),
                    node = %request.node(),
                    condition = %condition,
                    "Pubsub request answered with error"
                ),
            }
            build_error(iq, &condition)
        })
    }

    async fn fetch_items(&self, node: &str, max_items: Option<u32>) -> Result<Vec<Item>, ErrorCondition> {
        let mut request = StoreRequest::get(node);
        if let Some(max) = max_items {
            request = request.with_query(self.config.page_size_param.as_str(), max.to_string());
        }

        let response = self.call_store(request).await?;
        map_response(&response, ResponseContext::Fetch)
    }

    async fn publish_item(&self, node: &str, item: Option<&Item>) -> Result<Option<String>, ErrorCondition> {
        let caller_id = item.and_then(|i| i.id.as_deref());
        let body = item
            .and_then(|i| i.payload.as_ref())
            .map(ItemPayload::to_body)
            .transpose()
            .map_err(|e| {
                warn!(node = %node, error = %e, "Failed to serialize item payload");
                ErrorCondition::backend_unavailable()
            })?
            .unwrap_or_default();

        let request = match caller_id {
            Some(id) => StoreRequest::put(node, id),
            None => StoreRequest::post(node),
        }
        .with_body(body, self.config.content_type.as_str());

        let response = self.call_store(request).await?;
        let items = map_response(&response, ResponseContext::Publish { caller_id })?;
        Ok(items.into_iter().next().and_then(|item| item.id))
    }

    async fn retract_item(&self, node: &str, item_id: &str) -> Result<(), ErrorCondition> {
        let response = self.call_store(StoreRequest::delete(node, item_id)).await?;
        map_response(&response, ResponseContext::Retract { item_id }).map(|_| ())
    }

    /// One bounded store call. A call that outlives its deadline is dropped
    /// along with whatever it would have returned.
    async fn call_store(&self, request: StoreRequest) -> Result<StoreResponse, ErrorCondition> {
        let method = request.method;
        let path = request.path();

        match tokio::time::timeout(self.config.store_timeout, self.gateway.execute(request)).await {
            Ok(Ok(response)) => {
                debug!(method = %method, path = %path, status = response.status, "Store call completed");
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!(method = %method, path = %path, error = %e, "Store call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    method = %method,
                    path = %path,
                    timeout_ms = self.config.store_timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(ErrorCondition::backend_unavailable())
            }
        }
    }
}
