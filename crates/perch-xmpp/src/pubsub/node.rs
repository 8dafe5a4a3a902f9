//! Node creation policies.
//!
//! Whether a node must exist in the store before items are published to it
//! depends on the store. The translator delegates `<create/>` to a
//! [`NodeCreationPolicy`] so either behaviour can be plugged in.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ErrorCondition;
use crate::store::{StoreGateway, StoreRequest};

/// Decides what `<create node='…'/>` does.
#[async_trait]
pub trait NodeCreationPolicy: Send + Sync + 'static {
    /// Create `node`. `Ok` is answered with an empty result.
    async fn create_node(&self, node: &str) -> Result<(), ErrorCondition>;
}

/// Acknowledge creation without touching the store.
///
/// Suits stores that create collections implicitly on first publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeNodeCreation;

#[async_trait]
impl NodeCreationPolicy for AcknowledgeNodeCreation {
    async fn create_node(&self, node: &str) -> Result<(), ErrorCondition> {
        debug!(node = %node, "Node creation acknowledged without store call");
        Ok(())
    }
}

/// Create the node in the store with `PUT node`.
pub struct StoreNodeCreation {
    gateway: Arc<dyn StoreGateway>,
}

impl StoreNodeCreation {
    /// Create a policy issuing requests through `gateway`.
    pub fn new(gateway: Arc<dyn StoreGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl NodeCreationPolicy for StoreNodeCreation {
    async fn create_node(&self, node: &str) -> Result<(), ErrorCondition> {
        let response = self.gateway.execute(StoreRequest::put_node(node)).await?;
        match response.status {
            404 => Err(ErrorCondition::ItemNotFound),
            _ if response.is_success() => Ok(()),
            status => Err(ErrorCondition::backend_status(status)),
        }
    }
}
