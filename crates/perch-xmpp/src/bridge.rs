//! Bridge runtime.
//!
//! Each inbound stanza is handled on its own tokio task so that a slow store
//! call never holds up other peers. Replies produced for one stanza are
//! delivered in the order the handler returned them. No ordering is kept
//! between stanzas.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::routing::StanzaRouter;
use crate::types::Stanza;
use crate::BridgeError;

/// Sends a composed reply out over the active session.
#[async_trait]
pub trait Deliverer: Send + Sync + 'static {
    async fn deliver(&self, stanza: Stanza) -> Result<(), BridgeError>;
}

/// Deliverer feeding an mpsc channel drained by the session writer.
#[derive(Debug, Clone)]
pub struct ChannelDeliverer {
    sender: mpsc::Sender<Stanza>,
}

impl ChannelDeliverer {
    /// Create a deliverer and the receiver its stanzas arrive on.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Stanza>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Wrap an existing sender.
    pub fn new(sender: mpsc::Sender<Stanza>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Deliverer for ChannelDeliverer {
    async fn deliver(&self, stanza: Stanza) -> Result<(), BridgeError> {
        self.sender
            .send(stanza)
            .await
            .map_err(|_| BridgeError::delivery("outbound channel closed"))
    }
}

/// Routes inbound stanzas and delivers their replies.
#[derive(Clone)]
pub struct Bridge {
    router: Arc<StanzaRouter>,
    deliverer: Arc<dyn Deliverer>,
    tracker: TaskTracker,
}

impl Bridge {
    /// Create a bridge.
    pub fn new(router: Arc<StanzaRouter>, deliverer: Arc<dyn Deliverer>) -> Self {
        Self {
            router,
            deliverer,
            tracker: TaskTracker::new(),
        }
    }

    /// Number of stanzas currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Handle one stanza on a new task.
    pub fn dispatch(&self, stanza: Stanza) {
        let router = Arc::clone(&self.router);
        let deliverer = Arc::clone(&self.deliverer);
        let span = info_span!(
            "perch.bridge.stanza",
            stanza = stanza.name(),
            id = ?stanza.id()
        );

        self.tracker.spawn(
            async move {
                let replies = router.route(stanza).await;
                for reply in replies {
                    if let Err(e) = deliver_logged(deliverer.as_ref(), reply).await {
                        warn!(error = %e, "Failed to deliver reply");
                        break;
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Dispatch stanzas from `inbound` until it closes or `shutdown` fires,
    /// then wait for in-flight stanzas to finish.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Stanza>, shutdown: CancellationToken) {
        info!("Bridge started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Bridge shutdown requested");
                    break;
                }
                next = inbound.recv() => match next {
                    Some(stanza) => self.dispatch(stanza),
                    None => {
                        debug!("Inbound channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Stop accepting work and wait for in-flight stanzas.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight stanzas");
        }
        self.tracker.wait().await;
        info!("Bridge stopped");
    }
}

async fn deliver_logged(deliverer: &dyn Deliverer, stanza: Stanza) -> Result<(), BridgeError> {
    match stanza.to_xml() {
        Ok(xml) => debug!(stanza = stanza.name(), xml = %xml, "Outbound stanza"),
        Err(e) => debug!(stanza = stanza.name(), error = %e, "Outbound stanza (unserializable)"),
    }
    deliverer.deliver(stanza).await
}
