//! Perch - XMPP pubsub bridge onto a CRUD content store.
//!
//! Connects to an XMPP server as an external component and answers pubsub
//! and presence stanzas on behalf of the configured content store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use perch_xmpp::{
    Bridge, ChannelDeliverer, ComponentStream, HttpStoreGateway, InMemoryContentStore,
    InMemoryPresenceStore, PresenceSubscriptionHandler, PubSubRequestTranslator, StanzaRouter,
    StoreBackend, StoreGateway, StoreNodeCreation, TranslatorConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

mod settings;
mod telemetry;

use settings::Settings;

/// Capacity of the inbound and outbound stanza queues.
const QUEUE_CAPACITY: usize = 256;

/// Perch - expose a content store as XMPP pubsub
#[derive(Parser, Debug)]
#[command(name = "perch-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store backend: memory | http (overrides the configuration file)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Base URL of the HTTP content store (overrides the configuration file)
    #[arg(long)]
    store_url: Option<String>,

    /// Create nodes in the store on pubsub create instead of only acknowledging
    #[arg(long)]
    store_node_creation: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init(cli.json).map_err(|e| anyhow!(e))?;

    info!("Perch starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(backend) = cli.store {
        settings.store.backend = backend;
    }
    if let Some(url) = cli.store_url {
        settings.store.base_url = url;
    }
    settings.validate().context("Invalid configuration")?;
    settings.component.log_config();

    let gateway = build_gateway(&settings)?;
    let mut translator =
        PubSubRequestTranslator::new(Arc::clone(&gateway), TranslatorConfig::from(&settings.store));
    if cli.store_node_creation {
        translator = translator.with_node_creation(Arc::new(StoreNodeCreation::new(gateway)));
    }

    let presence = PresenceSubscriptionHandler::new(
        settings.component.status.clone(),
        Arc::new(InMemoryPresenceStore::new()),
    );
    let router = Arc::new(StanzaRouter::new(Arc::new(presence), Arc::new(translator)));

    run(&settings, router).await
}

fn build_gateway(settings: &Settings) -> Result<Arc<dyn StoreGateway>> {
    let store = &settings.store;
    info!(
        backend = %store.backend,
        base_url = %store.base_url,
        timeout_ms = store.timeout_ms,
        "Content store configuration"
    );

    let gateway: Arc<dyn StoreGateway> = match store.backend {
        StoreBackend::Memory => Arc::new(
            InMemoryContentStore::new().with_page_size_param(store.page_size_param.clone()),
        ),
        StoreBackend::Http => Arc::new(
            HttpStoreGateway::new(&store.base_url, store.timeout())
                .context("Failed to create HTTP store client")?,
        ),
    };
    Ok(gateway)
}

/// Connect the component and pump stanzas until the stream ends or Ctrl-C.
async fn run(settings: &Settings, router: Arc<StanzaRouter>) -> Result<()> {
    let stream = ComponentStream::connect(&settings.component)
        .await
        .with_context(|| format!("Failed to connect component to {}", settings.component.address()))?;
    let (mut reader, mut writer) = stream.into_split();

    let (deliverer, mut outbound) = ChannelDeliverer::channel(QUEUE_CAPACITY);
    let bridge = Bridge::new(router, Arc::new(deliverer));
    let shutdown = CancellationToken::new();

    let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
    let reader_shutdown = shutdown.clone();
    let reader_task = tokio::spawn(
        async move {
            loop {
                let next = tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    next = reader.read_stanza() => next,
                };
                match next {
                    Ok(Some(stanza)) => {
                        if inbound_tx.send(stanza).await.is_err() {
                            debug!("Bridge stopped accepting stanzas");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Component stream ended");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Component stream failed");
                        break;
                    }
                }
            }
            reader_shutdown.cancel();
        }
        .instrument(tracing::info_span!("perch.server.reader")),
    );

    let writer_task = tokio::spawn(
        async move {
            while let Some(stanza) = outbound.recv().await {
                if let Err(e) = writer.write_stanza(&stanza).await {
                    error!(error = %e, stanza = stanza.name(), "Failed to write stanza");
                    break;
                }
            }
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Error closing component stream");
            }
        }
        .instrument(tracing::info_span!("perch.server.writer")),
    );

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_shutdown.cancel();
    });

    bridge.run(inbound_rx, shutdown.clone()).await;
    shutdown.cancel();

    // Writer drains and closes once the last deliverer is gone.
    drop(bridge);

    if let Err(e) = reader_task.await {
        warn!(error = %e, "Reader task panicked");
    }
    writer_task.await.context("Writer task panicked")?;

    info!("Perch stopped");
    Ok(())
}
