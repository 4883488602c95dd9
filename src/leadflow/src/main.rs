//! LeadFlow: lead management with WhatsApp drip campaigns and workflows.
//!
//! Main entry point: loads configuration, opens the database, wires the
//! campaign scheduler and serves the REST API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use leadflow_api::{ApiServer, AppState};
use leadflow_campaigns::{CampaignEngine, CampaignService, EngineSettings, Scheduler};
use leadflow_channels::{MessageSender, WhatsAppBridge};
use leadflow_core::config::AppConfig;
use leadflow_core::event_bus::{EventSink, TracingSink};
use leadflow_delivery::{DeliveryGate, RetryPolicy};
use leadflow_store::{Database, Store};
use leadflow_workflows::{StoreActionExecutor, WorkflowEngine};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "leadflow")]
#[command(about = "Lead management with WhatsApp drip campaigns")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "LEADFLOW__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "LEADFLOW__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// SQLite URL, e.g. sqlite://leadflow.db (overrides config)
    #[arg(long, env = "LEADFLOW__DATABASE__URL")]
    database_url: Option<String>,

    /// Serve the API without running the campaign scheduler
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,

    /// Log outbound messages instead of calling the WhatsApp bridge
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadflow=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("LeadFlow starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.no_scheduler {
        config.scheduler.enabled = false;
    }
    if cli.dry_run {
        config.whatsapp.dry_run = true;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        database = %config.database.url,
        scheduler = config.scheduler.enabled,
        dry_run = config.whatsapp.dry_run,
        "Configuration loaded"
    );

    let store = Store::new(Database::connect(&config.database).await?);
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    let sender: Arc<dyn MessageSender> = Arc::new(WhatsAppBridge::new(config.whatsapp.clone())?);
    let gate = DeliveryGate::new(&config.delivery, sender.channel());
    let engine = Arc::new(
        CampaignEngine::new(
            store.clone(),
            sender.clone(),
            gate,
            RetryPolicy::from(&config.retry),
            EngineSettings::from_config(&config),
        )
        .with_event_sink(events.clone()),
    );

    let executor = StoreActionExecutor::new(
        store.clone(),
        CampaignService::new(store.clone()).with_event_sink(events.clone()),
        sender,
    );
    let workflow_engine = Arc::new(
        WorkflowEngine::new(store.clone(), Arc::new(executor)).with_event_sink(events.clone()),
    );

    let state = AppState::new(
        store,
        engine.clone(),
        workflow_engine,
        config.opt_out.keywords.clone(),
        config.node_id.clone(),
        events,
    );
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = if config.scheduler.enabled {
        let interval = Duration::from_millis(config.scheduler.tick_interval_ms.max(10));
        Some(tokio::spawn(
            Scheduler::new(engine, interval).run(shutdown_rx.clone()),
        ))
    } else {
        info!("Campaign scheduler disabled");
        None
    };

    info!("LeadFlow is ready to serve traffic");

    // Blocks until shutdown.
    api_server.start_http(shutdown_rx).await?;

    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("LeadFlow stopped");
    Ok(())
}
