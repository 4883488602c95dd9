//! HTTP and metrics listeners.

use std::net::SocketAddr;

use leadflow_core::config::AppConfig;
use tokio::sync::watch;
use tracing::info;

use crate::rest::AppState;
use crate::router::app_router;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve the REST API until `shutdown` turns `true`.
    pub async fn start_http(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let app = app_router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Install the Prometheus recorder with its own HTTP listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
