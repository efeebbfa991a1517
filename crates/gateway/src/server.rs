use kestrel_core::TraderState;
use kestrel_ports::{Clock, EventLog, SystemClock};
use kestrel_runtime::EntityRuntime;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::GatewayConfig;
use crate::rest::{AppState, create_router};
use crate::views::TraderDirectory;

/// A wired gateway: runtime, read views and HTTP router over one event log
pub struct Gateway<C: Clock, L: EventLog> {
    pub config: GatewayConfig,
    state: Arc<AppState<C, L>>,
    projection: JoinHandle<()>,
}

impl<L: EventLog> Gateway<SystemClock, L> {
    pub fn new(config: GatewayConfig, log: Arc<L>) -> Self {
        Self::with_clock(config, log, Arc::new(SystemClock))
    }
}

impl<C: Clock + 'static, L: EventLog> Gateway<C, L> {
    pub fn with_clock(config: GatewayConfig, log: Arc<L>, clock: Arc<C>) -> Self {
        let runtime = EntityRuntime::<TraderState, L>::new(Arc::clone(&log), config.runtime.clone());
        let directory = Arc::new(TraderDirectory::new());
        let projection = Arc::clone(&directory).spawn_projection(log, runtime.subscribe());

        let state = Arc::new(AppState::new(
            clock,
            runtime,
            directory,
            config.server.request_timeout(),
        ));
        Self {
            config,
            state,
            projection,
        }
    }

    pub fn state(&self) -> &Arc<AppState<C, L>> {
        &self.state
    }

    pub fn router(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve until ctrl-c, then drain the entity workers
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.config.server.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown requested");
            })
            .await?;

        self.state.runtime.shutdown().await;
        self.projection.abort();
        info!("Gateway stopped");
        Ok(())
    }
}
