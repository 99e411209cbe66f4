//! Server lifecycle: HTTP listener, background jobs, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use studiocast_api::AppState;
use studiocast_core::Config;
use studiocast_livestream::{IngestSupervisor, TranscoderSupervisor};

pub struct StudioCastServer {
    config: Arc<Config>,
    state: AppState,
    ingest: Arc<IngestSupervisor>,
    transcoder: Arc<TranscoderSupervisor>,
}

impl StudioCastServer {
    pub fn new(
        config: Arc<Config>,
        state: AppState,
        ingest: Arc<IngestSupervisor>,
        transcoder: Arc<TranscoderSupervisor>,
    ) -> Self {
        Self {
            config,
            state,
            ingest,
            transcoder,
        }
    }

    /// Start the background jobs and serve HTTP until a shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();

        let mut jobs = Vec::new();
        jobs.push(self.state.limiter.start_gc(cancel.clone()));
        jobs.extend(self.state.codes.start_background_jobs(&cancel));
        jobs.push(
            self.state
                .scheduler
                .start(self.config.scheduler.tick_seconds, &cancel),
        );
        info!(jobs = jobs.len(), "background jobs started");

        let app = studiocast_api::router(self.state.clone());
        let addr = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "HTTP server listening");

        let shutdown = cancel.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

        info!("HTTP server stopped, draining background work");
        cancel.cancel();
        for job in jobs {
            let _ = job.await;
        }

        // Stop every FFmpeg child through the normal SIGTERM path.
        self.ingest.stop_all().await;
        self.transcoder.stop_all().await;
        info!("shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
