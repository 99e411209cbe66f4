mod server;
mod supervisors;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use studiocast_api::{cookie::CookieCodec, AppState};
use studiocast_core::service::{
    AccessCodeService, AnalyticsService, CameraControl, EventHub, RateLimiter, SchedulerService,
    StreamLifecycleService, StudioService, TranscoderControl,
};
use studiocast_core::store::buckets::ROOMS;
use studiocast_core::{logging, Config, Store};
use studiocast_livestream::{IngestConfig, IngestSupervisor, TranscoderConfig, TranscoderSupervisor};

use server::StudioCastServer;
use supervisors::{CameraBridge, TranscoderBridge};

#[derive(Parser, Debug)]
#[command(name = "studiocast", about = "Multi-tenant live-streaming control plane")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "STUDIOCAST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration
    let cli = Cli::parse();
    if let Some(path) = cli.config {
        // Config::load reads this variable.
        std::env::set_var("STUDIOCAST_CONFIG", path);
    }
    let config = Arc::new(Config::load()?);

    // 2. Logging (hold the guard so buffered lines flush on shutdown)
    let _log_guard = logging::init_logging(&config.logging, &config.storage)?;
    info!("studiocast starting");
    info!(addr = %config.http_address(), "HTTP address");

    // 3. Store
    let store = Arc::new(Store::open(config.storage.db_path())?);

    // 4. Supervisors
    let hls_base = PathBuf::from(&config.livestream.hls_base_dir);
    let stop_grace = Duration::from_secs(config.livestream.stop_grace_seconds);
    let ingest = Arc::new(IngestSupervisor::new(IngestConfig {
        stop_grace,
        ..IngestConfig::default()
    }));
    let transcoder_supervisor = Arc::new(TranscoderSupervisor::new(TranscoderConfig {
        hls_base: hls_base.clone(),
        max_concurrent: config.livestream.max_concurrent_transcoders,
        stop_grace,
        ..TranscoderConfig::default()
    }));
    let transcoder: Arc<dyn TranscoderControl> = Arc::new(TranscoderBridge::new(
        Arc::clone(&transcoder_supervisor),
        hls_base,
    ));
    let camera: Arc<dyn CameraControl> = Arc::new(CameraBridge::new(
        Arc::clone(&ingest),
        Arc::clone(&transcoder_supervisor),
    ));

    // 5. Services
    let hub = Arc::new(EventHub::new());
    let limiter = Arc::new(RateLimiter::new());
    let studios = Arc::new(StudioService::new(Arc::clone(&store)));
    let analytics = Arc::new(AnalyticsService::new(Arc::clone(&store), Arc::clone(&hub)));
    let codes = Arc::new(AccessCodeService::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&limiter),
    ));
    let scheduler = Arc::new(SchedulerService::new(
        Arc::clone(&store),
        Arc::clone(&camera),
        config.livestream.srs_rtmp_base.clone(),
    ));
    let lifecycle = Arc::new(StreamLifecycleService::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&analytics),
        Arc::clone(&transcoder),
        config.livestream.srs_rtmp_base.clone(),
    ));

    if config.auth.cookie_secret.is_empty() {
        warn!("auth.cookie_secret is empty; sessions will not survive a restart");
    }
    if !config.auth.google_login_enabled() {
        info!("Google login disabled (no client credentials configured)");
    }
    let cookie_secret = if config.auth.cookie_secret.is_empty() {
        // Ephemeral key: fine for development, logged about above.
        studiocast_core::models::access_code::generate_session_token()
    } else {
        config.auth.cookie_secret.clone()
    };
    let cookies = Arc::new(CookieCodec::new(&cookie_secret));

    // 6. Crash recovery: every room offline, dangling streams closed,
    //    orphaned HLS trees removed.
    let recovery = lifecycle.startup_recovery()?;
    info!(
        rooms = recovery.rooms_deactivated,
        streams = recovery.streams_closed,
        "startup recovery done"
    );
    let known_rooms: HashSet<String> = store.with_read(|tx| {
        let mut rooms = HashSet::new();
        tx.for_each(&ROOMS, |room_id, _: studiocast_core::models::Room| {
            rooms.insert(room_id.to_string());
            true
        })?;
        Ok(rooms)
    })?;
    match transcoder_supervisor.sweep_orphans(&known_rooms).await {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "orphaned HLS directories removed"),
        Err(e) => warn!("orphan sweep failed: {e}"),
    }

    // 7. Serve
    let state = AppState {
        config: Arc::clone(&config),
        store,
        hub,
        limiter,
        studios,
        codes,
        scheduler,
        lifecycle,
        analytics,
        transcoder,
        cookies,
    };
    StudioCastServer::new(config, state, ingest, transcoder_supervisor)
        .run()
        .await
}
