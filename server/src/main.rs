//! `hls-origin-server`: a standalone demo binary embedding
//! `hls-origin-engine` behind an HTTP origin, fed by a synthetic sample
//! generator in lieu of a real encoder. Startup sequence follows
//! `hls-vod-server::main`: init tracing, init FFmpeg, load config (warn and
//! fall back to defaults on a missing/malformed file), build shared state,
//! spawn the periodic client sweep, serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use hls_origin_engine::Supervisor;
use hls_origin_server::clients::ClientTracker;
use hls_origin_server::config::ServerConfig;
use hls_origin_server::host::TracingHostSink;
use hls_origin_server::http::{build_router, AppState};
use hls_origin_server::testsource;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    hls_origin_engine::ffmpeg_init::init()?;
    hls_origin_engine::ffmpeg_init::install_log_filter();

    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("hls-origin-server.toml"));
    let server_config = ServerConfig::load_or_default(&config_path);

    server_config.session.validate()?;

    let host = Arc::new(TracingHostSink);
    let supervisor = Arc::new(Supervisor::new(server_config.session.clone(), host.clone()));
    supervisor.start()?;

    let clients = Arc::new(ClientTracker::new(
        host.clone(),
        Duration::from_secs(server_config.session.client_inactivity_timeout_s),
    ));

    testsource::spawn(supervisor.clone(), server_config.session.clone());

    {
        let clients = clients.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                clients.sweep();
            }
        });
    }

    let state = AppState { supervisor: supervisor.clone(), clients };
    let router = build_router(state);

    let addr: SocketAddr = server_config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, path = %supervisor.current_path(), "hls-origin-server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
