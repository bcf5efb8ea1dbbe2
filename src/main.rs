use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::response::Redirect;
use axum::{Router, routing::get};
use tracing::{info, warn};
use zonelink::configs::Config;
use zonelink::server::{self, AppState};
use zonelink::sources::{ArchiveResolver, MediaResolver, YoutubeResolver};
use zonelink::storage::{JsonFileStorage, Storage};
use zonelink::transport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    let directive = config
        .logging
        .as_ref()
        .map(|logging| logging.directive())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let youtube: Arc<dyn MediaResolver> = Arc::new(YoutubeResolver::new());
    let archive: Arc<dyn MediaResolver> = Arc::new(ArchiveResolver::new());
    let storage: Arc<dyn Storage> =
        Arc::new(JsonFileStorage::new(config.server.data_path.clone()));

    let state = Arc::new(AppState::new(config, youtube, archive, storage));
    restore_saved_state(&state).await;
    spawn_save_interval(state.clone());

    let mut app = Router::new().route(
        "/zone",
        get(transport::websocket_server::websocket_handler),
    );
    if let Some(url) = state.config.server.client_url.clone() {
        app = app.route(
            "/",
            get(move || {
                let url = url.clone();
                async move { Redirect::temporary(&url) }
            }),
        );
    }
    let app = app
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let address: SocketAddr =
        format!("{}:{}", state.config.server.host, state.config.server.port).parse()?;
    info!("zone server listening on {}", address);

    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutting down, saving zone state");
    server::save_snapshot(&state).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("couldn't listen for shutdown signal: {}", e);
    }
}

/// Pick the timeline back up where the last run left it. The saved
/// position keeps advancing as if the zone had never gone down, so a
/// restart mid-video rejoins the video mid-play.
async fn restore_saved_state(state: &Arc<AppState>) {
    let saved = match state.storage.load().await {
        Ok(Some(saved)) => saved,
        Ok(None) => return,
        Err(e) => {
            warn!("couldn't read saved zone state: {}", e);
            return;
        }
    };
    state.youtube.prime_cache(saved.media_cache);

    let mut guard = state.zone.lock().await;
    let zone = &mut *guard;
    let transition = zone.playback.load_state(saved.playback);
    server::apply_transition(state, zone, transition);
    info!("restored saved playback state");
}

fn spawn_save_interval(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.zone.save_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            server::save_snapshot(&state).await;
        }
    });
}
