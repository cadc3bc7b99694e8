use crowd_flow::{api, config, state};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

fn init_tracing(level: &str) {
    let parsed = tracing::Level::from_str(level);
    let max_level = parsed.as_ref().copied().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(max_level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    if parsed.is_err() {
        tracing::warn!(level, "Unknown log level, falling back to info");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "crowd-flow starting"
    );

    let layout = config.zone_layout()?;
    tracing::info!(
        zones = ?layout.zone_ids().collect::<Vec<_>>(),
        catch_all = layout.catch_all(),
        "Zone layout loaded"
    );

    let state = state::AppState::new(layout, config.recent_points_capacity())
        .with_stream_channel_capacity(config.stream_channel_capacity())
        .with_replay_root(config.replay_dir().map(Path::to_path_buf));
    let app = api::router(Arc::new(state));

    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
