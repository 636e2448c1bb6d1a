//! deepzoom-tiler - An on-demand deep-zoom tile server.
//!
//! Wires the image store, tile cache and decode gate together and serves
//! the HTTP API until Ctrl-C.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepzoom_tiler::{
    create_router, Config, DecodeGate, DiskTileCache, ImageCodec, ImageStore, TileService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let originals_dir = config.originals_dir();
    let tiles_dir = config.tiles_dir();
    let uploads_dir = config.uploads_dir();

    for dir in [&originals_dir, &tiles_dir, &uploads_dir] {
        if let Err(e) = ensure_dir(dir).await {
            error!("Failed to create {}: {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let settings = config.tile_settings();

    info!("Configuration:");
    info!("  Originals: {}", originals_dir.display());
    info!("  Tiles: {}", tiles_dir.display());
    info!("  Uploads: {}", uploads_dir.display());
    info!(
        "  Tiles: {}px, JPEG quality {}, {:?} resampling",
        settings.tile_size, settings.quality, settings.kernel
    );
    info!("  Decode concurrency: {}", config.decode_concurrency);

    let store = Arc::new(ImageStore::new(Arc::new(ImageCodec::new()), originals_dir));
    match store.list().await {
        Ok(records) => info!("  Found {} image(s)", records.len()),
        Err(e) => {
            error!("Failed to read originals directory: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let tile_service = TileService::new(
        store,
        Arc::new(DiskTileCache::new(tiles_dir)),
        Arc::new(DecodeGate::new(config.decode_concurrency)),
        settings,
    );

    let router = create_router(tile_service, uploads_dir, config.router_config());

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Listening on http://{}", addr);
    info!("  Upload: curl -F file=@image.tif http://{}/api/upload", addr);
    info!("  Tiles:  http://{}/api/image/<image_id>_files/<level>/<x>_<y>.jpg", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "deepzoom_tiler=debug,tower_http=debug"
    } else {
        "deepzoom_tiler=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
