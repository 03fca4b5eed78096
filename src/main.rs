use arc_swap::ArcSwap;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metobs_db::cache::admin::CacheAdmin;
use metobs_db::cache::{CacheStatistics, MirrorCache, ObservationMemoryCache};
use metobs_db::common::AppState;
use metobs_db::config::ObsConfig;
use metobs_db::drivers::container::UNBOUNDED_DAYS;
use metobs_db::drivers::{
    CacheSource, DriverContainer, DriverProxy, DummyDriver, MirrorDriver, PostgresDriver,
};
use metobs_db::engine::Engine;
use metobs_db::routes;
use metobs_db::stations::{self, MobileStationRegistry, StationInfo};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metobs_db=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting metobs-db...");

    // Load configuration (fail-fast)
    let config = Arc::new(ObsConfig::load()?);
    tracing::info!(
        host = %config.api.host,
        port = config.api.port,
        stationtypes = config.stationtypes.len(),
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let stats = Arc::new(CacheStatistics::default());
    let memory = Arc::new(ObservationMemoryCache::new());
    let station_info = Arc::new(ArcSwap::from_pointee(StationInfo::new(Vec::new())));
    let mobile_registry = Arc::new(MobileStationRegistry::new());

    // Canonical database drivers; the first active one is the authority
    // for station metadata and feeds the caches.
    let mut container = DriverContainer::new();
    let mut cache_source: Option<Arc<dyn CacheSource>> = None;

    let entries: Vec<_> = config.active_database_drivers().collect();
    let connections = join_all(entries.iter().enumerate().map(|(index, entry)| {
        let connect = config
            .connect_info
            .get(&entry.name)
            .expect("validated at config load");
        let common = config.common_info_for(&entry.name);
        let stats = Arc::clone(&stats);
        async move { PostgresDriver::connect(&entry.name, connect, &common, index == 0, stats).await }
    }))
    .await;

    for (entry, connection) in entries.iter().zip(connections) {
        let driver = Arc::new(connection?);
        for (table, max_days) in &entry.tables {
            container.add_driver(table, *max_days, driver.clone());
        }
        if cache_source.is_none() {
            cache_source = Some(driver);
        }
    }

    // Install the serialized station snapshot before any update loop
    // starts. A missing or empty file starts an empty registry; a
    // corrupt one fails startup.
    let stations_file = config
        .common_info
        .values()
        .find_map(|c| c.serialized_stations_file.clone());
    if let Some(file) = stations_file {
        let info = stations::store::load(Path::new(&file))?;
        station_info.store(Arc::new(info));
    }

    // Local mirror caches in front of the backends
    let mut admin: Option<Arc<CacheAdmin>> = None;
    for entry in config.active_cache_drivers() {
        let common = config.common_info_for(&entry.name);
        let mirror =
            Arc::new(MirrorCache::open(&entry.name, &common, Arc::clone(&stats)).await?);
        let driver = Arc::new(MirrorDriver::new(
            Arc::clone(&mirror),
            Arc::clone(&memory),
            Arc::clone(&stats),
        ));

        for (table, max_days) in &entry.tables {
            container.add_driver(table, *max_days, driver.clone());
        }

        if admin.is_none() {
            if let Some(source) = &cache_source {
                let cache_admin = Arc::new(CacheAdmin::new(
                    Arc::clone(source),
                    mirror,
                    Arc::clone(&memory),
                    Arc::clone(&stats),
                    common,
                    Arc::clone(&station_info),
                    Arc::clone(&mobile_registry),
                    shutdown.clone(),
                ));
                cache_admin.spawn_all();
                admin = Some(cache_admin);
            }
        }
    }

    if container.is_empty() {
        tracing::warn!("No active drivers configured, serving empty results");
        container.add_driver("*", UNBOUNDED_DAYS, Arc::new(DummyDriver::new("dummy")));
    }

    let engine = Arc::new(Engine::new(
        Arc::clone(&config),
        Arc::clone(&station_info),
        Arc::clone(&mobile_registry),
        DriverProxy::new(container),
        Arc::clone(&stats),
        shutdown.clone(),
    ));

    let state = AppState::new(engine, Arc::clone(&config), admin);
    let app = routes::build_router(state);

    let addr = config.api.bind_address();
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }

    // Stop the cache-admin loops before the server drains
    shutdown.cancel();
}
