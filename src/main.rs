use std::{process, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vitrine::{
    application::{
        chain::FallbackChain,
        error::AppError,
        gateway::AssetGateway,
        metadata::ReleaseMetadataSource,
        origins::{OriginConfig, OriginResolver},
    },
    cache::{AssetStore, CacheConfig, MemoryStore, StoreBackend},
    config,
    infra::{
        db::PostgresStore,
        error::InfraError,
        fetch::{BackendMetadataClient, HttpOriginFetcher, build_http_client},
        http::{self, HttpState},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let gateway = build_gateway(&settings, store.clone())?;

    let sweeper = spawn_sweeper(store, settings.cache.sweep_interval);

    let result = serve_http(
        &settings,
        HttpState {
            gateway: Arc::new(gateway),
        },
    )
    .await;

    sweeper.abort();
    let _ = sweeper.await;

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    if settings.cache.backend == StoreBackend::Memory {
        warn!(
            target = "vitrine::sweep",
            "memory backend keeps no entries outside a running server; nothing to sweep"
        );
        return Ok(());
    }

    let store = init_store(&settings).await?;
    let removed = store.sweep_expired().await?;
    info!(
        target = "vitrine::sweep",
        backend = store.backend(),
        removed,
        "Sweep completed"
    );
    Ok(())
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn AssetStore>, AppError> {
    let cache = CacheConfig::from(&settings.cache);
    match cache.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(&cache))),
        StoreBackend::Postgres => {
            let database_url = settings
                .database
                .url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

            let pool = PostgresStore::connect(database_url, settings.database.max_connections.get())
                .await
                .map_err(|err| InfraError::database(err.to_string()))?;

            PostgresStore::run_migrations(&pool)
                .await
                .map_err(|err| InfraError::database(err.to_string()))?;

            Ok(Arc::new(PostgresStore::new(pool)))
        }
    }
}

fn build_gateway(
    settings: &config::Settings,
    store: Arc<dyn AssetStore>,
) -> Result<AssetGateway, AppError> {
    let client = build_http_client(&settings.origins)?;

    let metadata: Arc<dyn ReleaseMetadataSource> = Arc::new(BackendMetadataClient::new(
        client.clone(),
        settings.origins.backend_url.clone(),
    ));
    let resolver = OriginResolver::new(OriginConfig::from(&settings.origins), metadata)
        .map_err(|err| InfraError::configuration(err.to_string()))?;
    let chain = FallbackChain::new(Arc::new(HttpOriginFetcher::new(client)));

    Ok(AssetGateway::new(
        store,
        resolver,
        chain,
        &CacheConfig::from(&settings.cache),
    ))
}

fn spawn_sweeper(store: Arc<dyn AssetStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            match store.sweep_expired().await {
                Ok(removed) => info!(
                    target = "vitrine::sweeper",
                    backend = store.backend(),
                    removed,
                    "Swept expired assets"
                ),
                Err(err) => warn!(
                    target = "vitrine::sweeper",
                    backend = store.backend(),
                    error = %err,
                    "Sweep failed"
                ),
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "vitrine::http",
        addr = %settings.server.addr,
        "Asset gateway listening"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        () = shutdown_signal() => {
            let grace = settings.server.graceful_shutdown;
            info!(
                target = "vitrine::http",
                grace_secs = grace.as_secs(),
                "Shutdown signal received, draining connections"
            );
            match tokio::time::timeout(grace, server).await {
                Ok(result) => {
                    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
                }
                Err(_) => {
                    warn!(target = "vitrine::http", "Graceful shutdown timed out");
                    Ok(())
                }
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
