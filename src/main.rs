// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use token_gate_server::{
    api::router,
    auth::{AuthService, SessionIssuer},
    blockchain::{ChainClientError, EvmClient},
    config::{AppConfig, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV},
    features::{
        catalog::CatalogError, BalanceReconciler, ChainEventListener, FeatureCatalog, ListenerError,
        NotificationBus, SignupListener, UpdateQueue, UpdateWorkerPool,
    },
    state::AppState,
    storage::{AccessDatabase, DbError, DATABASE_FILE},
};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("feature catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("chain client: {0}")]
    Chain(#[from] ChainClientError),

    #[error("invalid bind address {0}")]
    BindAddress(String),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),

    #[error("chain listener: {0}")]
    Listener(#[from] ListenerError),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "Token gate server stopped");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let db = Arc::new(AccessDatabase::open(&config.data_dir.join(DATABASE_FILE))?);

    let catalog = Arc::new(FeatureCatalog::new(db.clone()));
    if let Some(path) = &config.features_file {
        catalog.seed_from_file(path)?;
    }
    let watch = catalog.watch_set()?;

    let bus = NotificationBus::new();
    let sessions = SessionIssuer::new(db.clone(), config.jwt_issuer.clone(), config.jwt_ttl_secs);
    let auth = Arc::new(AuthService::new(
        db.clone(),
        sessions,
        bus.clone(),
        config.signup_topic.clone(),
    ));

    let shutdown = CancellationToken::new();
    let (queue, jobs) = UpdateQueue::bounded(config.queue_capacity);

    let chain = Arc::new(EvmClient::new(&config.rpc_url)?);
    let reconciler = Arc::new(BalanceReconciler::new(db.clone(), chain));
    let pool = UpdateWorkerPool::new(reconciler, queue.clone(), config.pool);
    let pool_task = tokio::spawn(pool.run(jobs, shutdown.clone()));

    let listener = ChainEventListener::new(config.rpc_ws_url.clone(), watch, queue.clone());
    let listener_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = listener.run(shutdown.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "Chain listener failed, shutting down");
                shutdown.cancel();
            }
            result
        })
    };

    let signup_task = if config.is_local() {
        info!("Local environment, signup listener disabled");
        None
    } else {
        let listener = SignupListener::new(config.signup_topic.clone(), &bus, queue.clone());
        Some(tokio::spawn(listener.run(shutdown.clone())))
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        });
    }

    let state = AppState {
        db,
        auth,
        catalog,
        queue,
        bus,
        signup_topic: config.signup_topic.clone(),
    };
    let app = router(state);

    let bind = config.bind_address();
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| StartupError::BindAddress(bind.clone()))?;

    let served = match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            let handle: axum_server::Handle<SocketAddr> = axum_server::Handle::new();
            {
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                });
            }
            info!("Token gate server listening on https://{addr} (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            let tcp = tokio::net::TcpListener::bind(addr).await?;
            info!("Token gate server listening on http://{addr} (docs at /docs)");
            axum::serve(tcp, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await
        }
    };
    shutdown.cancel();
    served?;

    if let Some(task) = signup_task {
        let _ = task.await;
    }
    if pool_task.await.is_err() {
        warn!("Update worker pool task panicked");
    }
    match listener_task.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Chain listener task panicked"),
    }
    info!("Token gate server stopped");
    Ok(())
}
