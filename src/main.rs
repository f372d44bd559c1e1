use std::{process, sync::Arc, time::Duration};

use shutterbox::{
    application::{
        auth::AuthService, error::AppError, library::LibraryService, render::RenderService,
    },
    config,
    infra::{
        engine::RasterEngine,
        error::InfraError,
        http::{self, ApiState, HttpState, RouterState},
        storage::{CacheStore, OriginalStore, StorageLayout},
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

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

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let layout = Arc::new(StorageLayout::from_settings(&settings.storage));
    layout
        .ensure()
        .map_err(|err| AppError::from(InfraError::storage(layout.root(), err)))?;

    if settings.auth.uses_default_credentials() {
        warn!(
            target = "shutterbox::startup",
            "Default admin credentials are in use; set auth.username and auth.password"
        );
    }

    let session_ttl = time::Duration::try_from(settings.auth.session_ttl).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "auth.session_ttl_seconds out of range: {err}"
        )))
    })?;

    let originals = Arc::new(OriginalStore::new(Arc::clone(&layout)));
    let cache = Arc::new(CacheStore::new(Arc::clone(&layout)));

    let state = RouterState {
        http: HttpState {
            render: Arc::new(RenderService::new(
                Arc::clone(&originals),
                Arc::clone(&cache),
                Arc::new(RasterEngine::new()),
            )),
        },
        api: ApiState {
            library: Arc::new(LibraryService::new(originals, cache)),
            auth: Arc::new(AuthService::new(
                settings.auth.username.clone(),
                &settings.auth.password,
                session_ttl,
            )),
        },
    };

    info!(
        target = "shutterbox::startup",
        addr = %settings.server.addr,
        storage_root = %layout.root().display(),
        "Starting HTTP server"
    );

    serve_http(&settings, state).await
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state, settings.uploads.body_limit());

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = shutdown_rx.changed().await;
        },
    );
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => return server_outcome(result),
        _ = shutdown_signal() => {}
    }

    info!(target = "shutterbox::shutdown", "Shutdown signal received");
    let _ = shutdown_tx.send(true);

    drain(server, settings.server.graceful_shutdown).await
}

async fn drain(
    server: tokio::task::JoinHandle<std::io::Result<()>>,
    grace: Duration,
) -> Result<(), AppError> {
    match tokio::time::timeout(grace, server).await {
        Ok(result) => server_outcome(result),
        Err(_) => {
            warn!(
                target = "shutterbox::shutdown",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

fn server_outcome(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => {
            info!(target = "shutterbox::shutdown", "Server stopped");
            Ok(())
        }
        Ok(Err(err)) => Err(AppError::from(InfraError::Serve(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "shutterbox::shutdown", error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "shutterbox::shutdown", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
