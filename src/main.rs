use anyhow::Context;
use listening_presence::bootstrap::{
    self, load_config_or_default, resolve_app_dirs, resolve_config_path, start_runtime,
};
use lp_app::{AppPaths, EngineEvent};
use lp_core::config::AppConfig;
use lp_core::ports::AppDirsPort;
use lp_platform::DirsAppDirsAdapter;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_dirs = DirsAppDirsAdapter::new()
        .get_app_dirs()
        .context("Failed to resolve the application data directory")?;
    let config_path = resolve_config_path(&default_dirs.app_data_root);
    let config = match load_config_or_default(&config_path) {
        Ok(config) => config,
        Err(err) => {
            // Tracing is not up yet.
            eprintln!("{err:#}; using default configuration");
            AppConfig::default()
        }
    };

    let paths = AppPaths::from_app_dirs(&resolve_app_dirs(&config)?);
    if let Err(err) = bootstrap::tracing::init_tracing_subscriber(&paths.logs_dir) {
        eprintln!("Failed to initialize tracing: {err:#}");
    }
    info!(config = %config_path.display(), "Starting Listening Presence");

    let runtime = start_runtime(&config, &paths).await?;
    let mut events = runtime.engine().subscribe();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::PresenceChanged(state) => match state.snapshot() {
            Some(snapshot) => info!(
                title = %snapshot.title,
                artist = %snapshot.artist,
                mode = ?state.mode(),
                "Presence updated"
            ),
            None => info!(state = ?state, "Presence withdrawn"),
        },
        EngineEvent::ConnectivityChanged(status) => info!(status = ?status, "Presence service"),
        EngineEvent::TrackChanged(_) => {}
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(err) = result {
                            warn!(error = %err, "Ctrl-C handler failed");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "SIGTERM handler unavailable"),
        }
    }
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Ctrl-C handler failed; running until killed");
        std::future::pending::<()>().await;
    }
}
