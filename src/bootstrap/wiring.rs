//! # Dependency Injection
//!
//! Builds the infra and platform adapters, hands them to the engine as ports
//! and owns the background tasks behind those ports. This is the only place
//! that depends on `lp-infra`, `lp-platform` and `lp-app` together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lp_app::{start_engine, AppPaths, EngineConfig, EngineDeps, EngineHandle};
use lp_core::app_dirs::AppDirs;
use lp_core::config::AppConfig;
use lp_core::ports::{AppDirsError, AppDirsPort, ClockPort, SettingsPort, SnapshotSourcePort, SourceError};
use lp_core::{PlaybackSnapshot, Settings};
use lp_infra::artwork::DiskTier;
use lp_infra::{spawn_artwork_resolver, FileSettingsRepository, ItunesArtworkSearch, ResolverConfig, SystemClock};
use lp_platform::{
    spawn_presence_session, CommandSnapshotSource, DirsAppDirsAdapter, LocalIpcConnector,
    SessionConfig,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on the session's goodbye frames at shutdown.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

pub type WiringResult<T> = Result<T, WiringError>;

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error("Application directories unavailable: {0}")]
    AppDirs(#[from] AppDirsError),

    #[error("Artwork search initialization failed: {0}")]
    ArtworkSearchInit(String),
}

/// Data root of the running instance. `[paths] data_dir` wins over the
/// platform directory.
pub fn resolve_app_dirs(config: &AppConfig) -> WiringResult<AppDirs> {
    if let Some(data_dir) = &config.data_dir {
        return Ok(AppDirs {
            app_data_root: data_dir.clone(),
        });
    }
    Ok(DirsAppDirsAdapter::new().get_app_dirs()?)
}

/// Used when the platform has no default media player query and none is configured.
struct NoSnapshotSource;

#[async_trait]
impl SnapshotSourcePort for NoSnapshotSource {
    async fn current_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SourceError> {
        Err(SourceError::NotRunning)
    }
}

fn snapshot_source(config: &AppConfig) -> Arc<dyn SnapshotSourcePort> {
    match CommandSnapshotSource::from_config(&config.source_command) {
        Some(source) => Arc::new(source),
        None => {
            warn!("No snapshot source configured for this platform; nothing will be published");
            Arc::new(NoSnapshotSource)
        }
    }
}

async fn load_settings(repo: &dyn SettingsPort, path: &Path) -> Settings {
    match repo.load().await {
        Ok(settings) => settings,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Settings unreadable; using defaults");
            Settings::default()
        }
    }
}

fn resolver_config(config: &AppConfig) -> ResolverConfig {
    let defaults = ResolverConfig::default();
    let ttl = Some(config.artwork_ttl_days)
        .filter(|days| *days > 0)
        .and_then(chrono::Duration::try_days)
        .unwrap_or_else(|| {
            warn!(ttl_days = config.artwork_ttl_days, "Artwork TTL out of range; using default");
            defaults.ttl
        });
    ResolverConfig {
        memory_capacity: config.artwork_memory_capacity,
        ttl,
        lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
        ..defaults
    }
}

fn session_config(config: &AppConfig, settings: &Settings) -> SessionConfig {
    SessionConfig {
        endpoint_count: config.endpoint_count,
        enabled: settings.enable_on_launch,
        ..SessionConfig::new(config.client_id.clone())
    }
}

/// The assembled application.
pub struct Runtime {
    engine: EngineHandle,
    resolver_task: JoinHandle<()>,
    resolver_cancel: CancellationToken,
    session_task: JoinHandle<()>,
    session_cancel: CancellationToken,
}

/// Wire every adapter and start the engine.
pub async fn start_runtime(config: &AppConfig, paths: &AppPaths) -> WiringResult<Runtime> {
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);

    let settings_repo = Arc::new(FileSettingsRepository::new(&paths.settings_path));
    let settings = load_settings(settings_repo.as_ref(), &paths.settings_path).await;

    let resolver_config = resolver_config(config);
    let disk = DiskTier::load(&paths.art_cache_path, resolver_config.ttl, clock.now_utc()).await;
    let search = ItunesArtworkSearch::new(resolver_config.lookup_timeout)
        .map_err(|e| WiringError::ArtworkSearchInit(format!("{e:#}")))?;
    let resolver_cancel = CancellationToken::new();
    let (resolver, resolver_task) = spawn_artwork_resolver(
        Arc::new(search),
        Arc::clone(&clock),
        disk,
        resolver_config,
        resolver_cancel.clone(),
    );

    let session_cancel = CancellationToken::new();
    let (session, session_task) = spawn_presence_session(
        Arc::new(LocalIpcConnector::new()),
        session_config(config, &settings),
        session_cancel.clone(),
    );

    let engine = start_engine(
        EngineDeps {
            source: snapshot_source(config),
            resolver: Arc::new(resolver),
            session: Arc::new(session),
            clock,
            settings: settings_repo,
        },
        &settings,
        EngineConfig::default(),
        CancellationToken::new(),
    );

    info!(settings = %paths.settings_path.display(), "Runtime started");
    Ok(Runtime {
        engine,
        resolver_task,
        resolver_cancel,
        session_task,
        session_cancel,
    })
}

impl Runtime {
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Stop the engine, then the resolver, then close the presence link.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;

        self.resolver_cancel.cancel();
        if let Err(err) = self.resolver_task.await {
            warn!(error = %err, "Artwork resolver task failed");
        }

        self.session_cancel.cancel();
        match timeout(SESSION_SHUTDOWN_TIMEOUT, self.session_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Presence session task failed"),
            Err(_) => warn!("Presence session did not close in time"),
        }
        info!("Runtime stopped");
    }
}
