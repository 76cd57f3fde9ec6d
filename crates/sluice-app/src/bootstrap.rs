//! Application bootstrap: builds every service in dependency order and runs
//! the operator API until a shutdown signal arrives.
//!
//! Task admission comes from the chat-platform uplink handler (an external
//! collaborator) or the operator API; both funnel into
//! [`sluice_engine::Coordinator::submit_task`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sluice_api::ApiServer;
use sluice_config::SluiceConfig;
use sluice_engine::{
    Coordinator, DEP_CONVERTER, DEP_EXTRACTOR, DependencyKind, DependencyMonitor, DependencySpec,
    FallbackMode, PipelineContext,
};
use sluice_events::EventBus;
use sluice_placement::{NamePolicy, PlacementService, StagingPaths};
use sluice_stage::{BreakerPolicy, CircuitBreaker, ConverterTool, ExtractorTool, LocalUplink};
use sluice_tasks::TaskStore;
use sluice_telemetry::{LoggingConfig, Metrics, init_logging};
use tokio::signal;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

const CONFIG_PATH_ENV: &str = "SLUICE_CONFIG";
const DB_FILE: &str = "sluice.db";

/// Bootstraps the application and blocks until shutdown.
///
/// # Errors
///
/// Returns an error if any construction step fails; startup is strictly
/// sequential, so a failure leaves no background work running.
#[allow(clippy::too_many_lines)]
pub(crate) async fn run_app() -> AppResult<()> {
    init_logging(&LoggingConfig::default())
        .map_err(|source| AppError::telemetry("telemetry.init", source))?;

    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map_or_else(|_| PathBuf::from("sluice.toml"), PathBuf::from);
    let config = sluice_config::load_from_path(&config_path)
        .map_err(|source| AppError::config("config.load", source))?;

    info!(instance = %config.app.instance_name, "sluice bootstrap starting");

    let events = EventBus::new();
    let metrics =
        Metrics::new().map_err(|source| AppError::telemetry("telemetry.metrics", source))?;

    std::fs::create_dir_all(&config.app.data_dir).map_err(|source| AppError::Io {
        operation: "bootstrap.create_data_dir",
        path: Some(config.app.data_dir.clone()),
        source,
    })?;
    let store = TaskStore::open(&config.app.data_dir.join(DB_FILE))
        .await
        .map_err(|source| AppError::store("store.open", source))?;

    let staging = StagingPaths::resolve(&config.uplink.staging_base, &config.uplink.secret)
        .map_err(|source| AppError::placement("resolver.resolve", source))?;
    let placement = Arc::new(PlacementService::new(
        staging.clone(),
        events.clone(),
        metrics.clone(),
    ));
    let name_policy = NamePolicy::new(config.uplink.max_file_size)
        .map_err(|source| AppError::placement("policy.compile", source))?;

    let uplink = Arc::new(LocalUplink::new(
        staging.documents().to_path_buf(),
        config.uplink.api_base.clone(),
    ));
    let extractor = Arc::new(ExtractorTool::new(
        config.tools.extractor_bin.clone(),
        config.tools.term_grace(),
    ));
    let converter = Arc::new(ConverterTool::new(
        config.tools.converter_bin.clone(),
        config.tools.term_grace(),
    ));

    let monitor = Arc::new(DependencyMonitor::new(
        events.clone(),
        metrics.clone(),
        config.tools.fallback_batch,
        config.tools.fallback_max_wait(),
    ));
    register_dependencies(&monitor, &config, &staging);

    let ctx = Arc::new(PipelineContext {
        store: store.clone(),
        placement,
        name_policy,
        uplink,
        extractor,
        converter,
        extract_breaker: CircuitBreaker::new(DEP_EXTRACTOR, BreakerPolicy::conservative()),
        convert_breaker: CircuitBreaker::new(DEP_CONVERTER, BreakerPolicy::permissive()),
        extract_lock: tokio::sync::Mutex::new(()),
        monitor,
        events,
        metrics,
        pipeline: config.pipeline.clone(),
        notify: config.notify.clone(),
        allowed_owners: config.uplink.allowed_owners.clone(),
    });

    let coordinator = Arc::new(
        Coordinator::start(ctx)
            .await
            .map_err(|source| AppError::engine("coordinator.start", source))?,
    );

    let api = ApiServer::new(Arc::clone(&coordinator));
    let addr = SocketAddr::new(config.app.bind_addr, config.app.http_port);
    api.serve(addr, shutdown_signal())
        .await
        .map_err(|source| AppError::api_server("api_server.serve", source))?;

    info!("shutdown signal received; draining");
    match Arc::try_unwrap(coordinator) {
        Ok(coordinator) => coordinator.shutdown(config.app.shutdown_grace()).await,
        Err(_still_shared) => {
            warn!("coordinator still shared at shutdown; skipping drain");
        }
    }

    // The store closes last so every drained worker could commit.
    store.close().await;
    info!("sluice shutdown complete");
    Ok(())
}

fn register_dependencies(
    monitor: &DependencyMonitor,
    config: &SluiceConfig,
    staging: &StagingPaths,
) {
    let probe_interval = config.tools.probe_interval();
    monitor.register(DependencySpec {
        name: DEP_EXTRACTOR.to_string(),
        kind: DependencyKind::Executable,
        path: config.tools.extractor_bin.clone(),
        probe_interval,
        fallback: FallbackMode::Queue,
    });
    monitor.register(DependencySpec {
        name: DEP_CONVERTER.to_string(),
        kind: DependencyKind::Executable,
        path: config.tools.converter_bin.clone(),
        probe_interval,
        fallback: FallbackMode::Queue,
    });

    for (name, path) in [
        ("dir_documents", staging.documents()),
        ("dir_temp", staging.temp()),
        ("dir_files_all", staging.files_all()),
        ("dir_files_txt", staging.files_txt()),
        ("dir_files_pass", staging.files_pass()),
        ("dir_files_nopass", staging.files_nopass()),
        ("dir_files_errors", staging.files_errors()),
    ] {
        monitor.register(DependencySpec {
            name: name.to_string(),
            kind: DependencyKind::Directory,
            path: path.to_path_buf(),
            probe_interval,
            fallback: FallbackMode::Manual,
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler failed; awaiting SIGTERM only");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                warn!(error = %err, "SIGTERM handler failed; awaiting ctrl-c only");
                ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            () = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
