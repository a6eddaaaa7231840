use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use vprox::api::{ApiServer, AppState};
use vprox::config::{Args, Command, Config, ConfigSource};
use vprox::logging::{init_logging, LogConfig};
use vprox::monitoring::MonitoringSystem;
use vprox::supervisor::{ProcessLauncher, WorkerSupervisor};
use vprox::worker::{PoolListener, WorkerRuntime};

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let (config, source) = match Config::load(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    // 初始化日志系统，guard 持有到进程退出
    let mut log_config = LogConfig::from(&config.logging);
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }
    if let Some(file) = &args.log_file {
        log_config.file = Some(file.clone());
    }
    log_config.to_stderr = args.command() == Command::Worker;

    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if source == ConfigSource::Defaults {
        warn!("Config file not found at {}, using defaults", args.config);
    }

    let result = match args.command() {
        Command::Master => run_master(&args, config).await,
        Command::Worker => run_worker(config).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run_master(args: &Args, config: Config) -> Result<()> {
    info!("Starting {} v{}", vprox::NAME, vprox::VERSION);
    info!("Configuration loaded from: {}", args.config);

    let workers = config.worker_count();
    info!("Using {} out of {} total threads", workers, num_cpus::get());

    let monitoring = Arc::new(MonitoringSystem::new(config.alerts.clone()));

    let launcher = ProcessLauncher::current_exe(args)
        .context("Failed to prepare worker launcher")?;
    let supervisor = Arc::new(WorkerSupervisor::new(
        Arc::new(launcher),
        workers,
        monitoring.snapshots(),
    ));
    supervisor
        .start()
        .await
        .context("Failed to start workers")?;

    let state = AppState {
        monitoring,
        supervisor: supervisor.clone(),
        web_root: config.web_root.clone(),
    };
    let server = ApiServer::new(config.status_bind.clone(), config.status_port, state);
    if let Err(e) = server.start().await {
        supervisor.shutdown().await;
        return Err(e).context("Failed to start HTTP status server");
    }

    wait_for_shutdown().await;
    info!("Received shutdown signal");

    server.stop().await;
    supervisor.shutdown().await;
    info!("Master stopped gracefully");

    Ok(())
}

async fn run_worker(config: Config) -> Result<()> {
    info!("Worker {} starting with {} pools", std::process::id(), config.pools.len());

    let listener = Arc::new(PoolListener::new(config.pools));
    let runtime = WorkerRuntime::new(listener, config.status_update_interval_ms);
    runtime
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("Worker runtime failed")?;

    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error waiting for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to create SIGTERM handler: {}", e);
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
