use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet::app::{AppMode, Application};
use fleet::shutdown::ShutdownManager;
use fleet_core::{AppConfig, ConfigValidator, ObservabilityConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("fleet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务集群协调系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时搜索 config/fleet.toml 和 fleet.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["coordinator", "worker"])
                .required(true),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("Worker 节点 ID (仅在worker模式下使用)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mode_str = matches.get_one::<String>("mode").context("缺少运行模式")?;
    let mode: AppMode = mode_str.parse()?;

    // 加载配置
    let mut config = AppConfig::load(config_path.map(Path::new)).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    if let Some(id) = matches.get_one::<String>("node-id") {
        config.worker.node_id = id.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    config.validate().context("配置校验失败")?;

    init_logging(&config.observability.log_level, &config.observability.log_format)?;
    init_metrics(&config.observability)?;

    info!("启动分布式任务集群协调系统");
    info!("运行模式: {mode_str}");
    if mode == AppMode::Worker {
        info!("Worker ID: {}", config.worker.node_id);
    }

    let app = Arc::new(Application::new(config, mode).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        let shutdown_manager = shutdown_manager.clone();

        tokio::spawn(async move {
            let result = app.run(shutdown_rx).await;
            if let Err(ref e) = result {
                error!("应用运行失败: {e:#}");
            }
            // 启动失败时也让主流程退出
            shutdown_manager.shutdown().await;
            result
        })
    };

    let mut stopped_rx = shutdown_manager.subscribe().await;
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
        }
        _ = stopped_rx.recv() => {}
    }

    // 等待应用关闭，设置超时
    let outcome = match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
        Err(_) => {
            warn!("应用关闭超时，强制退出");
            Ok(())
        }
    };

    info!("分布式任务集群协调系统已退出");
    outcome
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 按需安装 Prometheus 指标导出器
fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("安装Prometheus指标导出器失败")?;
    info!("Prometheus指标导出在 0.0.0.0:{}", config.metrics_port);
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
