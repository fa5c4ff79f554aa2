use anyhow::Context;
use clap::Parser;
use ftpsync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use ftpsync_lib::{FtpConnector, ReconciliationPlan, SyncConfig, SyncSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

/// 比较本地目录与 FTP 服务器目录，输出同步计划
#[derive(Parser, Debug)]
#[command(name = "ftpsync", version, about)]
struct Args {
    /// JSON 配置文件
    #[arg(short, long, default_value = "ftpsync.json")]
    config: PathBuf,

    /// 以 JSON 输出计划
    #[arg(long)]
    json: bool,

    /// 输出所有条目（包括跳过的）
    #[arg(short, long)]
    all: bool,

    /// 控制台输出 debug 日志
    #[arg(short, long)]
    verbose: bool,
}

/// 初始化日志系统
fn init_logging(config: &LogConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // 日志写到 stderr，stdout 留给计划输出
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = if config.enabled {
        let log_dir = get_log_dir(config);
        match SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_plan(plan: &ReconciliationPlan, all: bool) {
    for item in plan.items.iter().filter(|i| all || i.action.is_actionable()) {
        let action = serde_json::to_value(item.action)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", item.action));
        match item.size {
            Some(size) => println!("{:<16} {} ({} bytes)", action, item.path, size),
            None => println!("{:<16} {}", action, item.path),
        }
    }

    let summary = plan.summary();
    println!(
        "{} items, {} to transfer ({} bytes), clock offset {}s{}",
        plan.len(),
        summary.upload_count + summary.download_count,
        summary.total_transfer_bytes(),
        plan.clock_offset_secs,
        if plan.low_confidence { " (low confidence)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    init_logging(&config.log, args.verbose);

    let session = SyncSession::new(Arc::new(FtpConnector));

    // Ctrl-C 取消当前会话
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到中断信号，正在取消...");
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let plan = match session.run(&config).await {
        Ok(plan) => plan,
        Err(e) => {
            error!("同步失败: {}", e);
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan, args.all);
    }

    Ok(())
}
