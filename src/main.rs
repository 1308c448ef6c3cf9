#![allow(dead_code)]

//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

mod auth;
mod collect;
mod core;
mod engine;
mod inject;
mod interfaces;
mod network;
mod process;
mod state;
mod ui;
mod utils;

#[cfg(test)]
mod testing;

use std::io;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::config::AppConfig;
use crate::core::event::create_event_channel;
use crate::engine::Orchestrator;
use crate::network::CdpSession;
use crate::ui::{Ui, get_multi};

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保并发日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行完整抓取流水线
    Run {
        /// 目标站点标识符
        #[arg(short, long)]
        site: String,
    },
    /// 仅执行链接收集阶段
    Collect {
        #[arg(short, long)]
        site: String,
    },
    /// 仅执行认证并缓存凭据
    Auth {
        #[arg(short, long)]
        site: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 依赖项初始化与注入 (Dependency Injection)
    let config = Arc::new(AppConfig::load()?);

    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", config.runtime.log_level.env_filter());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();

    let cli = Cli::parse();
    let (site_id, phase) = match &cli.command {
        Commands::Run { site } => (site.clone(), Phase::Full),
        Commands::Collect { site } => (site.clone(), Phase::CollectOnly),
        Commands::Auth { site } => (site.clone(), Phase::AuthOnly),
    };

    let session = CdpSession::launch(&config.browser, &config.runtime.locale).await?;
    let shutdown = CancellationToken::new();

    // 建立 UI 事件反馈链路 (Event feedback loop)
    let (event_sender, event_receiver) = create_event_channel();
    let ui_handle = Ui::run(event_receiver);

    // 任务域限制 (Scope isolation for proper RAII cleanup)
    {
        let driver_session: Arc<dyn interfaces::Session> = session.clone();
        let orchestrator = Orchestrator::from_config(
            &config,
            &site_id,
            driver_session,
            Some(event_sender),
            shutdown.clone(),
        )
        .await?;

        // 信号处理与优雅退出 (Signal Handling)
        spawn_signal_flush(orchestrator.state(), shutdown.clone());

        let result = match phase {
            Phase::Full => orchestrator.run().await.map(|_| ()),
            Phase::CollectOnly => orchestrator.collect_only().await,
            Phase::AuthOnly => orchestrator.auth_only().await,
        };
        if let Err(e) = result {
            tracing::error!("执行失败 [{}]: {}", site_id, e);
        } else {
            tracing::info!("Execution flow completed for: {}", site_id);
        }
    }

    let _ = session.close().await;

    // Await UI shutdown after event sender closure
    let _ = ui_handle.await;

    Ok(())
}

enum Phase {
    Full,
    CollectOnly,
    AuthOnly,
}

/// 信号触发：取消令牌 + 同步冲刷 + 退出
fn spawn_signal_flush(state: Arc<state::StateSet>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("收到终止信号，冲刷状态后退出");
        shutdown.cancel();
        state.flush_all_sync();
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
