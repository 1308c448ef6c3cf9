//! 进度显示 UI
//!
//! 基于 indicatif 实现的进度条显示，支持全局日志避让

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::core::event::{CrawlEvent, EventReceiver, SkipReason};

/// 全局 UI 容器，用于日志系统访问
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局 MultiProgress 实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

/// 进度条管理器
pub struct UiState {
    main_bar: Option<ProgressBar>,
    link_bar: Option<ProgressBar>,
}

impl UiState {
    fn new() -> Self {
        Self {
            main_bar: None,
            link_bar: None,
        }
    }
}

static STATE: OnceLock<Arc<RwLock<UiState>>> = OnceLock::new();

fn get_state() -> &'static Arc<RwLock<UiState>> {
    STATE.get_or_init(|| Arc::new(RwLock::new(UiState::new())))
}

pub struct Ui;

impl Ui {
    /// 启动事件处理循环
    pub fn run(receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv_async().await {
                Self::handle_event(event);
            }
        })
    }

    /// 处理 UI 事件
    fn handle_event(event: CrawlEvent) {
        let multi = get_multi();
        let state = get_state();
        let mut ui = state.write();

        match event {
            CrawlEvent::RunStarted { site, .. } => {
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(style);
                bar.set_message(format!("🕸 {}", site));
                bar.enable_steady_tick(Duration::from_millis(100));
                ui.main_bar = Some(bar);
            }
            CrawlEvent::CollectReady {
                total_links,
                total_blocks,
                loaded_from_disk,
            } => {
                let style = ProgressStyle::default_bar()
                    .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("█▉▊▋▌▍▎▏  ");

                let bar = multi.add(ProgressBar::new(total_links as u64));
                bar.set_style(style);
                ui.link_bar = Some(bar);

                if let Some(ref main) = ui.main_bar {
                    let source = if loaded_from_disk { "缓存" } else { "现场收集" };
                    main.set_message(format!(
                        "📋 工作集就绪 ({}): {} links / {} blocks",
                        source, total_links, total_blocks
                    ));
                }
            }
            CrawlEvent::LinkStarted { path } => {
                if let Some(ref bar) = ui.link_bar {
                    bar.set_message(truncate_string(&path, 36));
                }
            }
            CrawlEvent::LinkCompleted { .. } | CrawlEvent::LinkFailed { .. } => {
                if let Some(ref bar) = ui.link_bar {
                    bar.inc(1);
                }
            }
            CrawlEvent::LinkSkipped { path, reason } => {
                if let Some(ref bar) = ui.link_bar {
                    bar.inc(1);
                    let tag = match reason {
                        SkipReason::Completed => "已完成",
                        SkipReason::KnownFree => "已知免费",
                    };
                    bar.set_message(format!("⏭ {} ({})", truncate_string(&path, 28), tag));
                }
            }
            CrawlEvent::FreeDetected { path, block } => {
                if let Some(ref bar) = ui.link_bar {
                    match block {
                        Some(name) => bar.set_message(format!("🆓 {}/{}", path, name)),
                        None => {
                            bar.inc(1);
                            bar.set_message(format!("🆓 {}", path));
                        }
                    }
                }
            }
            CrawlEvent::MismatchRecorded {
                path,
                expected,
                actual,
            } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.set_message(format!("⚠️ 计数不一致 {}: {} ≠ {}", path, expected, actual));
                }
            }
            CrawlEvent::RunCompleted {
                completed,
                previously_completed,
                failed,
                free,
            } => {
                if let Some(ref bar) = ui.link_bar {
                    bar.finish_with_message("✅ 全部链接处理完毕");
                }
                if let Some(ref bar) = ui.main_bar {
                    bar.finish_with_message(format!(
                        "✅ 完成: 新 {} / 既有 {} / 免费 {} / 失败 {}",
                        completed, previously_completed, free, failed
                    ));
                }
            }
            CrawlEvent::RunFailed { error } => {
                if let Some(ref bar) = ui.main_bar {
                    bar.abandon_with_message(format!("❌ 运行失败: {}", error));
                }
            }
            _ => {}
        }
    }
}

/// 截断字符串
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
