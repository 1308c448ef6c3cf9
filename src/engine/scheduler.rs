//! 并发调度器 (Concurrent Executor)
//!
//! 流水线的心脏：按收集顺序入队链接任务，固定容量的在飞窗口
//! 贪心填充空槽，完成顺序不保证与输入一致。预派发门按序应用：
//! 已完成跳过、已知免费跳过，其余交给链接执行器。

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::error::CrawlError;
use crate::core::event::{CrawlEvent, SkipReason};
use crate::core::model::CollectResult;

use super::context::RuntimeContext;
use super::task::{LinkTask, TaskOutcome};

/// 运行统计
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    /// 本次新完成的链接数
    pub completed: usize,
    /// 失败的链接数
    pub failed: usize,
    /// 免费跳过的链接数（含预派发门与页面级命中）
    pub skipped_free: usize,
    /// 启动时进度记录中已完成的页面数
    pub previously_completed: usize,
    /// 用户中止的任务数（不计成功也不计失败）
    pub aborted: usize,
}

impl RunStats {
    /// 最终成功数 = 新完成 + 既有完成
    pub fn success_total(&self) -> usize {
        self.completed + self.previously_completed
    }
}

type TaskError = (String, CrawlError);

/// 并发执行器
pub struct Executor {
    ctx: Arc<RuntimeContext>,
}

impl Executor {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    /// 对整个工作集执行调度循环
    pub async fn run(&self, collect: &CollectResult) -> RunStats {
        let mut stats = RunStats {
            previously_completed: self.ctx.state.progress.previously_completed(),
            ..RunStats::default()
        };

        // collect.json 在此读取一次，运行中不再重载
        let known_free = self.ctx.state.free.known_free_pages();
        let mut pending = self.build_queue(collect, &known_free, &mut stats);
        let concurrency = self.ctx.runtime.max_concurrency.max(1);

        let mut join_set: JoinSet<Result<TaskOutcome, TaskError>> = JoinSet::new();

        // 主循环：只要还有等待的任务或正在运行的任务，就继续
        while !pending.is_empty() || !join_set.is_empty() {
            if self.ctx.shutdown.is_cancelled() {
                warn!("收到退出信号，停止派发新任务");
                pending.clear();
                if join_set.is_empty() {
                    break;
                }
            }

            // 1. 填充任务槽 (Fill Slots)
            self.fill_task_slots(&mut join_set, &mut pending, concurrency);

            // 2. 等待结果 (Wait)
            if let Some(res) = join_set.join_next().await {
                self.handle_task_result(res, &mut stats);
            }
        }

        info!(
            "调度完成: 新完成 {} / 既有 {} / 免费 {} / 失败 {}",
            stats.completed, stats.previously_completed, stats.skipped_free, stats.failed
        );
        stats
    }

    /// 预派发门：已完成与已知免费在入队前滤除
    fn build_queue(
        &self,
        collect: &CollectResult,
        known_free: &std::collections::BTreeSet<String>,
        stats: &mut RunStats,
    ) -> VecDeque<LinkTask> {
        let mut pending = VecDeque::new();
        let mut index = 0usize;

        for link in &collect.collections {
            let page_path = crate::utils::normalize_path(&link.link);
            let prefix = self.ctx.log_prefix(&link.link);

            if self.ctx.state.progress.is_page_complete(&page_path) {
                info!("[{}] {}", prefix, SkipReason::Completed);
                self.ctx.emit(CrawlEvent::LinkSkipped {
                    path: prefix,
                    reason: SkipReason::Completed,
                });
                continue;
            }

            if known_free.contains(&page_path) {
                info!("[{}] {}", prefix, SkipReason::KnownFree);
                // 重新登记进本次运行的免费记录
                self.ctx.state.free.add_page(&page_path);
                self.ctx.emit(CrawlEvent::LinkSkipped {
                    path: prefix,
                    reason: SkipReason::KnownFree,
                });
                stats.skipped_free += 1;
                continue;
            }

            pending.push_back(LinkTask {
                link: link.clone(),
                index,
                use_primary: index == 0,
            });
            index += 1;
        }
        pending
    }

    /// 填充任务槽
    fn fill_task_slots(
        &self,
        join_set: &mut JoinSet<Result<TaskOutcome, TaskError>>,
        pending: &mut VecDeque<LinkTask>,
        concurrency: usize,
    ) {
        while join_set.len() < concurrency
            && let Some(task) = pending.pop_front()
        {
            let task_ctx = self.ctx.clone();
            let task_desc = task.to_string();

            join_set.spawn(async move {
                task.run(task_ctx).await.map_err(|e| (task_desc, e))
            });
        }
    }

    /// 处理任务结果
    fn handle_task_result(
        &self,
        res: Result<Result<TaskOutcome, TaskError>, tokio::task::JoinError>,
        stats: &mut RunStats,
    ) {
        match res {
            Ok(Ok(outcome)) => match outcome {
                TaskOutcome::Processed(report) => {
                    stats.completed += 1;
                    debug!(
                        "链接完成: 提取 {} / 跳过 {} / 免费 {}",
                        report.done, report.skipped, report.free
                    );
                }
                TaskOutcome::Free => {
                    stats.skipped_free += 1;
                }
            },
            Ok(Err((desc, e))) => {
                // 驱动拆除类错误归为用户中止，静默处理
                if e.is_user_abort() || self.ctx.shutdown.is_cancelled() {
                    debug!("任务中止 [{}]", desc);
                    stats.aborted += 1;
                    return;
                }
                error!("任务失败 [{}]: {}", desc, e);
                debug!("失败详情 [{}]: {:?}", desc, e);
                self.ctx.emit(CrawlEvent::LinkFailed {
                    path: desc,
                    error: e.to_string(),
                });
                stats.failed += 1;
            }
            Err(e) => {
                error!("致命错误 (Panic/Cancel): {}", e);
                stats.failed += 1;
            }
        }
    }
}
