//! 链接任务单元定义

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::error::{CrawlError, Result};
use crate::core::event::CrawlEvent;
use crate::core::model::CollectionLink;
use crate::interfaces::driver::{BrowserContext, Page, Session, StorageState};
use crate::process::block::{BlockProcessor, PageOutcome, PageReport};
use crate::process::free::check_page_free;
use crate::process::page::PageProcessor;
use crate::state::store;
use crate::utils::normalize_path;

use super::context::RuntimeContext;

/// 滚动停滞判定的连续计数
const SCROLL_STALL_TICKS: u32 = 3;
/// 内容高度判定容差
const SCROLL_EPSILON: f64 = 10.0;

/// 链接任务结果
#[derive(Debug)]
pub enum TaskOutcome {
    /// 页面处理完成
    Processed(PageReport),
    /// 页面级免费命中，整页跳过
    Free,
}

/// 单个链接的执行单元
#[derive(Debug, Clone)]
pub struct LinkTask {
    pub link: CollectionLink,
    pub index: usize,
    /// 首个任务复用主页面
    pub use_primary: bool,
}

impl std::fmt::Display for LinkTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.link.name {
            Some(name) => write!(f, "{} ({})", self.link.link, name),
            None => write!(f, "{}", self.link.link),
        }
    }
}

impl LinkTask {
    /// 执行任务
    pub async fn run(self, ctx: Arc<RuntimeContext>) -> Result<TaskOutcome> {
        let _permit = ctx
            .semaphore
            .acquire()
            .await
            .map_err(|e| CrawlError::Custom(e.to_string()))?;

        let prefix = ctx.log_prefix(&self.link.link);
        ctx.emit(CrawlEvent::LinkStarted {
            path: prefix.clone(),
        });

        // 1. 页面与上下文选择
        let independent =
            ctx.site.use_independent_context || ctx.site.storage_state.is_some();
        let (page, owned_context) = self.open_page(&ctx, independent).await?;

        let result = self.execute_on_page(&ctx, &page, &prefix).await;

        // 收尾：关闭标签页；独立上下文一并关闭
        if !self.use_primary {
            let _ = page.close().await;
        }
        if let Some(bctx) = owned_context {
            let _ = bctx.close().await;
        }

        if matches!(result, Ok(TaskOutcome::Processed(_))) {
            ctx.emit(CrawlEvent::LinkCompleted { path: prefix });
        }
        result
    }

    async fn open_page(
        &self,
        ctx: &Arc<RuntimeContext>,
        independent: bool,
    ) -> Result<(Arc<dyn Page>, Option<Arc<dyn BrowserContext>>)> {
        if independent {
            let storage = match &ctx.site.storage_state {
                Some(path) => {
                    store::load_json::<StorageState>(std::path::Path::new(path)).await?
                }
                None => None,
            };
            let bctx = ctx.session.new_context(storage).await?;
            let page = bctx.new_page().await?;
            return Ok((page, Some(bctx)));
        }

        if self.use_primary {
            return Ok((ctx.primary_page.clone(), None));
        }
        Ok((ctx.session.default_context().new_page().await?, None))
    }

    async fn execute_on_page(
        &self,
        ctx: &Arc<RuntimeContext>,
        page: &Arc<dyn Page>,
        prefix: &str,
    ) -> Result<TaskOutcome> {
        let page_path = normalize_path(&self.link.link);

        // 2. 导航前脚本（主页面在收集阶段已注入）
        if !self.use_primary {
            ctx.injector.apply_before(page).await?;
        }

        // 3. 导航
        let url = ctx.absolute_url(&self.link.link);
        debug!("[{}] 打开页面: {}", prefix, url);
        page.goto(
            &url,
            ctx.site.wait_until,
            Duration::from_millis(ctx.site.navigation_timeout_ms),
        )
        .await?;

        // 4. 导航后脚本
        ctx.injector.apply_after(page).await?;

        // 5. 页面级免费判定
        if check_page_free(
            page,
            ctx.site.skip_free.as_ref(),
            ctx.job.page_free_probe.as_ref(),
        )
        .await?
        {
            info!("[{}] 页面免费，整页跳过", prefix);
            ctx.state.free.add_page(&page_path);
            ctx.state.progress.mark_page_complete(&page_path);
            ctx.emit(CrawlEvent::FreeDetected {
                path: page_path.clone(),
                block: None,
            });
            return Ok(TaskOutcome::Free);
        }

        // 6. 自动滚动
        if let Some(scroll) = &ctx.site.auto_scroll {
            auto_scroll(page, scroll).await?;
        }

        // 7. 分发处理器
        self.dispatch(ctx, page, prefix, &page_path).await
    }

    async fn dispatch(
        &self,
        ctx: &Arc<RuntimeContext>,
        page: &Arc<dyn Page>,
        prefix: &str,
        page_path: &str,
    ) -> Result<TaskOutcome> {
        let page_dir = ctx.paths.output_dir.join(page_path);

        // 页面模式
        if let Some(handler) = &ctx.job.page_handler {
            if let Some(page_config) = &ctx.site.page
                && let Some(settle) = page_config.settle_ms
            {
                page.wait_timeout(settle).await;
            }
            let processor =
                PageProcessor::new(handler, ctx.runtime.pause_on_error, ctx.debug);
            processor.run(page, page_path, &page_dir).await?;
            ctx.state.progress.mark_page_complete(page_path);
            return Ok(TaskOutcome::Processed(PageReport {
                done: 1,
                ..PageReport::default()
            }));
        }

        // 区块模式
        let Some(block_config) = &ctx.site.block else {
            return Err(CrawlError::Custom(
                "no processing mode configured for this site".into(),
            ));
        };

        let processor = BlockProcessor::new(
            &ctx.runtime,
            block_config,
            &ctx.state,
            ctx.events.as_ref(),
            ctx.job.block_handler.as_ref(),
            ctx.job.name_resolver.as_ref(),
            ctx.job.block_free_probe.clone(),
            ctx.debug,
            prefix,
        );

        match processor
            .run(page, self.link.block_count, page_path, &page_dir)
            .await?
        {
            PageOutcome::Completed(report) => {
                ctx.blocks_done.fetch_add(report.done, Ordering::SeqCst);
                Ok(TaskOutcome::Processed(report))
            }
            PageOutcome::MismatchSkipped { expected, actual } => {
                Err(CrawlError::BlockCountMismatch {
                    page: page_path.to_string(),
                    expected,
                    actual,
                })
            }
        }
    }
}

/// 模拟滚轮直到触底、停滞或超时
///
/// 触底与停滞视为成功，超时视为失败。
async fn auto_scroll(
    page: &Arc<dyn Page>,
    config: &crate::core::config::AutoScrollConfig,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(config.timeout_ms);
    let mut stalled: u32 = 0;
    let mut last_position = f64::MIN;

    loop {
        let metrics = page.scroll_metrics().await?;

        if metrics.position + metrics.viewport >= metrics.content - SCROLL_EPSILON {
            debug!("自动滚动触底 (position={})", metrics.position);
            return Ok(());
        }

        if (metrics.position - last_position).abs() < f64::EPSILON {
            stalled += 1;
            if stalled >= SCROLL_STALL_TICKS {
                debug!("自动滚动停滞，视为完成");
                return Ok(());
            }
        } else {
            stalled = 0;
        }
        last_position = metrics.position;

        if Instant::now() >= deadline {
            return Err(CrawlError::Driver(format!(
                "auto-scroll timed out after {}ms",
                config.timeout_ms
            )));
        }

        page.wheel(config.step_px).await?;
        page.wait_timeout(config.interval_ms).await;
    }
}
