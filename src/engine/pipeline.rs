//! 爬虫流水线编排 (Pipeline Orchestrator)
//!
//! 负责各阶段的生命周期：认证 -> 收集 -> 并发执行 -> 摘要落盘。
//! 状态在每条退出路径上都会冲刷，信号路径走同步冲刷例程。

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::AuthManager;
use crate::collect::LinkCollector;
use crate::core::config::{AppConfig, RuntimeConfig, SiteConfig};
use crate::core::error::{CrawlError, Result};
use crate::core::event::{CrawlEvent, EventSender};
use crate::core::model::{CollectResult, SitePaths};
use crate::engine::scheduler::{Executor, RunStats};
use crate::engine::{Job, RuntimeContext};
use crate::inject::ScriptInjector;
use crate::interfaces::driver::{BrowserContext, Page, Session};
use crate::state::StateSet;
use crate::utils::normalize_path;

/// 流水线编排器
///
/// 独占持有状态记录与调度器；链接任务仅借引用追加。
pub struct Orchestrator {
    ctx: Arc<RuntimeContext>,
}

impl Orchestrator {
    /// 组装一次运行
    ///
    /// `primary_page` 缺省时由默认上下文新开；测试脚手架可直接
    /// 递入就绪页面。
    #[allow(clippy::too_many_arguments)]
    pub async fn assemble(
        runtime: RuntimeConfig,
        site: Arc<SiteConfig>,
        job: Job,
        session: Arc<dyn Session>,
        primary_page: Option<Arc<dyn Page>>,
        events: Option<EventSender>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        validate_job(&site, &job)?;

        let paths = SitePaths::derive(&runtime, &site.start_url);
        let state = StateSet::initialize(&paths, runtime.progress)?;

        let injector = if site.scripts.is_empty() {
            ScriptInjector::empty()
        } else {
            ScriptInjector::load(&paths.scripts_dir(), &site.scripts).await?
        };

        let primary_page = match primary_page {
            Some(page) => page,
            None => session.default_context().new_page().await?,
        };

        let ctx = RuntimeContext::new(
            runtime,
            site,
            paths,
            state,
            session,
            primary_page,
            Arc::new(injector),
            job,
            shutdown,
            events,
        )?;

        Ok(Self { ctx: Arc::new(ctx) })
    }

    /// 从应用配置组装声明式运行
    pub async fn from_config(
        config: &AppConfig,
        site_id: &str,
        session: Arc<dyn Session>,
        events: Option<EventSender>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let site = config
            .site(site_id)
            .cloned()
            .ok_or_else(|| CrawlError::Custom(format!("unknown site identifier: {site_id}")))?;

        Self::assemble(
            config.runtime.clone(),
            Arc::new(site),
            Job::declarative(),
            session,
            None,
            events,
            shutdown,
        )
        .await
    }

    /// 状态记录句柄（信号冲刷接线用）
    pub fn state(&self) -> Arc<StateSet> {
        self.ctx.state.clone()
    }

    /// 执行完整流水线
    pub async fn run(&self) -> Result<RunStats> {
        self.ctx.emit(CrawlEvent::RunStarted {
            site: self.ctx.paths.host.clone(),
            start_url: self.ctx.site.start_url.clone(),
        });

        let result = self.run_phases().await;

        // 状态在每条退出路径上冲刷
        if let Err(flush_err) = self.ctx.state.flush_all().await {
            error!("状态冲刷失败: {}", flush_err);
            if result.is_ok() {
                return Err(flush_err);
            }
        }

        match &result {
            Ok(stats) => {
                info!(
                    "运行结束: 成功 {} (新 {} + 既有 {}) / 免费 {} / 失败 {}",
                    stats.success_total(),
                    stats.completed,
                    stats.previously_completed,
                    stats.skipped_free,
                    stats.failed
                );
                self.ctx.emit(CrawlEvent::RunCompleted {
                    completed: stats.completed,
                    previously_completed: stats.previously_completed,
                    failed: stats.failed,
                    free: stats.skipped_free,
                });
            }
            Err(e) => {
                error!("运行失败: {}", e);
                self.ctx.emit(CrawlEvent::RunFailed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    /// 仅认证：登录并缓存凭据
    pub async fn auth_only(&self) -> Result<()> {
        let auth = AuthManager::new(&self.ctx.site, &self.ctx.paths);
        auth.ensure_auth(
            &self.ctx.session,
            &self.ctx.primary_page,
            self.ctx.job.auth_handler.as_ref(),
        )
        .await
    }

    /// 仅收集：认证后产出 collect.json
    pub async fn collect_only(&self) -> Result<()> {
        self.auth_only().await?;

        let collector = LinkCollector::new(&self.ctx.site, &self.ctx.paths);
        let outcome = collector.collect(&self.ctx.primary_page).await?;
        self.ctx.emit(CrawlEvent::CollectReady {
            total_links: outcome.result.collections.len(),
            total_blocks: outcome.result.total_blocks,
            loaded_from_disk: outcome.loaded_from_disk,
        });
        Ok(())
    }

    async fn run_phases(&self) -> Result<RunStats> {
        let ctx = &self.ctx;

        // 1. 认证 (Authenticate)
        let auth = AuthManager::new(&ctx.site, &ctx.paths);
        auth.ensure_auth(
            &ctx.session,
            &ctx.primary_page,
            ctx.job.auth_handler.as_ref(),
        )
        .await?;

        // 2. 收集 (Collect)
        ctx.state.meta.begin(&ctx.site.start_url);
        let collector = LinkCollector::new(&ctx.site, &ctx.paths);
        let outcome = collector.collect(&ctx.primary_page).await?;
        let collect = outcome.result;

        ctx.state
            .meta
            .set_collections(collect.collections.clone(), collect.total_blocks);
        ctx.emit(CrawlEvent::CollectReady {
            total_links: collect.collections.len(),
            total_blocks: collect.total_blocks,
            loaded_from_disk: outcome.loaded_from_disk,
        });

        // 3. 并发执行 (Execute)
        let executor = Executor::new(ctx.clone());
        let stats = executor.run(&collect).await;

        // 4. 摘要 (Summarize)
        let is_complete = self.is_complete(&collect, &stats);
        if !is_complete {
            warn!("本次运行未完整覆盖工作集");
        }
        ctx.state.meta.finalize(
            ctx.blocks_done.load(Ordering::SeqCst) as u32,
            ctx.state.free.free_pages(),
            ctx.state.free.free_blocks(),
            ctx.state.mismatch.entries(),
            is_complete,
        );

        Ok(stats)
    }

    /// 完成度判定：无失败、无中止，且每条链接的页面键都已写入进度
    fn is_complete(&self, collect: &CollectResult, stats: &RunStats) -> bool {
        if stats.failed > 0 || stats.aborted > 0 {
            return false;
        }
        collect.collections.iter().all(|link| {
            let path = normalize_path(&link.link);
            self.ctx.state.progress.is_page_complete(&path)
                || self.ctx.state.free.is_free_page(&path)
        })
    }
}

/// 任务描述与站点声明的一致性校验
fn validate_job(site: &SiteConfig, job: &Job) -> Result<()> {
    let page_mode = job.page_handler.is_some() || site.page.is_some();
    let block_mode = site.block.is_some() || job.block_handler.is_some();

    if page_mode && job.page_handler.is_none() {
        return Err(CrawlError::Custom(
            "page mode requires a page handler".into(),
        ));
    }
    if !page_mode && !block_mode {
        return Err(CrawlError::Custom(
            "no processing mode: configure block/page or attach a handler".into(),
        ));
    }
    if block_mode && job.block_handler.is_none() {
        let has_declarative = site
            .block
            .as_ref()
            .is_some_and(|b| b.auto.is_some() || !b.conditional.is_empty());
        if !has_declarative {
            return Err(CrawlError::Custom(
                "block mode requires an auto config, conditional configs or a block handler"
                    .into(),
            ));
        }
    }
    if job.block_handler.is_some() && site.block.is_none() {
        return Err(CrawlError::Custom(
            "a block handler requires block.blocks locator in the site site".into(),
        ));
    }
    Ok(())
}
