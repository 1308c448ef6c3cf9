//! 区块级处理 (Block Processing)
//!
//! 对页面内每个区块执行定位、命名、跳过判定、提取与完成核验，
//! 维护进度不变式：页面键仅在其下全部区块处理完后写入。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::config::{BlockConfig, ConditionalConfig, RuntimeConfig};
use crate::core::error::{CrawlError, Result};
use crate::core::event::{CrawlEvent, EventSender};
use crate::interfaces::driver::{Locator, Page};
use crate::interfaces::handler::{BlockContext, BlockHandler, BlockNameResolver, FreeProbe};
use crate::process::auto::AutoFileProcessor;
use crate::process::free::FreeChecker;
use crate::process::name::BlockNameExtractor;
use crate::state::StateSet;
use crate::utils::sanitize_segment;

/// 条件配置可见性探测窗口
const CONDITIONAL_PROBE: Duration = Duration::from_millis(100);

/// 单页处理报告
#[derive(Debug, Default, Clone, Copy)]
pub struct PageReport {
    /// 本次实际提取的区块数
    pub done: usize,
    /// 进度记录命中而跳过的区块数
    pub skipped: usize,
    /// 免费标记命中的区块数
    pub free: usize,
}

/// 单页处理结果
#[derive(Debug)]
pub enum PageOutcome {
    /// 全部区块处理完，页面已标记完成
    Completed(PageReport),
    /// 计数不一致且未忽略，整页跳过
    MismatchSkipped { expected: u32, actual: u32 },
}

enum BlockOutcome {
    Done,
    Skipped,
    Free,
    /// 渐进模式下按名去重命中
    Duplicate,
    NameFailed,
}

/// 区块处理器（每个链接任务一个实例）
pub struct BlockProcessor<'a> {
    runtime: &'a RuntimeConfig,
    config: &'a BlockConfig,
    state: &'a StateSet,
    events: Option<&'a EventSender>,
    handler: Option<&'a Arc<dyn BlockHandler>>,
    extractor: BlockNameExtractor<'a>,
    free: FreeChecker,
    debug: bool,
    /// 日志前缀（链接路径去掉配置前缀）
    prefix: &'a str,
}

impl<'a> BlockProcessor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: &'a RuntimeConfig,
        config: &'a BlockConfig,
        state: &'a StateSet,
        events: Option<&'a EventSender>,
        handler: Option<&'a Arc<dyn BlockHandler>>,
        name_resolver: Option<&'a Arc<dyn BlockNameResolver>>,
        free_probe: Option<Arc<dyn FreeProbe>>,
        debug: bool,
        prefix: &'a str,
    ) -> Self {
        Self {
            runtime,
            config,
            state,
            events,
            handler,
            extractor: BlockNameExtractor::new(config, name_resolver),
            free: FreeChecker::new(config.skip_free.as_ref(), free_probe),
            debug,
            prefix,
        }
    }

    /// 页面入口
    pub async fn run(
        &self,
        page: &Arc<dyn Page>,
        expected: Option<u32>,
        page_path: &str,
        page_dir: &Path,
    ) -> Result<PageOutcome> {
        if self.config.progressive {
            self.run_progressive(page, page_path, page_dir).await
        } else {
            self.run_traditional(page, expected, page_path, page_dir).await
        }
    }

    /// 传统模式：一次定位得到全部区块
    async fn run_traditional(
        &self,
        page: &Arc<dyn Page>,
        expected: Option<u32>,
        page_path: &str,
        page_dir: &Path,
    ) -> Result<PageOutcome> {
        let blocks = page.locator(&self.config.blocks).all().await?;

        // 零区块：页面无事可做，直接记完成
        if blocks.is_empty() {
            info!("[{}] 页面无区块，标记完成", self.prefix);
            self.state.progress.mark_page_complete(page_path);
            return Ok(PageOutcome::Completed(PageReport::default()));
        }

        if let Some(expected) = expected
            && expected != blocks.len() as u32
        {
            warn!(
                "[{}] 区块计数不一致: 期望 {} 实际 {}",
                self.prefix,
                expected,
                blocks.len()
            );
            self.state.mismatch.record(page_path, expected, blocks.len() as u32);
            self.emit(CrawlEvent::MismatchRecorded {
                path: page_path.to_string(),
                expected,
                actual: blocks.len() as u32,
            });

            if !self.runtime.ignore_mismatch {
                return Ok(PageOutcome::MismatchSkipped {
                    expected,
                    actual: blocks.len() as u32,
                });
            }
        }

        let mut report = PageReport::default();
        let mut failures = 0usize;

        for (index, block) in blocks.iter().enumerate() {
            self.account(
                self.process_block(page, block, page_path, page_dir, index, None)
                    .await?,
                &mut report,
                &mut failures,
            );
        }

        self.verify_completion(page, &report, failures, blocks.len())
            .await?;
        self.finish_page(page_path, report, failures)
    }

    /// 渐进模式：反复重查定位器，处理新出现的切片
    async fn run_progressive(
        &self,
        page: &Arc<dyn Page>,
        page_path: &str,
        page_dir: &Path,
    ) -> Result<PageOutcome> {
        let mut report = PageReport::default();
        let mut failures = 0usize;
        let mut seen: HashSet<String> = HashSet::new();
        let mut examined = 0usize;

        loop {
            let blocks = page.locator(&self.config.blocks).all().await?;
            if blocks.len() <= examined {
                break;
            }
            debug!(
                "[{}] 渐进批次: {} 个新区块",
                self.prefix,
                blocks.len() - examined
            );

            for (offset, block) in blocks[examined..].iter().enumerate() {
                self.account(
                    self.process_block(
                        page,
                        block,
                        page_path,
                        page_dir,
                        examined + offset,
                        Some(&mut seen),
                    )
                    .await?,
                    &mut report,
                    &mut failures,
                );
            }
            examined = blocks.len();
        }

        if examined == 0 {
            info!("[{}] 页面无区块，标记完成", self.prefix);
            self.state.progress.mark_page_complete(page_path);
            return Ok(PageOutcome::Completed(PageReport::default()));
        }

        self.verify_completion(page, &report, failures, examined).await?;
        self.finish_page(page_path, report, failures)
    }

    fn account(&self, outcome: BlockOutcome, report: &mut PageReport, failures: &mut usize) {
        match outcome {
            BlockOutcome::Done => report.done += 1,
            BlockOutcome::Skipped => report.skipped += 1,
            BlockOutcome::Free => report.free += 1,
            BlockOutcome::Duplicate => {}
            BlockOutcome::NameFailed => *failures += 1,
        }
    }

    /// 单区块协议
    async fn process_block(
        &self,
        page: &Arc<dyn Page>,
        block: &Arc<dyn Locator>,
        page_path: &str,
        page_dir: &Path,
        index: usize,
        mut seen: Option<&mut HashSet<String>>,
    ) -> Result<BlockOutcome> {
        // 1. 滚动到视口顶部（懒加载页面靠这一步触发追加）
        if let Err(e) = block.scroll_into_view().await {
            debug!("[{}] 区块滚动失败: {}", self.prefix, e);
        }

        // 2. 条件配置按序探测
        let matched = self.match_conditional(block).await?;
        if !self.config.conditional.is_empty() && matched.is_none() {
            return self.handle_unmatched(block, page_path, index).await;
        }

        let skip_pre_checks = matched.is_some_and(|c| c.skip_pre_checks);

        // 3. 预检
        let name = if skip_pre_checks {
            match self.extractor.extract(block, page_path).await {
                Ok(Some(name)) => name,
                _ => format!("block-{index}"),
            }
        } else {
            let Some(name) = self.extract_name(page, block, page_path).await? else {
                return Ok(BlockOutcome::NameFailed);
            };

            if let Some(seen) = seen.as_deref_mut() {
                if !seen.insert(name.clone()) {
                    return Ok(BlockOutcome::Duplicate);
                }
            }

            let block_path = format!("{page_path}/{name}");
            if self.state.progress.is_block_complete(&block_path) {
                debug!("[{}] 区块已完成，跳过: {}", self.prefix, name);
                return Ok(BlockOutcome::Skipped);
            }

            if self.free.is_active() && self.free.check_block(block).await? {
                info!("[{}] 区块免费，跳过: {}", self.prefix, name);
                self.state.free.add_block(page_path, &name);
                self.emit(CrawlEvent::FreeDetected {
                    path: page_path.to_string(),
                    block: Some(name.clone()),
                });
                return Ok(BlockOutcome::Free);
            }
            name
        };

        // 4. 分发处理器
        let block_path = format!("{page_path}/{name}");
        let out_dir = self.block_out_dir(page_dir, &name);
        self.dispatch(page, block, matched, &block_path, &name, page_dir, &out_dir)
            .await?;

        // 5. 记录进度
        self.state.progress.mark_block_complete(&block_path);
        self.emit(CrawlEvent::BlockCompleted {
            block_path: block_path.clone(),
        });
        info!("[{}] 区块完成: {}", self.prefix, name);
        Ok(BlockOutcome::Done)
    }

    /// 预检步骤 a：命名及其失败处置
    async fn extract_name(
        &self,
        page: &Arc<dyn Page>,
        block: &Arc<dyn Locator>,
        page_path: &str,
    ) -> Result<Option<String>> {
        match self.extractor.extract(block, page_path).await? {
            Some(name) => Ok(Some(name)),
            None => {
                error!("[{}] 区块命名失败，计为失败", self.prefix);
                if self.debug {
                    page.pause().await;
                }
                Ok(None)
            }
        }
    }

    async fn match_conditional(
        &self,
        block: &Arc<dyn Locator>,
    ) -> Result<Option<&'a ConditionalConfig>> {
        for cond in &self.config.conditional {
            if block
                .locator(&cond.when)
                .is_visible(CONDITIONAL_PROBE)
                .await?
            {
                return Ok(Some(cond));
            }
        }
        Ok(None)
    }

    /// 条件集无一命中：告警并记名放行，不视为崩溃
    async fn handle_unmatched(
        &self,
        block: &Arc<dyn Locator>,
        page_path: &str,
        index: usize,
    ) -> Result<BlockOutcome> {
        let name = match self.extractor.extract(block, page_path).await {
            Ok(Some(name)) => name,
            _ => format!("block-{index}"),
        };
        warn!("[{}] 条件配置无一命中，记录后跳过: {}", self.prefix, name);
        self.state
            .progress
            .mark_block_complete(&format!("{page_path}/{name}"));
        Ok(BlockOutcome::Done)
    }

    /// 处理器分发：用户处理器 > 条件配置 > 声明式自动提取
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        page: &Arc<dyn Page>,
        block: &Arc<dyn Locator>,
        matched: Option<&ConditionalConfig>,
        block_path: &str,
        name: &str,
        page_dir: &Path,
        out_dir: &Path,
    ) -> Result<()> {
        let result = if let Some(handler) = self.handler {
            let ctx = BlockContext {
                page,
                block,
                block_name: name,
                page_path: block_path.rsplit_once('/').map(|(p, _)| p).unwrap_or(""),
                out_dir,
            };
            handler.handle(ctx).await
        } else if let Some(cond) = matched {
            block.locator(&cond.when).click().await?;
            AutoFileProcessor::new(&cond.auto, &self.state.filenames)
                .process(block, block_path, name, page_dir)
                .await
                .map(|_| ())
        } else if let Some(auto) = &self.config.auto {
            AutoFileProcessor::new(auto, &self.state.filenames)
                .process(block, block_path, name, page_dir)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };

        if let Err(e) = result {
            if e.is_user_abort() {
                return Err(e);
            }
            error!("[{}] 区块处理器失败 ({}): {}", self.prefix, name, e);
            if self.runtime.pause_on_error && self.debug {
                page.pause().await;
            }
            return Err(CrawlError::Handler(e.to_string()));
        }
        Ok(())
    }

    /// 处理后复核区块计数
    async fn verify_completion(
        &self,
        page: &Arc<dyn Page>,
        report: &PageReport,
        failures: usize,
        located: usize,
    ) -> Result<()> {
        if !self.config.verify_completion {
            return Ok(());
        }

        let recount = page.locator(&self.config.blocks).count().await?;
        let handled = report.done + report.skipped + report.free + failures;
        if recount != handled && recount != located {
            warn!(
                "[{}] 完成核验不通过: 复查 {} 已处理 {}",
                self.prefix, recount, handled
            );
            if self.debug {
                page.pause().await;
            }
        }
        Ok(())
    }

    fn finish_page(
        &self,
        page_path: &str,
        report: PageReport,
        failures: usize,
    ) -> Result<PageOutcome> {
        if failures > 0 {
            return Err(CrawlError::Custom(format!(
                "{failures} blocks failed on {page_path}"
            )));
        }
        self.state.progress.mark_page_complete(page_path);
        Ok(PageOutcome::Completed(report))
    }

    fn block_out_dir(&self, page_dir: &Path, name: &str) -> PathBuf {
        page_dir.join(sanitize_segment(name))
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(events) = self.events {
            events.emit(event);
        }
    }
}
