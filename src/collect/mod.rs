//! 链接收集 (Link Collection)
//!
//! 访问起始页，抽取 section -> 链接元组（路径、显示名、期望区块数），
//! 原子落盘为 collect.json。文件已存在时整体跳过，构成收集阶段的
//! 幂等轴。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::config::SiteConfig;
use crate::core::error::Result;
use crate::core::model::{CollectResult, CollectionLink, SitePaths};
use crate::interfaces::driver::{Locator, Page};
use crate::state::store;
use crate::utils::{first_text_fragment, sum_digit_runs};

/// 点击标签后的面板静置时长
const TAB_SETTLE_MS: u64 = 500;

/// 链接首个非空文本节点探测（元素作用域）
pub(crate) const FIRST_TEXT_NODE_JS: &str = r#"function(el) {
  const walk = (node) => {
    for (const child of node.childNodes) {
      if (child.nodeType === Node.TEXT_NODE) {
        const text = child.textContent.trim();
        if (text) return text;
      }
      const nested = walk(child);
      if (nested) return nested;
    }
    return null;
  };
  return walk(el);
}"#;

/// 链接收集器
pub struct LinkCollector<'a> {
    site: &'a SiteConfig,
    paths: &'a SitePaths,
}

/// 收集产物与其来源
pub struct CollectOutcome {
    pub result: CollectResult,
    /// true 表示直接加载了既有 collect.json
    pub loaded_from_disk: bool,
}

impl<'a> LinkCollector<'a> {
    pub fn new(site: &'a SiteConfig, paths: &'a SitePaths) -> Self {
        Self { site, paths }
    }

    /// 收集入口：加载既有工作集或现场抽取
    pub async fn collect(&self, page: &Arc<dyn Page>) -> Result<CollectOutcome> {
        let collect_file = self.paths.collect_file();
        if let Some(existing) = store::load_json::<CollectResult>(&collect_file).await? {
            info!(
                "collect.json 已存在，跳过收集 ({} links / {} blocks)",
                existing.total_links, existing.total_blocks
            );
            return Ok(CollectOutcome {
                result: existing,
                loaded_from_disk: true,
            });
        }

        page.goto(
            &self.site.start_url,
            self.site.collect_wait(),
            Duration::from_millis(self.site.collect_timeout_ms()),
        )
        .await?;

        let collections = if let Some(tab_list) = &self.site.collect.tab_list {
            self.collect_click_through(page, tab_list).await?
        } else {
            // 校验保证此分支 sections 必然存在
            let sections = self.site.collect.sections.as_deref().unwrap_or_default();
            self.collect_static(page, sections).await?
        };

        let result = CollectResult::new(collections);
        info!(
            "收集完成: {} links / {} blocks",
            result.total_links, result.total_blocks
        );
        store::save_json(&collect_file, &result).await?;

        Ok(CollectOutcome {
            result,
            loaded_from_disk: false,
        })
    }

    /// 静态模式：初始 DOM 中直接定位全部 section
    async fn collect_static(
        &self,
        page: &Arc<dyn Page>,
        sections_sel: &str,
    ) -> Result<Vec<CollectionLink>> {
        let sections = page.locator(sections_sel).all().await?;
        debug!("定位到 {} 个 section", sections.len());

        let mut collections = Vec::new();
        for section in &sections {
            collections.extend(self.links_in(section).await?);
        }
        Ok(collections)
    }

    /// 点击模式：逐个点开 tablist 标签，每个面板视为一个 section
    async fn collect_click_through(
        &self,
        page: &Arc<dyn Page>,
        tab_list: &str,
    ) -> Result<Vec<CollectionLink>> {
        let tabs = page.locator(tab_list).all().await?;
        debug!("定位到 {} 个标签", tabs.len());

        let mut collections = Vec::new();
        for tab in &tabs {
            tab.click().await?;
            page.wait_timeout(TAB_SETTLE_MS).await;

            let panel = page.locator(&self.site.collect.panel);
            collections.extend(self.links_in(&panel).await?);
        }
        Ok(collections)
    }

    /// 抽取单个 section 内的全部链接
    async fn links_in(&self, section: &Arc<dyn Locator>) -> Result<Vec<CollectionLink>> {
        let mut out = Vec::new();

        for link in section.locator(&self.site.collect.link).all().await? {
            // href 缺失的链接静默丢弃
            let Some(href) = link.get_attribute("href").await? else {
                warn!("丢弃无 href 的链接");
                continue;
            };

            let name = self.link_name(&link).await;
            let block_count = self.block_count(&link).await;

            out.push(CollectionLink {
                link: href,
                name,
                block_count,
            });
        }
        Ok(out)
    }

    /// 显示名：配置定位器优先，缺省取首个非空文本节点
    async fn link_name(&self, link: &Arc<dyn Locator>) -> Option<String> {
        if let Some(sel) = &self.site.collect.name {
            return match link.locator(sel).text_content().await {
                Ok(Some(text)) => first_text_fragment(&text),
                _ => None,
            };
        }

        if let Ok(value) = link.evaluate(FIRST_TEXT_NODE_JS).await
            && let Some(text) = value.as_str()
        {
            return Some(text.to_string());
        }
        link.text_content()
            .await
            .ok()
            .flatten()
            .and_then(|t| first_text_fragment(&t))
    }

    /// 期望区块数：对计数文本求数字段之和
    async fn block_count(&self, link: &Arc<dyn Locator>) -> Option<u32> {
        let sel = self.site.collect.count.as_ref()?;
        match link.locator(sel).text_content().await {
            Ok(Some(text)) => sum_digit_runs(&text),
            _ => None,
        }
    }
}
