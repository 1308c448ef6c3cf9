//! 声明式自动提取 (Auto File Extraction)
//!
//! 按变体 -> 文件标签 -> 代码区域的顺序走查区块，把每个标签页的
//! 代码文本写入输出树。标签文本即输出文件名；语法高亮器产出的
//! DOM 由 token-line 重建为纯文本。

use std::path::Path;
use std::sync::Arc;

use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

use crate::core::config::AutoExtractConfig;
use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::Locator;
use crate::state::FilenameMappingStore;
use crate::utils::{sanitize_rel_path, sanitize_segment};

/// 标签切换后的静置时长
const TAB_SETTLE_MS: u64 = 150;

/// 高亮器行容器的类名标记
const TOKEN_LINE_CLASS: &str = "token-line";

/// 自动提取器
pub struct AutoFileProcessor<'a> {
    config: &'a AutoExtractConfig,
    filenames: &'a FilenameMappingStore,
}

impl<'a> AutoFileProcessor<'a> {
    pub fn new(config: &'a AutoExtractConfig, filenames: &'a FilenameMappingStore) -> Self {
        Self {
            config,
            filenames,
        }
    }

    /// 处理单个区块，返回写出的文件数
    pub async fn process(
        &self,
        block: &Arc<dyn Locator>,
        block_path: &str,
        block_name: &str,
        out_root: &Path,
    ) -> Result<usize> {
        let block_dir = out_root.join(sanitize_segment(block_name));

        let variants = self.variant_labels(block).await?;
        let Some(variants) = variants else {
            // 无变体切换器：直接走一遍标签
            return self.walk_tabs(block, block_path, block_name, &block_dir).await;
        };

        let mut written = 0;
        for (index, label) in variants.iter().enumerate() {
            self.select_variant(block, index).await?;
            let variant_dir = block_dir.join(sanitize_segment(label));
            let variant_path = format!("{block_path}/{label}");
            written += self
                .walk_tabs(block, &variant_path, block_name, &variant_dir)
                .await?;
        }
        Ok(written)
    }

    /// 读取变体选项文本；无切换器返回 None
    async fn variant_labels(&self, block: &Arc<dyn Locator>) -> Result<Option<Vec<String>>> {
        let Some(switcher_sel) = &self.config.variant_switcher else {
            return Ok(None);
        };

        let switcher = block.locator(switcher_sel);
        if switcher.count().await? == 0 {
            return Ok(None);
        }

        switcher.click().await?;
        let mut labels = Vec::new();
        for option in block.locator(&self.config.variant_option).all().await? {
            if let Some(text) = option.text_content().await? {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    labels.push(text);
                }
            }
        }
        // 收起下拉，避免遮挡后续定位
        switcher.click().await?;

        debug!("变体选项: {:?}", labels);
        Ok((!labels.is_empty()).then_some(labels))
    }

    /// 切换到第 index 个变体
    async fn select_variant(&self, block: &Arc<dyn Locator>, index: usize) -> Result<()> {
        let switcher_sel = self.config.variant_switcher.as_deref().unwrap_or_default();
        block.locator(switcher_sel).click().await?;

        let options = block.locator(&self.config.variant_option).all().await?;
        let option = options.get(index).ok_or_else(|| {
            CrawlError::Custom(format!("variant option {index} disappeared"))
        })?;
        option.click().await
    }

    /// 走查文件标签并写盘
    async fn walk_tabs(
        &self,
        block: &Arc<dyn Locator>,
        block_path: &str,
        block_name: &str,
        out_dir: &Path,
    ) -> Result<usize> {
        let Some(container_sel) = &self.config.tab_container else {
            // 单文件区块
            let code = self.extract_code(block).await?;
            let filename = self
                .filenames
                .resolve(block_path, &format!("{block_name}.tsx"));
            write_artifact(&out_dir.join(&filename), &code).await?;
            return Ok(1);
        };

        let container = block.locator(container_sel);
        let mut tabs = container.locator("[role='tab']").all().await?;
        if tabs.is_empty() {
            tabs = container.locator("button").all().await?;
        }

        if tabs.is_empty() {
            warn!("标签容器中未找到文件标签: {}", container_sel);
            return Ok(0);
        }

        let mut written = 0;
        for tab in &tabs {
            let label = tab.text_content().await?.unwrap_or_default();
            let label = label.trim();
            if label.is_empty() {
                continue;
            }

            tab.click().await?;
            tokio::time::sleep(std::time::Duration::from_millis(TAB_SETTLE_MS)).await;

            let code = self.extract_code(block).await?;
            let requested = tab_filename(label);
            let actual = self.filenames.resolve(block_path, &requested);
            write_artifact(&out_dir.join(&actual), &code).await?;
            written += 1;
        }
        Ok(written)
    }

    /// 从代码区域提取文本，最后一个 pre 胜出
    async fn extract_code(&self, block: &Arc<dyn Locator>) -> Result<String> {
        let region = block.locator(&self.config.code_region);
        let mut pres = region.locator("pre").all().await?;
        if pres.is_empty() {
            // 代码区域自身可能就是 pre
            pres = region.all().await?;
        }

        let Some(pre) = pres.last() else {
            return Err(CrawlError::Custom(format!(
                "no code element inside {}",
                self.config.code_region
            )));
        };

        let html = pre.inner_html().await?;
        if html.contains(TOKEN_LINE_CLASS)
            && let Some(code) = reconstruct_highlighted(&html)
        {
            return Ok(code);
        }

        Ok(pre.text_content().await?.unwrap_or_default())
    }
}

/// 写出单个代码文件，目录按需建立
///
/// 路径并发上按区块分片，不存在同名竞争；失败时报出具体文件。
async fn write_artifact(path: &Path, code: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CrawlError::Custom(format!("mkdir {}: {e}", parent.display())))?;
    }
    tokio::fs::write(path, code.as_bytes())
        .await
        .map_err(|e| CrawlError::Custom(format!("write {}: {e}", path.display())))?;
    debug!("写出 {}", path.display());
    Ok(())
}

/// 标签文本到输出文件名
///
/// 路径形标签原样保留；语言名标签映射为 index.<扩展名>。
pub(crate) fn tab_filename(label: &str) -> String {
    let label = label.trim();
    if label.contains('/') || label.contains('.') {
        return sanitize_rel_path(label);
    }

    match label.to_ascii_lowercase().as_str() {
        "typescript" | "tsx" | "ts" => "index.tsx".to_string(),
        "javascript" | "jsx" | "js" => "index.jsx".to_string(),
        "vue" => "index.vue".to_string(),
        "svelte" => "index.svelte".to_string(),
        "html" => "index.html".to_string(),
        "css" => "index.css".to_string(),
        _ => "index.tsx".to_string(),
    }
}

/// 由高亮器 DOM 重建代码文本
///
/// 逐 token-line 收集文本，剔除复制按钮与省略装饰节点。
pub(crate) fn reconstruct_highlighted(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let line_sel = Selector::parse(&format!(".{TOKEN_LINE_CLASS}")).ok()?;

    let lines: Vec<String> = fragment
        .select(&line_sel)
        .map(|line| {
            let mut text = String::new();
            collect_code_text(line, &mut text);
            text
        })
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn collect_code_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let class = element.attr("class").unwrap_or_default();
                if class.contains("copy") || class.contains("ellipsis") {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_code_text(child_ref, out);
                }
            }
            _ => {}
        }
    }
}
