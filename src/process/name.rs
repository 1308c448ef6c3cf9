//! 区块命名 (Block Name Extraction)
//!
//! 决议顺序：自定义命名器 > 配置的名称定位器 > 标题探测。
//! 空结果按 200ms 间隔重试，最多三次。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::config::BlockConfig;
use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::Locator;
use crate::interfaces::handler::BlockNameResolver;

const NAME_ATTEMPTS: u32 = 3;
const NAME_RETRY_DELAY: Duration = Duration::from_millis(200);

/// 标题探测（元素作用域）
///
/// 首个 h1..h6：多个元素子节点时取首个 a 的文本，否则取标题自身文本；
/// 复杂标题无链接视为结构不支持。
pub(crate) const HEADING_PROBE_JS: &str = r#"function(el) {
  const heading = el.querySelector('h1,h2,h3,h4,h5,h6');
  if (!heading) {
    return { kind: 'none' };
  }
  if (heading.children.length > 1) {
    const link = heading.querySelector('a');
    if (!link) {
      return { kind: 'complex' };
    }
    return { kind: 'ok', name: (link.textContent || '').trim() };
  }
  return { kind: 'ok', name: (heading.textContent || '').trim() };
}"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum HeadingProbe {
    Ok {
        #[serde(default)]
        name: String,
    },
    Complex,
    None,
}

/// 区块命名器
pub struct BlockNameExtractor<'a> {
    config: &'a BlockConfig,
    resolver: Option<&'a Arc<dyn BlockNameResolver>>,
}

impl<'a> BlockNameExtractor<'a> {
    pub fn new(config: &'a BlockConfig, resolver: Option<&'a Arc<dyn BlockNameResolver>>) -> Self {
        Self { config, resolver }
    }

    /// 提取区块名
    ///
    /// Ok(None) 表示重试耗尽仍为空；复杂标题无链接返回 ComplexHeading。
    pub async fn extract(&self, block: &Arc<dyn Locator>, page_path: &str) -> Result<Option<String>> {
        for attempt in 1..=NAME_ATTEMPTS {
            match self.extract_once(block, page_path).await? {
                Some(name) if !name.is_empty() => return Ok(Some(name)),
                _ => {
                    debug!("区块名为空 (第 {}/{} 次)", attempt, NAME_ATTEMPTS);
                    if attempt < NAME_ATTEMPTS {
                        tokio::time::sleep(NAME_RETRY_DELAY).await;
                    }
                }
            }
        }

        warn!("区块名提取失败，转储区块 HTML 以供排查");
        if let Ok(html) = block.inner_html().await {
            debug!("区块 HTML: {}", html);
        }
        Ok(None)
    }

    async fn extract_once(&self, block: &Arc<dyn Locator>, page_path: &str) -> Result<Option<String>> {
        // 1. 自定义命名器
        if let Some(resolver) = self.resolver {
            return resolver.resolve(block).await.map(|n| n.map(|s| s.trim().to_string()));
        }

        // 2. 配置的名称定位器（未命中按空名处理，走重试）
        if let Some(sel) = &self.config.name {
            let text = block.locator(sel).text_content().await.ok().flatten();
            return Ok(text.and_then(|t| crate::utils::first_text_fragment(&t)));
        }

        // 3. 标题探测
        let value = block.evaluate(HEADING_PROBE_JS).await?;
        let probe: HeadingProbe = serde_json::from_value(value)?;
        match probe {
            HeadingProbe::Ok { name } if !name.is_empty() => Ok(Some(name)),
            HeadingProbe::Ok { .. } | HeadingProbe::None => Ok(None),
            HeadingProbe::Complex => Err(CrawlError::ComplexHeading(page_path.to_string())),
        }
    }
}
