//! 免费判定 (Free Detection)
//!
//! 两种形式：函数式（用户探针）与文本匹配式。文本匹配在区块内
//! 按标题结构选定搜索区域并缓存策略；命中数必须恰为 1。

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::{Locator, Page};
use crate::interfaces::handler::FreeProbe;

/// 文本匹配形式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreeMatcher {
    /// 内置 /free/i 模式
    Default,
    /// 精确文本
    Literal(String),
}

impl FreeMatcher {
    /// 由配置字符串构造；"default" 走内置模式
    pub fn from_config(raw: &str) -> Self {
        if raw == "default" {
            FreeMatcher::Default
        } else {
            FreeMatcher::Literal(raw.to_string())
        }
    }

    /// 生成页面内 RegExp 字面量
    fn regex_literal(&self) -> String {
        match self {
            FreeMatcher::Default => "/free/gi".to_string(),
            FreeMatcher::Literal(text) => format!("new RegExp({}, 'g')", js_string(&escape_regex(text))),
        }
    }

    fn describe(&self) -> String {
        match self {
            FreeMatcher::Default => "/free/i".to_string(),
            FreeMatcher::Literal(text) => text.clone(),
        }
    }
}

/// 搜索区域策略，按页面缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Heading,
    Grandparent,
    Parent,
    Block,
}

impl SearchStrategy {
    fn as_js(&self) -> &'static str {
        match self {
            SearchStrategy::Heading => "'heading'",
            SearchStrategy::Grandparent => "'grandparent'",
            SearchStrategy::Parent => "'parent'",
            SearchStrategy::Block => "'block'",
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockProbeResult {
    strategy: SearchStrategy,
    hits: usize,
}

/// 区块级免费检查器（每个页面上下文一个实例）
pub struct FreeChecker {
    matcher: Option<FreeMatcher>,
    probe: Option<Arc<dyn FreeProbe>>,
    strategy: Mutex<Option<SearchStrategy>>,
}

impl FreeChecker {
    pub fn new(config: Option<&String>, probe: Option<Arc<dyn FreeProbe>>) -> Self {
        Self {
            matcher: config.map(|raw| FreeMatcher::from_config(raw)),
            probe,
            strategy: Mutex::new(None),
        }
    }

    /// 是否配置了任何判定形式
    pub fn is_active(&self) -> bool {
        self.matcher.is_some() || self.probe.is_some()
    }

    /// 区块级判定
    pub async fn check_block(&self, block: &Arc<dyn Locator>) -> Result<bool> {
        if let Some(probe) = &self.probe {
            return probe.probe(block).await;
        }
        let Some(matcher) = &self.matcher else {
            return Ok(false);
        };

        let cached = *self.strategy.lock();
        let js = block_probe_js(matcher, cached);
        let value = block.evaluate(&js).await?;
        let result: BlockProbeResult = serde_json::from_value(value)?;

        if cached.is_none() {
            debug!("免费搜索区域策略: {:?}", result.strategy);
            *self.strategy.lock() = Some(result.strategy);
        }

        match result.hits {
            0 => Ok(false),
            1 => Ok(true),
            hits => Err(CrawlError::FreeAmbiguous {
                pattern: matcher.describe(),
                hits,
            }),
        }
    }
}

/// 页面级判定：整页文本计数，规则与区块级一致
pub async fn check_page_free(
    page: &Arc<dyn Page>,
    config: Option<&String>,
    probe: Option<&Arc<dyn FreeProbe>>,
) -> Result<bool> {
    if let Some(probe) = probe {
        return probe.probe(&page.locator("body")).await;
    }
    let Some(raw) = config else {
        return Ok(false);
    };
    let matcher = FreeMatcher::from_config(raw);

    let js = page_probe_js(&matcher);
    let value = page.evaluate(&js).await?;
    let hits = value.as_u64().unwrap_or(0) as usize;

    match hits {
        0 => Ok(false),
        1 => Ok(true),
        hits => Err(CrawlError::FreeAmbiguous {
            pattern: matcher.describe(),
            hits,
        }),
    }
}

/// 区块探测脚本（元素作用域）
///
/// 搜索区域：(i) 标题有多个元素子节点时在标题内搜索；(ii) 标题是
/// 父节点唯一子节点时在祖父节点搜索；(iii) 否则在父节点搜索；
/// 无标题时搜索整个区块。
fn block_probe_js(matcher: &FreeMatcher, cached: Option<SearchStrategy>) -> String {
    let strategy = cached.map(|s| s.as_js()).unwrap_or("null");
    format!(
        r#"function(el) {{
  const given = {strategy};
  const heading = el.querySelector('h1,h2,h3,h4,h5,h6');
  let strategy = given;
  if (!strategy) {{
    if (!heading) strategy = 'block';
    else if (heading.children.length > 1) strategy = 'heading';
    else if (heading.parentElement && heading.parentElement.children.length === 1) strategy = 'grandparent';
    else strategy = 'parent';
  }}
  let region = el;
  if (strategy === 'heading' && heading) region = heading;
  else if (strategy === 'parent' && heading && heading.parentElement) region = heading.parentElement;
  else if (strategy === 'grandparent' && heading && heading.parentElement && heading.parentElement.parentElement) region = heading.parentElement.parentElement;
  const text = region.textContent || '';
  const matches = text.match({pattern});
  return {{ strategy: strategy, hits: matches ? matches.length : 0 }};
}}"#,
        strategy = strategy,
        pattern = matcher.regex_literal(),
    )
}

/// 页面探测脚本（IIFE）
fn page_probe_js(matcher: &FreeMatcher) -> String {
    format!(
        r#"(() => {{
  const body = document.body;
  const text = body ? (body.innerText || body.textContent || '') : '';
  const matches = text.match({pattern});
  return matches ? matches.length : 0;
}})()"#,
        pattern = matcher.regex_literal(),
    )
}

/// JS 字符串字面量
fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// 正则元字符转义
fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if "\\^$.|?*+()[]{}".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
