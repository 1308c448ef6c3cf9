//! 配置管理系统 (Configuration Management)
//!
//! 负责 `blockmirror.toml` 的反序列化及其层级结构映射，支持默认值回退机制，
//! 并在启动时完成声明式站点配置的合法性校验。

use std::collections::HashMap;
use std::path::Path;

use bon::Builder;
use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::WaitUntil;

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct AppConfig {
    /// 运行时通用参数
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// 自动化浏览器 (Chromium) 相关配置
    #[serde(default)]
    pub browser: BrowserOptions,

    /// 站点声明映射（键为站点标识符）
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

/// 浏览器引擎配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BrowserOptions {
    /// 是否以无头模式 (Headless) 运行
    #[serde(default = "default_true")]
    pub headless: bool,
    /// 自定义可执行文件路径
    #[serde(default)]
    pub chrome_path: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
        }
    }
}

/// 运行时参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct RuntimeConfig {
    /// 输出目录基准路径
    #[serde(default = "default_output_base")]
    pub output_base_dir: String,

    /// 状态目录基准路径
    #[serde(default = "default_state_base")]
    pub state_base_dir: String,

    /// 站点语言偏好（注入 Accept-Language 场景使用）
    #[serde(default = "default_locale")]
    pub locale: String,

    /// 全局任务并行度上限
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// 处理器出错时是否在调试模式下暂停页面
    #[serde(default = "default_true")]
    pub pause_on_error: bool,

    /// 区块数不一致时是否继续处理该页
    #[serde(default)]
    pub ignore_mismatch: bool,

    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,

    /// 进度持久化配置
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_base_dir: default_output_base(),
            state_base_dir: default_state_base(),
            locale: default_locale(),
            max_concurrency: default_concurrency(),
            pause_on_error: true,
            ignore_mismatch: false,
            log_level: LogLevel::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// 日志级别
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    Silent,
}

impl LogLevel {
    /// 映射为 tracing 的默认过滤表达式
    pub fn env_filter(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Silent => "off",
        }
    }
}

/// 进度持久化配置
#[derive(Debug, Deserialize, Builder, Clone, Copy, Default)]
pub struct ProgressConfig {
    /// 是否写入 progress.json（读取侧始终生效，见 DESIGN.md）
    #[serde(default)]
    pub enable: bool,

    /// 忽略既有进度并在首次保存时覆盖
    #[serde(default)]
    pub rebuild: bool,
}

/// 站点声明 (Site Specification)
///
/// 引擎消费的完全解析后的配置记录；流式构建 API 只是它的生产者之一。
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct SiteConfig {
    /// 起始 URL（列表页网格所在）
    pub start_url: String,

    /// 日志前缀中要剥离的链接路径前缀
    #[serde(default)]
    pub base_prefix: Option<String>,

    /// 页面打开等待条件
    #[serde(default)]
    pub wait_until: WaitUntil,

    /// 导航超时（毫秒）
    #[serde(default = "default_nav_timeout")]
    pub navigation_timeout_ms: u64,

    /// 链接收集声明
    pub collect: CollectConfig,

    /// 认证声明（缺省表示站点无需登录）
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// 注入脚本清单
    #[serde(default)]
    pub scripts: Vec<ScriptEntry>,

    /// 懒加载页面的自动滚动参数
    #[serde(default)]
    pub auto_scroll: Option<AutoScrollConfig>,

    /// 页面级免费标记（"default" 或字面量文本）
    #[serde(default)]
    pub skip_free: Option<String>,

    /// 每个链接任务使用独立浏览器上下文
    #[serde(default)]
    pub use_independent_context: bool,

    /// 预置存储状态文件路径（提供时也会启用独立上下文）
    #[serde(default)]
    pub storage_state: Option<String>,

    /// 区块模式声明
    #[serde(default)]
    pub block: Option<BlockConfig>,

    /// 页面模式声明
    #[serde(default)]
    pub page: Option<PageConfig>,
}

/// 链接收集声明
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct CollectConfig {
    /// 静态模式：直接在初始 DOM 中定位全部 section
    #[serde(default)]
    pub sections: Option<String>,

    /// 点击模式：tablist 中的标签定位器
    #[serde(default)]
    pub tab_list: Option<String>,

    /// 点击模式下面板（section）的定位器
    #[serde(default = "default_panel")]
    pub panel: String,

    /// section 内链接的定位器
    #[serde(default = "default_link")]
    pub link: String,

    /// 链接显示名定位器（缺省取链接的首个非空文本节点）
    #[serde(default)]
    pub name: Option<String>,

    /// 期望区块数定位器（缺省对计数文本求数字段之和）
    #[serde(default)]
    pub count: Option<String>,

    /// 收集阶段专用的等待条件与超时
    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 认证声明
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AuthConfig {
    /// 登录页 URL
    pub login_url: String,

    /// 跳转确认：仍匹配该片段视为停留在登录流程
    #[serde(default = "default_login_guard")]
    pub login_guard: String,

    /// 跳转确认超时（毫秒）
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,
}

/// 注入脚本条目
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ScriptEntry {
    /// scripts/ 目录下的文件名
    pub file: String,

    /// 显式注入时机，优先于脚本头的 @run-at
    #[serde(default)]
    pub timing: Option<ScriptTiming>,
}

/// 脚本注入时机
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScriptTiming {
    BeforePageLoad,
    AfterPageLoad,
}

/// 自动滚动参数
#[derive(Debug, Deserialize, Builder, Clone, Copy)]
pub struct AutoScrollConfig {
    #[serde(default = "default_scroll_step")]
    pub step_px: f64,
    #[serde(default = "default_scroll_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_scroll_timeout")]
    pub timeout_ms: u64,
}

impl Default for AutoScrollConfig {
    fn default() -> Self {
        Self {
            step_px: default_scroll_step(),
            interval_ms: default_scroll_interval(),
            timeout_ms: default_scroll_timeout(),
        }
    }
}

/// 区块模式声明
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BlockConfig {
    /// 页面内区块的定位器
    pub blocks: String,

    /// 区块名称定位器（缺省走标题探测策略）
    #[serde(default)]
    pub name: Option<String>,

    /// 区块级免费标记（"default" 或字面量文本）
    #[serde(default)]
    pub skip_free: Option<String>,

    /// 渐进模式：反复重查定位器直到无新区块出现
    #[serde(default)]
    pub progressive: bool,

    /// 处理完成后复核区块计数
    #[serde(default = "default_true")]
    pub verify_completion: bool,

    /// 声明式自动提取配置
    #[serde(default)]
    pub auto: Option<AutoExtractConfig>,

    /// 条件分支配置（按序探测 when 定位器）
    #[serde(default)]
    pub conditional: Vec<ConditionalConfig>,
}

/// 自动提取配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AutoExtractConfig {
    /// 文件标签容器定位器（缺省为单文件区块）
    #[serde(default)]
    pub tab_container: Option<String>,

    /// 代码区域定位器（其中最后一个 pre 元素胜出）
    pub code_region: String,

    /// 代码变体切换器定位器
    #[serde(default)]
    pub variant_switcher: Option<String>,

    /// 变体选项定位器
    #[serde(default = "default_variant_option")]
    pub variant_option: String,
}

/// 条件分支配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ConditionalConfig {
    /// 命中判定定位器（100ms 内可见即命中）
    pub when: String,

    /// 命中后是否跳过预检
    #[serde(default)]
    pub skip_pre_checks: bool,

    /// 命中后使用的提取配置
    pub auto: AutoExtractConfig,
}

/// 页面模式声明
#[derive(Debug, Deserialize, Builder, Clone, Copy, Default)]
pub struct PageConfig {
    /// 分发处理器前的额外静置时间（毫秒）
    #[serde(default)]
    pub settle_ms: Option<u64>,
}

fn default_output_base() -> String {
    "output".to_string()
}
fn default_state_base() -> String {
    ".crawler".to_string()
}
fn default_locale() -> String {
    "en".to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_nav_timeout() -> u64 {
    30_000
}
fn default_panel() -> String {
    "[role='tabpanel']".to_string()
}
fn default_link() -> String {
    "a".to_string()
}
fn default_login_guard() -> String {
    "/login|/auth".to_string()
}
fn default_auth_timeout() -> u64 {
    15_000
}
fn default_scroll_step() -> f64 {
    800.0
}
fn default_scroll_interval() -> u64 {
    500
}
fn default_scroll_timeout() -> u64 {
    120_000
}
fn default_variant_option() -> String {
    "[role='option']".to_string()
}

impl AppConfig {
    /// 从文件系统中加载并解析配置
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("blockmirror.toml"))
    }

    /// 从指定路径加载配置
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let builder = Config::builder();

        let builder = if config_path.exists() {
            builder.add_source(File::from(config_path))
        } else {
            builder
        };

        let settings = builder.build().map_err(CrawlError::Config)?;
        let cfg: AppConfig = settings.try_deserialize().map_err(CrawlError::Config)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 声明合法性校验
    ///
    /// 静态/点击两种收集模式互斥，区块/页面两种处理模式互斥。
    pub fn validate(&self) -> Result<()> {
        for (id, site) in &self.sites {
            site.validate()
                .map_err(|msg| CrawlError::Config(ConfigError::Message(format!("site '{id}': {msg}"))))?;
        }
        Ok(())
    }

    /// 获取站点声明
    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.get(id)
    }
}

impl SiteConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        url::Url::parse(&self.start_url).map_err(|e| format!("invalid start_url: {e}"))?;

        match (&self.collect.sections, &self.collect.tab_list) {
            (Some(_), Some(_)) => {
                return Err("collect.sections and collect.tab_list are mutually exclusive".into());
            }
            (None, None) => {
                return Err("one of collect.sections or collect.tab_list is required".into());
            }
            _ => {}
        }

        if self.block.is_some() && self.page.is_some() {
            return Err("block and page modes are mutually exclusive".into());
        }

        if let Some(block) = &self.block {
            if block.blocks.trim().is_empty() {
                return Err("block.blocks locator must not be empty".into());
            }
            for (i, cond) in block.conditional.iter().enumerate() {
                if cond.when.trim().is_empty() {
                    return Err(format!("conditional[{i}].when locator must not be empty"));
                }
            }
        }

        Ok(())
    }

    /// 页面等待条件（链接页沿用站点级设置）
    pub fn collect_wait(&self) -> WaitUntil {
        self.collect.wait_until.unwrap_or(self.wait_until)
    }

    /// 收集阶段导航超时
    pub fn collect_timeout_ms(&self) -> u64 {
        self.collect.timeout_ms.unwrap_or(self.navigation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(sections: Option<&str>, tab_list: Option<&str>) -> SiteConfig {
        SiteConfig {
            start_url: "https://ui.example.dev/blocks".into(),
            base_prefix: None,
            wait_until: WaitUntil::default(),
            navigation_timeout_ms: default_nav_timeout(),
            collect: CollectConfig {
                sections: sections.map(Into::into),
                tab_list: tab_list.map(Into::into),
                panel: default_panel(),
                link: default_link(),
                name: None,
                count: None,
                wait_until: None,
                timeout_ms: None,
            },
            auth: None,
            scripts: Vec::new(),
            auto_scroll: None,
            skip_free: None,
            use_independent_context: false,
            storage_state: None,
            block: None,
            page: None,
        }
    }

    #[test]
    fn defaults_match_contract() {
        let rt = RuntimeConfig::default();
        assert_eq!(rt.max_concurrency, 5);
        assert!(rt.pause_on_error);
        assert!(!rt.ignore_mismatch);
        assert!(!rt.progress.enable);
        assert_eq!(rt.log_level, LogLevel::Info);
        assert_eq!(rt.output_base_dir, "output");
        assert_eq!(rt.state_base_dir, ".crawler");
    }

    #[test]
    fn collect_modes_are_exclusive() {
        assert!(site(Some("//main/section"), None).validate().is_ok());
        assert!(site(None, Some("[role='tab']")).validate().is_ok());
        assert!(site(Some("s"), Some("t")).validate().is_err());
        assert!(site(None, None).validate().is_err());
    }

    #[test]
    fn processing_modes_are_exclusive() {
        let mut s = site(Some("section"), None);
        s.block = Some(BlockConfig {
            blocks: ".block".into(),
            name: None,
            skip_free: None,
            progressive: false,
            verify_completion: true,
            auto: None,
            conditional: Vec::new(),
        });
        s.page = Some(PageConfig::default());
        assert!(s.validate().is_err());
    }
}
