//! 浏览器驱动能力接口 (Driver Capability Interface)
//!
//! 核心只依赖这里枚举的窄接口，不绑定任何具体驱动实现；
//! 生产绑定见 `network::browser`，测试使用内存伪实现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// 页面打开等待条件
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// 会话 Cookie
///
/// 同时兼容驱动原生导出与插件式 Cookie 导出数组的字段集。
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// 单个源的本地存储快照
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageItem>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

/// 驱动原生存储状态（auth.json 的首选形态）
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

/// 页面滚动测量值
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    /// 当前滚动位置
    pub position: f64,
    /// 视口高度
    pub viewport: f64,
    /// 内容总高度
    pub content: f64,
}

/// 浏览器会话
///
/// 由测试脚手架或生产绑定提供；任务在会话内开关自己的标签页。
#[async_trait]
pub trait Session: Send + Sync {
    /// 默认浏览器上下文
    fn default_context(&self) -> Arc<dyn BrowserContext>;

    /// 创建独立上下文（可带预置存储状态），调用方负责关闭
    async fn new_context(&self, storage: Option<StorageState>) -> Result<Arc<dyn BrowserContext>>;
}

/// 浏览器上下文
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// 打开新标签页
    async fn new_page(&self) -> Result<Arc<dyn Page>>;

    /// 注入会话 Cookie
    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// 捕获当前存储状态
    async fn storage_state(&self) -> Result<StorageState>;

    /// 关闭上下文及其全部页面
    async fn close(&self) -> Result<()>;
}

/// 页面句柄
#[async_trait]
pub trait Page: Send + Sync {
    /// 导航并等待指定条件
    async fn goto(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()>;

    /// 当前页面 URL
    async fn url(&self) -> String;

    /// 构造选择器定位器
    fn locator(&self, selector: &str) -> Arc<dyn Locator>;

    /// 语义定位：按 ARIA 角色与可见名称
    fn by_role(&self, role: &str, name: Option<&str>) -> Arc<dyn Locator>;

    /// 语义定位：按可见文本
    fn by_text(&self, text: &str, exact: bool) -> Arc<dyn Locator>;

    /// 页面内求值，`expr` 为 JS 表达式或 IIFE，返回 JSON 结果
    async fn evaluate(&self, expr: &str) -> Result<serde_json::Value>;

    /// 注册导航前注入脚本
    async fn add_init_script(&self, source: &str) -> Result<()>;

    /// 模拟滚轮
    async fn wheel(&self, delta_y: f64) -> Result<()>;

    /// 读取滚动测量值
    async fn scroll_metrics(&self) -> Result<ScrollMetrics>;

    /// 固定时长等待
    async fn wait_timeout(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// 调试暂停（非调试绑定实现为空操作）
    async fn pause(&self) {}

    /// 关闭标签页
    async fn close(&self) -> Result<()>;
}

/// 元素定位器
///
/// 惰性求值：构造不触发查询，首次 `all`/`count` 等操作才触发。
#[async_trait]
pub trait Locator: Send + Sync {
    /// 作用域内二级定位
    fn locator(&self, selector: &str) -> Arc<dyn Locator>;

    /// 解析全部命中元素（每个以单元素定位器形式返回）
    async fn all(&self) -> Result<Vec<Arc<dyn Locator>>>;

    /// 命中元素数
    async fn count(&self) -> Result<usize>;

    /// 文本内容
    async fn text_content(&self) -> Result<Option<String>>;

    /// 内部 HTML
    async fn inner_html(&self) -> Result<String>;

    /// 读取属性
    async fn get_attribute(&self, name: &str) -> Result<Option<String>>;

    /// 点击首个命中元素
    async fn click(&self) -> Result<()>;

    /// 填充输入框
    async fn fill(&self, value: &str) -> Result<()>;

    /// 等待元素出现
    async fn wait_for(&self, timeout: Duration) -> Result<()>;

    /// 限时可见性探测
    async fn is_visible(&self, timeout: Duration) -> Result<bool>;

    /// 滚动到视口顶部
    async fn scroll_into_view(&self) -> Result<()>;

    /// 元素作用域求值，`expr` 为形如 `function(el) { ... }` 的函数声明
    async fn evaluate(&self, expr: &str) -> Result<serde_json::Value>;
}
