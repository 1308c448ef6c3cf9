//! 处理器抽象接口 (Handler Abstraction)
//!
//! 定义引擎与用户提取逻辑之间的交互协议；声明式站点走内置
//! 自动提取器，编程式站点实现这里的 trait。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::Result;
use crate::interfaces::driver::{Locator, Page};

/// 区块处理上下文
pub struct BlockContext<'a> {
    /// 所在页面
    pub page: &'a Arc<dyn Page>,
    /// 当前区块定位器
    pub block: &'a Arc<dyn Locator>,
    /// 区块名称（预检阶段已提取）
    pub block_name: &'a str,
    /// 规范化页面路径
    pub page_path: &'a str,
    /// 该区块的输出目录
    pub out_dir: &'a Path,
}

/// 页面处理上下文
pub struct PageContext<'a> {
    pub page: &'a Arc<dyn Page>,
    pub page_path: &'a str,
    /// 该页面的输出目录
    pub out_dir: &'a Path,
}

/// 区块级用户处理器
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle(&self, ctx: BlockContext<'_>) -> Result<()>;
}

/// 页面级用户处理器
#[async_trait]
pub trait PageHandler: Send + Sync {
    async fn handle(&self, ctx: PageContext<'_>) -> Result<()>;
}

/// 自定义登录处理器
///
/// 未提供时认证管理器回退到 `.env` 自动登录流程。
#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn login(&self, page: &Arc<dyn Page>) -> Result<()>;
}

/// 自定义区块命名器，优先于名称定位器与标题探测
#[async_trait]
pub trait BlockNameResolver: Send + Sync {
    async fn resolve(&self, block: &Arc<dyn Locator>) -> Result<Option<String>>;
}

/// 函数形式的免费判定
///
/// 区块级收到区块定位器；页面级收到 body 定位器。
#[async_trait]
pub trait FreeProbe: Send + Sync {
    async fn probe(&self, target: &Arc<dyn Locator>) -> Result<bool>;
}
