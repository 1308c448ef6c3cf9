pub mod context;
pub mod pipeline;
pub mod scheduler;
pub mod task;

pub use context::RuntimeContext;
pub use pipeline::Orchestrator;
pub use scheduler::{Executor, RunStats};

use std::sync::Arc;

use crate::interfaces::handler::{
    AuthHandler, BlockHandler, BlockNameResolver, FreeProbe, PageHandler,
};

/// 处理任务描述 (Job Descriptor)
///
/// 声明式站点只需 SiteConfig；编程式站点通过这里挂接自定义处理器。
/// 页面/区块两种模式由 SiteConfig 与挂接的处理器共同决定。
#[derive(Default, Clone)]
pub struct Job {
    /// 区块级处理器（替代声明式自动提取）
    pub block_handler: Option<Arc<dyn BlockHandler>>,
    /// 页面级处理器（页面模式必需）
    pub page_handler: Option<Arc<dyn PageHandler>>,
    /// 自定义登录流程
    pub auth_handler: Option<Arc<dyn AuthHandler>>,
    /// 自定义区块命名
    pub name_resolver: Option<Arc<dyn BlockNameResolver>>,
    /// 函数形式的区块免费判定
    pub block_free_probe: Option<Arc<dyn FreeProbe>>,
    /// 函数形式的页面免费判定
    pub page_free_probe: Option<Arc<dyn FreeProbe>>,
}

impl Job {
    pub fn declarative() -> Self {
        Self::default()
    }

    pub fn with_page_handler(mut self, handler: Arc<dyn PageHandler>) -> Self {
        self.page_handler = Some(handler);
        self
    }

    pub fn with_block_handler(mut self, handler: Arc<dyn BlockHandler>) -> Self {
        self.block_handler = Some(handler);
        self
    }

    pub fn with_auth_handler(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth_handler = Some(handler);
        self
    }
}
