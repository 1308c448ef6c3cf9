//! 页面级处理 (Page Processing)
//!
//! 在加载完成的页面上运行用户处理器，协议工作仅剩失败处置。

use std::path::Path;
use std::sync::Arc;

use tracing::error;

use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::Page;
use crate::interfaces::handler::{PageContext, PageHandler};

/// 页面处理器
pub struct PageProcessor<'a> {
    handler: &'a Arc<dyn PageHandler>,
    pause_on_error: bool,
    debug: bool,
}

impl<'a> PageProcessor<'a> {
    pub fn new(handler: &'a Arc<dyn PageHandler>, pause_on_error: bool, debug: bool) -> Self {
        Self {
            handler,
            pause_on_error,
            debug,
        }
    }

    /// 执行处理器；出错时按配置暂停页面，然后上抛
    pub async fn run(&self, page: &Arc<dyn Page>, page_path: &str, out_dir: &Path) -> Result<()> {
        let ctx = PageContext {
            page,
            page_path,
            out_dir,
        };

        if let Err(e) = self.handler.handle(ctx).await {
            if e.is_user_abort() {
                return Err(e);
            }
            error!("页面处理器失败 [{}]: {}", page_path, e);
            if self.pause_on_error && self.debug {
                page.pause().await;
            }
            return Err(CrawlError::Handler(e.to_string()));
        }
        Ok(())
    }
}
