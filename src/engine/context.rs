//! 引擎运行时上下文

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::config::{RuntimeConfig, SiteConfig};
use crate::core::error::Result;
use crate::core::event::{CrawlEvent, EventSender};
use crate::core::model::SitePaths;
use crate::engine::Job;
use crate::inject::ScriptInjector;
use crate::interfaces::driver::{Page, Session};
use crate::state::StateSet;

/// 运行时上下文 (Runtime Context)
/// 用于在并发链接任务之间共享状态
pub struct RuntimeContext {
    pub runtime: RuntimeConfig,
    pub site: Arc<SiteConfig>,
    pub paths: SitePaths,
    pub base: Url,
    pub state: Arc<StateSet>,
    pub session: Arc<dyn Session>,
    /// 首个任务复用的主页面
    pub primary_page: Arc<dyn Page>,
    pub injector: Arc<ScriptInjector>,
    pub job: Job,
    pub semaphore: Arc<Semaphore>,
    /// 优雅退出令牌
    pub shutdown: CancellationToken,
    pub events: Option<EventSender>,
    /// 调试模式（环境变量探测）
    pub debug: bool,
    /// 本次运行实际提取的区块总数
    pub blocks_done: AtomicUsize,
}

impl RuntimeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: RuntimeConfig,
        site: Arc<SiteConfig>,
        paths: SitePaths,
        state: Arc<StateSet>,
        session: Arc<dyn Session>,
        primary_page: Arc<dyn Page>,
        injector: Arc<ScriptInjector>,
        job: Job,
        shutdown: CancellationToken,
        events: Option<EventSender>,
    ) -> Result<Self> {
        let base = Url::parse(&site.start_url)?;
        let concurrency = runtime.max_concurrency.max(1);

        Ok(Self {
            runtime,
            site,
            paths,
            base,
            state,
            session,
            primary_page,
            injector,
            job,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            shutdown,
            events,
            debug: crate::utils::is_debug_mode(),
            blocks_done: AtomicUsize::new(0),
        })
    }

    /// 发送事件
    pub fn emit(&self, event: CrawlEvent) {
        if let Some(ref sender) = self.events {
            sender.emit(event);
        }
    }

    /// 链接的绝对 URL
    pub fn absolute_url(&self, link: &str) -> String {
        resolve_link(&self.base, link)
    }

    /// 任务日志前缀：链接路径剥离配置的基准前缀
    pub fn log_prefix(&self, link: &str) -> String {
        let stripped = match &self.site.base_prefix {
            Some(prefix) => link.strip_prefix(prefix.as_str()).unwrap_or(link),
            None => link,
        };
        stripped.trim_matches('/').to_string()
    }
}

/// 把收集到的链接解析到起始 URL 所在站点
///
/// 收集产物里的 link 通常是站点相对路径；已经是绝对形式或
/// 协议相对形式的照常接受。join 失败时拼回站点源，避免把
/// 残缺路径原样送进导航。
fn resolve_link(base: &Url, link: &str) -> String {
    let link = link.trim();
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    if let Some(rest) = link.strip_prefix("//") {
        return format!("{}://{}", base.scheme(), rest);
    }

    match base.join(link) {
        Ok(resolved) => resolved.into(),
        Err(_) => {
            let origin = base.origin().ascii_serialization();
            format!("{}/{}", origin, link.trim_start_matches('/'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://ui.example.dev/blocks").unwrap()
    }

    #[test]
    fn relative_links_resolve_against_site_root() {
        assert_eq!(
            resolve_link(&base(), "/components/hero"),
            "https://ui.example.dev/components/hero"
        );
        assert_eq!(
            resolve_link(&base(), " /a "),
            "https://ui.example.dev/a"
        );
    }

    #[test]
    fn absolute_and_protocol_relative_pass_through() {
        assert_eq!(
            resolve_link(&base(), "https://cdn.example.dev/x"),
            "https://cdn.example.dev/x"
        );
        assert_eq!(
            resolve_link(&base(), "//ui.example.dev/y"),
            "https://ui.example.dev/y"
        );
    }
}
