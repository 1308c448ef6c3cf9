//! 浏览器驱动绑定 (Chromium Binding)
//!
//! 基于 CDP 实现 `interfaces::driver` 的能力接口。
//! 采用显式的所有权管理，确保关闭逻辑的确定性。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Element;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::BrowserOptions;
use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::{
    BrowserContext, Cookie, Locator, Page, ScrollMetrics, Session, StorageState, WaitUntil,
};

/// 元素探测轮询间隔
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

fn driver_err(e: impl std::fmt::Display) -> CrawlError {
    CrawlError::Driver(e.to_string())
}

/// 浏览器会话
pub struct CdpSession {
    browser: Arc<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
    default_ctx: Arc<CdpContext>,
}

impl CdpSession {
    /// 启动浏览器会话
    pub async fn launch(options: &BrowserOptions, locale: &str) -> Result<Arc<Self>> {
        let config = build_browser_config(options, locale)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(driver_err)?;

        // 启动事件循环
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let browser = Arc::new(browser);
        Ok(Arc::new(Self {
            default_ctx: Arc::new(CdpContext {
                browser: browser.clone(),
                context_id: None,
            }),
            browser,
            handler: Mutex::new(Some(handle)),
        }))
    }

    /// 优雅关闭浏览器，并等待事件循环结束
    pub async fn close(&self) -> Result<()> {
        // Browser::close 需要独占；尽力而为，拆除阶段的错误仅记录
        if let Some(handle) = self.handler.lock().take() {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for CdpSession {
    fn default_context(&self) -> Arc<dyn BrowserContext> {
        self.default_ctx.clone()
    }

    async fn new_context(&self, storage: Option<StorageState>) -> Result<Arc<dyn BrowserContext>> {
        let context_id = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(driver_err)?;

        let ctx = Arc::new(CdpContext {
            browser: self.browser.clone(),
            context_id: Some(context_id),
        });

        if let Some(storage) = storage
            && !storage.cookies.is_empty()
        {
            ctx.add_cookies(&storage.cookies).await?;
        }
        Ok(ctx)
    }
}

/// 浏览器上下文
pub struct CdpContext {
    browser: Arc<Browser>,
    /// None 表示默认上下文
    context_id: Option<chromiumoxide::cdp::browser_protocol::browser::BrowserContextId>,
}

impl CdpContext {
    async fn raw_new_page(&self) -> Result<chromiumoxide::Page> {
        let mut params = CreateTargetParams::builder().url("about:blank");
        if let Some(id) = &self.context_id {
            params = params.browser_context_id(id.clone());
        }
        let params = params.build().map_err(driver_err)?;
        self.browser.new_page(params).await.map_err(driver_err)
    }
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        Ok(Arc::new(CdpPage {
            page: self.raw_new_page().await?,
        }))
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let page = self.raw_new_page().await?;

        let params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|c| {
                let mut builder = CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only);
                if !c.domain.is_empty() {
                    builder = builder.domain(c.domain.clone());
                }
                if let Some(expires) = c.expires {
                    builder = builder.expires(TimeSinceEpoch::new(expires));
                }
                if let Some(same_site) = &c.same_site {
                    builder = builder.same_site(match same_site.as_str() {
                        "Strict" => CookieSameSite::Strict,
                        "None" => CookieSameSite::None,
                        _ => CookieSameSite::Lax,
                    });
                }
                builder.build().ok()
            })
            .collect();

        page.execute(SetCookiesParams::new(params))
            .await
            .map_err(driver_err)?;
        let _ = page.close().await;
        Ok(())
    }

    async fn storage_state(&self) -> Result<StorageState> {
        let page = self.raw_new_page().await?;
        let cookies = page.get_cookies().await.map_err(driver_err)?;
        let _ = page.close().await;

        Ok(StorageState {
            cookies: cookies
                .into_iter()
                .map(|c| Cookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    expires: Some(c.expires),
                    http_only: c.http_only,
                    secure: c.secure,
                    same_site: c.same_site.map(|s| format!("{s:?}")),
                })
                .collect(),
            origins: Vec::new(),
        })
    }

    async fn close(&self) -> Result<()> {
        if let Some(id) = &self.context_id {
            self.browser
                .execute(DisposeBrowserContextParams::new(id.clone()))
                .await
                .map_err(driver_err)?;
        }
        Ok(())
    }
}

/// 页面句柄
pub struct CdpPage {
    page: chromiumoxide::Page,
}

#[async_trait]
impl Page for CdpPage {
    async fn goto(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()> {
        let navigate = async {
            self.page.goto(url).await.map_err(driver_err)?;
            self.page.wait_for_navigation().await.map_err(driver_err)?;
            if wait == WaitUntil::NetworkIdle {
                // CDP 无内建 network-idle 等待，退化为短静置
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok::<(), CrawlError>(())
        };

        tokio::time::timeout(timeout, navigate)
            .await
            .map_err(|_| CrawlError::Driver(format!("navigation timeout: {url}")))?
    }

    async fn url(&self) -> String {
        self.page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn locator(&self, selector: &str) -> Arc<dyn Locator> {
        Arc::new(CdpLocator {
            page: self.page.clone(),
            steps: vec![Step::Css(selector.to_string())],
        })
    }

    fn by_role(&self, role: &str, name: Option<&str>) -> Arc<dyn Locator> {
        Arc::new(CdpLocator {
            page: self.page.clone(),
            steps: vec![Step::Role {
                role: role.to_string(),
                name: name.map(str::to_string),
            }],
        })
    }

    fn by_text(&self, text: &str, exact: bool) -> Arc<dyn Locator> {
        Arc::new(CdpLocator {
            page: self.page.clone(),
            steps: vec![Step::Text {
                text: text.to_string(),
                exact,
            }],
        })
    }

    async fn evaluate(&self, expr: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(expr).await.map_err(driver_err)?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                source.to_string(),
            ))
            .await
            .map_err(driver_err)?;
        Ok(())
    }

    async fn wheel(&self, delta_y: f64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy(0, {delta_y})"))
            .await?;
        Ok(())
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let value = self
            .evaluate(
                "JSON.stringify({ position: window.scrollY, viewport: window.innerHeight, content: document.documentElement.scrollHeight })",
            )
            .await?;
        let raw = value.as_str().unwrap_or("{}");
        let parsed: serde_json::Value = serde_json::from_str(raw)?;
        Ok(ScrollMetrics {
            position: parsed["position"].as_f64().unwrap_or(0.0),
            viewport: parsed["viewport"].as_f64().unwrap_or(0.0),
            content: parsed["content"].as_f64().unwrap_or(0.0),
        })
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.map_err(driver_err)?;
        Ok(())
    }
}

/// 定位步骤
#[derive(Debug, Clone)]
enum Step {
    Css(String),
    /// all() 固定到具体元素
    Nth(usize),
    Role { role: String, name: Option<String> },
    Text { text: String, exact: bool },
}

/// 选择器链定位器
///
/// 不持有元素句柄，每次操作重新解析，贴合页面动态变化。
pub struct CdpLocator {
    page: chromiumoxide::Page,
    steps: Vec<Step>,
}

impl CdpLocator {
    async fn resolve(&self) -> Result<Vec<Element>> {
        let mut current: Vec<Element> = Vec::new();
        let mut first = true;

        for step in &self.steps {
            match step {
                Step::Css(selector) => {
                    current = if first {
                        self.page.find_elements(selector.as_str()).await.map_err(driver_err)?
                    } else {
                        let mut next = Vec::new();
                        for el in &current {
                            next.extend(
                                el.find_elements(selector.as_str()).await.map_err(driver_err)?,
                            );
                        }
                        next
                    };
                }
                Step::Nth(index) => {
                    current = match current.into_iter().nth(*index) {
                        Some(el) => vec![el],
                        None => Vec::new(),
                    };
                }
                Step::Role { role, name } => {
                    let selector = role_selector(role);
                    let candidates = if first {
                        self.page.find_elements(selector).await.map_err(driver_err)?
                    } else {
                        let mut next = Vec::new();
                        for el in &current {
                            next.extend(el.find_elements(selector).await.map_err(driver_err)?);
                        }
                        next
                    };
                    current = filter_by_text(candidates, name.as_deref(), false).await;
                }
                Step::Text { text, exact } => {
                    let candidates = if first {
                        self.page.find_elements("*").await.map_err(driver_err)?
                    } else {
                        let mut next = Vec::new();
                        for el in &current {
                            next.extend(el.find_elements("*").await.map_err(driver_err)?);
                        }
                        next
                    };
                    current = filter_by_text(candidates, Some(text), *exact).await;
                }
            }
            first = false;
        }
        Ok(current)
    }

    async fn first(&self) -> Result<Element> {
        self.resolve()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CrawlError::Driver(format!("no element for {:?}", self.steps)))
    }

    fn child(&self, step: Step) -> Arc<dyn Locator> {
        let mut steps = self.steps.clone();
        steps.push(step);
        Arc::new(CdpLocator {
            page: self.page.clone(),
            steps,
        })
    }

    async fn eval_on_first(&self, function: &str) -> Result<serde_json::Value> {
        let el = self.first().await?;
        let returns = el.call_js_fn(function, true).await.map_err(driver_err)?;
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }
}

fn role_selector(role: &str) -> &'static str {
    match role {
        "button" => "button, [role='button'], input[type='submit'], input[type='button']",
        "tab" => "[role='tab']",
        "link" => "a, [role='link']",
        _ => "*",
    }
}

async fn filter_by_text(candidates: Vec<Element>, text: Option<&str>, exact: bool) -> Vec<Element> {
    let Some(text) = text else {
        return candidates;
    };
    let needle = text.to_lowercase();

    let mut matched = Vec::new();
    for el in candidates {
        let content = el
            .inner_text()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let hit = if exact {
            content == needle
        } else {
            content.contains(&needle)
        };
        if hit {
            matched.push(el);
        }
    }
    matched
}

#[async_trait]
impl Locator for CdpLocator {
    fn locator(&self, selector: &str) -> Arc<dyn Locator> {
        self.child(Step::Css(selector.to_string()))
    }

    async fn all(&self) -> Result<Vec<Arc<dyn Locator>>> {
        let count = self.resolve().await?.len();
        Ok((0..count).map(|i| self.child(Step::Nth(i))).collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.resolve().await?.len())
    }

    async fn text_content(&self) -> Result<Option<String>> {
        let value = self
            .eval_on_first("function() { return this.textContent; }")
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn inner_html(&self) -> Result<String> {
        let value = self
            .eval_on_first("function() { return this.innerHTML; }")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        let function = format!(
            "function() {{ return this.getAttribute({}); }}",
            serde_json::to_string(name)?
        );
        let value = self.eval_on_first(&function).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self) -> Result<()> {
        let el = self.first().await?;
        el.click().await.map_err(driver_err)?;
        Ok(())
    }

    async fn fill(&self, value: &str) -> Result<()> {
        let function = format!(
            "function() {{ this.value = {}; this.dispatchEvent(new Event('input', {{ bubbles: true }})); this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}",
            serde_json::to_string(value)?
        );
        self.eval_on_first(&function).await?;
        Ok(())
    }

    async fn wait_for(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.resolve().await?.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::Driver(format!(
                    "timed out waiting for {:?}",
                    self.steps
                )));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    async fn is_visible(&self, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.resolve().await {
                Ok(els) if !els.is_empty() => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("可见性探测失败: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    async fn scroll_into_view(&self) -> Result<()> {
        self.eval_on_first("function() { this.scrollIntoView({ block: 'start' }); }")
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expr: &str) -> Result<serde_json::Value> {
        self.eval_on_first(expr).await
    }
}

/// 构建浏览器配置
fn build_browser_config(options: &BrowserOptions, locale: &str) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-sandbox")
        .arg("--window-size=1920,1080")
        .arg(format!("--lang={locale}"))
        .arg("--disable-extensions");

    if options.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    if let Some(path) = &options.chrome_path {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(CrawlError::Driver)
}

// 在 Drop 时尝试最后一次回收事件循环
impl Drop for CdpSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler.lock().take() {
            handle.abort();
            warn!("浏览器会话未显式关闭，事件循环已强制回收");
        }
    }
}
