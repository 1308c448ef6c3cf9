//! 认证管理 (Authentication Manager)
//!
//! 保证任何抓取页面打开前，浏览器会话已携带有效站点凭据。
//! 凭据缓存于站点状态目录的 auth.json，后续运行直接重放。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::config::{AuthConfig, SiteConfig};
use crate::core::error::{CrawlError, Result};
use crate::core::model::SitePaths;
use crate::interfaces::driver::{BrowserContext, Cookie, Locator, Page, Session, StorageState, WaitUntil};
use crate::interfaces::handler::AuthHandler;

/// 跳转确认的轮询间隔
const REDIRECT_POLL_MS: u64 = 250;

/// 插件式 Cookie 导出数组的单条形态
///
/// 字段名随导出工具浮动，这里挂别名做归一。
#[derive(Debug, Deserialize)]
struct CookieExport {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "expirationDate")]
    expires: Option<f64>,
    #[serde(default, alias = "httpOnly")]
    http_only: bool,
    #[serde(default)]
    secure: bool,
    #[serde(default, alias = "sameSite")]
    same_site: Option<String>,
}

impl CookieExport {
    fn normalize(self) -> Cookie {
        let same_site = self.same_site.map(|s| match s.to_ascii_lowercase().as_str() {
            "strict" => "Strict".to_string(),
            "no_restriction" | "none" => "None".to_string(),
            _ => "Lax".to_string(),
        });
        Cookie {
            name: self.name,
            value: self.value,
            domain: self.domain,
            path: self.path.unwrap_or_else(|| "/".to_string()),
            expires: self.expires,
            http_only: self.http_only,
            secure: self.secure,
            same_site,
        }
    }
}

/// 解析 auth.json 的两种可接受形态
///
/// (i) 驱动原生存储状态 {cookies, origins}；(ii) 纯 Cookie 导出数组。
fn parse_auth_file(bytes: &[u8]) -> Result<StorageState> {
    let malformed = |e: serde_json::Error| CrawlError::AuthMissing(format!("auth.json malformed: {e}"));
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(malformed)?;

    match &value {
        serde_json::Value::Object(map)
            if map.contains_key("cookies") || map.contains_key("origins") =>
        {
            serde_json::from_value(value).map_err(malformed)
        }
        serde_json::Value::Array(_) => {
            let exports: Vec<CookieExport> = serde_json::from_value(value).map_err(malformed)?;
            Ok(StorageState {
                cookies: exports.into_iter().map(CookieExport::normalize).collect(),
                origins: Vec::new(),
            })
        }
        _ => Err(CrawlError::AuthMissing(
            "auth.json has neither storage-state nor cookie-export shape".into(),
        )),
    }
}

/// 认证管理器
pub struct AuthManager<'a> {
    site: &'a SiteConfig,
    paths: &'a SitePaths,
}

impl<'a> AuthManager<'a> {
    pub fn new(site: &'a SiteConfig, paths: &'a SitePaths) -> Self {
        Self { site, paths }
    }

    /// 认证入口
    ///
    /// 未配置认证则直接返回；有缓存凭据则重放；否则执行登录
    /// 处理器（用户自定义或 .env 自动流程）并持久化存储状态。
    pub async fn ensure_auth(
        &self,
        session: &Arc<dyn Session>,
        page: &Arc<dyn Page>,
        handler: Option<&Arc<dyn AuthHandler>>,
    ) -> Result<()> {
        let Some(auth) = &self.site.auth else {
            if handler.is_none() {
                return Ok(());
            }
            return self.login_and_persist(session, page, handler, None).await;
        };

        let auth_file = self.paths.auth_file();
        if auth_file.exists() {
            let bytes = std::fs::read(&auth_file)?;
            let state = parse_auth_file(&bytes)?;
            info!("重放缓存凭据 ({} cookies)", state.cookies.len());
            session.default_context().add_cookies(&state.cookies).await?;
            return Ok(());
        }

        self.login_and_persist(session, page, handler, Some(auth))
            .await
    }

    async fn login_and_persist(
        &self,
        session: &Arc<dyn Session>,
        page: &Arc<dyn Page>,
        handler: Option<&Arc<dyn AuthHandler>>,
        auth: Option<&AuthConfig>,
    ) -> Result<()> {
        match (handler, auth) {
            (Some(h), _) => h.login(page).await?,
            (None, Some(auth)) => self.auto_login(page, auth).await?,
            (None, None) => return Ok(()),
        }

        let state = session.default_context().storage_state().await?;
        let bytes = serde_json::to_vec_pretty(&state)?;

        let auth_file = self.paths.auth_file();
        if let Some(state_dir) = auth_file.parent() {
            tokio::fs::create_dir_all(state_dir).await?;
        }
        tokio::fs::write(&auth_file, &bytes).await?;
        info!("凭据已持久化到 auth.json");
        Ok(())
    }

    /// 自动登录流程
    ///
    /// 读取 .env 凭据，填充检测到的两个文本输入框，点击唯一的
    /// 登录按钮，等待跳出登录路径。
    async fn auto_login(&self, page: &Arc<dyn Page>, auth: &AuthConfig) -> Result<()> {
        let (email, password) = read_credentials(&self.paths.env_file())?;

        page.goto(
            &auth.login_url,
            WaitUntil::Load,
            Duration::from_millis(self.site.navigation_timeout_ms),
        )
        .await?;

        let inputs = page
            .locator("input[type='email'], input[type='text'], input[type='password']")
            .all()
            .await?;
        if inputs.len() != 2 {
            return Err(CrawlError::AuthFormUnsupported(format!(
                "expected 2 text inputs, found {}",
                inputs.len()
            )));
        }
        inputs[0].fill(&email).await?;
        inputs[1].fill(&password).await?;

        let buttons = page.by_role("button", Some("sign in")).all().await?;
        if buttons.len() != 1 {
            return Err(CrawlError::AuthFormUnsupported(format!(
                "expected 1 sign-in button, found {}",
                buttons.len()
            )));
        }
        buttons[0].click().await?;

        self.wait_for_redirect(page, auth).await
    }

    /// 等待跳出 /login|/auth 形态的路径
    async fn wait_for_redirect(&self, page: &Arc<dyn Page>, auth: &AuthConfig) -> Result<()> {
        let guards: Vec<&str> = auth.login_guard.split('|').collect();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(auth.timeout_ms);

        loop {
            let url = page.url().await;
            if !guards.iter().any(|g| !g.is_empty() && url.contains(g)) {
                debug!("登录跳转确认: {}", url);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::AuthNotConfirmed(url));
            }
            page.wait_timeout(REDIRECT_POLL_MS).await;
        }
    }
}

/// 从 .env 读取 EMAIL/PASSWORD
fn read_credentials(env_file: &Path) -> Result<(String, String)> {
    if !env_file.exists() {
        return Err(CrawlError::AuthMissing(format!(
            "credential file not found: {}",
            env_file.display()
        )));
    }

    let mut email = None;
    let mut password = None;
    for item in dotenvy::from_path_iter(env_file)
        .map_err(|e| CrawlError::AuthMissing(format!("credential file unreadable: {e}")))?
    {
        let (key, value) =
            item.map_err(|e| CrawlError::AuthMissing(format!("credential file malformed: {e}")))?;
        match key.as_str() {
            "EMAIL" => email = Some(value),
            "PASSWORD" => password = Some(value),
            _ => {}
        }
    }

    match (email, password) {
        (Some(e), Some(p)) => Ok((e, p)),
        _ => Err(CrawlError::AuthMissing(
            "EMAIL/PASSWORD not present in .env".into(),
        )),
    }
}
