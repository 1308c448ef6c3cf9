//! 测试脚手架：内存伪驱动
//!
//! 以选择器为键的节点表模拟 DOM，页面内求值按脚本特征串匹配
//! 返回预置结果；连同伪会话构成无浏览器的引擎测试环境。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::core::error::{CrawlError, Result};
use crate::interfaces::driver::{
    BrowserContext, Cookie, Locator, Page, ScrollMetrics, Session, StorageState, WaitUntil,
};

/// 伪 DOM 节点
#[derive(Default)]
pub struct FakeNode {
    pub text: Option<String>,
    pub html: String,
    pub attrs: HashMap<String, String>,
    pub children: HashMap<String, Vec<Arc<FakeNode>>>,
    /// (脚本特征串, 返回值)
    pub evals: Vec<(String, Value)>,
    pub visible: bool,
    pub clicks: AtomicUsize,
}

impl FakeNode {
    pub fn new() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, node: FakeNode) -> Self {
        self.children
            .entry(selector.to_string())
            .or_default()
            .push(Arc::new(node));
        self
    }

    pub fn eval(mut self, needle: &str, value: Value) -> Self {
        self.evals.push((needle.to_string(), value));
        self
    }

    /// 带标题探测结果的常用区块节点
    pub fn named_block(name: &str) -> Self {
        Self::new().eval(
            "return { kind: 'none' }",
            serde_json::json!({ "kind": "ok", "name": name }),
        )
    }
}

/// 伪页面内部状态
pub struct PageInner {
    pub url: RwLock<String>,
    pub roots: RwLock<HashMap<String, Vec<Arc<FakeNode>>>>,
    /// 渐进快照：同一选择器的逐轮结果，all() 推进
    pub sequences: RwLock<HashMap<String, (AtomicUsize, Vec<Vec<Arc<FakeNode>>>)>>,
    pub evals: RwLock<Vec<(String, Value)>>,
    pub navigations: Mutex<Vec<String>>,
    pub init_scripts: Mutex<Vec<String>>,
    pub evaluated: Mutex<Vec<String>>,
    pub scroll: RwLock<ScrollMetrics>,
    pub closed: AtomicBool,
    pub pauses: AtomicUsize,
}

/// 伪页面
#[derive(Clone)]
pub struct FakePage {
    pub inner: Arc<PageInner>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PageInner {
                url: RwLock::new("about:blank".to_string()),
                roots: RwLock::new(HashMap::new()),
                sequences: RwLock::new(HashMap::new()),
                evals: RwLock::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
                init_scripts: Mutex::new(Vec::new()),
                evaluated: Mutex::new(Vec::new()),
                scroll: RwLock::new(ScrollMetrics::default()),
                closed: AtomicBool::new(false),
                pauses: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_nodes(&self, selector: &str, nodes: Vec<FakeNode>) {
        self.inner
            .roots
            .write()
            .insert(selector.to_string(), nodes.into_iter().map(Arc::new).collect());
    }

    /// 设置渐进快照序列（每轮 all() 前进一格，末格饱和）
    pub fn set_sequence(&self, selector: &str, batches: Vec<Vec<FakeNode>>) {
        let mut accumulated: Vec<Vec<Arc<FakeNode>>> = Vec::new();
        let mut all: Vec<Arc<FakeNode>> = Vec::new();
        for batch in batches {
            all.extend(batch.into_iter().map(Arc::new));
            accumulated.push(all.clone());
        }
        self.inner
            .sequences
            .write()
            .insert(selector.to_string(), (AtomicUsize::new(0), accumulated));
    }

    pub fn add_eval(&self, needle: &str, value: Value) {
        self.inner.evals.write().push((needle.to_string(), value));
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.navigations.lock().clone()
    }

    fn root_nodes(&self, selector: &str, advance: bool) -> Vec<Arc<FakeNode>> {
        if let Some((cursor, snapshots)) = self.inner.sequences.read().get(selector) {
            if snapshots.is_empty() {
                return Vec::new();
            }
            let index = if advance {
                cursor.fetch_add(1, Ordering::SeqCst)
            } else {
                cursor.load(Ordering::SeqCst).saturating_sub(1)
            };
            return snapshots[index.min(snapshots.len() - 1)].clone();
        }
        self.inner
            .roots
            .read()
            .get(selector)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _wait: WaitUntil, _timeout: Duration) -> Result<()> {
        self.inner.navigations.lock().push(url.to_string());
        *self.inner.url.write() = url.to_string();
        Ok(())
    }

    async fn url(&self) -> String {
        self.inner.url.read().clone()
    }

    fn locator(&self, selector: &str) -> Arc<dyn Locator> {
        Arc::new(FakeLocator {
            page: self.clone(),
            steps: vec![FStep::Sel(selector.to_string())],
        })
    }

    fn by_role(&self, role: &str, name: Option<&str>) -> Arc<dyn Locator> {
        let key = match name {
            Some(name) => format!("role={role}[{name}]"),
            None => format!("role={role}"),
        };
        Arc::new(FakeLocator {
            page: self.clone(),
            steps: vec![FStep::Sel(key)],
        })
    }

    fn by_text(&self, text: &str, _exact: bool) -> Arc<dyn Locator> {
        Arc::new(FakeLocator {
            page: self.clone(),
            steps: vec![FStep::Sel(format!("text={text}"))],
        })
    }

    async fn evaluate(&self, expr: &str) -> Result<Value> {
        self.inner.evaluated.lock().push(expr.to_string());
        for (needle, value) in self.inner.evals.read().iter() {
            if expr.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        self.inner.init_scripts.lock().push(source.to_string());
        Ok(())
    }

    async fn wheel(&self, delta_y: f64) -> Result<()> {
        let mut scroll = self.inner.scroll.write();
        let max = (scroll.content - scroll.viewport).max(0.0);
        scroll.position = (scroll.position + delta_y).min(max);
        Ok(())
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        Ok(*self.inner.scroll.read())
    }

    async fn wait_timeout(&self, _ms: u64) {}

    async fn pause(&self) {
        self.inner.pauses.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

enum FStep {
    Sel(String),
    Nth(usize),
}

/// 伪定位器：选择器链，操作时解析
pub struct FakeLocator {
    page: FakePage,
    steps: Vec<FStep>,
}

impl FakeLocator {
    fn resolve(&self, advance_sequence: bool) -> Vec<Arc<FakeNode>> {
        let mut current: Vec<Arc<FakeNode>> = Vec::new();

        for (i, step) in self.steps.iter().enumerate() {
            match step {
                FStep::Sel(selector) => {
                    if i == 0 {
                        let advance = advance_sequence && self.steps.len() == 1;
                        current = self.page.root_nodes(selector, advance);
                    } else {
                        current = current
                            .iter()
                            .flat_map(|n| n.children.get(selector).cloned().unwrap_or_default())
                            .collect();
                    }
                }
                FStep::Nth(index) => {
                    current = current.into_iter().nth(*index).into_iter().collect();
                }
            }
        }
        current
    }

    fn first(&self) -> Result<Arc<FakeNode>> {
        self.resolve(false)
            .into_iter()
            .next()
            .ok_or_else(|| CrawlError::Driver("no element".into()))
    }

    fn child_step(&self, step: FStep) -> Arc<dyn Locator> {
        let mut steps: Vec<FStep> = self
            .steps
            .iter()
            .map(|s| match s {
                FStep::Sel(sel) => FStep::Sel(sel.clone()),
                FStep::Nth(i) => FStep::Nth(*i),
            })
            .collect();
        steps.push(step);
        Arc::new(FakeLocator {
            page: self.page.clone(),
            steps,
        })
    }
}

#[async_trait]
impl Locator for FakeLocator {
    fn locator(&self, selector: &str) -> Arc<dyn Locator> {
        self.child_step(FStep::Sel(selector.to_string()))
    }

    async fn all(&self) -> Result<Vec<Arc<dyn Locator>>> {
        let count = self.resolve(true).len();
        Ok((0..count).map(|i| self.child_step(FStep::Nth(i))).collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.resolve(false).len())
    }

    async fn text_content(&self) -> Result<Option<String>> {
        Ok(self.first().ok().and_then(|n| n.text.clone()))
    }

    async fn inner_html(&self) -> Result<String> {
        Ok(self.first().map(|n| n.html.clone()).unwrap_or_default())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.first().ok().and_then(|n| n.attrs.get(name).cloned()))
    }

    async fn click(&self) -> Result<()> {
        self.first()?.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fill(&self, value: &str) -> Result<()> {
        self.first()?;
        // 填充动作记录进页面求值日志，供断言使用
        self.page
            .inner
            .evaluated
            .lock()
            .push(format!("fill:{value}"));
        Ok(())
    }

    async fn wait_for(&self, _timeout: Duration) -> Result<()> {
        if self.resolve(false).is_empty() {
            return Err(CrawlError::Driver("element never appeared".into()));
        }
        Ok(())
    }

    async fn is_visible(&self, _timeout: Duration) -> Result<bool> {
        Ok(self.resolve(false).first().is_some_and(|n| n.visible))
    }

    async fn scroll_into_view(&self) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, expr: &str) -> Result<Value> {
        if let Ok(node) = self.first() {
            for (needle, value) in &node.evals {
                if expr.contains(needle.as_str()) {
                    return Ok(value.clone());
                }
            }
        }
        for (needle, value) in self.page.inner.evals.read().iter() {
            if expr.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(Value::Null)
    }
}

/// 伪浏览器上下文：页面按入队顺序弹出
pub struct FakeContext {
    pub queue: Mutex<VecDeque<FakePage>>,
    pub fallback: FakePage,
    pub cookies: Mutex<Vec<Cookie>>,
}

impl FakeContext {
    pub fn new(fallback: FakePage) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            cookies: Mutex::new(Vec::new()),
        })
    }

    pub fn enqueue(&self, page: FakePage) {
        self.queue.lock().push_back(page);
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let page = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Arc::new(page))
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.cookies.lock().extend(cookies.iter().cloned());
        Ok(())
    }

    async fn storage_state(&self) -> Result<StorageState> {
        Ok(StorageState {
            cookies: self.cookies.lock().clone(),
            origins: Vec::new(),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 伪会话
pub struct FakeSession {
    pub default_ctx: Arc<FakeContext>,
}

impl FakeSession {
    pub fn new(default_ctx: Arc<FakeContext>) -> Arc<Self> {
        Arc::new(Self { default_ctx })
    }
}

#[async_trait]
impl Session for FakeSession {
    fn default_context(&self) -> Arc<dyn BrowserContext> {
        self.default_ctx.clone()
    }

    async fn new_context(&self, storage: Option<StorageState>) -> Result<Arc<dyn BrowserContext>> {
        let ctx = FakeContext::new(self.default_ctx.fallback.clone());
        if let Some(storage) = storage {
            ctx.add_cookies(&storage.cookies).await?;
        }
        Ok(ctx)
    }
}

// ============================================================================
// 端到端场景
// ============================================================================

mod scenarios {
    use super::*;
    use std::path::Path;

    use crate::core::config::{
        AutoExtractConfig, BlockConfig, CollectConfig, ProgressConfig, RuntimeConfig, SiteConfig,
    };
    use crate::engine::{Job, Orchestrator};
    use crate::interfaces::handler::{PageContext, PageHandler};
    use tokio_util::sync::CancellationToken;

    const START_URL: &str = "https://example.test/blocks";
    const HOST: &str = "example.test";
    const SECTIONS: &str = "//main/section";
    const BLOCKS: &str = ".block-grid > article";

    /// 写 info.txt 的页面处理器（场景 1/2）
    struct InfoWriter;

    #[async_trait]
    impl PageHandler for InfoWriter {
        async fn handle(&self, ctx: PageContext<'_>) -> Result<()> {
            tokio::fs::create_dir_all(ctx.out_dir).await?;
            tokio::fs::write(ctx.out_dir.join("info.txt"), b"ok").await?;
            Ok(())
        }
    }

    fn runtime(dir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            output_base_dir: dir.join("output").to_string_lossy().into_owned(),
            state_base_dir: dir.join(".crawler").to_string_lossy().into_owned(),
            progress: ProgressConfig {
                enable: true,
                rebuild: false,
            },
            ..RuntimeConfig::default()
        }
    }

    fn page_mode_site() -> SiteConfig {
        SiteConfig {
            start_url: START_URL.into(),
            base_prefix: None,
            wait_until: WaitUntil::Load,
            navigation_timeout_ms: 5_000,
            collect: CollectConfig {
                sections: Some(SECTIONS.into()),
                tab_list: None,
                panel: "[role='tabpanel']".into(),
                link: "a".into(),
                name: Some("h3".into()),
                count: Some("p".into()),
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
            page: Some(crate::core::config::PageConfig::default()),
        }
    }

    fn block_mode_site(progressive: bool) -> SiteConfig {
        let mut site = page_mode_site();
        site.page = None;
        site.block = Some(BlockConfig {
            blocks: BLOCKS.into(),
            name: None,
            skip_free: None,
            progressive,
            verify_completion: true,
            auto: Some(AutoExtractConfig {
                tab_container: None,
                code_region: ".code".into(),
                variant_switcher: None,
                variant_option: "[role='option']".into(),
            }),
            conditional: Vec::new(),
        });
        site
    }

    fn link_node(href: &str, title: &str, count: &str) -> FakeNode {
        FakeNode::new()
            .attr("href", href)
            .child("h3", FakeNode::new().text(title))
            .child("p", FakeNode::new().text(count))
    }

    fn start_page(links: Vec<FakeNode>) -> FakePage {
        let mut section = FakeNode::new();
        for link in links {
            section = section.child("a", link);
        }
        let page = FakePage::new();
        page.set_nodes(SECTIONS, vec![section]);
        page
    }

    fn code_block(name: &str, code: &str) -> FakeNode {
        FakeNode::named_block(name).child(
            ".code",
            FakeNode::new().child("pre", FakeNode::new().text(code)),
        )
    }

    async fn assemble(
        runtime: RuntimeConfig,
        site: SiteConfig,
        job: Job,
        primary: &FakePage,
        queued: Vec<FakePage>,
    ) -> Orchestrator {
        let ctx = FakeContext::new(FakePage::new());
        for page in queued {
            ctx.enqueue(page);
        }
        let session = FakeSession::new(ctx);
        Orchestrator::assemble(
            runtime,
            Arc::new(site),
            job,
            session,
            Some(Arc::new(primary.clone())),
            None,
            CancellationToken::new(),
        )
        .await
        .expect("orchestrator assembles")
    }

    #[tokio::test]
    async fn cold_collect_then_page_processing() {
        let dir = tempfile::tempdir().unwrap();
        let primary = start_page(vec![
            link_node("/a", "Alpha", "5 blocks"),
            link_node("/b", "Beta", "no blocks"),
        ]);
        let page_b = FakePage::new();

        let orchestrator = assemble(
            runtime(dir.path()),
            page_mode_site(),
            Job::declarative().with_page_handler(Arc::new(InfoWriter)),
            &primary,
            vec![page_b.clone()],
        )
        .await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);

        let collect: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(".crawler").join(HOST).join("collect.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(collect["totalLinks"], 2);
        assert_eq!(collect["totalBlocks"], 5);

        let out = dir.path().join("output").join(HOST);
        assert!(out.join("a").join("info.txt").exists());
        assert!(out.join("b").join("info.txt").exists());

        let progress: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(".crawler").join(HOST).join("progress.json")).unwrap(),
        )
        .unwrap();
        let pages: Vec<&str> = progress["completedPages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(pages, vec!["a", "b"]);

        // 首个任务复用主页面；收集 + /a 两次导航
        assert_eq!(
            primary.navigations(),
            vec![
                START_URL.to_string(),
                "https://example.test/a".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn resume_skips_completed_pages() {
        let dir = tempfile::tempdir().unwrap();

        // 预置进度：/a 已完成
        let state_dir = dir.path().join(".crawler").join(HOST);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("progress.json"),
            br#"{"completedPages":["a"],"completedBlocks":[],"lastUpdate":""}"#,
        )
        .unwrap();

        let primary = start_page(vec![
            link_node("/a", "Alpha", "5 blocks"),
            link_node("/b", "Beta", "no blocks"),
        ]);

        let orchestrator = assemble(
            runtime(dir.path()),
            page_mode_site(),
            Job::declarative().with_page_handler(Arc::new(InfoWriter)),
            &primary,
            Vec::new(),
        )
        .await;

        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.previously_completed, 1);
        assert_eq!(stats.success_total(), 2);

        // /a 不应产生导航；/b 复用主页面（唯一剩余任务）
        let navs = primary.navigations();
        assert!(navs.iter().all(|u| !u.ends_with("/a")), "navs: {navs:?}");
        assert_eq!(navs.iter().filter(|u| u.ends_with("/b")).count(), 1);

        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(state_dir.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["isComplete"], true);
    }

    #[tokio::test]
    async fn free_page_is_skipped_and_remembered() {
        let dir = tempfile::tempdir().unwrap();

        let primary = start_page(vec![link_node("/x", "Xylo", "2 blocks")]);
        // 页面级探测命中恰好一次
        primary.add_eval("document.body", serde_json::json!(1));

        let mut site = block_mode_site(false);
        site.skip_free = Some("FREE".into());

        let orchestrator = assemble(
            runtime(dir.path()),
            site.clone(),
            Job::declarative(),
            &primary,
            Vec::new(),
        )
        .await;
        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.skipped_free, 1);
        assert_eq!(stats.completed, 0);

        let state_dir = dir.path().join(".crawler").join(HOST);
        let free: serde_json::Value =
            serde_json::from_slice(&std::fs::read(state_dir.join("free.json")).unwrap()).unwrap();
        assert!(free["pages"].as_array().unwrap().contains(&"x".into()));

        let progress: serde_json::Value =
            serde_json::from_slice(&std::fs::read(state_dir.join("progress.json")).unwrap())
                .unwrap();
        assert!(progress["completedPages"].as_array().unwrap().contains(&"x".into()));

        // 区块文件不得写出
        assert!(!dir.path().join("output").join(HOST).join("x").exists());

        // 重跑：预派发门拦截，无导航发生
        let rerun_primary = start_page(vec![link_node("/x", "Xylo", "2 blocks")]);
        let orchestrator = assemble(
            runtime(dir.path()),
            site,
            Job::declarative(),
            &rerun_primary,
            Vec::new(),
        )
        .await;
        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.skipped_free, 1);
        assert_eq!(rerun_primary.navigations().len(), 0);
    }

    #[tokio::test]
    async fn block_count_mismatch_skips_or_continues() {
        // ignoreMismatch=false：整页跳过，零文件
        let dir = tempfile::tempdir().unwrap();
        let primary = start_page(vec![link_node("/a", "Alpha", "7 blocks")]);
        let page_a = page_with_blocks(6);
        // 主页面承担收集 + 首个链接
        copy_blocks(&page_a, &primary);

        let orchestrator = assemble(
            runtime(dir.path()),
            block_mode_site(false),
            Job::declarative(),
            &primary,
            Vec::new(),
        )
        .await;
        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(!dir.path().join("output").join(HOST).join("a").exists());

        let meta: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(".crawler").join(HOST).join("meta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(meta["mismatches"][0]["expected"], 7);
        assert_eq!(meta["mismatches"][0]["actual"], 6);

        // ignoreMismatch=true：6 个区块全部处理
        let dir = tempfile::tempdir().unwrap();
        let primary = start_page(vec![link_node("/a", "Alpha", "7 blocks")]);
        copy_blocks(&page_with_blocks(6), &primary);

        let mut rt = runtime(dir.path());
        rt.ignore_mismatch = true;
        let orchestrator = assemble(
            rt,
            block_mode_site(false),
            Job::declarative(),
            &primary,
            Vec::new(),
        )
        .await;
        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.completed, 1);

        let out = dir.path().join("output").join(HOST).join("a");
        for i in 0..6 {
            assert!(out.join(format!("Card{i}")).join(format!("Card{i}.tsx")).exists());
        }
    }

    #[tokio::test]
    async fn progressive_mode_dedups_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let primary = start_page(vec![link_node("/lazy", "Lazy", "6 blocks")]);

        // 三轮快照：3 个、再 3 个、无新增
        primary.set_sequence(
            BLOCKS,
            vec![
                (0..3).map(|i| code_block(&format!("Card{i}"), "code")).collect(),
                (3..6).map(|i| code_block(&format!("Card{i}"), "code")).collect(),
                Vec::new(),
            ],
        );

        let orchestrator = assemble(
            runtime(dir.path()),
            block_mode_site(true),
            Job::declarative(),
            &primary,
            Vec::new(),
        )
        .await;
        let stats = orchestrator.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);

        let progress: serde_json::Value = serde_json::from_slice(
            &std::fs::read(
                dir.path()
                    .join(".crawler")
                    .join(HOST)
                    .join("progress.json"),
            )
            .unwrap(),
        )
        .unwrap();
        let blocks = progress["completedBlocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 6, "blocks: {blocks:?}");
    }

    fn page_with_blocks(n: usize) -> FakePage {
        let page = FakePage::new();
        page.set_nodes(
            BLOCKS,
            (0..n).map(|i| code_block(&format!("Card{i}"), "export const x = 1;")).collect(),
        );
        page
    }

    /// 把区块表搬到主页面（首个任务复用主页面）
    fn copy_blocks(from: &FakePage, to: &FakePage) {
        let nodes = from.inner.roots.read().get(BLOCKS).cloned().unwrap_or_default();
        to.inner.roots.write().insert(BLOCKS.to_string(), nodes);
    }
}
