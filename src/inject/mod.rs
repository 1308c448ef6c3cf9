//! 脚本注入 (Script Injection)
//!
//! 读取站点 scripts/ 目录下的用户脚本，按时机注入页面；
//! 带 UserScript 头的脚本先注入静态 GM API 垫片。

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::config::{ScriptEntry, ScriptTiming};
use crate::core::error::Result;
use crate::interfaces::driver::Page;

/// GM API 垫片，随二进制内置
static GM_SHIM: &str = include_str!("../../assets/gm-shim.js");

const USERSCRIPT_HEADER: &str = "// ==UserScript==";

/// 加载完成的单个脚本
#[derive(Debug, Clone)]
struct LoadedScript {
    name: String,
    source: String,
    timing: ScriptTiming,
    needs_shim: bool,
}

/// 脚本注入器
pub struct ScriptInjector {
    scripts: Vec<LoadedScript>,
}

impl ScriptInjector {
    /// 空注入器（站点未声明脚本）
    pub fn empty() -> Self {
        Self {
            scripts: Vec::new(),
        }
    }

    /// 从脚本目录加载声明的全部脚本
    ///
    /// 时机决议：显式配置 > 脚本头 @run-at > afterPageLoad。
    pub async fn load(scripts_dir: &Path, entries: &[ScriptEntry]) -> Result<Self> {
        let mut scripts = Vec::with_capacity(entries.len());

        for entry in entries {
            let path = scripts_dir.join(&entry.file);
            let source = match tokio::fs::read_to_string(&path).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("注入脚本读取失败 ({}): {}", path.display(), e);
                    continue;
                }
            };

            let timing = entry
                .timing
                .or_else(|| parse_run_at(&source))
                .unwrap_or(ScriptTiming::AfterPageLoad);

            scripts.push(LoadedScript {
                name: entry.file.clone(),
                needs_shim: source.contains(USERSCRIPT_HEADER),
                source,
                timing,
            });
        }

        Ok(Self { scripts })
    }

    pub fn has_before(&self) -> bool {
        self.scripts
            .iter()
            .any(|s| s.timing == ScriptTiming::BeforePageLoad)
    }

    /// 导航前注入（走驱动的 init-script 钩子）
    pub async fn apply_before(&self, page: &Arc<dyn Page>) -> Result<()> {
        let group: Vec<_> = self
            .scripts
            .iter()
            .filter(|s| s.timing == ScriptTiming::BeforePageLoad)
            .collect();
        if group.is_empty() {
            return Ok(());
        }

        if group.iter().any(|s| s.needs_shim) {
            page.add_init_script(GM_SHIM).await?;
        }
        for script in group {
            debug!("注入导航前脚本: {}", script.name);
            page.add_init_script(&script.source).await?;
        }
        Ok(())
    }

    /// 导航后注入（页面内求值）
    pub async fn apply_after(&self, page: &Arc<dyn Page>) -> Result<()> {
        let group: Vec<_> = self
            .scripts
            .iter()
            .filter(|s| s.timing == ScriptTiming::AfterPageLoad)
            .collect();
        if group.is_empty() {
            return Ok(());
        }

        if group.iter().any(|s| s.needs_shim) {
            page.evaluate(GM_SHIM).await?;
        }
        for script in group {
            debug!("注入导航后脚本: {}", script.name);
            page.evaluate(&script.source).await?;
        }
        Ok(())
    }
}

/// 解析 UserScript 头中的 @run-at 指令
fn parse_run_at(source: &str) -> Option<ScriptTiming> {
    let mut in_header = false;
    for line in source.lines() {
        let line = line.trim();
        if line == USERSCRIPT_HEADER {
            in_header = true;
            continue;
        }
        if line == "// ==/UserScript==" {
            break;
        }
        if in_header && let Some(rest) = line.strip_prefix("// @run-at") {
            return match rest.trim() {
                "document-start" => Some(ScriptTiming::BeforePageLoad),
                "document-end" | "document-idle" => Some(ScriptTiming::AfterPageLoad),
                other => {
                    warn!("未知的 @run-at 取值: {}", other);
                    None
                }
            };
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERSCRIPT: &str = "// ==UserScript==\n// @name demo\n// @run-at document-start\n// ==/UserScript==\nGM_setValue('k', 1);\n";

    #[tokio::test]
    async fn run_at_resolves_timing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), USERSCRIPT).unwrap();
        std::fs::write(dir.path().join("b.js"), "console.log('plain');").unwrap();

        let injector = ScriptInjector::load(
            dir.path(),
            &[
                ScriptEntry {
                    file: "a.js".into(),
                    timing: None,
                },
                ScriptEntry {
                    file: "b.js".into(),
                    timing: None,
                },
            ],
        )
        .await
        .unwrap();

        assert!(injector.has_before());
        assert_eq!(injector.scripts[0].timing, ScriptTiming::BeforePageLoad);
        assert!(injector.scripts[0].needs_shim);
        assert_eq!(injector.scripts[1].timing, ScriptTiming::AfterPageLoad);
        assert!(!injector.scripts[1].needs_shim);
    }

    #[tokio::test]
    async fn explicit_timing_beats_run_at() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), USERSCRIPT).unwrap();

        let injector = ScriptInjector::load(
            dir.path(),
            &[ScriptEntry {
                file: "a.js".into(),
                timing: Some(ScriptTiming::AfterPageLoad),
            }],
        )
        .await
        .unwrap();

        assert!(!injector.has_before());
    }

    #[tokio::test]
    async fn shim_precedes_userscript_on_injection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gm.js"),
            "// ==UserScript==\n// @name demo\n// ==/UserScript==\nGM_setValue('k', 1);\n",
        )
        .unwrap();

        let injector = ScriptInjector::load(
            dir.path(),
            &[ScriptEntry {
                file: "gm.js".into(),
                timing: Some(ScriptTiming::AfterPageLoad),
            }],
        )
        .await
        .unwrap();

        let fake = crate::testing::FakePage::new();
        let page: Arc<dyn Page> = Arc::new(fake.clone());
        injector.apply_after(&page).await.unwrap();

        let evaluated = fake.inner.evaluated.lock().clone();
        assert_eq!(evaluated.len(), 2);
        assert!(evaluated[0].contains("GM_xmlhttpRequest"), "shim first");
        assert!(evaluated[1].contains("GM_setValue('k', 1)"));
    }

    #[tokio::test]
    async fn before_scripts_use_init_hook() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), USERSCRIPT).unwrap();

        let injector = ScriptInjector::load(
            dir.path(),
            &[ScriptEntry {
                file: "a.js".into(),
                timing: None,
            }],
        )
        .await
        .unwrap();

        let fake = crate::testing::FakePage::new();
        let page: Arc<dyn Page> = Arc::new(fake.clone());
        injector.apply_before(&page).await.unwrap();

        let scripts = fake.inner.init_scripts.lock().clone();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("GM_getValue"));
        assert!(fake.inner.evaluated.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let injector = ScriptInjector::load(
            dir.path(),
            &[ScriptEntry {
                file: "absent.js".into(),
                timing: None,
            }],
        )
        .await
        .unwrap();
        assert!(injector.scripts.is_empty());
    }
}
