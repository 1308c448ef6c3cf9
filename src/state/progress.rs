//! 可续传进度记录 (progress.json)

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::ProgressConfig;
use crate::core::error::Result;
use crate::state::store;

/// 磁盘形态
///
/// 两个键集合互不相交语义：页面键仅在其下所有区块处理完后出现。
/// 运行内单调：只增不删。
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ProgressRecord {
    #[serde(default)]
    completed_pages: BTreeSet<String>,
    #[serde(default)]
    completed_blocks: BTreeSet<String>,
    #[serde(default)]
    last_update: String,
}

/// 进度存储
pub struct ProgressStore {
    path: PathBuf,
    /// 是否持久化（读取侧始终生效）
    persist: bool,
    /// 启动时磁盘上已有的完成页数
    previously_completed: usize,
    inner: RwLock<ProgressRecord>,
}

impl ProgressStore {
    /// 加载或新建
    ///
    /// `rebuild` 时忽略既有文件；否则无论 enable 与否都读取既有记录
    /// 用于跳过判定。
    pub fn initialize(path: PathBuf, cfg: ProgressConfig) -> Result<Self> {
        let record: ProgressRecord = if cfg.rebuild {
            debug!("进度重建：忽略既有 progress.json");
            ProgressRecord::default()
        } else {
            store::load_json_sync(&path)?.unwrap_or_default()
        };

        Ok(Self {
            path,
            persist: cfg.enable,
            previously_completed: record.completed_pages.len(),
            inner: RwLock::new(record),
        })
    }

    pub fn is_page_complete(&self, page_path: &str) -> bool {
        self.inner.read().completed_pages.contains(page_path)
    }

    pub fn is_block_complete(&self, block_path: &str) -> bool {
        self.inner.read().completed_blocks.contains(block_path)
    }

    pub fn mark_page_complete(&self, page_path: &str) {
        self.inner.write().completed_pages.insert(page_path.to_string());
    }

    pub fn mark_block_complete(&self, block_path: &str) {
        self.inner.write().completed_blocks.insert(block_path.to_string());
    }

    /// 启动时磁盘上已完成的页面数
    pub fn previously_completed(&self) -> usize {
        self.previously_completed
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.completed_pages.is_empty() && inner.completed_blocks.is_empty()
    }

    /// 异步保存；未启用持久化或记录为空时不落盘
    pub async fn save(&self) -> Result<()> {
        if !self.persist || self.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot();
        store::save_json(&self.path, &snapshot).await
    }

    /// 同步保存（信号路径）
    pub fn save_sync(&self) -> Result<()> {
        if !self.persist || self.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot();
        store::save_json_sync(&self.path, &snapshot)
    }

    fn snapshot(&self) -> ProgressRecord {
        let inner = self.inner.read();
        ProgressRecord {
            completed_pages: inner.completed_pages.clone(),
            completed_blocks: inner.completed_blocks.clone(),
            last_update: chrono::Utc::now().to_rfc3339(),
        }
    }
}
