//! 免费目录 (free.json)
//!
//! 记录站点自带"免费"标记命中的页面与区块，供后续运行跳过。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::state::store;

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FreeRecord {
    #[serde(default)]
    last_update: String,
    #[serde(default)]
    total_pages: usize,
    #[serde(default)]
    total_blocks: usize,
    #[serde(default)]
    pages: BTreeSet<String>,
    /// 区块键为 "页面路径/区块名"
    #[serde(default)]
    blocks: BTreeSet<String>,
    /// 按页面分组的派生视图
    #[serde(default)]
    blocks_by_page: BTreeMap<String, BTreeSet<String>>,
}

/// 免费记录存储
pub struct FreeStore {
    path: PathBuf,
    inner: RwLock<FreeRecord>,
}

impl FreeStore {
    pub fn initialize(path: PathBuf) -> Result<Self> {
        let record = store::load_json_sync(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            inner: RwLock::new(record),
        })
    }

    /// 启动时预载的免费页面集合
    pub fn known_free_pages(&self) -> BTreeSet<String> {
        self.inner.read().pages.clone()
    }

    pub fn is_free_page(&self, page_path: &str) -> bool {
        self.inner.read().pages.contains(page_path)
    }

    pub fn add_page(&self, page_path: &str) {
        self.inner.write().pages.insert(page_path.to_string());
    }

    pub fn add_block(&self, page_path: &str, block_name: &str) {
        let mut inner = self.inner.write();
        inner.blocks.insert(format!("{page_path}/{block_name}"));
        inner
            .blocks_by_page
            .entry(page_path.to_string())
            .or_default()
            .insert(block_name.to_string());
    }

    pub fn page_count(&self) -> usize {
        self.inner.read().pages.len()
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn free_pages(&self) -> Vec<String> {
        self.inner.read().pages.iter().cloned().collect()
    }

    pub fn free_blocks(&self) -> Vec<String> {
        self.inner.read().blocks.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.pages.is_empty() && inner.blocks.is_empty()
    }

    pub async fn save(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot();
        store::save_json(&self.path, &snapshot).await
    }

    pub fn save_sync(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot();
        store::save_json_sync(&self.path, &snapshot)
    }

    fn snapshot(&self) -> FreeRecord {
        let inner = self.inner.read();
        FreeRecord {
            last_update: chrono::Utc::now().to_rfc3339(),
            total_pages: inner.pages.len(),
            total_blocks: inner.blocks.len(),
            pages: inner.pages.clone(),
            blocks: inner.blocks.clone(),
            blocks_by_page: inner.blocks_by_page.clone(),
        }
    }
}
