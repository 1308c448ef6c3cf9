//! 文件名映射 (filename-mapping.json)
//!
//! 请求名到实际落盘名的单向映射，按区块路径分键。
//! 同一逻辑区块在每次运行中解析到同一文件，即使原名含非法字符。

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::prelude::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::state::store;
use crate::utils::sanitize_rel_path;

type MappingTable = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MappingRecord {
    #[serde(default)]
    last_update: String,
    #[serde(default)]
    mappings: MappingTable,
}

/// 文件名映射存储
pub struct FilenameMappingStore {
    path: PathBuf,
    inner: RwLock<MappingRecord>,
}

impl FilenameMappingStore {
    pub fn initialize(path: PathBuf) -> Result<Self> {
        let record = store::load_json_sync(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            inner: RwLock::new(record),
        })
    }

    /// 解析请求文件名，返回可落盘的实际文件名
    ///
    /// 既有条目优先返回，保证跨运行稳定；新条目清洗后登记，
    /// 与同区块其他条目冲突时追加原名摘要消歧。
    pub fn resolve(&self, block_path: &str, requested: &str) -> String {
        if let Some(existing) = self
            .inner
            .read()
            .mappings
            .get(block_path)
            .and_then(|m| m.get(requested))
        {
            return existing.clone();
        }

        let mut inner = self.inner.write();
        let per_block = inner.mappings.entry(block_path.to_string()).or_default();

        let mut actual = sanitize_rel_path(requested);
        if per_block.values().any(|v| v == &actual) {
            actual = disambiguate(&actual, requested);
        }

        per_block.insert(requested.to_string(), actual.clone());
        actual
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().mappings.is_empty()
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

    fn snapshot(&self) -> MappingRecord {
        MappingRecord {
            last_update: chrono::Utc::now().to_rfc3339(),
            mappings: self.inner.read().mappings.clone(),
        }
    }
}

/// 冲突消歧：扩展名前插入原名摘要
fn disambiguate(actual: &str, requested: &str) -> String {
    let mut digest = BASE64_URL_SAFE_NO_PAD.encode(requested.as_bytes());
    digest.truncate(8);

    match actual.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{digest}.{ext}"),
        None => format!("{actual}-{digest}"),
    }
}
