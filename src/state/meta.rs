//! 站点运行摘要 (meta.json)
//!
//! 保存时与上一次运行的摘要合并：免费清单取并集，startTime 取最早，
//! 其余字段以本次运行为准。

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::model::{CollectionLink, MismatchEntry};
use crate::state::store;

/// 免费统计片段
///
/// 不变式：total 始终等于 links 长度。
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FreeSummary {
    pub total: usize,
    pub links: Vec<String>,
}

impl FreeSummary {
    fn from_links(links: Vec<String>) -> Self {
        Self {
            total: links.len(),
            links,
        }
    }

    fn merge(mut self, prior: FreeSummary) -> Self {
        let mut set: BTreeSet<String> = self.links.into_iter().collect();
        set.extend(prior.links);
        self.links = set.into_iter().collect();
        self.total = self.links.len();
        self
    }
}

/// 区块计数统计
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlockTotals {
    /// 列表页声明的总数
    pub displayed: u32,
    /// 实际处理到的总数
    pub actual: u32,
}

/// 运行摘要
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SiteMeta {
    pub start_url: String,
    #[serde(default)]
    pub collection_links: Vec<CollectionLink>,
    #[serde(default)]
    pub totals: BlockTotals,
    #[serde(default)]
    pub free_pages: FreeSummary,
    #[serde(default)]
    pub free_blocks: FreeSummary,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<MismatchEntry>,
}

/// 摘要存储
pub struct MetaStore {
    path: PathBuf,
    inner: RwLock<SiteMeta>,
}

impl MetaStore {
    pub fn initialize(path: PathBuf) -> Self {
        Self {
            path,
            inner: RwLock::new(SiteMeta::default()),
        }
    }

    /// 运行开始：记录起点
    pub fn begin(&self, start_url: &str) {
        let mut inner = self.inner.write();
        inner.start_url = start_url.to_string();
        inner.start_time = Utc::now().to_rfc3339();
    }

    pub fn set_collections(&self, links: Vec<CollectionLink>, displayed_total: u32) {
        let mut inner = self.inner.write();
        inner.collection_links = links;
        inner.totals.displayed = displayed_total;
    }

    /// 运行结束：汇总并标记完成度
    #[allow(clippy::too_many_arguments)]
    pub fn finalize(
        &self,
        actual_blocks: u32,
        free_pages: Vec<String>,
        free_blocks: Vec<String>,
        mismatches: Vec<MismatchEntry>,
        is_complete: bool,
    ) {
        let mut inner = self.inner.write();
        inner.totals.actual = actual_blocks;
        inner.free_pages = FreeSummary::from_links(free_pages);
        inner.free_blocks = FreeSummary::from_links(free_blocks);
        inner.mismatches = mismatches;
        inner.is_complete = is_complete;
        inner.end_time = Utc::now().to_rfc3339();
        inner.duration_ms = duration_between(&inner.start_time, &inner.end_time);
    }

    /// 与既有 meta.json 合并后保存
    pub async fn save(&self) -> Result<()> {
        let prior: Option<SiteMeta> = store::load_json(&self.path).await?;
        let merged = merge(self.inner.read().clone(), prior);
        store::save_json(&self.path, &merged).await
    }

    pub fn save_sync(&self) -> Result<()> {
        let prior: Option<SiteMeta> = store::load_json_sync(&self.path)?;
        let merged = merge(self.inner.read().clone(), prior);
        store::save_json_sync(&self.path, &merged)
    }
}

fn merge(mut current: SiteMeta, prior: Option<SiteMeta>) -> SiteMeta {
    let Some(prior) = prior else {
        return current;
    };

    if !prior.start_time.is_empty()
        && (current.start_time.is_empty() || prior.start_time < current.start_time)
    {
        current.start_time = prior.start_time;
    }
    current.free_pages = current.free_pages.merge(prior.free_pages);
    current.free_blocks = current.free_blocks.merge(prior.free_blocks);
    if current.collection_links.is_empty() {
        current.collection_links = prior.collection_links;
    }
    current
}

fn duration_between(start: &str, end: &str) -> u64 {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc));
    match (parse(start), parse(end)) {
        (Some(s), Some(e)) => (e - s).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn free_totals_equal_link_counts() {
        let dir = tempfile::tempdir().unwrap();
        let meta = MetaStore::initialize(dir.path().join("meta.json"));
        meta.begin("https://ui.example.dev/blocks");
        meta.finalize(
            6,
            vec!["x".into()],
            vec!["a/Hero".into(), "a/Pricing".into()],
            Vec::new(),
            true,
        );
        meta.save().await.unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("meta.json")).unwrap()).unwrap();
        assert_eq!(
            json["freePages"]["total"].as_u64().unwrap() as usize,
            json["freePages"]["links"].as_array().unwrap().len()
        );
        assert_eq!(
            json["freeBlocks"]["total"].as_u64().unwrap() as usize,
            json["freeBlocks"]["links"].as_array().unwrap().len()
        );
        assert_eq!(json["isComplete"], true);
    }

    #[tokio::test]
    async fn second_run_merges_free_union_and_earliest_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let first = MetaStore::initialize(path.clone());
        first.begin("https://ui.example.dev/blocks");
        first.finalize(3, vec!["x".into()], Vec::new(), Vec::new(), false);
        first.save().await.unwrap();
        let first_start = first.inner.read().start_time.clone();

        let second = MetaStore::initialize(path.clone());
        second.begin("https://ui.example.dev/blocks");
        second.finalize(6, vec!["y".into()], Vec::new(), Vec::new(), true);
        second.save().await.unwrap();

        let merged: SiteMeta =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(merged.free_pages.links, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(merged.free_pages.total, 2);
        assert_eq!(merged.start_time, first_start);
        assert!(merged.is_complete);
    }
}
