use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::config::RuntimeConfig;
use crate::utils::host_of;

/// 收集到的单条链接
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionLink {
    /// 相对 URL 路径，站点内主键
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_count: Option<u32>,
}

/// 预计算的工作集 (collect.json)
///
/// 一经写盘即不可变；重跑时直接加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResult {
    pub last_update: String,
    pub total_links: u32,
    pub total_blocks: u32,
    pub collections: Vec<CollectionLink>,
}

impl CollectResult {
    /// 由链接序列构造，总数字段在此一次性算定
    pub fn new(collections: Vec<CollectionLink>) -> Self {
        let total_links = collections.len() as u32;
        let total_blocks = collections.iter().filter_map(|c| c.block_count).sum();
        Self {
            last_update: chrono::Utc::now().to_rfc3339(),
            total_links,
            total_blocks,
            collections,
        }
    }
}

/// 期望数与实际数的偏差记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MismatchEntry {
    pub page_path: String,
    pub expected: u32,
    pub actual: u32,
}

/// 站点级磁盘路径集合
///
/// 由起始 URL 的主机名派生；构造是纯字符串运算，不触碰文件系统。
#[derive(Debug, Clone)]
pub struct SitePaths {
    pub host: String,
    /// 用户可见产物目录 output/H/
    pub output_dir: PathBuf,
    /// 状态目录 stateBase/H/
    pub state_dir: PathBuf,
}

impl SitePaths {
    /// 从起始 URL 派生路径集合
    pub fn derive(runtime: &RuntimeConfig, start_url: &str) -> Self {
        let host = host_of(start_url);
        Self {
            output_dir: PathBuf::from(&runtime.output_base_dir).join(&host),
            state_dir: PathBuf::from(&runtime.state_base_dir).join(&host),
            host,
        }
    }

    pub fn collect_file(&self) -> PathBuf {
        self.state_dir.join("collect.json")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.state_dir.join("progress.json")
    }

    pub fn free_file(&self) -> PathBuf {
        self.state_dir.join("free.json")
    }

    pub fn meta_file(&self) -> PathBuf {
        self.state_dir.join("meta.json")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.state_dir.join("auth.json")
    }

    pub fn filename_mapping_file(&self) -> PathBuf {
        self.state_dir.join("filename-mapping.json")
    }

    pub fn env_file(&self) -> PathBuf {
        self.state_dir.join(".env")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.state_dir.join("scripts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_follow_collections() {
        let result = CollectResult::new(vec![
            CollectionLink {
                link: "/a".into(),
                name: Some("Alpha".into()),
                block_count: Some(5),
            },
            CollectionLink {
                link: "/b".into(),
                name: Some("Beta".into()),
                block_count: None,
            },
        ]);
        assert_eq!(result.total_links, 2);
        assert_eq!(result.total_blocks, 5);
    }

    #[test]
    fn paths_derive_from_host() {
        let rt = RuntimeConfig::default();
        let paths = SitePaths::derive(&rt, "https://ui.example.dev/blocks");
        assert_eq!(paths.host, "ui.example.dev");
        assert_eq!(
            paths.collect_file(),
            PathBuf::from(".crawler/ui.example.dev/collect.json")
        );
        assert_eq!(paths.output_dir, PathBuf::from("output/ui.example.dev"));

        let fallback = SitePaths::derive(&rt, "::bad::");
        assert_eq!(fallback.host, "default");
    }

    #[test]
    fn collect_json_shape_is_stable() {
        let result = CollectResult::new(vec![CollectionLink {
            link: "/a".into(),
            name: None,
            block_count: Some(3),
        }]);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("totalLinks").is_some());
        assert!(json.get("totalBlocks").is_some());
        assert!(json.get("lastUpdate").is_some());
        assert!(json["collections"][0].get("name").is_none());
    }
}
