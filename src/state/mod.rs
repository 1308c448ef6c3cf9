//! 持久化状态层 (Durable State)
//!
//! 进度、免费目录、偏差、文件名映射与运行摘要；全部经由原子
//! JSON 存储落盘，并提供统一的冲刷入口供各退出路径复用。

mod filename;
mod free;
mod meta;
mod mismatch;
mod progress;
pub mod store;

pub use filename::FilenameMappingStore;
pub use free::FreeStore;
pub use meta::{MetaStore, SiteMeta};
pub use mismatch::MismatchStore;
pub use progress::ProgressStore;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::config::ProgressConfig;
use crate::core::error::Result;
use crate::core::model::SitePaths;

/// 一次运行的全部可变状态
///
/// 由 Orchestrator 独占持有；链接任务借引用追加，不得改写。
pub struct StateSet {
    pub progress: ProgressStore,
    pub free: FreeStore,
    pub mismatch: MismatchStore,
    pub filenames: FilenameMappingStore,
    pub meta: MetaStore,
}

impl StateSet {
    /// 从状态目录加载或新建全部记录
    pub fn initialize(paths: &SitePaths, progress_cfg: ProgressConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            progress: ProgressStore::initialize(paths.progress_file(), progress_cfg)?,
            free: FreeStore::initialize(paths.free_file())?,
            mismatch: MismatchStore::new(),
            filenames: FilenameMappingStore::initialize(paths.filename_mapping_file())?,
            meta: MetaStore::initialize(paths.meta_file()),
        }))
    }

    /// 异步冲刷全部记录（正常结束路径）
    pub async fn flush_all(&self) -> Result<()> {
        self.progress.save().await?;
        self.free.save().await?;
        self.filenames.save().await?;
        self.meta.save().await?;
        debug!("状态记录已全部落盘");
        Ok(())
    }

    /// 同步冲刷（信号处理路径，尽力而为）
    pub fn flush_all_sync(&self) {
        for (name, result) in [
            ("progress", self.progress.save_sync()),
            ("free", self.free.save_sync()),
            ("filename-mapping", self.filenames.save_sync()),
            ("meta", self.meta.save_sync()),
        ] {
            if let Err(e) = result {
                warn!("信号冲刷 {} 失败: {}", name, e);
            }
        }
    }
}
