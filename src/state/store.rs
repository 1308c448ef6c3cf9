//! 原子 JSON 读写 (Atomic JSON Store)
//!
//! 写临时文件、fsync、改名覆盖；失败按固定退避重试。
//! 同步版本供信号处理路径使用。

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::core::error::Result;

const SAVE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// 加载 JSON 文件，不存在时返回 None
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// 同步加载（启动路径专用）
pub fn load_json_sync<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// 原子保存，最多重试 3 次
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let mut last_err = None;
    for attempt in 1..=SAVE_ATTEMPTS {
        match write_atomic(path, &bytes).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("状态写入失败 ({}，第 {}/{} 次): {}", path.display(), attempt, SAVE_ATTEMPTS, e);
                last_err = Some(e);
                if attempt < SAVE_ATTEMPTS {
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
    Err(last_err.expect("retry loop ran at least once").into())
}

/// 同步原子保存（信号处理路径专用，不可持有异步资源）
pub fn save_json_sync<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;

    let mut last_err = None;
    for attempt in 1..=SAVE_ATTEMPTS {
        match write_atomic_sync(path, &bytes) {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                if attempt < SAVE_ATTEMPTS {
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }
    Err(last_err.expect("retry loop ran at least once").into())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");

    {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(&tmp, path).await
}

fn write_atomic_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp, path)
}
