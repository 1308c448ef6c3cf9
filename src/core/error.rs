//! 错误处理体系 (Error Handling System)
//!
//! 定义领域相关的错误类型、用户中止判定以及全局 Result 别名。

use thiserror::Error;

/// 用户中止的典型错误信息片段
///
/// 浏览器驱动在进程拆除时抛出的导航错误会命中其中之一。
const ABORT_PATTERNS: &[&str] = &[
    "Target page, context or browser has been closed",
    "Test ended",
    "Browser closed",
    "Target closed",
];

/// 全局错误定义 (Crawl Domain Errors)
#[derive(Error, Debug)]
pub enum CrawlError {
    /// 凭据文件缺失或格式损坏
    #[error("Auth credentials missing: {0}")]
    AuthMissing(String),

    /// 登录表单结构不符合自动填充假设
    #[error("Auth form unsupported: {0}")]
    AuthFormUnsupported(String),

    /// 提交后未观察到跳出登录页
    #[error("Auth not confirmed: still on {0}")]
    AuthNotConfirmed(String),

    /// 驱动被拆除，任务静默结束
    #[error("User abort: {0}")]
    UserAbort(String),

    /// 区块名称提取在重试后仍为空
    #[error("Block name extraction failed at {0}")]
    NameExtractionFailed(String),

    /// 免费标记匹配到多于一处文本
    #[error("Free marker ambiguous: {hits} hits for {pattern:?}")]
    FreeAmbiguous { pattern: String, hits: usize },

    /// 页面声明的区块数与实际定位数不一致
    #[error("Block count mismatch at {page}: expected {expected}, actual {actual}")]
    BlockCountMismatch {
        page: String,
        expected: u32,
        actual: u32,
    },

    /// 用户处理器抛出的错误
    #[error("Handler error: {0}")]
    Handler(String),

    /// 标题结构复杂且没有可用链接
    #[error("Complex heading without link at {0}")]
    ComplexHeading(String),

    /// 浏览器驱动层错误（导航超时、定位失败等）
    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Other error: {0}")]
    Custom(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, CrawlError>;

impl CrawlError {
    /// 判定错误是否源于用户主动拆除驱动
    ///
    /// 此类错误既不计成功也不计失败。
    pub fn is_user_abort(&self) -> bool {
        match self {
            CrawlError::UserAbort(_) => true,
            CrawlError::Driver(msg) | CrawlError::Custom(msg) | CrawlError::Handler(msg) => {
                ABORT_PATTERNS.iter().any(|p| msg.contains(p))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_teardown_counts_as_abort() {
        let e = CrawlError::Driver("Target page, context or browser has been closed".into());
        assert!(e.is_user_abort());

        let e = CrawlError::Handler("navigation failed: Browser closed".into());
        assert!(e.is_user_abort());

        let e = CrawlError::Driver("net::ERR_TIMED_OUT".into());
        assert!(!e.is_user_abort());
    }
}
