//! 事件系统定义
//!
//! 用于 Engine 与 UI 之间的完全解耦通信

use flume::{Receiver, Sender};

/// 爬取事件类型
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// 流水线开始
    RunStarted { site: String, start_url: String },

    /// 工作集就绪（新收集或从 collect.json 加载）
    CollectReady {
        total_links: usize,
        total_blocks: u32,
        loaded_from_disk: bool,
    },

    /// 链接任务开始
    LinkStarted { path: String },

    /// 链接任务跳过
    LinkSkipped { path: String, reason: SkipReason },

    /// 链接任务完成
    LinkCompleted { path: String },

    /// 链接任务失败
    LinkFailed { path: String, error: String },

    /// 单个区块处理完成
    BlockCompleted { block_path: String },

    /// 检测到免费标记
    FreeDetected { path: String, block: Option<String> },

    /// 计数偏差被记录
    MismatchRecorded {
        path: String,
        expected: u32,
        actual: u32,
    },

    /// 流水线结束
    RunCompleted {
        completed: usize,
        previously_completed: usize,
        failed: usize,
        free: usize,
    },

    /// 流水线失败
    RunFailed { error: String },
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 进度记录中已完成
    Completed,
    /// 免费目录中已知
    KnownFree,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Completed => write!(f, "skip-completed"),
            SkipReason::KnownFree => write!(f, "skip-known-free"),
        }
    }
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<CrawlEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<CrawlEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件
    pub fn emit(&self, event: CrawlEvent) {
        let _ = self.tx.send(event);
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<CrawlEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<CrawlEvent>) -> Self {
        Self { rx }
    }

    /// 阻塞接收事件
    pub fn recv(&self) -> Option<CrawlEvent> {
        self.rx.recv().ok()
    }

    /// 非阻塞接收事件
    pub fn try_recv(&self) -> Option<CrawlEvent> {
        self.rx.try_recv().ok()
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<CrawlEvent> {
        self.rx.recv_async().await.ok()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
