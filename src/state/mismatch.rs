//! 计数偏差记录
//!
//! 期望区块数与实际定位数不一致时登记；随 meta.json 一并落盘。

use parking_lot::RwLock;

use crate::core::model::MismatchEntry;

/// 偏差记录存储
#[derive(Default)]
pub struct MismatchStore {
    inner: RwLock<Vec<MismatchEntry>>,
}

impl MismatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条偏差；同一页面重复登记只保留首条
    pub fn record(&self, page_path: &str, expected: u32, actual: u32) {
        let mut inner = self.inner.write();
        if inner.iter().any(|e| e.page_path == page_path) {
            return;
        }
        inner.push(MismatchEntry {
            page_path: page_path.to_string(),
            expected,
            actual,
        });
    }

    pub fn entries(&self) -> Vec<MismatchEntry> {
        self.inner.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_pages_keep_first_entry() {
        let store = MismatchStore::new();
        store.record("a", 7, 6);
        store.record("a", 7, 5);
        store.record("b", 3, 4);

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].actual, 6);
    }
}
