//! In-memory result sink.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::{ItemResult, ResultWriter};

/// Keeps every written result; meant for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    results: Mutex<Vec<ItemResult>>,
}

impl InMemoryResultSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All results in write order.
    #[must_use]
    pub fn results(&self) -> Vec<ItemResult> {
        self.results.lock().clone()
    }

    /// Results of one item.
    #[must_use]
    pub fn for_item(&self, itemid: u64) -> Vec<ItemResult> {
        self.results
            .lock()
            .iter()
            .filter(|r| r.itemid == itemid)
            .cloned()
            .collect()
    }

    /// Fetch results of an item, optionally since a timestamp.
    #[must_use]
    pub fn fetch(&self, itemid: u64, since: Option<DateTime<Utc>>, limit: usize) -> Vec<ItemResult> {
        self.results
            .lock()
            .iter()
            .filter(|r| r.itemid == itemid)
            .filter(|r| since.is_none_or(|s| r.ts >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// True when nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Drops stored results.
    pub fn clear(&self) {
        self.results.lock().clear();
    }
}

impl ResultWriter for InMemoryResultSink {
    fn write(&self, result: ItemResult) {
        self.results.lock().push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::at_second;

    #[test]
    fn fetch_filters_by_item_and_time() {
        let sink = InMemoryResultSink::new();
        sink.write(ItemResult::value(1, "a", at_second(10, 0)));
        sink.write(ItemResult::value(2, "b", at_second(11, 0)));
        sink.write(ItemResult::value(1, "c", at_second(12, 0)));
        sink.write(ItemResult::error(1, "boom", at_second(13, 0)));

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.for_item(2).len(), 1);
        let recent = sink.fetch(1, Some(at_second(12, 0)), 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value.as_deref(), Some("c"));
        assert_eq!(sink.fetch(1, None, 1).len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
