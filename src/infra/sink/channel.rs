//! Channel backed result sink.

use tokio::sync::mpsc;
use tracing::warn;

use crate::core::{ItemResult, ResultWriter};

/// Forwards results to a bounded channel without blocking the writer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ItemResult>,
}

impl ChannelSink {
    /// Sink over `tx`.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<ItemResult>) -> Self {
        Self { tx }
    }

    /// Sink and the receiving end of a new channel of `capacity` results.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ItemResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ResultWriter for ChannelSink {
    fn write(&self, result: ItemResult) {
        let itemid = result.itemid;
        if let Err(err) = self.tx.try_send(result) {
            warn!(itemid, "dropping item result: {}", err);
        }
    }

    fn slots_available(&self) -> usize {
        self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::at_second;

    #[test]
    fn forwards_until_full() {
        let (sink, mut rx) = ChannelSink::channel(1);
        assert_eq!(sink.slots_available(), 1);
        sink.write(ItemResult::value(1, "x", at_second(1, 0)));
        sink.write(ItemResult::value(2, "y", at_second(1, 0)));
        assert_eq!(rx.try_recv().map(|r| r.itemid), Ok(1));
        assert!(rx.try_recv().is_err());
    }
}
