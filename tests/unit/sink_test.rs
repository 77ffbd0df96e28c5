//! Tests for result sinks

use prometheus_agent_scheduler::core::{ItemResult, ResultWriter};
use prometheus_agent_scheduler::infra::{ChannelSink, InMemoryResultSink};
use prometheus_agent_scheduler::util::at_second;

#[test]
fn test_in_memory_sink_fetch() {
    let sink = InMemoryResultSink::new();
    for second in 1..=5 {
        sink.write(ItemResult::value(1, second.to_string(), at_second(second, 0)));
    }
    sink.write(ItemResult::error(2, "failed", at_second(3, 0)));

    assert_eq!(sink.len(), 6);
    assert_eq!(sink.for_item(2).len(), 1);
    let recent = sink.fetch(1, Some(at_second(3, 0)), 10);
    assert_eq!(
        recent.iter().filter_map(|r| r.value.as_deref()).collect::<Vec<_>>(),
        vec!["3", "4", "5"]
    );
    assert_eq!(sink.fetch(1, None, 2).len(), 2);

    sink.clear();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_channel_sink_delivers_until_full() {
    let (sink, mut rx) = ChannelSink::channel(2);
    assert_eq!(sink.slots_available(), 2);
    sink.write(ItemResult::value(1, "a", at_second(1, 0)));
    sink.write(ItemResult::value(1, "b", at_second(1, 0)));
    sink.write(ItemResult::value(1, "dropped", at_second(1, 0)));
    assert_eq!(sink.slots_available(), 0);

    assert_eq!(rx.recv().await.unwrap().value.as_deref(), Some("a"));
    assert_eq!(rx.recv().await.unwrap().value.as_deref(), Some("b"));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_item_result_log_meta() {
    let result = ItemResult::value(9, "line", at_second(0, 0)).with_log_meta(512, 1_700_000_000);
    assert_eq!(result.last_logsize, Some(512));
    assert_eq!(result.mtime, Some(1_700_000_000));
    assert!(!result.is_error());
}
