//! End-to-end request flow over an in-memory shard source.
//!
//! Exercises the whole pipeline below the HTTP boundary: task planning,
//! bounded fetching, k-way merging, streaming delivery, and replay decoding,
//! asserting in particular that the streaming and materialized paths produce
//! identical sequences.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use exd_client::{
    Client, Error, FetchTask, Filter, Line, LineType, ReplayMessage, Shard, ShardSource, TaskUnit,
    TextLine,
};
use exd_core::NANOS_PER_MINUTE;

/// Serves canned shards keyed by (exchange, unit); anything unkeyed is an
/// empty shard. Records every fetch for scheduling assertions.
struct CannedSource {
    shards: HashMap<(String, TaskUnit), Shard>,
    fail_on: Option<(String, TaskUnit)>,
    fetches: AtomicUsize,
    seen_channels: Mutex<Vec<(String, Vec<String>)>>,
}

impl CannedSource {
    fn new() -> Self {
        Self {
            shards: HashMap::new(),
            fail_on: None,
            fetches: AtomicUsize::new(0),
            seen_channels: Mutex::new(Vec::new()),
        }
    }

    fn shard(mut self, exchange: &str, unit: TaskUnit, lines: Vec<TextLine>) -> Self {
        self.shards.insert((exchange.to_string(), unit), lines);
        self
    }

    fn failing_on(mut self, exchange: &str, unit: TaskUnit) -> Self {
        self.fail_on = Some((exchange.to_string(), unit));
        self
    }
}

#[async_trait]
impl ShardSource for CannedSource {
    async fn fetch(&self, task: &FetchTask) -> exd_client::Result<Shard> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.seen_channels
            .lock()
            .unwrap()
            .push((task.exchange.clone(), task.channels.clone()));
        if let Some((exchange, unit)) = &self.fail_on {
            if task.exchange == *exchange && task.unit == *unit {
                return Err(Error::Transport {
                    path: format!("filter/{exchange}"),
                    status: 500,
                    message: "internal error".to_string(),
                });
            }
        }
        Ok(self
            .shards
            .get(&(task.exchange.clone(), task.unit))
            .cloned()
            .unwrap_or_default())
    }
}

fn msg(exchange: &str, channel: &str, timestamp: i64, message: &str) -> TextLine {
    Line {
        exchange: exchange.to_string(),
        kind: LineType::Message,
        timestamp,
        channel: Some(channel.to_string()),
        message: Some(message.to_string()),
    }
}

fn client_over(source: CannedSource) -> (Client, Arc<CannedSource>) {
    let source = Arc::new(source);
    let client = Client::new("integration-test-key")
        .unwrap()
        .with_shard_source(Arc::clone(&source) as Arc<dyn ShardSource>);
    (client, source)
}

/// Two exchanges over a two-minute range, with lines interleaved so a plain
/// concatenation would be out of order.
fn interleaved_source(start: i64) -> CannedSource {
    CannedSource::new()
        .shard(
            "bitmex",
            TaskUnit::Snapshot { at: start },
            vec![msg("bitmex", "orderBookL2", start, "snap-a")],
        )
        .shard(
            "bitmex",
            TaskUnit::Filter { minute: 0 },
            vec![
                msg("bitmex", "trade", 10, "a10"),
                msg("bitmex", "trade", 30, "a30"),
            ],
        )
        .shard(
            "bitmex",
            TaskUnit::Filter { minute: 1 },
            vec![msg("bitmex", "trade", NANOS_PER_MINUTE + 5, "a65")],
        )
        .shard(
            "bitflyer",
            TaskUnit::Filter { minute: 0 },
            vec![
                msg("bitflyer", "executions", 20, "b20"),
                msg("bitflyer", "executions", 25, "b25"),
            ],
        )
        .shard(
            "bitflyer",
            TaskUnit::Filter { minute: 1 },
            vec![msg("bitflyer", "executions", NANOS_PER_MINUTE + 2, "b62")],
        )
}

fn two_exchange_filter() -> Filter {
    Filter::new()
        .exchange("bitmex", ["orderBookL2", "trade"])
        .exchange("bitflyer", ["executions"])
}

#[tokio::test]
async fn download_yields_one_time_ordered_sequence() {
    let (client, _) = client_over(interleaved_source(0));
    let request = client
        .raw(two_exchange_filter(), 0i64, 2 * NANOS_PER_MINUTE, None)
        .unwrap();

    let lines = request.download().await.unwrap();
    let messages: Vec<&str> = lines
        .iter()
        .map(|line| line.message.as_deref().unwrap())
        .collect();
    assert_eq!(
        messages,
        ["snap-a", "a10", "b20", "b25", "a30", "b62", "a65"]
    );

    let timestamps: Vec<i64> = lines.iter().map(|line| line.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_unstable();
    assert_eq!(timestamps, sorted);
}

#[tokio::test]
async fn equal_timestamps_keep_filter_insertion_order() {
    let source = CannedSource::new()
        .shard(
            "bitmex",
            TaskUnit::Filter { minute: 0 },
            vec![msg("bitmex", "trade", 50, "first-exchange")],
        )
        .shard(
            "bitflyer",
            TaskUnit::Filter { minute: 0 },
            vec![msg("bitflyer", "executions", 50, "second-exchange")],
        );
    let (client, _) = client_over(source);
    let request = client
        .raw(two_exchange_filter(), 0i64, NANOS_PER_MINUTE, None)
        .unwrap();

    let lines = request.download().await.unwrap();
    let messages: Vec<&str> = lines
        .iter()
        .map(|line| line.message.as_deref().unwrap())
        .collect();
    assert_eq!(messages, ["first-exchange", "second-exchange"]);
}

#[tokio::test]
async fn stream_matches_download_line_for_line() {
    let (client, _) = client_over(interleaved_source(0));
    let request = client
        .raw(two_exchange_filter(), 0i64, 2 * NANOS_PER_MINUTE, None)
        .unwrap();

    let downloaded = request.download().await.unwrap();

    let mut streamed = Vec::new();
    let mut stream = request.stream_with_watermark(2);
    while let Some(line) = stream.next_line().await {
        streamed.push(line.unwrap());
    }

    assert_eq!(streamed, downloaded);
    // Closed after exhaustion.
    assert!(stream.next_line().await.is_none());
}

#[tokio::test]
async fn empty_range_yields_empty_sequence_not_an_error() {
    let (client, source) = client_over(CannedSource::new());
    let request = client
        .raw(two_exchange_filter(), 0i64, NANOS_PER_MINUTE, None)
        .unwrap();

    assert!(request.download().await.unwrap().is_empty());

    let mut stream = request.stream();
    assert!(stream.next_line().await.is_none());
    // snapshot + one minute per exchange, fetched by both paths.
    assert_eq!(source.fetches.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn stream_does_not_fetch_until_first_pull() {
    let (client, source) = client_over(interleaved_source(0));
    let request = client
        .raw(two_exchange_filter(), 0i64, NANOS_PER_MINUTE, None)
        .unwrap();

    let mut stream = request.stream();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

    assert!(stream.next_line().await.is_some());
    assert!(source.fetches.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn download_fails_atomically_on_any_task_failure() {
    let source = interleaved_source(0).failing_on("bitflyer", TaskUnit::Filter { minute: 1 });
    let (client, _) = client_over(source);
    let request = client
        .raw(two_exchange_filter(), 0i64, 2 * NANOS_PER_MINUTE, None)
        .unwrap();

    assert!(matches!(
        request.download().await,
        Err(Error::Transport { status: 500, .. })
    ));
}

#[tokio::test]
async fn stream_surfaces_a_terminal_error_then_closes() {
    let source = interleaved_source(0).failing_on("bitflyer", TaskUnit::Filter { minute: 1 });
    let (client, _) = client_over(source);
    let request = client
        .raw(two_exchange_filter(), 0i64, 2 * NANOS_PER_MINUTE, None)
        .unwrap();

    let mut stream = request.stream();
    let mut saw_error = false;
    while let Some(line) = stream.next_line().await {
        match line {
            Ok(_) => assert!(!saw_error, "no lines after the error"),
            Err(Error::Transport { status: 500, .. }) => saw_error = true,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(saw_error);
    assert!(stream.next_line().await.is_none());
}

#[tokio::test]
async fn replay_fetches_collapsed_raw_channels_and_decodes() {
    // The store records bitmex instrument channels under their generic
    // names, so "trade_XBTUSD" must be fetched as "trade".
    let source = CannedSource::new().shard(
        "bitmex",
        TaskUnit::Filter { minute: 0 },
        vec![
            msg("bitmex", "trade", 1, r#"{"timestamp":"timestamp","price":"symbol","pair":"symbol"}"#),
            msg(
                "bitmex",
                "trade",
                2,
                r#"{"timestamp":"1577836800000000000","price":"7000","pair":"XBTUSD"}"#,
            ),
            msg(
                "bitmex",
                "trade",
                3,
                r#"{"timestamp":"1577836800000000100","price":"150","pair":"ETHUSD"}"#,
            ),
        ],
    );
    let (client, source) = client_over(source);
    let filter = Filter::new().exchange("bitmex", ["trade_XBTUSD"]);
    let request = client.replay(filter, 0i64, NANOS_PER_MINUTE).unwrap();

    let lines = request.download().await.unwrap();
    assert_eq!(lines.len(), 1, "schema line consumed, ETHUSD dropped");
    let line = &lines[0];
    assert_eq!(line.channel.as_deref(), Some("trade_XBTUSD"));
    let fields = line
        .message
        .as_ref()
        .and_then(ReplayMessage::fields)
        .unwrap();
    assert_eq!(fields["timestamp"], 1_577_836_800_000_000_000i64);
    assert_eq!(fields["price"], "7000");

    for (_, channels) in source.seen_channels.lock().unwrap().iter() {
        assert_eq!(channels, &["trade".to_string()]);
    }
}

#[tokio::test]
async fn replay_stream_closes_after_a_decode_error() {
    let source = CannedSource::new().shard(
        "bitmex",
        TaskUnit::Filter { minute: 0 },
        vec![
            msg("bitmex", "trade", 1, r#"{"size":"timestamp","pair":"symbol"}"#),
            msg("bitmex", "trade", 2, "not json"),
            msg("bitmex", "trade", 3, r#"{"size":"10","pair":"XBTUSD"}"#),
        ],
    );
    let (client, _) = client_over(source);
    let filter = Filter::new().exchange("bitmex", ["trade_XBTUSD"]);
    let request = client.replay(filter, 0i64, NANOS_PER_MINUTE).unwrap();

    let mut stream = request.stream();
    assert!(matches!(
        stream.next_line().await,
        Some(Err(Error::Decode(_)))
    ));
    // The decodable line behind the failure must not surface.
    assert!(stream.next_line().await.is_none());
    assert!(stream.next_line().await.is_none());
}

#[tokio::test]
async fn replay_stream_matches_replay_download() {
    let source = CannedSource::new().shard(
        "bitmex",
        TaskUnit::Filter { minute: 0 },
        vec![
            msg("bitmex", "trade", 1, r#"{"size":"timestamp","pair":"symbol"}"#),
            msg("bitmex", "trade", 2, r#"{"size":"10","pair":"XBTUSD"}"#),
            msg("bitmex", "trade", 3, r#"{"size":"20","pair":"XBTUSD"}"#),
        ],
    );
    let (client, _) = client_over(source);
    let filter = Filter::new().exchange("bitmex", ["trade_XBTUSD"]);
    let request = client.replay(filter, 0i64, NANOS_PER_MINUTE).unwrap();

    let downloaded = request.download().await.unwrap();
    assert_eq!(downloaded.len(), 2);

    let mut streamed = Vec::new();
    let mut stream = request.stream();
    while let Some(line) = stream.next_line().await {
        streamed.push(line.unwrap());
    }
    assert_eq!(streamed, downloaded);
}
