use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stream_receiver::{Producer, ReceiverConfig, StreamingService, TaskParams};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ReceiverConfig {
    ReceiverConfig {
        stream_port: 0,
        fanout_port: 0,
        raw_fanout_port: 0,
        poll_timeout_ms: 20,
        ..ReceiverConfig::default()
    }
}

fn capture_frames(service: &StreamingService) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    service.set_callback(Arc::new(move |frame| {
        let _ = tx.send(frame.to_string());
    }));
    rx
}

async fn connect_terminal(service: &StreamingService) -> TcpStream {
    TcpStream::connect(service.local_stream_addr().unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn stop_is_idempotent_and_safe_before_start() {
    let service = StreamingService::new(test_config());
    assert!(!service.is_running());

    service.stop().await;
    assert!(!service.is_running());

    service.start().await.unwrap();
    assert!(service.is_running());

    service.stop().await;
    assert!(!service.is_running());
    service.stop().await;
}

#[tokio::test]
async fn shutdown_is_observed_with_a_subscriber_still_connected() {
    let service = StreamingService::new(test_config());
    service.start().await.unwrap();

    let _subscriber = TcpStream::connect(service.local_fanout_addr().unwrap())
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    // stop() joins the poll cycle; it must come back promptly even though a
    // fan-out consumer never disconnected.
    timeout(Duration::from_secs(2), service.stop()).await.unwrap();
    assert!(!service.is_running());
}

#[tokio::test]
async fn pushed_frames_are_enriched_and_delivered_to_the_callback() {
    let service = StreamingService::new(test_config());
    let mut frames = capture_frames(&service);
    service.start().await.unwrap();

    let mut terminal = connect_terminal(&service).await;
    terminal
        .write_all(b"{\"type\":\"tick\",\"symbol\":\"EURUSD\",\"time\":1700000000}\r\n")
        .await
        .unwrap();

    let frame = timeout(RECV_TIMEOUT, frames.recv()).await.unwrap().unwrap();
    let record: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(record["time"], 1_700_000_000);
    assert_eq!(record["time_human"], "2023-11-14 22:13:20");

    service.stop().await;
}

#[tokio::test]
async fn a_malformed_frame_closes_only_its_connection() {
    let service = StreamingService::new(test_config());
    let mut frames = capture_frames(&service);
    service.start().await.unwrap();

    // No delimiter, not JSON: the service drops this connection.
    let mut bad = connect_terminal(&service).await;
    bad.write_all(b"not-json-at-all\r\n").await.unwrap();

    // The connection is closed from the service side.
    let mut probe = [0u8; 16];
    let closed = timeout(RECV_TIMEOUT, bad.read(&mut probe)).await.unwrap();
    assert_eq!(closed.unwrap(), 0);

    // A fresh connection with a well-formed frame still flows.
    let mut good = connect_terminal(&service).await;
    good.write_all(b"{\"time\":1700000000}\r\n").await.unwrap();
    let frame = timeout(RECV_TIMEOUT, frames.recv()).await.unwrap().unwrap();
    assert!(frame.contains("time_human"));
    assert!(service.is_running());

    service.stop().await;
}

#[tokio::test]
async fn fanout_survives_a_subscriber_dropping_mid_broadcast() {
    let service = StreamingService::new(test_config());
    service.start().await.unwrap();
    let fanout = service.local_fanout_addr().unwrap();

    let a = TcpStream::connect(fanout).await.unwrap();
    let b = TcpStream::connect(fanout).await.unwrap();
    let c = TcpStream::connect(fanout).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // One consumer goes away without saying goodbye.
    drop(b);

    let mut terminal = connect_terminal(&service).await;
    terminal
        .write_all(b"{\"seq\":1,\"time\":1700000000}\r\n{\"seq\":2,\"time\":1700000001}\r\n")
        .await
        .unwrap();

    for stream in [a, c] {
        let mut lines = BufReader::new(stream).lines();
        let first = timeout(RECV_TIMEOUT, lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let record: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(record["seq"], 1);

        let second = timeout(RECV_TIMEOUT, lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let record: Value = serde_json::from_str(&second).unwrap();
        assert_eq!(record["seq"], 2);
    }

    assert!(service.is_running());
    service.stop().await;
}

#[tokio::test]
async fn raw_transport_carries_the_same_frames() {
    let service = StreamingService::new(test_config());
    service.start().await.unwrap();

    let raw = TcpStream::connect(service.local_raw_fanout_addr().unwrap())
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(service.raw_subscriber_count(), 1);

    let mut terminal = connect_terminal(&service).await;
    terminal
        .write_all(b"{\"time\":1700000000}\r\n")
        .await
        .unwrap();

    let mut lines = BufReader::new(raw).lines();
    let line = timeout(RECV_TIMEOUT, lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(line.contains("time_human"));

    service.stop().await;
}

#[tokio::test]
async fn stream_tasks_produce_frames_until_unsubscribed() {
    let service = StreamingService::new(test_config());
    let mut frames = capture_frames(&service);
    service.start().await.unwrap();

    let symbols = vec!["EURUSD".to_string()];
    let producer: Producer = Arc::new(|symbol: &str, params: &TaskParams| {
        Some(json!({
            "symbol": symbol,
            "timeframe": params.timeframe,
            "time": 1_700_000_000i64,
        }))
    });

    let added = service.subscribe(
        "req-7",
        &symbols,
        Duration::from_millis(30),
        producer.clone(),
        TaskParams { timeframe: Some(1), ..TaskParams::default() },
    );
    assert_eq!(added, 1);

    // Identical re-subscription leaves exactly one task in the table.
    let added = service.subscribe(
        "req-7",
        &symbols,
        Duration::from_millis(30),
        producer,
        TaskParams { timeframe: Some(1), ..TaskParams::default() },
    );
    assert_eq!(added, 0);
    assert_eq!(service.task_count(), 1);

    let frame = timeout(RECV_TIMEOUT, frames.recv()).await.unwrap().unwrap();
    let record: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(record["symbol"], "EURUSD");
    assert_eq!(record["time_human"], "2023-11-14 22:13:20");

    assert_eq!(service.unsubscribe("req-7", &symbols), 1);
    assert_eq!(service.task_count(), 0);
    assert_eq!(service.unsubscribe("req-7", &symbols), 0);

    service.stop().await;
}
