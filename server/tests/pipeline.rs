use auction::models::leaderboard::LeaderboardRow;
use auction_server::configs::server::ServerConfig;
use auction_server::pipeline::{self, Pipeline};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const INPUT: &str = r#"{"name":"alice","price":100,"bid_ts":"2024-01-01T00:00:00"}
{"name":"mallory","price":"a lot","bid_ts":"2024-01-01T00:01:00"}

{"name":"bob","price":150,"bid_ts":"2024-01-01T00:05:00"}
"#;

fn test_config(directory: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.schema_registry.schema_path = None;
    config.consumer.poll_timeout = "20ms".parse().unwrap();
    config.consumer.retry.initial_delay = "5ms".parse().unwrap();
    config.consumer.retry.max_delay = "20ms".parse().unwrap();
    config.sinks.relational.url = format!(
        "sqlite://{}?mode=rwc",
        directory.join("db").join("auction.db").display()
    );
    config.sinks.file.path = directory
        .join("out")
        .join("bids.csv")
        .to_str()
        .unwrap()
        .to_owned();
    config
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

#[tokio::test]
async fn stdin_bids_should_reach_every_sink_and_the_leaderboard() {
    let directory = tempfile::tempdir().unwrap();
    let config = test_config(directory.path());
    let pipeline = Pipeline::assemble(&config).await.unwrap();
    let reader = pipeline.leaderboard_reader().cloned().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(INPUT.as_bytes(), shutdown.clone()));

    let csv_path = directory.path().join("out").join("bids.csv");
    wait_until(|| async {
        let lines = std::fs::read_to_string(&csv_path)
            .map(|content| content.lines().count())
            .unwrap_or_default();
        let highest = reader.highest_bid().await.ok().flatten();
        lines == 2 && highest.is_some_and(|row| row.name == "bob")
    })
    .await;
    shutdown.cancel();
    let reports = task.await.unwrap().unwrap();

    assert_eq!(reports.len(), 3);
    let relational_applied = reports
        .iter()
        .filter(|report| report.group == "relational")
        .map(|report| report.applied)
        .sum::<u64>();
    assert_eq!(relational_applied, 2);
    assert!(reports.iter().all(|report| report.halted.is_empty()));
    assert_eq!(
        std::fs::read_to_string(&csv_path).unwrap(),
        "alice,100,2024-01-01T00:00:00\nbob,150,2024-01-01T00:05:00\n"
    );

    let highest = pipeline::highest_bid(&config).await.unwrap();
    assert_eq!(
        highest,
        Some(LeaderboardRow {
            name: "bob".to_string(),
            price: 150,
            bid_ts: "2024-01-01T00:05:00".to_string(),
        })
    );
}

#[tokio::test]
async fn disabled_sinks_should_not_be_subscribed() {
    let directory = tempfile::tempdir().unwrap();
    let mut config = test_config(directory.path());
    config.sinks.relational.enabled = false;
    config.sinks.file.enabled = false;
    let pipeline = Pipeline::assemble(&config).await.unwrap();
    assert!(pipeline.leaderboard_reader().is_none());

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let reports = pipeline.run(INPUT.as_bytes(), shutdown).await.unwrap();
    assert!(reports.is_empty());
    assert!(!directory.path().join("out").exists());
}

#[tokio::test]
async fn unavailable_warehouse_should_leave_the_other_sinks_running() {
    let directory = tempfile::tempdir().unwrap();
    let mut config = test_config(directory.path());
    config.sinks.relational.enabled = false;
    config.sinks.warehouse.enabled = true;
    config.sinks.warehouse.clickhouse.url = "http://127.0.0.1:1".to_string();
    config.sinks.warehouse.clickhouse.timeout = "500ms".parse().unwrap();
    let pipeline = Pipeline::assemble(&config).await.unwrap();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(INPUT.as_bytes(), shutdown.clone()));
    let csv_path = directory.path().join("out").join("bids.csv");
    wait_until(|| async {
        std::fs::read_to_string(&csv_path)
            .map(|content| content.lines().count() == 2)
            .unwrap_or_default()
    })
    .await;
    shutdown.cancel();

    let reports = task.await.unwrap().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].group, "file");
}

/// Answers the ClickHouse ping but rejects every statement with a server error.
async fn start_failing_warehouse() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match stream.read(&mut buffer).await {
                        Ok(0) | Err(_) => return,
                        Ok(read) => request.extend_from_slice(&buffer[..read]),
                    }
                }
                let response = if request.starts_with(b"GET /ping") {
                    "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nOk.\n"
                } else {
                    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 8\r\nConnection: close\r\n\r\nreadonly"
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{address}")
}

#[tokio::test]
async fn warehouse_failing_table_creation_should_leave_the_other_sinks_running() {
    let directory = tempfile::tempdir().unwrap();
    let mut config = test_config(directory.path());
    config.sinks.warehouse.enabled = true;
    config.sinks.warehouse.ensure_table = true;
    config.sinks.warehouse.clickhouse.url = start_failing_warehouse().await;
    config.sinks.warehouse.clickhouse.timeout = "2s".parse().unwrap();
    let pipeline = Pipeline::assemble(&config).await.unwrap();
    let reader = pipeline.leaderboard_reader().cloned().unwrap();

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(INPUT.as_bytes(), shutdown.clone()));
    let csv_path = directory.path().join("out").join("bids.csv");
    wait_until(|| async {
        let lines = std::fs::read_to_string(&csv_path)
            .map(|content| content.lines().count())
            .unwrap_or_default();
        let highest = reader.highest_bid().await.ok().flatten();
        lines == 2 && highest.is_some_and(|row| row.name == "bob")
    })
    .await;
    shutdown.cancel();

    let reports = task.await.unwrap().unwrap();
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|report| report.group != "warehouse"));
    assert!(reports.iter().all(|report| report.halted.is_empty()));
}

#[tokio::test]
async fn pinned_schema_version_mismatch_should_fail_assembly() {
    let directory = tempfile::tempdir().unwrap();
    let mut config = test_config(directory.path());
    config.schema_registry.version = Some(2);
    assert!(Pipeline::assemble(&config).await.is_err());
}
