//! End-to-end engine tests against an in-process mock streaming server.
//!
//! The mock speaks the default wire format: it greets with the
//! connection-established event, acks subscribe requests (unless told not
//! to), and can publish channel data on an interval with an embedded
//! publish timestamp.

use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use filter_bench::config::RunConfig;
use filter_bench::runner;

#[derive(Debug, Clone, Copy)]
struct ServerBehavior {
    /// Acknowledge subscribe requests
    ack: bool,
    /// Publish a channel data message this often once subscribed
    publish_interval_ms: Option<u64>,
}

async fn spawn_server(behavior: ServerBehavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, behavior));
        }
    });
    addr
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn serve_connection(stream: TcpStream, behavior: ServerBehavior) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    if write
        .send(Message::Text(
            json!({"event": "pusher:connection_established", "data": {}}).to_string(),
        ))
        .await
        .is_err()
    {
        return;
    }

    let mut publish = behavior
        .publish_interval_ms
        .map(|ms| tokio::time::interval(Duration::from_millis(ms)));
    let mut channel: Option<String> = None;

    loop {
        tokio::select! {
            Some(_) = async {
                match publish.as_mut() {
                    Some(timer) => {
                        timer.tick().await;
                        Some(())
                    }
                    None => None,
                }
            } => {
                if let Some(ch) = &channel {
                    let frame = json!({
                        "event": "price_update",
                        "channel": ch,
                        "tags": {"timestamp": now_ms()},
                        "data": {"price": 1.25},
                    })
                    .to_string();
                    if write.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
            }

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if value["event"] == "pusher:subscribe" && behavior.ack {
                        let ch = value["data"]["channel"].as_str().unwrap_or("").to_string();
                        let ack = json!({
                            "event": "pusher_internal:subscription_succeeded",
                            "channel": ch.as_str(),
                            "data": {},
                        })
                        .to_string();
                        if write.send(Message::Text(ack)).await.is_err() {
                            break;
                        }
                        channel = Some(ch);
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }
}

/// Short schedule shared by the tests: 1s ramp, 2s hold, 1s ramp-down.
fn test_config(addr: SocketAddr, num_clients: usize, scenario: u8) -> RunConfig {
    RunConfig {
        ws_host: "127.0.0.1".to_string(),
        ws_port: addr.port(),
        app_key: "test-key".to_string(),
        channel: "bench_events".to_string(),
        scenario,
        num_clients,
        ramp_up_secs: 1,
        warmup_secs: 0,
        hold_secs: 2,
        ramp_down_secs: 1,
        grace_secs: 5,
        connect_timeout_ms: 3_000,
        subscribe_timeout_ms: 3_000,
        filter_update_interval_ms: 250,
        client_id_offset: 0,
        address_file: None,
        wire: Default::default(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_schedule_accounts_for_every_session() {
    let addr = spawn_server(ServerBehavior {
        ack: true,
        publish_interval_ms: Some(50),
    })
    .await;

    let summary = runner::run(test_config(addr, 16, 1))
        .await
        .expect("run completes");

    assert_eq!(
        summary.subscribe_success + summary.subscribe_failed + summary.connection_errors,
        16
    );
    assert_eq!(summary.subscribe_success, 16);
    assert_eq!(summary.subscribe_latency.count, 16);
    assert!(summary.messages_received > 0);
    assert!(summary.subscribe_latency.p99_ms >= summary.subscribe_latency.p95_ms);

    let rendered = summary.to_string();
    for label in [
        "Subscribe Success",
        "Subscribe Failed",
        "Connection Errors",
        "Messages Received",
        "Mean:",
        "p95:",
        "p99:",
    ] {
        assert!(rendered.contains(label), "summary missing {label}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refused_connections_are_counted_not_fatal() {
    // Reserve a port, then leave nothing listening behind it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let summary = runner::run(test_config(addr, 8, 1))
        .await
        .expect("all-failure run still reports");

    assert_eq!(summary.connection_errors, 8);
    assert_eq!(summary.subscribe_success, 0);
    assert_eq!(summary.subscribe_failed, 0);
    assert_eq!(summary.messages_received, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_subscribe_counts_each_session_once() {
    // The server never acks, and the ack timeout exceeds the schedule, so
    // ramp-down cancels every session while it is still waiting.
    let addr = spawn_server(ServerBehavior {
        ack: false,
        publish_interval_ms: None,
    })
    .await;

    let mut config = test_config(addr, 12, 1);
    config.hold_secs = 1;
    config.subscribe_timeout_ms = 30_000;

    let started = Instant::now();
    let summary = runner::run(config).await.expect("run completes");
    let elapsed = started.elapsed();

    // Schedule is 1+1+1 with 5s grace; honoring the cancellation means no
    // session waits out its own 30s ack timeout.
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
    assert_eq!(summary.subscribe_success, 0);
    assert_eq!(summary.subscribe_failed, 12);
    assert_eq!(summary.connection_errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn periodic_scenario_replaces_filters() {
    let addr = spawn_server(ServerBehavior {
        ack: true,
        publish_interval_ms: None,
    })
    .await;

    let summary = runner::run(test_config(addr, 6, 2))
        .await
        .expect("run completes");

    assert_eq!(summary.subscribe_success, 6);
    assert!(summary.filter_updates_sent > 0, "no filter updates sent");
    assert!(summary.update_latency.count > 0, "no update acks measured");
    assert_eq!(summary.update_failures, 0);

    // Each session is active for roughly three seconds of the schedule at
    // four ticks per second; allow generous slack for scheduling jitter.
    let per_session = summary.filter_updates_sent / 6;
    assert!(
        (2..=20).contains(&per_session),
        "per_session = {per_session}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_set_scenario_completes() {
    let addr = spawn_server(ServerBehavior {
        ack: true,
        publish_interval_ms: Some(100),
    })
    .await;

    let mut config = test_config(addr, 8, 3);
    config.hold_secs = 1;
    let summary = runner::run(config).await.expect("run completes");

    assert_eq!(summary.subscribe_success, 8);
    assert_eq!(
        summary.subscribe_success + summary.subscribe_failed + summary.connection_errors,
        8
    );
}

#[tokio::test]
async fn invalid_scenario_is_fatal() {
    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let mut config = test_config(addr, 1, 1);
    config.scenario = 9;
    assert!(runner::run(config).await.is_err());
}
