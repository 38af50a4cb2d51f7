//! End-to-end throughput benchmark for the presence server.
//!
//! Connects real WebSocket clients, admits them, then has every client
//! relay as fast as it can while counting the relays everyone receives.

use futures_util::{SinkExt, StreamExt};
use presence_protocol::{codec, ServerMessage};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Presence end-to-end throughput benchmark");
    println!("  Server: {} (start it with: cargo run --release)", url);
    println!();

    run_relay_benchmark(num_clients, url).await;
}

async fn run_relay_benchmark(num_clients: usize, url: String) {
    println!("Relay benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client, &url, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to be admitted
    barrier.wait().await;
    println!("All {} clients admitted", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("Results");
    println!("  Clients:         {:>10}", num_clients);
    println!("  Duration:        {:>10.2}s", elapsed.as_secs_f64());
    println!("  Relays received: {:>10}", total_messages);
    println!("  Throughput:      {:>10.0} msg/s", msgs_per_sec);
    println!("  Per-client:      {:>10.0} msg/s", msgs_per_sec_per_client);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client: usize,
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let admission = json!({ "user_data": { "name": format!("bench-{}", client) } });
    sender.send(Message::Text(admission.to_string())).await?;

    // Wait for connection_info before relaying
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let ServerMessage::ConnectionInfo { .. } = codec::decode(&text)? {
                    break;
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err("closed before admission".into()),
        }
    }

    barrier.wait().await;

    let payload = json!({ "id": client, "position": { "x": 0, "y": 1, "z": 2 } }).to_string();
    let relay = Message::Text(payload);

    let recv_count = Arc::clone(&message_count);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                if let Ok(ServerMessage::Message { .. }) = codec::decode(&text) {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(relay.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
