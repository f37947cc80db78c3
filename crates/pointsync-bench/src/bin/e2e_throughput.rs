//! End-to-end throughput benchmark for pointsync.
//!
//! This benchmark measures broadcast throughput with real network I/O.
//! Every client adds and removes its own points; each change is fanned out
//! to every connected client.

use futures_util::{SinkExt, StreamExt};
use pointsync_protocol::{codec, ClientMessage, Point, ServerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║       pointsync End-to-End Throughput Benchmark              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_broadcast_benchmark(num_clients, Arc::new(url)).await;
}

async fn run_broadcast_benchmark(num_clients: usize, url: Arc<String>) {
    println!("📊 Broadcast Benchmark: {} clients against {}", num_clients, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let sent = Arc::clone(&sent);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = Arc::clone(&url);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, sent, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to receive init
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_sent = sent.load(Ordering::SeqCst);
    let total_received = received.load(Ordering::SeqCst);

    let changes_per_sec = total_sent as f64 / elapsed.as_secs_f64();
    let events_per_sec = total_received as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Changes Sent:         {:>10}                           ║",
        total_sent
    );
    println!(
        "║  Events Received:      {:>10}                           ║",
        total_received
    );
    println!(
        "║  Change Rate:          {:>10.0} msg/s                    ║",
        changes_per_sec
    );
    println!(
        "║  Delivery Rate:        {:>10.0} msg/s                    ║",
        events_per_sec
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The first frame is always the init snapshot
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => {
            let init: ServerMessage = codec::decode(text.as_bytes())?;
            if init.kind() != "init" {
                return Err(format!("expected init, got {}", init.kind()).into());
            }
        }
        other => return Err(format!("expected init, got {:?}", other).into()),
    }

    barrier.wait().await;

    let recv_count = Arc::clone(&received);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(_)) = result {
                recv_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    // Points are unique per client so every add and remove changes the store
    let mut seq = 0u64;
    loop {
        let point = Point::new(client_id as f64, seq as f64, 0.0);
        seq += 1;

        for message in [ClientMessage::add(point), ClientMessage::remove(point)] {
            let text = codec::encode(&message)?;
            if sender.send(Message::Text(text)).await.is_err() {
                recv_task.abort();
                return Ok(());
            }
            sent.fetch_add(1, Ordering::Relaxed);
        }

        tokio::task::yield_now().await;
    }
}
