//! End-to-end throughput benchmark for reef.
//!
//! Measures delivered messages per second over real HTTP: a set of senders
//! POST messages while a set of listeners hold live streams on the same
//! channel.
//!
//! Usage: `e2e_throughput [listeners] [senders] [transport]`, where transport
//! is `sse` (default) or `ws`.

use reef_client::{ChatBackend, HttpBackend, StreamTransport};
use reef_protocol::{NewMessage, StreamEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const SERVER_URL: &str = "http://127.0.0.1:8080";
const CHANNEL: &str = "general";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let listeners = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let senders = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(4);
    let transport = match args.get(3).map(String::as_str) {
        Some("ws") => StreamTransport::WebSocket,
        _ => StreamTransport::Sse,
    };

    println!("reef end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release -p reef-server");
    println!();

    run_benchmark(listeners, senders, transport).await;
}

async fn run_benchmark(listeners: usize, senders: usize, transport: StreamTransport) {
    println!(
        "Listeners: {}, senders: {}, transport: {:?}",
        listeners, senders, transport
    );
    println!("Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let submitted = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(listeners + 1));
    let mut handles = Vec::new();

    for listener_id in 0..listeners {
        let backend = HttpBackend::new(SERVER_URL).with_transport(transport);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_listener(backend, received, barrier).await {
                eprintln!("Listener {} error: {}", listener_id, e);
            }
        }));
    }

    // Every listener is subscribed once it passes the barrier
    barrier.wait().await;
    println!("All {} listeners connected", listeners);

    for sender_id in 0..senders {
        let backend = HttpBackend::new(SERVER_URL);
        let submitted = Arc::clone(&submitted);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_sender(sender_id, backend, submitted).await {
                eprintln!("Sender {} error: {}", sender_id, e);
            }
        }));
    }

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    submitted.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_submitted = submitted.load(Ordering::SeqCst);

    println!();
    println!("Duration:        {:>10.2}s", elapsed);
    println!("Submitted:       {:>10}", total_submitted);
    println!("Delivered:       {:>10}", total_received);
    println!(
        "Submit rate:     {:>10.0} msg/s",
        total_submitted as f64 / elapsed
    );
    println!(
        "Delivery rate:   {:>10.0} msg/s",
        total_received as f64 / elapsed
    );
    if listeners > 0 {
        println!(
            "Per listener:    {:>10.0} msg/s",
            total_received as f64 / elapsed / listeners as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_listener(
    backend: HttpBackend,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let mut stream = backend.open_stream(CHANNEL).await?;

    // Wait for the connected event before reporting ready
    match stream.next_event().await? {
        Some(StreamEvent::Connected { .. }) => {}
        other => return Err(format!("expected connected, got {other:?}").into()),
    }
    barrier.wait().await;

    while let Some(event) = stream.next_event().await? {
        match event {
            StreamEvent::Message { .. } => {
                received.fetch_add(1, Ordering::Relaxed);
            }
            StreamEvent::ChannelGone { .. } => break,
            _ => {}
        }
    }

    Ok(())
}

async fn run_sender(
    sender_id: usize,
    backend: HttpBackend,
    submitted: Arc<AtomicU64>,
) -> Result<(), BoxError> {
    let user_name = format!("bench-{sender_id}");
    loop {
        backend
            .submit(NewMessage::new(CHANNEL, user_name.as_str(), "x".repeat(64)))
            .await?;
        submitted.fetch_add(1, Ordering::Relaxed);
    }
}
