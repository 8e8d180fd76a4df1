// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Order dashboard walkthrough against the in-memory store.
//!
//! Demonstrates:
//! 1. Seeding three origins with differently-shaped records
//! 2. Subscribing to the unified feed (cross-origin duplicates dropped)
//! 3. Sending a reply and watching unread counters reset
//! 4. Usage levels and cache stats
//! 5. Dumping the captured metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example dashboard
//! ```

use std::sync::Arc;
use std::time::Duration;

use inbox_sync::remote::memory::{InMemoryCollection, LoopbackTransport};
use inbox_sync::{Session, SyncConfig, SyncOrchestrator, UsageKind};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              inbox-sync: Dashboard Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Seed the store
    // ─────────────────────────────────────────────────────────────────────────
    let store = Arc::new(InMemoryCollection::new());
    let transport = Arc::new(LoopbackTransport::new());

    store.insert("messages", "m1", json!({
        "conversationId": "+15550001",
        "phone": "+15550001",
        "name": "Ada",
        "product": "Blue Mug",
        "category": "order",
        "message": "Is the blue mug in stock?",
        "timestamp": "2026-10-01T09:00:00Z",
        "sender": "customer",
    }));
    // Same message relayed by the webhook ingester
    store.insert("webhook_messages", "w1", json!({
        "Message ID": "wamid.1",
        "Phone Number": "+15550001",
        "Profile Name": "Ada",
        "Product": "Blue Mug",
        "Category": "Order",
        "Message": "Is the blue mug in stock?",
        "Timestamp": 1_790_845_200_000_i64,
    }));
    store.insert("sheet_orders", "row-7", json!({
        "Phone": "+15550002",
        "Customer Name": "Grace",
        "Item": "Teapot",
        "Type": "Complaint",
        "Notes": "Lid arrived cracked",
        "Date": "2026-10-01",
    }));
    println!("📦 Seeded 3 records across 3 origins");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Subscribe to the unified feed
    // ─────────────────────────────────────────────────────────────────────────
    let orchestrator = SyncOrchestrator::new(SyncConfig::default(), store.clone(), transport.clone())?;
    orchestrator.set_session(Some(Session::new("op-1", "Dee")));

    let _feed = orchestrator.subscribe_feed(Arc::new(|view| match view {
        Ok(view) => println!(
            "   └─ feed: {} messages, {} duplicates dropped, categories {:?}",
            view.len(),
            view.duplicates_dropped,
            view.category_counts()
        ),
        Err(e) => println!("   └─ feed error: {}", e),
    }));

    // Let the settle delay pass and the first snapshots arrive
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n📋 Conversations:");
    for conversation in orchestrator.conversations() {
        println!(
            "   └─ {} ({}) unread={} status={}",
            conversation.id,
            conversation.counterparty_name,
            conversation.unread_count,
            conversation.status.as_str()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Reply
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✉️  Replying to +15550001...");
    let sent = orchestrator.send_message("+15550001", "Yes, ships tomorrow.").await?;
    println!("   └─ sent {} via loopback ({} deliveries)", sent.id, transport.sent().len());
    if let Some(conversation) = orchestrator.conversation("+15550001") {
        println!("   └─ unread now {}", conversation.unread_count);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Usage and caches
    // ─────────────────────────────────────────────────────────────────────────
    let usage = orchestrator.usage();
    println!("\n📊 Usage (24h window)");
    println!("   ├─ reads:  {} ({})", usage.reads, orchestrator.usage_level(UsageKind::Reads));
    println!("   └─ writes: {} ({})", usage.writes, orchestrator.usage_level(UsageKind::Writes));

    let caches = orchestrator.cache_stats();
    println!("\n🗄️  Caches");
    println!("   ├─ feed:          {:?}", caches.feed);
    println!("   └─ conversations: {:?}", caches.conversations);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    orchestrator.shutdown();
    println!("\n🛑 Shut down, {} live subscriptions left", orchestrator.live_subscriptions());
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("{}{{{}}} = {}", key.name(), labels.join(","), rendered)
        })
        .collect();
    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
