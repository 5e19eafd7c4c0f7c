//! Simple Producer Example
//!
//! This example demonstrates how to use the Tributary Producer API to send
//! records to topics, using the in-process cluster as the connector.
//!
//! Run with:
//! ```bash
//! RUST_LOG=tributary_client=debug cargo run --package tributary-client --example simple_producer
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tributary_client::{
    ClientError, InMemoryCluster, JsonSerializer, Producer, ProducerRecord, StringSerializer,
};

#[derive(Serialize)]
struct Order {
    order_id: u32,
    amount: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("\n🎯 Tributary Producer Example");
    println!("==============================\n");

    // Step 1: Setup cluster
    println!("📦 Step 1: Creating topics");
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.create_topic("orders", 3);
    cluster.create_topic("user-events", 6);
    println!("   ✅ Created topic 'orders' with 3 partitions");
    println!("   ✅ Created topic 'user-events' with 6 partitions\n");

    // Step 2: Create producer
    println!("🚀 Step 2: Creating producer");
    let producer = Producer::<String, Order>::builder()
        .connector(cluster.clone())
        .key_serializer(StringSerializer)
        .value_serializer(JsonSerializer::<Order>::new())
        .client_id("simple-producer")
        .batch_size(100)
        .linger(Duration::from_millis(20))
        .build()
        .await?;
    println!("   ✅ Producer initialized\n");

    // Step 3: Send records
    println!("✍️  Step 3: Sending records\n");

    println!("Example 1: Key-based partitioning");
    let mut deliveries = Vec::new();
    for i in 0..10 {
        let user_id = format!("user{}", i % 3); // 3 different users
        let order = Order {
            order_id: i,
            amount: u64::from(i) * 100,
        };
        deliveries.push(
            producer
                .send(ProducerRecord::new("orders", order).with_key(user_id))
                .await,
        );
    }
    for (i, delivery) in deliveries.into_iter().enumerate() {
        let metadata = delivery.await?;
        println!(
            "  Sent order {} → partition {}, offset {:?}",
            i, metadata.partition, metadata.offset
        );
    }
    println!();

    println!("Example 2: Send and wait (same key, same partition)");
    for i in 0..5 {
        let order = Order {
            order_id: 100 + i,
            amount: 42,
        };
        let metadata = producer
            .send_and_wait(ProducerRecord::new("user-events", order).with_key("user123".to_string()))
            .await?;
        println!(
            "  Event {} → partition {}, offset {:?}",
            i, metadata.partition, metadata.offset
        );
    }
    println!();

    println!("Example 3: Unknown topic");
    let failure = producer
        .send_and_wait(ProducerRecord::new("no-such-topic", Order { order_id: 0, amount: 0 }))
        .await
        .unwrap_err();
    if let ClientError::TopicNotFound(topic) = &failure.error {
        println!("  Rejected before sending: topic '{}' does not exist", topic);
    }
    println!();

    // Step 4: Close
    println!("🏁 Step 4: Closing");
    producer.close().await?;
    println!("   ✅ Producer closed\n");

    let stats = producer.stats();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Example Complete!");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Summary:");
    println!("  • Records delivered: {}", stats.records_delivered);
    println!("  • Records rejected:  {}", stats.records_rejected);
    println!("  • Batches sent:      {}", stats.batches_sent);
    println!();

    Ok(())
}
