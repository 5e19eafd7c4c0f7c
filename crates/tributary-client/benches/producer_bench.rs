//! Producer Performance Benchmarks
//!
//! Measures the cost of the pieces on the `send` path and of the full
//! pipeline against an in-process cluster.
//!
//! ## Benchmarks
//!
//! ### 1. Key Partitioning (`bench_partitioning`)
//! - SipHash partition selection for keys of different lengths
//!
//! ### 2. Value Serialization (`bench_serialization`)
//! - String and JSON serializers at different record sizes
//!
//! ### 3. End-to-End Throughput (`bench_pipeline`)
//! - send → batch → dispatch → ack against `InMemoryCluster`
//! - Tests different batch sizes (10, 100, 1000 records)
//!
//! ## Running
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p tributary-client
//!
//! # Run specific benchmark
//! cargo bench -p tributary-client --bench producer_bench pipeline
//! ```

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tributary_client::{
    BytesSerializer, HashPartitioner, InMemoryCluster, JsonSerializer, Partitioner, Producer,
    ProducerRecord, Serializer, StringSerializer,
};

fn bench_partitioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioning");
    let partitioner = HashPartitioner::new();
    let partitions: Vec<u32> = (0..64).collect();

    for key_len in [8, 64, 512] {
        let key = vec![b'k'; key_len];
        group.throughput(Throughput::Bytes(key_len as u64));
        group.bench_with_input(BenchmarkId::new("key_bytes", key_len), &key, |b, key| {
            b.iter(|| {
                black_box(
                    partitioner
                        .partition("orders", Some(black_box(key.as_slice())), &partitions)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

#[derive(Serialize)]
struct Event {
    id: u64,
    kind: &'static str,
    payload: String,
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    for record_size in [128, 1024, 4096] {
        let text = "x".repeat(record_size);
        group.throughput(Throughput::Bytes(record_size as u64));
        group.bench_with_input(BenchmarkId::new("string", record_size), &text, |b, text| {
            b.iter(|| black_box(StringSerializer.serialize(black_box(text)).unwrap()));
        });

        let event = Event {
            id: 42,
            kind: "page_view",
            payload: text.clone(),
        };
        let json = JsonSerializer::<Event>::new();
        group.bench_with_input(BenchmarkId::new("json", record_size), &event, |b, event| {
            b.iter(|| black_box(json.serialize(black_box(event)).unwrap()));
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);

    for batch_size in [10usize, 100, 1000] {
        let records = 1000u64;
        group.throughput(Throughput::Elements(records));
        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&runtime).iter(|| async move {
                    let cluster = Arc::new(InMemoryCluster::new());
                    cluster.create_topic("bench", 4);
                    let producer = Producer::<Bytes, Bytes>::builder()
                        .connector(cluster)
                        .key_serializer(BytesSerializer)
                        .value_serializer(BytesSerializer)
                        .batch_size(batch_size)
                        .linger(Duration::from_millis(1))
                        .build()
                        .await
                        .unwrap();

                    let value = Bytes::from(vec![b'x'; 256]);
                    let mut deliveries = Vec::with_capacity(records as usize);
                    for i in 0..records {
                        let record = ProducerRecord::new("bench", value.clone())
                            .with_key(Bytes::from(i.to_string()));
                        deliveries.push(producer.send(record).await);
                    }
                    producer.close().await.unwrap();
                    for delivery in deliveries {
                        black_box(delivery.await.unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_partitioning, bench_serialization, bench_pipeline);
criterion_main!(benches);
