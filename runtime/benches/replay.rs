//! Replay throughput benchmarks
//!
//! Measures how fast aggregates are rebuilt from their history:
//! - Pure fold of recorded events (decode + apply)
//! - Full restore through the coordinator and the in-memory event log
//!
//! Run with: `cargo bench -p foldline-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use foldline_core::aggregate::{Aggregate, AggregateRoot, fold};
use foldline_core::command::Command;
use foldline_core::context::Context;
use foldline_core::event::Event;
use foldline_core::event_store::EventStore;
use foldline_core::stream::{AggregateId, StreamId, Version};
use foldline_runtime::RestoreCoordinator;
use foldline_testing::{InMemoryEventStore, history};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
struct Meter {
    reading: i64,
    samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MeterCommand {
    Record(i64),
}

impl Command for MeterCommand {
    const COMMAND_TYPES: &'static [&'static str] = &["Record"];

    fn command_type(&self) -> &'static str {
        "Record"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MeterEvent {
    Recorded(i64),
}

impl Event for MeterEvent {
    const EVENT_TYPES: &'static [&'static str] = &["Recorded"];

    fn event_type(&self) -> &'static str {
        "Recorded"
    }
}

#[derive(Debug, thiserror::Error)]
#[error("never")]
struct Never;

impl Aggregate for Meter {
    const AGGREGATE_TYPE: &'static str = "Meter";
    type Command = MeterCommand;
    type Event = MeterEvent;
    type Error = Never;

    fn handle(&self, command: &MeterCommand) -> Result<Vec<MeterEvent>, Never> {
        let MeterCommand::Record(value) = command;
        Ok(vec![MeterEvent::Recorded(*value)])
    }

    fn apply(&mut self, event: &MeterEvent) {
        let MeterEvent::Recorded(value) = event;
        self.reading = *value;
        self.samples += 1;
    }
}

const SIZES: [u64; 3] = [10, 100, 1_000];

fn stream() -> StreamId {
    StreamId::new(Meter::AGGREGATE_TYPE, "bench")
}

fn recorded(count: u64) -> Vec<foldline_core::event::RecordedEvent> {
    let events: Vec<_> = (0..count)
        .map(|n| MeterEvent::Recorded(i64::try_from(n).unwrap_or_default()))
        .collect();
    history(&stream(), &events)
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold");
    for size in SIZES {
        let events = recorded(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| {
                let root: AggregateRoot<Meter> =
                    fold(AggregateId::new("bench"), black_box(events)).expect("history folds");
                black_box(root)
            });
        });
    }
    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("restore");
    for size in SIZES {
        let store = InMemoryEventStore::new();
        runtime
            .block_on(store.append(stream(), Version::INITIAL, recorded(size)))
            .expect("seed history");
        let coordinator = &RestoreCoordinator::<Meter>::new(Arc::new(store));
        let ctx = &Context::new();
        let id = &AggregateId::new("bench");

        group.throughput(Throughput::Elements(size));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.to_async(&runtime)
                .iter(|| async move { black_box(coordinator.restore(ctx, id).await.expect("restores")) });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fold, bench_restore);
criterion_main!(benches);
