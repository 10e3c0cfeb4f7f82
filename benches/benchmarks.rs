//! Benchmark suite for Flywheel hot paths.
//!
//! - Learning matching (filter, order, truncate)
//! - Stats aggregation over a task set
//! - A full automated attempt against the in-memory store
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::collections::BTreeMap;

use flywheel::learning::{select_learnings, LearningDelta};
use flywheel::task::AiAttempt;
use flywheel::{
    Engine, FlywheelConfig, HandlerRegistry, Learning, LearningContext, LearningId,
    LearningQuery, NewLearning, NewTask, Priority, Task, TaskStats, TaskStatus, TaskType,
};

const JURISDICTIONS: [&str; 4] = ["Austin", "Dallas", "Houston", "El Paso"];

fn learnings(count: usize) -> Vec<Learning> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let jurisdiction = JURISDICTIONS[i % JURISDICTIONS.len()];
            let task_type = TaskType::ALL[i % TaskType::COUNT];
            Learning::from_new(
                LearningId::generate(),
                NewLearning {
                    task_type,
                    context: LearningContext::from(json!({"jurisdiction": jurisdiction})),
                    pattern: format!("{task_type} in {jurisdiction}"),
                    human_action: "Handled manually".into(),
                    human_input: None,
                    ai_attempted_output: None,
                    delta: LearningDelta {
                        ai_confidence: Some(0.0),
                        human_provided: true,
                    },
                    confidence: (i % 100) as f64 / 100.0,
                    created_by: "system".into(),
                    source_task_id: None,
                },
                now - Duration::seconds(i as i64),
            )
        })
        .collect()
}

fn tasks(count: usize) -> Vec<Task> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let mut task = Task::new(
                TaskType::ALL[i % TaskType::COUNT],
                "P1",
                json!({}),
                Priority::default(),
                3,
                now,
            );
            task.status = TaskStatus::ALL[i % TaskStatus::ALL.len()];
            let mut attempt = AiAttempt::started(now);
            attempt.completed_at = Some(now + Duration::seconds(i as i64 % 60));
            task.ai_attempt = Some(attempt);
            task
        })
        .collect()
}

// ============================================================================
// Learning Matching Benchmarks
// ============================================================================

fn bench_learning_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("learning_matching");
    let context = LearningContext::from(json!({"jurisdiction": "Austin", "state": "TX"}));
    let query = LearningQuery::for_task(TaskType::PermitSubmit, Some(&context), 10);

    for size in [100, 1_000, 10_000] {
        let pool = learnings(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("select", size), &pool, |b, pool| {
            b.iter(|| black_box(select_learnings(black_box(&query), pool.iter())));
        });
    }

    group.finish();
}

// ============================================================================
// Stats Benchmarks
// ============================================================================

fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");

    for size in [100, 1_000, 10_000] {
        let set = tasks(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("from_tasks", size), &set, |b, set| {
            b.iter(|| black_box(TaskStats::from_tasks(set.iter(), BTreeMap::new())));
        });
    }

    group.finish();
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_process_task(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("create_and_process", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let engine =
                    Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())
                        .unwrap();
                let task = engine
                    .create_task(
                        NewTask::new(
                            TaskType::PermitCheck,
                            "P1",
                            json!({"context": {"state": "TX"}}),
                        )
                        .auto_process(true),
                    )
                    .await
                    .unwrap();
                black_box(task)
            })
        });
    });
}

criterion_group!(matching_benches, bench_learning_matching);

criterion_group!(stats_benches, bench_stats);

criterion_group!(engine_benches, bench_process_task);

criterion_main!(matching_benches, stats_benches, engine_benches);
