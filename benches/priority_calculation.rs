//! Benchmark for the scheduler's aging-score computation and batch ordering.

use caseflow::domain::models::{Case, CasePriority, SchedulerConfig};
use caseflow::services::score_case;
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn make_cases(count: usize) -> Vec<Case> {
    let priorities = [
        CasePriority::Low,
        CasePriority::Normal,
        CasePriority::High,
        CasePriority::Urgent,
        CasePriority::Critical,
    ];
    (0..count)
        .map(|i| {
            let mut case = Case::new(format!("case-{i}"), format!("/data/case-{i}"))
                .with_priority(priorities[i % priorities.len()]);
            case.created_at = Utc::now() - Duration::minutes(i as i64 % 600);
            case
        })
        .collect()
}

fn bench_score_single(c: &mut Criterion) {
    let config = SchedulerConfig::default();
    let case = make_cases(1).pop().unwrap();
    let now = Utc::now();

    c.bench_function("score_single_case", |b| {
        b.iter(|| score_case(black_box(&config), black_box(&case), now));
    });
}

fn bench_order_batch(c: &mut Criterion) {
    let config = SchedulerConfig::default();
    let cases = make_cases(1000);
    let now = Utc::now();

    c.bench_function("order_batch_1000", |b| {
        b.iter(|| {
            let mut batch = cases.clone();
            batch.sort_by(|a, b| {
                score_case(&config, b, now)
                    .partial_cmp(&score_case(&config, a, now))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            black_box(batch.len())
        });
    });
}

criterion_group!(benches, bench_score_single, bench_order_batch);
criterion_main!(benches);
