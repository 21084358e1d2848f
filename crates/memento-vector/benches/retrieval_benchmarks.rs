//! Benchmarks for similarity search over the decision history.
//!
//! Uses 2,000 decisions by default. Set `BENCH_FULL_SCALE=1` to run against
//! 20,000, roughly a few years of heavy daily use:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p memento-vector
//! ```
//!
//! Retrieval runs inside a caller-supplied budget (300ms by default), so the
//! end-to-end path is checked against that bound after the criterion runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{criterion_group, criterion_main, Criterion};

use memento_core::types::{DecisionEvent, DecisionPayload, EventType, StoredDecision, Verdict};
use memento_storage::Database;
use memento_vector::embedding::{EmbeddingService, HashEmbedding};
use memento_vector::index::VectorIndex;
use memento_vector::lifecycle::{LifecycleConfig, LifecycleController};
use memento_vector::retrieval::{RetrievalQuery, RetrievalService, RetrievalSettings};
use memento_vector::store::local_store;

const CI_DECISION_COUNT: usize = 2_000;
const FULL_SCALE_DECISION_COUNT: usize = 20_000;
const DIM: usize = 1024;

const SUBJECTS: [&str; 5] = ["sunset", "portrait", "receipt", "street market", "mountain lake"];
const TRAITS: [&str; 4] = ["blurry", "backlit", "candid", "overexposed"];

fn decision_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_DECISION_COUNT
    } else {
        CI_DECISION_COUNT
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

fn generate_decision(i: usize, embedder: &HashEmbedding, rt: &tokio::runtime::Runtime) -> StoredDecision {
    let subject = SUBJECTS[i % SUBJECTS.len()];
    let trait_name = TRAITS[i % TRAITS.len()];
    let (event_type, payload) = if i % 4 == 0 {
        (
            EventType::CaptionChoice,
            DecisionPayload::Caption {
                text: format!("{} by evening light", subject),
                style_tags: vec!["short".into()],
            },
        )
    } else {
        (
            EventType::TriageVerdict,
            DecisionPayload::Verdict {
                verdict: if i % 3 == 0 { Verdict::Discard } else { Verdict::Keep },
                traits: vec![trait_name.to_string()],
            },
        )
    };
    let context = format!(
        "{} photo, {} shot number {} from the weekend trip, reviewed in the triage screen",
        subject, trait_name, i
    );
    let event = DecisionEvent::new(format!("evt-{}", i), event_type, format!("media/{}", i), payload, context.as_str())
        .with_occurred_at(Utc::now() - ChronoDuration::minutes(i as i64));
    let embedding = rt.block_on(embedder.embed(&context)).expect("embed failed");
    StoredDecision::new(event, embedding)
}

fn populated_index(count: usize) -> (VectorIndex, Vec<f32>) {
    let rt = runtime();
    let embedder = HashEmbedding::new(DIM);
    let decisions = (0..count)
        .map(|i| generate_decision(i, &embedder, &rt))
        .collect();
    let index = VectorIndex::from_decisions(decisions);
    assert_eq!(index.len(), count);

    let query = rt
        .block_on(embedder.embed("candid portrait in the evening"))
        .expect("query embed failed");
    (index, query)
}

fn bench_index_search(c: &mut Criterion) {
    let count = decision_count();
    let (index, query) = populated_index(count);

    let mut group = c.benchmark_group("index_search");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top5_{}decisions", count), |b| {
        b.iter(|| {
            let hits = index.search(&query, 5, None).expect("search failed");
            assert_eq!(hits.len(), 5);
            hits
        });
    });

    group.bench_function(format!("top5_captions_{}decisions", count), |b| {
        b.iter(|| {
            index
                .search(&query, 5, Some(EventType::CaptionChoice))
                .expect("search failed")
        });
    });

    group.finish();
}

fn bench_retrieval(c: &mut Criterion) {
    let count = decision_count();
    let rt = runtime();
    let embedder = HashEmbedding::new(DIM);

    let db = Arc::new(Database::in_memory().expect("open database"));
    let store = local_store(db, DIM, Duration::ZERO);
    let lifecycle = LifecycleController::new(store, LifecycleConfig::default());
    let decisions: Vec<_> = (0..count)
        .map(|i| generate_decision(i, &embedder, &rt))
        .collect();
    rt.block_on(async {
        lifecycle.start().await.expect("start store");
        for decision in decisions {
            lifecycle.store().upsert(decision).await.expect("upsert");
        }
    });

    let service = RetrievalService::new(
        lifecycle,
        Arc::new(embedder),
        RetrievalSettings {
            dimensions: DIM,
            default_k: 5,
            max_k: 50,
        },
    );
    let budget = Duration::from_millis(300);

    let mut group = c.benchmark_group("retrieval");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("retrieve_top5_{}decisions", count), |b| {
        b.iter(|| {
            let outcome = rt.block_on(
                service.retrieve(RetrievalQuery::new("blurry sunset from the trip"), budget),
            );
            assert!(outcome.hits().is_some(), "retrieval should be available");
            outcome
        });
    });

    group.finish();

    let mut samples = Vec::with_capacity(100);
    for _ in 0..100 {
        let start = std::time::Instant::now();
        let _ = rt.block_on(service.retrieve(RetrievalQuery::new("street market at night"), budget));
        samples.push(start.elapsed());
    }
    samples.sort();
    let p95 = samples[94];
    eprintln!("\n=== Retrieval p95 ({} decisions): {:?} (budget {:?}) ===", count, p95, budget);
    assert!(p95 < budget, "retrieval p95 {:?} exceeds budget {:?}", p95, budget);
}

criterion_group!(benches, bench_index_search, bench_retrieval);
criterion_main!(benches);
