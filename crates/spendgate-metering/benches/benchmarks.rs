//! Spendgate hot-path benchmarks
//!
//! - Token estimation over growing conversations
//! - Rate arithmetic
//! - Quota evaluation across scope counts
//! - Token extraction from provider responses

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal_macros::dec;
use serde_json::json;
use spendgate_common::{PricingRecord, QuotaDefinition, QuotaPeriod, QuotaScope};
use spendgate_metering::{ChatMessage, QuotaEvaluator, TokenEstimator, TokenExtractorRegistry};
use std::time::Duration;

// ============ TOKEN ESTIMATION ============

fn bench_token_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_estimation");
    group.measurement_time(Duration::from_secs(5));

    for turns in [1usize, 10, 100].iter() {
        let messages: Vec<ChatMessage> = (0..*turns)
            .flat_map(|i| {
                [
                    ChatMessage::user(format!("Question {i}: summarize the quarterly report.")),
                    ChatMessage::assistant("The report shows steady growth across all regions."),
                ]
            })
            .collect();

        group.throughput(Throughput::Elements(messages.len() as u64));
        group.bench_with_input(BenchmarkId::new("messages", turns), &messages, |b, messages| {
            b.iter(|| TokenEstimator::estimate_messages(black_box(messages)));
        });
    }

    group.finish();
}

// ============ PRICING ============

fn bench_rate_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("pricing");
    let rate = PricingRecord::new("openai", "gpt-4o", dec!(0.0025), dec!(0.01)).rate();

    group.bench_function("cost_for", |b| {
        b.iter(|| rate.cost_for(black_box(12_345), black_box(678)));
    });

    group.finish();
}

// ============ QUOTA EVALUATION ============

fn bench_quota_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("quota_evaluation");
    group.measurement_time(Duration::from_secs(5));
    let now = Utc::now();

    let all_scopes = vec![
        QuotaDefinition::new(
            "org-1",
            QuotaScope::Model {
                provider: "openai".into(),
                model: "gpt-4o".into(),
            },
            QuotaPeriod::Daily,
            dec!(50),
        ),
        QuotaDefinition::monthly("org-1", dec!(1000)).with_usage(dec!(420)),
        QuotaDefinition::new(
            "org-1",
            QuotaScope::Provider {
                provider: "openai".into(),
            },
            QuotaPeriod::Monthly,
            dec!(300),
        ),
        QuotaDefinition::daily("org-1", dec!(100)).with_usage(dec!(12.5)),
    ];

    for count in [1usize, 2, 4].iter() {
        let quotas = &all_scopes[..*count];
        group.bench_with_input(BenchmarkId::new("scopes", count), quotas, |b, quotas| {
            b.iter(|| QuotaEvaluator::evaluate(black_box(quotas), black_box(dec!(0.25)), now));
        });
    }

    group.finish();
}

// ============ TOKEN EXTRACTION ============

fn bench_token_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_extraction");
    let registry = TokenExtractorRegistry::default();
    let openai = json!({
        "id": "chatcmpl-1",
        "choices": [{"message": {"role": "assistant", "content": "ok"}}],
        "usage": {"prompt_tokens": 812, "completion_tokens": 96}
    });
    let anthropic = json!({"usage": {"input_tokens": 812, "output_tokens": 96}});

    group.bench_function("openai", |b| {
        b.iter(|| registry.extract(black_box("openai"), black_box(&openai)));
    });
    group.bench_function("anthropic", |b| {
        b.iter(|| registry.extract(black_box("anthropic"), black_box(&anthropic)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_token_estimation,
    bench_rate_arithmetic,
    bench_quota_evaluation,
    bench_token_extraction,
);
criterion_main!(benches);
