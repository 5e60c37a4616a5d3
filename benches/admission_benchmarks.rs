//! Performance benchmarks for clawguard hot paths.
//!
//! Benchmarks cover:
//!   - Admission decisions against small and large policies
//!   - Domain normalization
//!   - Ledger-backed firewall mutation (SQLite backend)
//!
//! Run: `cargo bench`

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use clawguard::firewall::{decide, normalize_domain, FirewallPolicy};
use clawguard::ledger::SqliteBackend;
use clawguard::Stores;

fn policy_with(entries: usize) -> FirewallPolicy {
    FirewallPolicy {
        enabled: true,
        allow_list: (0..entries).map(|i| format!("site{i}.example.org")).collect(),
        deny_list: (0..entries).map(|i| format!("ads{i}.tracker.net")).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Benchmark: Admission decisions
// ─────────────────────────────────────────────────────────────────────────────

fn bench_admission(c: &mut Criterion) {
    let small = policy_with(8);
    let large = policy_with(2_000);

    c.bench_function("decide_small_policy_admit", |b| {
        b.iter(|| decide(black_box(&small), black_box("https://cdn.site3.example.org/app.js")));
    });

    c.bench_function("decide_large_policy_not_listed", |b| {
        b.iter(|| decide(black_box(&large), black_box("https://unlisted.example.com/")));
    });

    c.bench_function("decide_large_policy_deny_hit", |b| {
        b.iter(|| decide(black_box(&large), black_box("https://x.ads1999.tracker.net/p")));
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Benchmark: Domain normalization
// ─────────────────────────────────────────────────────────────────────────────

fn bench_normalization(c: &mut Criterion) {
    c.bench_function("normalize_domain_full_url", |b| {
        b.iter(|| normalize_domain(black_box("HTTPS://user@Shop.Example.COM:8443/cart?id=1")));
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Benchmark: Firewall mutation through the ledger
// ─────────────────────────────────────────────────────────────────────────────

fn bench_firewall_mutation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tmp = tempfile::TempDir::new().unwrap();
    let backend = SqliteBackend::open(&tmp.path().join("ledger.db")).unwrap();
    let stores = Stores::with_backend(Arc::new(backend));

    c.bench_function("firewall_toggle_deny_entry", |b| {
        b.iter(|| {
            rt.block_on(async {
                stores.firewall.add_to_deny_list("evil.com").await.unwrap();
                stores.firewall.add_to_allow_list("evil.com").await.unwrap();
            });
        });
    });

    c.bench_function("firewall_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                stores
                    .firewall
                    .check(black_box("https://evil.com/x"))
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_admission,
    bench_normalization,
    bench_firewall_mutation,
);
criterion_main!(benches);
