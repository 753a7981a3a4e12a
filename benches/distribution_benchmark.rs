use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use transaction_batcher::domain::distribution::{allocate_minted, allocate_proceeds, invest_split};
use transaction_batcher::shared::protocol::{AccountId, Amount, BasisPoints};

fn reference_weights() -> Vec<Vec<BasisPoints>> {
    vec![vec![1000, 2000], vec![2000, 5000], vec![1000, 3000]]
}

/// 构造 n 个用户，每人在三个组合上各有存款
fn contributions(users: usize) -> BTreeMap<AccountId, Vec<Amount>> {
    (0..users)
        .map(|i| {
            let i = i as Amount;
            (
                AccountId::new(format!("user-{}", i)),
                vec![10 + i % 7, 20 + i % 11, 5 + i % 3],
            )
        })
        .collect()
}

fn sold(users: usize) -> BTreeMap<AccountId, Vec<Amount>> {
    (0..users)
        .map(|i| {
            let i = i as Amount;
            (AccountId::new(format!("user-{}", i)), vec![1 + i % 5, 3 + i % 9])
        })
        .collect()
}

fn invest_split_benchmark(c: &mut Criterion) {
    let weights = reference_weights();
    c.bench_function("invest_split 3x2", |b| {
        b.iter(|| invest_split(black_box(&[50, 80, 60]), black_box(&weights), 2))
    });
}

fn allocation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Batch Allocation");
    let weights = reference_weights();

    for users in [10usize, 100, 1_000] {
        let deposits = contributions(users);
        group.bench_with_input(BenchmarkId::new("allocate_minted", users), &deposits, |b, d| {
            b.iter(|| allocate_minted(black_box(&[1_000_000, 2_500_000]), &weights, d))
        });

        let sells = sold(users);
        group.bench_with_input(BenchmarkId::new("allocate_proceeds", users), &sells, |b, s| {
            b.iter(|| allocate_proceeds(black_box(&[300_000, 200_000]), s))
        });
    }

    group.finish();
}

criterion_group!(benches, invest_split_benchmark, allocation_benchmark);
criterion_main!(benches);
