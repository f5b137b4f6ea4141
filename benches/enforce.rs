use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use rampart::Enforcer;

const BASIC_MODEL: &str = "[request_definition]\nr = sub, obj, act\n\
                           [policy_definition]\np = sub, obj, act\n\
                           [policy_effect]\ne = some(where (p.eft == allow))\n\
                           [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n";

const RBAC_MODEL: &str = "[request_definition]\nr = sub, obj, act\n\
                          [policy_definition]\np = sub, obj, act\n\
                          [role_definition]\ng = _, _\n\
                          [policy_effect]\ne = some(where (p.eft == allow))\n\
                          [matchers]\nm = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\n";

/// Enforcer with `rows` direct grants `user{i}` -> `data{i}`
fn basic_enforcer(rows: usize) -> Enforcer {
    let mut e = Enforcer::from_text(BASIC_MODEL).unwrap();
    for i in 0..rows {
        e.add_policy([format!("user{}", i), format!("data{}", i), "read".to_string()])
            .unwrap();
    }
    e
}

/// Enforcer with `roles` roles, ten users per role
fn rbac_enforcer(roles: usize) -> Enforcer {
    let mut e = Enforcer::from_text(RBAC_MODEL).unwrap();
    for r in 0..roles {
        e.add_policy([format!("role{}", r), format!("data{}", r), "read".to_string()])
            .unwrap();
        for u in 0..10 {
            e.add_grouping_policy([format!("user{}_{}", r, u), format!("role{}", r)])
                .unwrap();
        }
    }
    e
}

/// Benchmark a scan over growing policy sets
fn bench_basic_enforce(c: &mut Criterion) {
    let mut group = c.benchmark_group("enforce_basic");

    for rows in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            let e = basic_enforcer(rows);
            let mut rng = rand::thread_rng();
            b.iter(|| {
                let i = rng.gen_range(0..rows);
                let sub = format!("user{}", i);
                let obj = format!("data{}", i);
                black_box(e.enforce([sub.as_str(), obj.as_str(), "read"]).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark role-aware enforcement
fn bench_rbac_enforce(c: &mut Criterion) {
    let mut group = c.benchmark_group("enforce_rbac");

    for roles in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(roles), &roles, |b, &roles| {
            let e = rbac_enforcer(roles);
            let mut rng = rand::thread_rng();
            b.iter(|| {
                let r = rng.gen_range(0..roles);
                let user = format!("user{}_{}", r, rng.gen_range(0..10));
                let obj = format!("data{}", r);
                black_box(e.enforce([user.as_str(), obj.as_str(), "read"]).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark matcher compilation after cache invalidation
fn bench_matcher_recompile(c: &mut Criterion) {
    let e = basic_enforcer(10);
    c.bench_function("matcher_recompile", |b| {
        b.iter(|| {
            e.invalidate_matcher_cache();
            black_box(e.enforce(["user1", "data1", "read"]).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_basic_enforce,
    bench_rbac_enforce,
    bench_matcher_recompile
);
criterion_main!(benches);
