use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use baton::balancer::ip_hash::IpHash;
use baton::balancer::{
    BackendRecord, Least, LeastMode, PickContext, Random, RoundRobin, Selector,
    WeightedRoundRobin,
};
use baton::config::schema::Backend;
use baton::upstream::UpstreamClient;

fn create_records(count: usize) -> Vec<Arc<BackendRecord>> {
    (0..count)
        .map(|i| {
            let addr = format!("127.0.{}.{}:8080", i / 255, (i % 255) + 1);
            let backend = Backend {
                url: addr,
                weight: (i % 4 + 1) as u32,
                max_conn: 64,
                max_conn_timeout: 1,
                max_idemponent_call_attempts: 1,
                ..Backend::default()
            };
            let client =
                Arc::new(UpstreamClient::new(&backend, &Default::default(), None).expect("client build"));
            BackendRecord::new(&backend, i, client)
        })
        .collect()
}

fn bench_policy<S, F>(c: &mut Criterion, name: &str, counts: &[usize], build: F)
where
    S: Selector,
    F: Fn(Vec<Arc<BackendRecord>>) -> S,
{
    let mut group = c.benchmark_group(name);
    let ctx = PickContext {
        client_ip: "203.0.113.7".parse().unwrap(),
    };

    for &count in counts {
        group.throughput(Throughput::Elements(1));
        let selector = build(create_records(count));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_backends")),
            &count,
            |b, _| {
                b.iter(|| {
                    black_box(selector.pick(black_box(&ctx)));
                });
            },
        );
    }

    group.finish();
}

fn benchmark_all_policies(c: &mut Criterion) {
    let counts = [2usize, 10, 50, 250];
    bench_policy(c, "round_robin", &counts, RoundRobin::new);
    bench_policy(c, "w_round_robin", &counts, WeightedRoundRobin::new);
    bench_policy(c, "random", &counts, Random::new);
    // The ring places N² replicas per backend; keep the fleet sizes
    // where construction stays reasonable.
    bench_policy(c, "ip_hash", &[2, 10, 50], |records| {
        let count = records.len();
        IpHash::new(records, count)
    });
    bench_policy(c, "least_connection", &counts, |records| {
        Least::new(records, LeastMode::Connection)
    });
    bench_policy(c, "least_response_time", &counts, |records| {
        Least::new(records, LeastMode::ResponseTime)
    });
}

criterion_group!(benches, benchmark_all_policies);
criterion_main!(benches);
