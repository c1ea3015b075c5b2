//! Benchmark: pooled connection leasing and synchronous dispatch

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use integrations_smtp_dispatch::mocks::MockTransport;
use integrations_smtp_dispatch::{
    ConnectionPool, Credentials, DispatchMetrics, Engine, EngineConfig,
};
use std::sync::Arc;

fn benchmark_acquire_release(c: &mut Criterion) {
    let pool = ConnectionPool::new(
        Arc::new(MockTransport::new()),
        Arc::new(DispatchMetrics::new()),
    );
    let credentials = Credentials::new("user", "pass");

    c.bench_function("pool_acquire_release_same_key", |b| {
        b.iter(|| {
            let lease = pool.acquire(black_box("smtp.x.com:587"), &credentials).unwrap();
            lease.release();
        });
    });
}

fn benchmark_sync_dispatch(c: &mut Criterion) {
    let engine = Engine::with_transport(EngineConfig::default(), MockTransport::new()).unwrap();

    c.bench_function("engine_perform_sync_text", |b| {
        b.iter(|| {
            let count = engine
                .requests()
                .server("smtp.x.com:587")
                .credentials("user", "pass")
                .from("A", "a@x.com")
                .to("", "b@y.com")
                .subject("bench")
                .text("Hello")
                .perform_sync();
            engine.transport().clear();
            black_box(count)
        });
    });
}

criterion_group!(benches, benchmark_acquire_release, benchmark_sync_dispatch);
criterion_main!(benches);
