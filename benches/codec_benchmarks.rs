use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use switchyard_core::codec::{encode_response, CommandCodec, ReadMode};
use switchyard_core::events::NullSink;
use switchyard_core::handlers::PingHandler;
use switchyard_core::models::{Command, ProxyResult, RequestContext};
use switchyard_core::{ProxyConfig, ServiceProxy};

fn benchmark_decode(c: &mut Criterion) {
    let codec = CommandCodec::default();
    let mut group = c.benchmark_group("decode");

    for size in [0usize, 64, 4096] {
        let command = Command::new("put")
            .with_param("key", "user:1234")
            .with_param("ttl", "300")
            .with_payload(vec![b'x'; size]);
        let bytes = codec.encode_command(&command).unwrap_or_default();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("framed", size), &bytes, |b, bytes| {
            b.iter(|| codec.decode(black_box(bytes), ReadMode::Framed))
        });
        group.bench_with_input(
            BenchmarkId::new("replayable_truncated", size),
            &bytes[..bytes.len() / 2],
            |b, bytes| b.iter(|| codec.decode(black_box(bytes), ReadMode::Replayable)),
        );
    }
    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let codec = CommandCodec::default();
    let command = Command::new("get")
        .with_param("key", "user:1234")
        .with_param("pool", "lookups");
    let result = ProxyResult::success().with_data(vec![b'y'; 1024]);

    c.bench_function("encode_command", |b| {
        b.iter(|| codec.encode_command(black_box(&command)))
    });
    c.bench_function("encode_response", |b| {
        b.iter(|| encode_response(Some(black_box(&result))))
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let proxy = runtime.block_on(async {
        let proxy = ServiceProxy::from_config(&ProxyConfig::default(), Arc::new(NullSink));
        proxy.registry().register(Arc::new(PingHandler)).await.map(|()| proxy)
    });
    let Ok(proxy) = proxy else {
        return;
    };

    c.bench_function("dispatch_ping", |b| {
        b.iter(|| {
            runtime.block_on(proxy.dispatch(Command::new("ping"), "", RequestContext::new()))
        })
    });
}

criterion_group!(benches, benchmark_decode, benchmark_encode, benchmark_dispatch);
criterion_main!(benches);
