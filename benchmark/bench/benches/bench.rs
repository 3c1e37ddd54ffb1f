use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use bench::generate;
use ugemm::{Dtype, GemmRequest, Registry, Selector};
use ugemm_dev::{amx_host, avx2_host, avx512_fp16_host, avx512_host};

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    let registry = Registry::builtin().expect("builtin registry");
    let cases = [
        ("avx2-f32", avx2_host(), GemmRequest::new("k", 128, 128, 128, Dtype::Float32, Dtype::Float32)),
        (
            "amx-bf16",
            amx_host(),
            GemmRequest::new("k", 256, 256, 256, Dtype::BFloat16, Dtype::BFloat16).with_output_dtype(Dtype::Float32),
        ),
        ("fp16-woq", avx512_fp16_host(), GemmRequest::new("k", 2, 64, 128, Dtype::BFloat16, Dtype::Int8)),
        ("ref-f64", avx512_host(), GemmRequest::new("k", 3, 5, 7, Dtype::Float64, Dtype::Float64)),
    ];
    for (label, host, request) in &cases {
        let selector = Selector::new(&registry, *host);
        group.bench_with_input(BenchmarkId::new("create_micro_gemm", label), request, |b, request| {
            b.iter(|| selector.select(request).expect("selection"))
        });
        group.bench_with_input(BenchmarkId::new("generate", label), request, |b, request| {
            b.iter(|| generate(&registry, host, request).expect("generation"))
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(2))
        .sample_size(10);
    targets = bench_selection
);
criterion_main!(benches);
