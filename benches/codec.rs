//! ヘッダーマップコーデックベンチマーク
//!
//! 使用方法:
//!   cargo bench --bench codec
//!
//! 測定項目:
//! - ヘッダー数別のシリアライズ / デシリアライズ（8, 32, 128ヘッダー）
//! - プロパティパスのエンコード

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use veil_wasm_sdk::codec;

/// テスト用ヘッダーを生成
fn generate_headers(count: usize) -> Vec<(String, String)> {
    (0..count)
        .map(|i| match i % 4 {
            0 => (format!("x-request-id-{}", i), format!("{:032x}", i * 7919)),
            1 => ("set-cookie".to_string(), format!("session{}=abc; Path=/; HttpOnly", i)),
            2 => (format!("x-forwarded-for-{}", i), format!("10.0.{}.{}", i / 256, i % 256)),
            _ => ("accept".to_string(), "text/html,application/json;q=0.9".to_string()),
        })
        .collect()
}

fn benchmark_serialize_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_map");
    for count in [8, 32, 128] {
        let owned = generate_headers(count);
        let headers: Vec<(&str, &str)> = owned
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &headers, |b, headers| {
            b.iter(|| codec::serialize_map(black_box(headers)))
        });
    }
    group.finish();
}

fn benchmark_deserialize_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize_map");
    for count in [8, 32, 128] {
        let owned = generate_headers(count);
        let headers: Vec<(&str, &str)> = owned
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let bytes = codec::serialize_map(&headers);
        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| codec::deserialize_map(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_property_path(c: &mut Criterion) {
    let path = ["upstream", "tls", "peer_certificate", "subject"];
    c.bench_function("serialize_property_path", |b| {
        b.iter(|| codec::serialize_property_path(black_box(&path)))
    });
}

criterion_group!(
    benches,
    benchmark_serialize_map,
    benchmark_deserialize_map,
    benchmark_property_path,
);
criterion_main!(benches);
