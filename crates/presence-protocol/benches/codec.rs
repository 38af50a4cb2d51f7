//! Codec benchmarks for presence-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use presence_protocol::{codec, ClientId, ServerMessage, UserData};
use serde_json::json;

fn profile() -> UserData {
    let mut data = UserData::new();
    data.insert("login".into(), json!("jdoe"));
    data.insert("title".into(), json!("Code Wizard"));
    data.insert("color".into(), json!(16_711_680));
    data.insert("level".into(), json!(7.42));
    data
}

fn bench_encode_relay(c: &mut Criterion) {
    let msg = ServerMessage::relay("x".repeat(64));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("relay_64B", |b| b.iter(|| codec::encode(black_box(&msg))));
    group.finish();
}

fn bench_encode_user_connected(c: &mut Criterion) {
    let msg = ServerMessage::user_connected(ClientId::new(42), profile());

    c.bench_function("encode_user_connected", |b| {
        b.iter(|| codec::encode_shared(black_box(&msg)))
    });
}

fn bench_decode_admission(c: &mut Criterion) {
    let text = codec::encode_admission(&presence_protocol::Admission::new(profile())).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("admission", |b| {
        b.iter(|| codec::decode_admission(black_box(&text)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_relay,
    bench_encode_user_connected,
    bench_decode_admission
);
criterion_main!(benches);
