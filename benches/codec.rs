use atomic_sntp::codec::{decode, encode};
use atomic_sntp::{to_timestamp, Message};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn criterion_benchmark(c: &mut Criterion) {
    let now = to_timestamp(1_700_000_000_123).unwrap();
    let message = Message::default()
        .with_mode(Message::MODE_SERVER)
        .with_stratum(Message::STRATUM_PRIMARY)
        .with_root_delay(0.015_625)
        .with_reference_identifier(b"GPS")
        .with_originate_timestamp(now)
        .with_receive_timestamp(now)
        .with_transmit_timestamp(now);
    let wire = encode(&message);

    c.bench_function("sntp_encode", |b| {
        b.iter(|| black_box(encode(black_box(&message))));
    });
    c.bench_function("sntp_decode", |b| {
        b.iter(|| black_box(decode(black_box(&wire.0))));
    });
}

criterion_group!(codec_benches, criterion_benchmark);
criterion_main!(codec_benches);
