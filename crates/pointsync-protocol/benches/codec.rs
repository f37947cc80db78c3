use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pointsync_protocol::{codec, ClientMessage, Point, ServerMessage};

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let event = ServerMessage::add(Point::new(1.25, -3.5, 7.0));
    group.bench_function("encode_add", |b| b.iter(|| codec::encode(black_box(&event))));

    let points: Vec<Point> = (0..1_000)
        .map(|i| Point::new(f64::from(i), f64::from(i) * 0.5, -f64::from(i)))
        .collect();
    let init = ServerMessage::init(points, 1_700_000_000_000);
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("encode_init_1k", |b| {
        b.iter(|| codec::encode(black_box(&init)))
    });

    let request = br#"{"type":"add","point":{"x":1.25,"y":-3.5,"z":7.0}}"#;
    group.throughput(Throughput::Bytes(request.len() as u64));
    group.bench_function("decode_add", |b| {
        b.iter(|| codec::decode::<ClientMessage>(black_box(request)))
    });

    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
