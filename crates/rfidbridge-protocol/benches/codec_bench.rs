use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rfidbridge_protocol::{LineCodec, ReaderCommand, VendorCodec};
use std::hint::black_box;
use tokio_util::codec::Decoder;

fn bench_vendor_decode(c: &mut Criterion) {
    let codec = VendorCodec::new();
    let mut group = c.benchmark_group("vendor_decode");

    for (name, line) in [
        ("ok", "OK"),
        ("tag_count", "OK|2"),
        ("tag_read", "RDT1003010824124004:NO:02030000|0"),
    ] {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| codec.decode(black_box(line)).unwrap());
        });
    }
    group.finish();
}

fn bench_vendor_encode(c: &mut Criterion) {
    let mut codec = VendorCodec::new();
    c.bench_function("vendor_encode_write", |b| {
        b.iter(|| {
            codec.encode(black_box(&ReaderCommand::Write {
                barcode: "03010824124004".to_string(),
                tag_count: 2,
            }))
        });
    });
}

fn bench_line_decode(c: &mut Criterion) {
    let frame = b"RDT1003010824124004:NO:02030000|0\r";
    let mut group = c.benchmark_group("line_decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("tag_read_line", |b| {
        b.iter(|| {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::from(&frame[..]);
            codec.decode(&mut buf).unwrap().unwrap()
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_vendor_decode,
    bench_vendor_encode,
    bench_line_decode
);
criterion_main!(benches);
