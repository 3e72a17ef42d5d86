// Criterion benchmarks for the sealrpc-common wire codec
//
// Run benchmarks with:
//   cargo bench -p sealrpc-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sealrpc_common::auth::KeyPair;
use sealrpc_common::transport::noise::Handshake;
use sealrpc_common::transport::MsgPackCodec;
use sealrpc_common::{ObjectId, ObjectRef, Request, Response, Value};

fn list_of(n: i64) -> Value {
    Value::List((0..n).map(Value::from).collect())
}

fn bench_request_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encoding");

    let small = Request::function_call("add", vec![Value::from(2), Value::from(3)]);
    let large = Request::function_call("sum", vec![list_of(1000)]);

    group.bench_function("encode_small", |b| {
        b.iter(|| MsgPackCodec::encode_request(black_box(&small)));
    });

    group.bench_function("encode_large", |b| {
        b.iter(|| MsgPackCodec::encode_request(black_box(&large)));
    });

    let small_frame = MsgPackCodec::encode_request(&small).unwrap();
    let large_frame = MsgPackCodec::encode_request(&large).unwrap();

    group.bench_function("decode_small", |b| {
        b.iter(|| MsgPackCodec::decode_request(black_box(&small_frame)));
    });

    group.bench_function("decode_large", |b| {
        b.iter(|| MsgPackCodec::decode_request(black_box(&large_frame)));
    });

    group.finish();
}

fn bench_response_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_encoding");

    let value = Response::Value(Value::from(42));
    let tuple = Response::Tuple(vec![
        Response::Value(list_of(10)),
        Response::Proxy(ObjectRef::new(ObjectId::generate(), "Counter")),
    ]);

    group.bench_function("encode_value", |b| {
        b.iter(|| MsgPackCodec::encode_response(black_box(&value)));
    });

    group.bench_function("encode_tuple", |b| {
        b.iter(|| MsgPackCodec::encode_response(black_box(&tuple)));
    });

    let tuple_bytes = MsgPackCodec::encode_response(&tuple).unwrap();
    group.bench_function("decode_tuple", |b| {
        b.iter(|| MsgPackCodec::decode_response(black_box(&tuple_bytes)));
    });

    group.finish();
}

fn bench_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("encryption");

    let mut initiator = Handshake::initiator(&KeyPair::generate().unwrap()).unwrap();
    let mut responder = Handshake::responder(&KeyPair::generate().unwrap()).unwrap();
    let m1 = initiator.write_frame().unwrap();
    responder.read_frame(&m1[2..]).unwrap();
    let m2 = responder.write_frame().unwrap();
    initiator.read_frame(&m2[2..]).unwrap();
    let m3 = initiator.write_frame().unwrap();
    responder.read_frame(&m3[2..]).unwrap();
    let mut channel = initiator.finish().unwrap();

    let payload = vec![7u8; 64 * 1024];
    group.bench_function("encrypt_64k", |b| {
        b.iter(|| channel.encrypt_message(black_box(&payload)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encoding,
    bench_response_encoding,
    bench_encryption,
);
criterion_main!(benches);
