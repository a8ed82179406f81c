use asap_core::{
    decode_request, encode_request, AgentUrn, Envelope, JsonRpcRequest, PayloadSchemaRegistry,
};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::hint::black_box;

fn sample_request() -> JsonRpcRequest {
    let envelope = Envelope::new(
        AgentUrn::for_agent("bench-sender").expect("sender urn"),
        AgentUrn::for_agent("bench-recipient").expect("recipient urn"),
        "task.request",
        json!({
            "conversation_id": "conv-bench",
            "skill_id": "echo",
            "input": {"message": "hello", "items": [1, 2, 3, 4, 5]}
        }),
    )
    .with_trace_id("trace-bench")
    .with_nonce("nonce-bench");
    JsonRpcRequest::new(envelope, 1)
}

fn bench_codec(c: &mut Criterion) {
    let request = sample_request();
    let bytes = encode_request(&request).expect("encode request");
    let schemas = PayloadSchemaRegistry::with_builtin();

    c.bench_function("jsonrpc/encode_request", |b| {
        b.iter(|| black_box(encode_request(black_box(&request)).expect("encode")));
    });

    c.bench_function("jsonrpc/decode_request", |b| {
        b.iter(|| black_box(decode_request(black_box(&bytes)).expect("decode")));
    });

    c.bench_function("envelope/validate_builtin_schema", |b| {
        b.iter(|| {
            request
                .envelope()
                .validate(black_box(&schemas))
                .expect("valid envelope");
        });
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
