use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, Criterion};

use caligo::{
    compute_shares, decrypt, encrypt, parse, verify_shares, Keyring, MemoryKeyStore, ShareNode,
    XChaChaCipher,
};

const EXPRESSION: &str = "((finance&executive)|audit)&(eu|us)&legal";
const SECRET: &[u8] = b"0123456789abcdef";

fn keyring() -> Keyring<XChaChaCipher, MemoryKeyStore> {
    let mut store = MemoryKeyStore::new();
    for attribute in ["finance", "executive", "audit", "eu", "us", "legal"] {
        store.generate(attribute);
    }
    Keyring::new(XChaChaCipher, store)
}

fn bench_parse<'a, M: Measurement>(group: &mut BenchmarkGroup<'a, M>) {
    group.bench_function("parse", |b| b.iter(|| parse(EXPRESSION).unwrap()));
}

fn bench_compute_shares<'a, M: Measurement>(group: &mut BenchmarkGroup<'a, M>) {
    let visibility = parse(EXPRESSION).unwrap();
    group.bench_function("compute_shares", |b| {
        b.iter(|| {
            let mut tree = ShareNode::from_expression(&visibility, EXPRESSION);
            compute_shares(&mut tree, SECRET).unwrap();
            tree
        })
    });
}

fn bench_verify_shares<'a, M: Measurement>(group: &mut BenchmarkGroup<'a, M>) {
    let visibility = parse(EXPRESSION).unwrap();
    let mut tree = ShareNode::from_expression(&visibility, EXPRESSION);
    compute_shares(&mut tree, SECRET).unwrap();
    group.bench_function("verify_shares", |b| b.iter(|| verify_shares(&tree)));
}

fn bench_encrypt<'a, M: Measurement>(group: &mut BenchmarkGroup<'a, M>) {
    let keyring = keyring();
    group.bench_function("encrypt", |b| {
        b.iter(|| encrypt(&keyring, EXPRESSION, SECRET).unwrap())
    });
}

fn bench_decrypt<'a, M: Measurement>(group: &mut BenchmarkGroup<'a, M>) {
    let keyring = keyring();
    let sealed = encrypt(&keyring, EXPRESSION, SECRET).unwrap();
    group.bench_function("decrypt", |b| {
        b.iter(|| decrypt(&keyring, EXPRESSION, &sealed).unwrap().unwrap())
    });
}

fn group_sealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sealing");
    bench_parse(&mut group);
    bench_compute_shares(&mut group);
    bench_verify_shares(&mut group);
    bench_encrypt(&mut group);
    bench_decrypt(&mut group);
    group.finish();
}

criterion_group!(benches, group_sealing);
criterion_main!(benches);
