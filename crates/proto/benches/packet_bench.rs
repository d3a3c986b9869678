//! Packet and key exchange benchmarks
//!
//! Benchmarks for sealing and opening protected packets, the bulk cipher,
//! and the Diffie-Hellman exponentiation.
//!
//! Run with: `cargo bench --bench packet_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use keel_proto::ssh::{
    connection::channel_data,
    crypto::MacKey,
    kex_dh::{group1, SessionKeys},
    mpint, Packet, TransportState, TripleDesCbc,
};
use num_bigint::BigUint;

/// A client and server state pair with keys active in both directions
fn keyed_pair() -> (TransportState, TransportState) {
    let k = mpint::encode(&BigUint::from_bytes_be(&[0x5a; 128]));
    let h = [0x17u8; 20];

    let mut client = TransportState::new();
    let mut server = TransportState::new();
    client
        .install_keys(&SessionKeys::derive(&k, &h), &h)
        .unwrap();
    server
        .install_keys(&SessionKeys::derive(&k, &h).mirrored(), &h)
        .unwrap();
    for state in [&mut client, &mut server] {
        state.newkeys_sent().unwrap();
        state.newkeys_received().unwrap();
    }
    (client, server)
}

/// Benchmark plaintext packet framing
fn bench_packet_plain(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_plain");
    let payload = channel_data(0, &[0x41; 512]);

    group.bench_function("to_bytes", |b| {
        let packet = Packet::new(payload.clone()).unwrap();
        b.iter(|| black_box(packet.to_bytes()));
    });

    group.bench_function("from_bytes", |b| {
        let wire = Packet::new(payload.clone()).unwrap().to_bytes();
        b.iter(|| black_box(Packet::from_bytes(black_box(&wire)).unwrap()));
    });

    group.finish();
}

/// Benchmark protected packets through the framer
fn bench_packet_protected(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_protected");

    for size in [64usize, 512, 4096] {
        let payload = channel_data(0, &vec![0x41; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("seal_{}bytes", size), |b| {
            let (mut client, _) = keyed_pair();
            b.iter(|| black_box(client.seal_payload(black_box(&payload)).unwrap()));
        });

        group.bench_function(format!("seal_open_{}bytes", size), |b| {
            let (mut client, mut server) = keyed_pair();
            b.iter(|| {
                let wire = client.seal_payload(&payload).unwrap();
                server.feed(&wire);
                black_box(server.next_packet().unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark the bulk cipher and MAC on their own
fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");
    group.throughput(Throughput::Bytes(4096));

    group.bench_function("3des_cbc_encrypt_4096bytes", |b| {
        let mut cipher = TripleDesCbc::new(&[0x01; 24], &[0x02; 8], &[0x03; 24], &[0x04; 8]).unwrap();
        let mut block = vec![0u8; 4096];
        b.iter(|| {
            cipher.encrypt(black_box(&mut block)).unwrap();
        });
    });

    group.bench_function("hmac_sha1_4096bytes", |b| {
        let mac = MacKey::new(&[0x0b; 20]).unwrap();
        let data = vec![0u8; 4096];
        let mut seq = 0u32;
        b.iter(|| {
            seq = seq.wrapping_add(1);
            black_box(mac.compute(seq, &data))
        });
    });

    group.finish();
}

/// Benchmark the group 1 exponentiation done once per handshake
fn bench_dh(c: &mut Criterion) {
    let mut group = c.benchmark_group("dh_group1");
    group.sample_size(20);

    let x = BigUint::from_bytes_be(&[0x3c; 127]);
    group.bench_function("modpow", |b| {
        b.iter(|| black_box(group1::G.modpow(black_box(&x), &group1::P)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_packet_plain,
    bench_packet_protected,
    bench_primitives,
    bench_dh
);
criterion_main!(benches);
