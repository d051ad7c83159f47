#[macro_use]
extern crate criterion;

use criterion::Criterion;

use mqtt_wire::*;

fn bench_decode_connect_packets(c: &mut Criterion) {
    let bytes = encode_to_vec(&Packet::Connect(Connect {
        clean_session: false,
        keep_alive: 60,
        client_id: "12345",
        last_will: Some(LastWill {
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: "topic",
            message: b"message",
        }),
        username: None,
        password: None,
    }));

    c.bench_function("decode_connect_packets", move |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.feed(&bytes).unwrap()
        })
    });
}

fn bench_decode_publish_packets(c: &mut Criterion) {
    let bytes = encode_to_vec(&Packet::Publish(Publish {
        dup: false,
        retain: false,
        qos: QoS::AtMostOnce,
        topic: "a/b",
        packet_id: None,
        payload: b"\x01\x02",
    }));

    c.bench_function("decode_publish_packets", move |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.feed(&bytes).unwrap()
        })
    });
}

fn bench_decode_many_small_publishes(c: &mut Criterion) {
    let one = encode_to_vec(&Packet::Publish(Publish {
        dup: false,
        retain: false,
        qos: QoS::AtMostOnce,
        topic: "a/b",
        packet_id: None,
        payload: b"\x01\x02",
    }));
    let mut bytes = Vec::new();
    for _ in 0..64 {
        bytes.extend_from_slice(&one);
    }

    c.bench_function("decode_many_small_publishes", move |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.feed(&bytes).unwrap()
        })
    });
}

fn bench_decode_subscribe_packets(c: &mut Criterion) {
    let bytes = encode_to_vec(&Packet::Subscribe(Subscribe {
        packet_id: 0x1234,
        subscriptions: vec![("test", QoS::AtLeastOnce), ("filter", QoS::ExactlyOnce)],
    }));

    c.bench_function("decode_subscribe_packets", move |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.feed(&bytes).unwrap()
        })
    });
}

criterion_group!(
    decode,
    bench_decode_connect_packets,
    bench_decode_publish_packets,
    bench_decode_many_small_publishes,
    bench_decode_subscribe_packets
);
criterion_main!(decode);
