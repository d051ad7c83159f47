#[macro_use]
extern crate criterion;

use criterion::Criterion;

use mqtt_wire::*;

fn bench_encode_connect_packets(c: &mut Criterion) {
    let p = Packet::Connect(Connect {
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
    });

    c.bench_function("encode_connect_packets", move |b| b.iter(|| encode_to_vec(&p)));
}

fn bench_encode_publish_packets(c: &mut Criterion) {
    let p = Packet::Publish(Publish {
        dup: true,
        retain: true,
        qos: QoS::ExactlyOnce,
        topic: "topic",
        packet_id: Some(0x4321),
        payload: b"data",
    });

    c.bench_function("encode_publish_packets", move |b| b.iter(|| encode_to_vec(&p)));
}

fn bench_encode_qos0_publish_packets(c: &mut Criterion) {
    let p = Packet::Publish(Publish {
        dup: false,
        retain: false,
        qos: QoS::AtMostOnce,
        topic: "a/b",
        packet_id: None,
        payload: b"\x01\x02",
    });

    c.bench_function("encode_qos0_publish_packets", move |b| b.iter(|| encode_to_vec(&p)));
}

fn bench_encode_subscribe_packets(c: &mut Criterion) {
    let p = Packet::Subscribe(Subscribe {
        packet_id: 0x1234,
        subscriptions: vec![("test", QoS::AtLeastOnce), ("filter", QoS::ExactlyOnce)],
    });

    c.bench_function("encode_subscribe_packets", move |b| b.iter(|| encode_to_vec(&p)));
}

criterion_group!(
    encode,
    bench_encode_connect_packets,
    bench_encode_publish_packets,
    bench_encode_qos0_publish_packets,
    bench_encode_subscribe_packets
);
criterion_main!(encode);
