//! End-to-end scenarios driving CSAPs and forwarder tasks through a runtime.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tad::config::RuntimeConfig;
use tad::csap::RecvOptions;
use tad::forwarder::{Disposition, DropMode, TaskPolicy};
use tad::nds::{Node, Pattern, Payload, Template};
use tad::nic::{FnHandler, Loopback};
use tad::wire::checksum;
use tad::Runtime;
use tracing_subscriber::EnvFilter;

const HOST_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0a];
const HOST_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0b];
const IP_A: [u8; 4] = [10, 0, 0, 1];
const IP_B: [u8; 4] = [10, 0, 0, 2];

fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Runtime::new(RuntimeConfig {
        recv_poll_interval_ms: 10,
        forwarder_seed: Some(0x5eed),
        ..RuntimeConfig::default()
    })
}

fn udp_over_eth(local: ([u8; 6], [u8; 4]), remote: ([u8; 6], [u8; 4])) -> Vec<Node> {
    vec![
        Node::choice("udp", Node::empty()),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(local.1.to_vec())),
            ("remote-addr", Node::Bytes(remote.1.to_vec())),
        ])),
        Node::choice("eth", Node::structure(vec![
            ("local-addr", Node::Bytes(local.0.to_vec())),
            ("remote-addr", Node::Bytes(remote.0.to_vec())),
        ])),
    ]
}

fn ping() -> Template {
    Template::new(vec![
        Node::choice("udp", Node::structure(vec![
            ("src-port", Node::Int(1000)),
            ("dst-port", Node::Int(2000)),
        ])),
        Node::choice("ip4", Node::structure(vec![
            ("time-to-live", Node::Int(64)),
        ])),
    ]).with_payload(Payload::Bytes(b"ping".to_vec()))
}

#[test]
fn ip4_udp_echo() {
    let runtime = runtime();
    let wire = Loopback::new();
    let sender = runtime.csap_create(&udp_over_eth((HOST_A, IP_A), (HOST_B, IP_B)), Box::new(wire.clone()))
        .unwrap();
    assert_eq!(runtime.csap(sender).unwrap().send(&ping()).unwrap(), 1);

    let frame = wire.take_sent().remove(0);
    // Short frames are padded to the ethernet minimum.
    assert_eq!(frame.len(), 60);
    assert_eq!(&frame[..6], &HOST_B);
    assert_eq!(&frame[6..12], &HOST_A);
    assert_eq!(&frame[12..14], &[0x08, 0x00]);

    let ip = &frame[14..42];
    assert_eq!(&ip[2..4], &[0, 32]);
    assert_eq!(ip[8], 64);
    assert_eq!(ip[9], 17);
    assert!(checksum::verifies(&ip[..20]));

    let udp = &frame[34..46];
    let pseudo = checksum::pseudo_header_v4(&IP_A, &IP_B, 17, 12);
    assert_eq!(checksum::combine(&[checksum::data(udp), pseudo]), 0xffff);
    assert_eq!(&udp[8..], b"ping");
    assert!(frame[46..].iter().all(|&b| b == 0));

    // The peer sees it as a datagram addressed to itself.
    let peer_wire = Loopback::new();
    let receiver = runtime.csap_create(&udp_over_eth((HOST_B, IP_B), (HOST_A, IP_A)), Box::new(peer_wire.clone()))
        .unwrap();
    let receiver = runtime.csap(receiver).unwrap();
    receiver.recv_start(&Pattern::single(vec![
        Node::choice("udp", Node::structure(vec![("dst-port", Node::Int(2000))])),
    ]), RecvOptions {
        max_packets: Some(1),
        timeout: Some(Duration::from_secs(5)),
        ..RecvOptions::default()
    }).unwrap();
    peer_wire.inject(frame);
    assert_eq!(receiver.wait(Some(Duration::from_secs(5))).unwrap(), 1);

    let result = receiver.poll_results().remove(0);
    assert_eq!(&result.payload[..], b"ping");
    assert_eq!(result.pdus.len(), 3);
    let (label, udp) = result.pdus[0].as_choice().unwrap();
    assert_eq!(label, "udp");
    assert_eq!(udp.int_child("src-port").unwrap(), Some(1000));
}

#[test]
fn ip4_fragments() {
    let runtime = runtime();
    let wire = Loopback::new();
    let id = runtime.csap_create(&udp_over_eth((HOST_A, IP_A), (HOST_B, IP_B)), Box::new(wire.clone()))
        .unwrap();

    let fragment = |hdr: i64, more: i64, real: i64, len: i64| Node::structure(vec![
        ("hdr-offset", Node::Int(hdr)),
        ("more-frags", Node::Int(more)),
        ("real-offset", Node::Int(real)),
        ("real-length", Node::Int(len)),
    ]);
    let mut template = ping();
    template.pdus[1] = Node::choice("ip4", Node::structure(vec![
        ("fragments", Node::Seq(vec![fragment(0, 1, 0, 8), fragment(1, 0, 8, 4)])),
    ]));
    assert_eq!(runtime.csap(id).unwrap().send(&template).unwrap(), 2);

    let frames = wire.take_sent();
    assert_eq!(frames.len(), 2);
    let (first, second) = (&frames[0][14..], &frames[1][14..]);
    assert_eq!(&first[2..4], &[0, 28]);
    assert_eq!(&first[6..8], &[0x20, 0x00]);
    assert_eq!(&second[2..4], &[0, 24]);
    assert_eq!(&second[6..8], &[0x00, 0x01]);
    assert!(checksum::verifies(&first[..20]));
    assert!(checksum::verifies(&second[..20]));

    // Both fragments together carry the whole datagram.
    let mut datagram = first[20..28].to_vec();
    datagram.extend_from_slice(&second[20..24]);
    assert_eq!(&datagram[8..], b"ping");
    assert_eq!(&datagram[4..6], &[0, 12]);
}

#[test]
fn icmp6_echo() {
    let src: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    let dst: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    let runtime = runtime();
    let wire = Loopback::new();
    let id = runtime.csap_create(&[
        Node::choice("icmp6", Node::empty()),
        Node::choice("ip6", Node::structure(vec![
            ("local-addr", Node::Bytes(src.to_vec())),
            ("remote-addr", Node::Bytes(dst.to_vec())),
        ])),
    ], Box::new(wire.clone())).unwrap();

    let template = Template::new(vec![
        Node::choice("icmp6", Node::structure(vec![
            ("type", Node::Int(128)),
            ("id", Node::Int(1)),
            ("seq", Node::Int(1)),
        ])),
    ]).with_payload(Payload::Bytes(vec![0; 56]));
    runtime.csap(id).unwrap().send(&template).unwrap();

    let packet = wire.take_sent().remove(0);
    assert_eq!(packet.len(), 40 + 64);
    assert_eq!(&packet[4..6], &[0, 64]);
    assert_eq!(packet[6], 58);
    assert_eq!(&packet[8..24], &src);
    assert_eq!(&packet[24..40], &dst);

    let icmp = &packet[40..];
    assert_eq!(&icmp[..2], &[128, 0]);
    assert_eq!(&icmp[4..8], &[0, 1, 0, 1]);
    let pseudo = checksum::pseudo_header_v6(&src, &dst, 58, 64);
    assert_eq!(checksum::combine(&[checksum::data(icmp), pseudo]), 0xffff);
}

#[test]
fn aal5_single_cell() {
    let runtime = runtime();
    let wire = Loopback::new();
    let id = runtime.csap_create(&[
        Node::choice("aal5", Node::empty()),
        Node::choice("atm", Node::structure(vec![
            ("vpi", Node::Int(1)),
            ("vci", Node::Int(32)),
        ])),
    ], Box::new(wire.clone())).unwrap();

    let template = Template::new(vec![]).with_payload(Payload::Bytes(vec![0xaa; 40]));
    assert_eq!(runtime.csap(id).unwrap().send(&template).unwrap(), 1);

    let cell = wire.take_sent().remove(0);
    assert_eq!(cell.len(), 53);
    // User-to-user indication in the payload type.
    assert_eq!(cell[3] & 0x02, 0x02);
    assert_eq!(&cell[5..45], &[0xaa; 40][..]);
    // No padding, length 40, then the CRC.
    assert_eq!(&cell[45..49], &[0, 0, 0, 40]);
    assert_eq!(&cell[49..], &[0x07, 0xef, 0xa7, 0xb6]);
}

#[test]
fn dhcp_discover() {
    let chaddr = [0x02, 0, 0, 0, 0, 1];
    let runtime = runtime();
    let wire = Loopback::new();
    let id = runtime.csap_create(&[Node::choice("dhcp", Node::empty())], Box::new(wire.clone()))
        .unwrap();

    let option = |children: Vec<(&str, Node)>| Node::structure(children);
    let template = Template::new(vec![
        Node::choice("dhcp", Node::structure(vec![
            ("op", Node::Int(1)),
            ("htype", Node::Int(1)),
            ("hlen", Node::Int(6)),
            ("chaddr", Node::Bytes(chaddr.to_vec())),
            ("options", Node::Seq(vec![
                option(vec![("type", Node::Int(53)), ("length", Node::Int(1)), ("value", Node::Int(1))]),
                option(vec![("type", Node::Int(55)), ("length", Node::Int(3)), ("value", Node::Bytes(vec![1, 3, 6]))]),
                option(vec![("type", Node::Int(255))]),
            ])),
        ])),
    ]);
    runtime.csap(id).unwrap().send(&template).unwrap();

    let message = wire.take_sent().remove(0);
    assert_eq!(message.len(), 236 + 4 + 3 + 5 + 1);
    assert_eq!(&message[..3], &[1, 1, 6]);
    assert_eq!(&message[28..34], &chaddr);
    assert_eq!(&message[236..240], &[99, 130, 83, 99]);
    assert_eq!(&message[240..], &[53, 1, 1, 55, 3, 1, 3, 6, 255]);
}

#[test]
fn forwarder_drops_everything() {
    let runtime = runtime();
    let written = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&written);
    runtime.sendq_create("out", Box::new(FnHandler(move |_: &[u8]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })), 0).unwrap();

    let policy = TaskPolicy { drop: DropMode::Random { rate: 100 }, ..TaskPolicy::default() };
    runtime.task_add("lossy", policy, "out").unwrap();
    for _ in 0..100 {
        assert_eq!(runtime.process_packet("lossy", &[0x5a; 64]).unwrap(), Disposition::Dropped);
    }

    let task = runtime.task("lossy").unwrap();
    assert_eq!(task.dropped(), 100);
    assert_eq!(task.forwarded(), 0);
    assert!(task.sendq().is_empty());
    assert_eq!(task.sendq().sent_count(), 0);
    assert_eq!(written.load(Ordering::SeqCst), 0);
}

#[test]
fn forwarder_feeds_a_csap() {
    let runtime = runtime();
    let wire = Loopback::new();
    let id = runtime.csap_create(&udp_over_eth((HOST_A, IP_A), (HOST_B, IP_B)), Box::new(wire.clone()))
        .unwrap();
    let writer = runtime.csap(id).unwrap().writer();
    let sendq = runtime.sendq_create("wire", Box::new(writer), 0).unwrap();
    runtime.task_add("plain", TaskPolicy::default(), "wire").unwrap();

    for seq in 0..3u8 {
        let disposition = runtime.process_packet("plain", &[seq; 60]).unwrap();
        assert!(matches!(disposition, Disposition::Queued(_)));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sendq.sent_count() < 3 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let frames = wire.sent();
    assert_eq!(frames.len(), 3);
    let firsts: Vec<u8> = frames.iter().map(|frame| frame[0]).collect();
    assert_eq!(firsts, [0, 1, 2]);
}
