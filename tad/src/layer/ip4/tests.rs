use bytes::Bytes;

use crate::nds::{Node, Pattern, Payload, Template};
use crate::stack::Stack;
use crate::wire::checksum;
use crate::Error;

const SRC: [u8; 4] = [10, 0, 0, 1];
const DST: [u8; 4] = [10, 0, 0, 2];

fn udp_over_ip4() -> Stack {
    Stack::new(&[
        Node::choice("udp", Node::empty()),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(SRC.to_vec())),
            ("remote-addr", Node::Bytes(DST.to_vec())),
        ])),
    ]).unwrap()
}

fn ping(ip4: Vec<(&str, Node)>) -> Template {
    Template::new(vec![
        Node::choice("udp", Node::structure(vec![
            ("src-port", Node::Int(1000)),
            ("dst-port", Node::Int(2000)),
        ])),
        Node::choice("ip4", Node::structure(ip4)),
    ]).with_payload(Payload::Bytes(b"ping".to_vec()))
}

fn udp_checksum_verifies(datagram: &[u8]) -> bool {
    let pseudo = checksum::pseudo_header_v4(&SRC, &DST, 17, datagram.len() as u16);
    checksum::combine(&[checksum::data(datagram), pseudo]) == 0xffff
}

#[test]
fn udp_datagram() {
    let mut stack = udp_over_ip4();
    let packets = stack.build(&ping(vec![("time-to-live", Node::Int(64))]), None).unwrap();
    assert_eq!(packets.len(), 1);

    let bytes = packets[0].to_vec();
    assert_eq!(bytes.len(), 32);
    assert_eq!(bytes[0], 0x45);
    assert_eq!(&bytes[2..4], &[0, 32]);
    assert_eq!(bytes[8], 64);
    assert_eq!(bytes[9], 17);
    assert!(checksum::verifies(&bytes[..20]));
    assert_eq!(&bytes[12..16], &SRC);
    assert_eq!(&bytes[16..20], &DST);
    assert!(udp_checksum_verifies(&bytes[20..]));
}

#[test]
fn fragments() {
    let mut stack = udp_over_ip4();
    let template = ping(vec![("fragments", Node::Seq(vec![
        Node::structure(vec![
            ("hdr-offset", Node::Int(0)),
            ("more-frags", Node::Int(1)),
            ("real-offset", Node::Int(0)),
            ("real-length", Node::Int(8)),
        ]),
        Node::structure(vec![
            ("hdr-offset", Node::Int(1)),
            ("more-frags", Node::Int(0)),
            ("real-offset", Node::Int(8)),
            ("real-length", Node::Int(4)),
        ]),
    ]))]);
    let packets = stack.build(&template, None).unwrap();
    assert_eq!(packets.len(), 2);

    let first = packets[0].to_vec();
    let second = packets[1].to_vec();
    assert_eq!(&first[2..4], &[0, 28]);
    assert_eq!(&first[6..8], &[0x20, 0x00]);
    assert_eq!(&second[2..4], &[0, 24]);
    assert_eq!(&second[6..8], &[0x00, 0x01]);
    assert!(checksum::verifies(&first[..20]));
    assert!(checksum::verifies(&second[..20]));

    let mut datagram = first[20..].to_vec();
    datagram.extend_from_slice(&second[20..]);
    assert_eq!(&datagram[8..], b"ping");
    assert!(udp_checksum_verifies(&datagram));
}

#[test]
fn fragment_needs_slice() {
    let mut stack = udp_over_ip4();
    let template = ping(vec![("fragments", Node::Seq(vec![
        Node::structure(vec![("real-offset", Node::Int(0))]),
    ]))]);
    assert!(matches!(stack.build(&template, None), Err(Error::BadTemplate(_))));
}

#[test]
fn payload_checksum_disabled() {
    let mut stack = udp_over_ip4();
    let template = ping(vec![
        ("pld-checksum", Node::structure(vec![("disable", Node::empty())])),
    ]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(&bytes[26..28], &[0, 0]);

    // An explicit checksum of the upper layer is kept.
    let mut template = ping(vec![]);
    template.pdus[0] = Node::choice("udp", Node::structure(vec![
        ("src-port", Node::Int(1000)),
        ("dst-port", Node::Int(2000)),
        ("checksum", Node::Int(0xbeef)),
    ]));
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(&bytes[26..28], &[0xbe, 0xef]);
}

#[test]
fn options_extend_header() {
    let mut stack = udp_over_ip4();
    let template = ping(vec![("options", Node::Bytes(vec![0x94, 0x04, 0, 0]))]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(bytes[0], 0x46);
    assert_eq!(&bytes[2..4], &[0, 36]);
    assert!(checksum::verifies(&bytes[..24]));
    assert!(udp_checksum_verifies(&bytes[24..]));

    let template = ping(vec![("options", Node::Bytes(vec![1, 1]))]);
    assert!(matches!(stack.build(&template, None), Err(Error::BadTemplate(_))));
}

#[test]
fn receive_strips_padding() {
    let mut sender = udp_over_ip4();
    let mut frame = sender.build(&ping(vec![]), None).unwrap().remove(0).to_vec();
    frame.extend_from_slice(&[0; 6]);

    let mut receiver = Stack::new(&[
        Node::choice("udp", Node::empty()),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(DST.to_vec())),
            ("remote-addr", Node::Bytes(SRC.to_vec())),
        ])),
    ]).unwrap();
    let units = receiver.confirm_ptrn(&Pattern::single(vec![
        Node::choice("udp", Node::structure(vec![("dst-port", Node::Int(2000))])),
        Node::choice("ip4", Node::structure(vec![("time-to-live", Node::Range { first: 1, last: 64 })])),
    ])).unwrap();
    let matched = receiver.match_frame(&units, Bytes::from(frame), 0, None).unwrap().unwrap();
    assert_eq!(&matched.payload[..], b"ping");
    let (_, ip4) = matched.pdus[1].as_choice().unwrap();
    assert_eq!(ip4.int_child("total-length").unwrap(), Some(32));
    assert_eq!(ip4.bytes_child("src-addr").unwrap(), Some(&SRC[..]));
}

#[test]
fn corrupt_header_is_skipped() {
    let mut sender = udp_over_ip4();
    let mut frame = sender.build(&ping(vec![]), None).unwrap().remove(0).to_vec();
    frame[10] ^= 0xff;

    let mut receiver = Stack::new(&[
        Node::choice("udp", Node::empty()),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(DST.to_vec())),
            ("remote-addr", Node::Bytes(SRC.to_vec())),
        ])),
    ]).unwrap();
    let any = receiver.confirm_ptrn(&Pattern::single(vec![])).unwrap();
    assert!(receiver.match_frame(&any, Bytes::from(frame.clone()), 0, None).unwrap().is_none());

    // Naming the broken value matches it anyway.
    let sum = u16::from_be_bytes([frame[10], frame[11]]);
    let pinned = receiver.confirm_ptrn(&Pattern::single(vec![
        Node::choice("udp", Node::empty()),
        Node::choice("ip4", Node::structure(vec![("h-checksum", Node::Int(sum.into()))])),
    ])).unwrap();
    assert!(receiver.match_frame(&pinned, Bytes::from(frame), 1, None).unwrap().is_some());
}
