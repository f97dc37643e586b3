use bytes::Bytes;

use crate::nds::{Node, Pattern, Payload, Template};
use crate::stack::Stack;
use crate::wire::checksum;
use crate::Error;

use super::flood;

const SRC: [u8; 4] = [192, 168, 1, 1];
const DST: [u8; 4] = [192, 168, 1, 2];

fn tcp_over_ip4() -> Stack {
    Stack::new(&[
        Node::choice("tcp", Node::structure(vec![
            ("local-port", Node::Int(49152)),
            ("remote-port", Node::Int(80)),
        ])),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(SRC.to_vec())),
            ("remote-addr", Node::Bytes(DST.to_vec())),
        ])),
    ]).unwrap()
}

fn segment(seqn: i64) -> Template {
    Template::new(vec![
        Node::choice("tcp", Node::structure(vec![
            ("seqn", Node::Int(seqn)),
            ("flags", Node::Int(0x18)),
        ])),
    ]).with_payload(Payload::Bytes(b"0123456789".to_vec()))
}

#[test]
fn header_defaults() {
    let mut stack = tcp_over_ip4();
    let packets = stack.build(&segment(1), None).unwrap();
    assert_eq!(packets[0].mark(), Some(20));

    let bytes = packets[0].to_vec();
    let tcp = &bytes[20..];
    assert_eq!(&tcp[..4], &[0xc0, 0x00, 0, 80]);
    assert_eq!(&tcp[4..8], &[0, 0, 0, 1]);
    assert_eq!(tcp[12], 0x50);
    assert_eq!(tcp[13], 0x18);
    assert_eq!(&tcp[14..16], &[0xff, 0xff]);

    let pseudo = checksum::pseudo_header_v4(&SRC, &DST, 6, tcp.len() as u16);
    assert_eq!(checksum::combine(&[checksum::data(tcp), pseudo]), 0xffff);
}

#[test]
fn options_set_header_length() {
    let mut stack = tcp_over_ip4();
    let template = Template::new(vec![
        Node::choice("tcp", Node::structure(vec![
            ("flags", Node::Int(0x02)),
            ("options", Node::Bytes(vec![2, 4, 0x05, 0xb4])),
        ])),
    ]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(bytes[20 + 12], 0x60);
    assert_eq!(&bytes[40..44], &[2, 4, 0x05, 0xb4]);

    let template = Template::new(vec![
        Node::choice("tcp", Node::structure(vec![("options", Node::Bytes(vec![1; 3]))])),
    ]);
    assert!(matches!(stack.build(&template, None), Err(Error::BadTemplate(_))));
}

#[test]
fn flood_equals_fresh_build() {
    let mut stack = tcp_over_ip4();
    let first = stack.build(&segment(0xffff_fff0), None).unwrap().remove(0);
    let tcp_offset = first.mark().unwrap();
    let mut frame = first.to_vec();

    for i in 1..8i64 {
        let seqn = flood::advance(&mut frame, tcp_offset, 10).unwrap();
        let expected_seqn = (0xffff_fff0 + 10 * i) & 0xffff_ffff;
        assert_eq!(i64::from(seqn), expected_seqn);

        let fresh = stack.build(&segment(expected_seqn), None).unwrap().remove(0).to_vec();
        assert_eq!(frame, fresh, "segment {}", i);
    }
}

#[test]
fn receive_options() {
    let mut sender = tcp_over_ip4();
    let template = Template::new(vec![
        Node::choice("tcp", Node::structure(vec![
            ("options", Node::Bytes(vec![1, 1, 4, 2])),
        ])),
    ]).with_payload(Payload::Bytes(b"data".to_vec()));
    let frame = Bytes::from(sender.build(&template, None).unwrap().remove(0).to_vec());

    let mut receiver = Stack::new(&[
        Node::choice("tcp", Node::structure(vec![
            ("local-port", Node::Int(80)),
            ("remote-port", Node::Int(49152)),
        ])),
        Node::choice("ip4", Node::structure(vec![
            ("local-addr", Node::Bytes(DST.to_vec())),
            ("remote-addr", Node::Bytes(SRC.to_vec())),
        ])),
    ]).unwrap();

    let units = receiver.confirm_ptrn(&Pattern::single(vec![])).unwrap();
    let matched = receiver.match_frame(&units, frame.clone(), 0, None).unwrap().unwrap();
    assert_eq!(&matched.payload[..], b"data");
    let (_, tcp) = matched.pdus[0].as_choice().unwrap();
    assert_eq!(tcp.bytes_child("options").unwrap(), Some(&[1, 1, 4, 2][..]));
    assert_eq!(tcp.int_child("hlen").unwrap(), Some(6));

    let units = receiver.confirm_ptrn(&Pattern::single(vec![
        Node::choice("tcp", Node::structure(vec![("options", Node::Bytes(vec![1, 1, 1, 0]))])),
    ])).unwrap();
    assert_eq!(receiver.match_frame(&units, frame, 1, None).unwrap(), None);
}
