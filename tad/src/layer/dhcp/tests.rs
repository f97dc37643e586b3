use bytes::Bytes;

use crate::nds::{Node, Pattern, Template};
use crate::stack::Stack;
use crate::Error;

use super::{parse_list, DhcpOption, HEADER_LEN, MAGIC_COOKIE};

const CHADDR: [u8; 6] = [0x02, 0, 0, 0, 0, 1];

fn dhcp() -> Stack {
    Stack::new(&[Node::choice("dhcp", Node::empty())]).unwrap()
}

fn option(kind: i64, length: Option<i64>, value: Option<Node>) -> Node {
    let mut children = vec![("type", Node::Int(kind))];
    if let Some(length) = length {
        children.push(("length", Node::Int(length)));
    }
    if let Some(value) = value {
        children.push(("value", value));
    }
    Node::structure(children)
}

fn message(op: i64, options: Vec<Node>) -> Template {
    Template::new(vec![
        Node::choice("dhcp", Node::structure(vec![
            ("op", Node::Int(op)),
            ("htype", Node::Int(1)),
            ("hlen", Node::Int(6)),
            ("xid", Node::Int(0x3903_f326)),
            ("chaddr", Node::Bytes(CHADDR.to_vec())),
            ("options", Node::Seq(options)),
        ])),
    ])
}

#[test]
fn discover() {
    let mut stack = dhcp();
    let template = message(1, vec![
        option(53, Some(1), Some(Node::Int(1))),
        option(55, Some(3), Some(Node::Bytes(vec![1, 3, 6]))),
        option(255, None, None),
    ]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(bytes.len(), 249);
    assert_eq!(&bytes[..4], &[1, 1, 6, 0]);
    assert_eq!(&bytes[4..8], &[0x39, 0x03, 0xf3, 0x26]);
    assert_eq!(&bytes[28..34], &CHADDR);
    assert!(bytes[34..HEADER_LEN].iter().all(|&b| b == 0));
    assert_eq!(&bytes[236..240], &MAGIC_COOKIE);
    assert_eq!(&bytes[240..], &[53, 1, 1, 55, 3, 1, 3, 6, 255]);
}

#[test]
fn random_transaction_id() {
    let mut stack = dhcp();
    let template = Template::new(vec![
        Node::choice("dhcp", Node::structure(vec![("op", Node::Int(1))])),
    ]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(bytes.len(), HEADER_LEN + 4);

    let template = Template::new(vec![Node::choice("dhcp", Node::empty())]);
    assert_eq!(stack.build(&template, None).err(), Some(Error::MissingForSend { field: "op" }));
}

#[test]
fn integer_values_take_the_length() {
    let mut stack = dhcp();
    let template = message(2, vec![
        option(51, Some(4), Some(Node::Int(3600))),
        option(57, None, Some(Node::Int(1500))),
    ]);
    let bytes = stack.build(&template, None).unwrap().remove(0).to_vec();
    assert_eq!(&bytes[240..], &[51, 4, 0, 0, 0x0e, 0x10, 57, 2, 0x05, 0xdc]);

    let template = message(2, vec![option(51, Some(1), Some(Node::Int(3600)))]);
    assert!(matches!(stack.build(&template, None), Err(Error::BadTemplate(_))));
    let template = message(2, vec![option(300, None, None)]);
    assert!(matches!(stack.build(&template, None), Err(Error::BadTemplate(_))));
}

#[test]
fn vendor_options_nest() {
    let vendor = Node::structure(vec![
        ("type", Node::Int(43)),
        ("options", Node::Seq(vec![
            option(1, None, Some(Node::Bytes(vec![5]))),
            option(2, None, Some(Node::Bytes(vec![6, 7]))),
        ])),
    ]);
    let encoded = super::encode_list(&[DhcpOption::from_node(&vendor).unwrap()]);
    assert_eq!(encoded, [43, 7, 1, 1, 5, 2, 2, 6, 7]);

    let (parsed, used) = parse_list(&[0, 43, 7, 1, 1, 5, 2, 2, 6, 7, 255, 0xaa]).unwrap();
    assert_eq!(used, 11);
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[1].options.len(), 2);
    assert_eq!(parsed[1].options[1].value, Some(vec![6, 7]));
    assert_eq!(parsed[2].kind, 255);

    assert_eq!(parse_list(&[53, 4, 1]), Err(Error::Truncated));
}

#[test]
fn receive_by_options() {
    let mut stack = dhcp();
    let offer = message(2, vec![
        option(53, None, Some(Node::Int(2))),
        option(54, None, Some(Node::Bytes(vec![10, 0, 0, 1]))),
        option(255, None, None),
    ]);
    let frame = Bytes::from(stack.build(&offer, None).unwrap().remove(0).to_vec());

    let pattern = |message_type: i64| Pattern::single(vec![
        Node::choice("dhcp", Node::structure(vec![
            ("op", Node::Int(2)),
            ("options", Node::Seq(vec![option(53, None, Some(Node::Int(message_type)))])),
        ])),
    ]);

    let units = stack.confirm_ptrn(&pattern(2)).unwrap();
    let matched = stack.match_frame(&units, frame.clone(), 0, None).unwrap().unwrap();
    assert!(matched.payload.is_empty());
    let (_, dhcp) = matched.pdus[0].as_choice().unwrap();
    assert_eq!(dhcp.int_child("xid").unwrap(), Some(0x3903_f326));
    let options = dhcp.seq_child("options").unwrap().unwrap();
    assert_eq!(options.len(), 3);
    assert_eq!(options[1].bytes_child("value").unwrap(), Some(&[10, 0, 0, 1][..]));

    let units = stack.confirm_ptrn(&pattern(5)).unwrap();
    assert_eq!(stack.match_frame(&units, frame, 1, None).unwrap(), None);
}
