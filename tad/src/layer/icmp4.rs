//! The ICMPv4 layer.
//!
//! Supported messages: echo and information request/reply (`id`, `seq`), destination
//! unreachable, source quench and time exceeded (`unused`), redirect (`gw-addr`), parameter
//! problem (`ptr`) and timestamp request/reply (`id`, `seq`, `orig-ts`, `rx-ts`, `tx-ts`). Other
//! types are rejected.
//!
//! Over IPv4 the checksum is left to the IP layer, otherwise the layer computes it.
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc};
use crate::nds::Node;
use crate::packet::Packet;
use crate::wire::checksum;
use crate::Result;

use super::icmp::{Family, COMMON_LEN};
use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

static ECHO: [FieldDesc; 2] = [
    FieldDesc::int("id", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("seq", 16).tx(DefaultSrc::Zero),
];

static UNUSED: [FieldDesc; 1] = [
    FieldDesc::int("unused", 32).tx(DefaultSrc::Zero),
];

static REDIRECT: [FieldDesc; 1] = [
    FieldDesc::octets("gw-addr", 32),
];

static PARAM_PROBLEM: [FieldDesc; 2] = [
    FieldDesc::int("ptr", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("unused", 24).tx(DefaultSrc::Zero),
];

static TIMESTAMP: [FieldDesc; 5] = [
    FieldDesc::int("id", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("seq", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("orig-ts", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("rx-ts", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("tx-ts", 32).tx(DefaultSrc::Zero),
];

fn body(ty: u8) -> Option<&'static [FieldDesc]> {
    match ty {
        0 | 8 | 15 | 16 => Some(&ECHO),
        3 | 4 | 11 => Some(&UNUSED),
        5 => Some(&REDIRECT),
        12 => Some(&PARAM_PROBLEM),
        13 | 14 => Some(&TIMESTAMP),
        _ => None,
    }
}

/// An ICMPv4 layer instance.
pub struct Icmp4 {
    family: Family,
    own_checksum: bool,
}

impl Icmp4 {
    /// Create the layer from its CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Icmp4 {
            family: Family::new(params, body, "ICMPv4")?,
            own_checksum: stack.lower() != Some(LayerKind::Ip4),
        })
    }
}

impl Layer for Icmp4 {
    fn kind(&self) -> LayerKind {
        LayerKind::Icmp4
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        self.family.confirm_tmpl(tmpl)
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let fill = self.own_checksum && !pdu.hdr.is_set("checksum");
        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            self.family.encode(&cx.eval, pdu, &mut pkt)?;
            if fill {
                let sum = checksum::finish(checksum::data(&pkt.to_vec()));
                pkt.write_at(2, &sum.to_be_bytes())?;
            }
            out.push(pkt);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        self.family.confirm_ptrn(ptrn)
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        if sdu.len() < COMMON_LEN {
            return Err(crate::Error::Truncated);
        }
        self.family.match_do(&cx.eval, ptrn, pkt, sdu)
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        self.family.match_post(pkt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::du::EvalCx;
    use crate::Error;

    fn echo(kinds: &[LayerKind], tmpl: &Node) -> Result<Vec<u8>> {
        let mut icmp = Icmp4::new(StackInfo { kinds, idx: 0 }, None)?;
        let pdu = icmp.confirm_tmpl(Some(tmpl))?;
        let pdus = [pdu];
        let cx = GenCx { stack: StackInfo { kinds, idx: 0 }, pdus: &pdus, eval: EvalCx::default() };
        let pkts = icmp.generate(&cx, &pdus[0], vec![Packet::from_vec(b"abcd".to_vec())])?;
        Ok(pkts[0].to_vec())
    }

    #[test]
    fn echo_request_checksum() {
        let tmpl = Node::structure(vec![
            ("type", Node::Int(8)),
            ("id", Node::Int(0x1234)),
            ("seq", Node::Int(1)),
        ]);
        let bytes = echo(&[LayerKind::Icmp4], &tmpl).unwrap();
        assert_eq!(&bytes[..2], &[8, 0]);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0, 1]);
        assert!(checksum::verifies(&bytes));

        // Left to the IP layer.
        let bytes = echo(&[LayerKind::Icmp4, LayerKind::Ip4], &tmpl).unwrap();
        assert_eq!(&bytes[2..4], &[0, 0]);
    }

    #[test]
    fn unsupported_type() {
        let tmpl = Node::structure(vec![("type", Node::Int(42))]);
        assert!(matches!(echo(&[LayerKind::Icmp4], &tmpl), Err(Error::Invalid(_))));
    }

    #[test]
    fn body_follows_received_type() {
        let kinds = [LayerKind::Icmp4];
        let mut icmp = Icmp4::new(StackInfo { kinds: &kinds, idx: 0 }, None).unwrap();
        let ptrn = icmp.confirm_ptrn(Some(&Node::structure(vec![
            ("gw-addr", Node::Bytes(vec![10, 0, 0, 254])),
        ]))).unwrap();
        let mut cx = MatchCx {
            stack: StackInfo { kinds: &kinds, idx: 0 },
            eval: EvalCx::default(),
            frame_seq: 0,
            atm_u2u: None,
        };

        let redirect = Bytes::from_static(&[5, 1, 0, 0, 10, 0, 0, 254, 0x45]);
        let mut pkt = icmp.match_pre(&ptrn).unwrap();
        let rest = icmp.match_do(&mut cx, &ptrn, &mut pkt, redirect).unwrap();
        assert_eq!(&rest[..], &[0x45]);
        let node = icmp.match_post(&pkt).unwrap();
        assert_eq!(node.bytes_child("gw-addr").unwrap(), Some(&[10, 0, 0, 254][..]));
        assert_eq!(node.int_child("code").unwrap(), Some(1));

        let other = Bytes::from_static(&[5, 1, 0, 0, 10, 0, 0, 1]);
        let mut pkt = icmp.match_pre(&ptrn).unwrap();
        assert_eq!(
            icmp.match_do(&mut cx, &ptrn, &mut pkt, other).err(),
            Some(Error::NotMatch { bit_offset: 32 }));
    }
}
