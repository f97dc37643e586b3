//! The ICMPv6 layer.
//!
//! Supported messages: echo request/reply, the MLD query, report and done messages, and the
//! router and neighbor solicitations and advertisements. Neighbor discovery options are part of
//! the payload.
//!
//! The checksum covers the pseudo header of the IPv6 layer below, with the addresses that layer
//! sends with.
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc};
use crate::nds::Node;
use crate::packet::Packet;
use crate::wire::{checksum, IpProtocol};
use crate::{Error, Result};

use super::icmp::{Family, COMMON_LEN};
use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, StackInfo};

static ECHO: [FieldDesc; 2] = [
    FieldDesc::int("id", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("seq", 16).tx(DefaultSrc::Zero),
];

static MLD: [FieldDesc; 3] = [
    FieldDesc::int("max-resp-delay", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("reserved", 16).tx(DefaultSrc::Zero),
    FieldDesc::octets("mcast-addr", 128).tx(DefaultSrc::Zero),
];

static ROUTER_SOL: [FieldDesc; 1] = [
    FieldDesc::int("reserved", 32).tx(DefaultSrc::Zero),
];

static ROUTER_ADV: [FieldDesc; 7] = [
    FieldDesc::int("cur-hop-limit", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("m", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("o", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("reserved", 6).tx(DefaultSrc::Zero),
    FieldDesc::int("router-lifetime", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("reachable-time", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("retrans-timer", 32).tx(DefaultSrc::Zero),
];

static NEIGHBOR_SOL: [FieldDesc; 2] = [
    FieldDesc::int("reserved", 32).tx(DefaultSrc::Zero),
    FieldDesc::octets("target-addr", 128),
];

static NEIGHBOR_ADV: [FieldDesc; 5] = [
    FieldDesc::int("r", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("s", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("o", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("reserved", 29).tx(DefaultSrc::Zero),
    FieldDesc::octets("target-addr", 128),
];

fn body(ty: u8) -> Option<&'static [FieldDesc]> {
    match ty {
        128 | 129 => Some(&ECHO),
        130..=132 => Some(&MLD),
        133 => Some(&ROUTER_SOL),
        134 => Some(&ROUTER_ADV),
        135 => Some(&NEIGHBOR_SOL),
        136 => Some(&NEIGHBOR_ADV),
        _ => None,
    }
}

/// An ICMPv6 layer instance.
pub struct Icmp6 {
    family: Family,
}

impl Icmp6 {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Icmp6 { family: Family::new(params, body, "ICMPv6")? })
    }
}

impl Layer for Icmp6 {
    fn kind(&self) -> LayerKind {
        LayerKind::Icmp6
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        self.family.confirm_tmpl(tmpl)
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let fill = !pdu.hdr.is_set("checksum");
        let pseudo_addrs = match cx.lower().map(|lower| &lower.ext) {
            Some(PduExt::Ip6(ip6)) if fill => match (&ip6.src, &ip6.dst) {
                (Some(src), Some(dst)) => Some((src, dst)),
                _ => return Err(Error::MissingForSend { field: "src-addr" }),
            },
            _ => None,
        };

        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            self.family.encode(&cx.eval, pdu, &mut pkt)?;
            if let Some((src, dst)) = pseudo_addrs {
                let bytes = pkt.to_vec();
                let pseudo = checksum::pseudo_header_v6(
                    src, dst, IpProtocol::Icmpv6.into(), bytes.len() as u32);
                let sum = checksum::finish(checksum::combine(&[checksum::data(&bytes), pseudo]));
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
            return Err(Error::Truncated);
        }
        self.family.match_do(&cx.eval, ptrn, pkt, sdu)
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        self.family.match_post(pkt)
    }
}
