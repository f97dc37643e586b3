//! The DHCP layer for IPv4 (RFC 2131).
//!
//! The fixed 236 octet BOOTP header is followed by the magic cookie and an `options` sequence.
//! Each option is a structure of `type`, `length` and `value`, where the length defaults to that
//! of the value and an integer value is encoded in `length` octets:
//!
//! ```text
//! { "type": 53, "length": 1, "value": 1 }
//! ```
//!
//! Types `0` (pad) and `255` (end) are encoded as a single octet. A nested `options` sequence
//! becomes the value of its parent option, as used by the vendor specific information of type
//! 43. The end option is not added implicitly.
//!
//! A missing transaction id is chosen at random once per template. Received options are decoded
//! into the result, a pattern's options match if each of them is present with an equal value.
//!
//! CSAP parameters: `op`.
use std::convert::TryFrom;

use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::du::DataUnit;
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, StackInfo};

#[cfg(test)]
mod tests;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 236;

/// The magic cookie starting the options.
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// The pad option.
pub const OPT_PAD: u8 = 0;
/// The vendor specific information, a nested option list.
pub const OPT_VENDOR: u8 = 43;
/// The end option.
pub const OPT_END: u8 = 255;

static HEADER: [FieldDesc; 14] = [
    FieldDesc::int("op", 8).tx(DefaultSrc::Param("op")),
    FieldDesc::int("htype", 8).tx(DefaultSrc::Const(1)),
    FieldDesc::int("hlen", 8).tx(DefaultSrc::Const(6)),
    FieldDesc::int("hops", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("xid", 32),
    FieldDesc::int("secs", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("flags", 16).tx(DefaultSrc::Zero),
    FieldDesc::octets("ciaddr", 32).tx(DefaultSrc::Zero),
    FieldDesc::octets("yiaddr", 32).tx(DefaultSrc::Zero),
    FieldDesc::octets("siaddr", 32).tx(DefaultSrc::Zero),
    FieldDesc::octets("giaddr", 32).tx(DefaultSrc::Zero),
    FieldDesc::octets("chaddr", 128).tx(DefaultSrc::Zero),
    FieldDesc::octets("sname", 512).tx(DefaultSrc::Zero),
    FieldDesc::octets("file", 1024).tx(DefaultSrc::Zero),
];

/// One DHCP option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpOption {
    /// The option type.
    pub kind: u8,
    /// The length octet, the length of the value if `None`.
    pub length: Option<u8>,
    /// The value, absent for pad and end.
    pub value: Option<Vec<u8>>,
    /// Nested options, the decoded value of type 43.
    pub options: Vec<DhcpOption>,
}

fn is_bare(kind: u8) -> bool {
    kind == OPT_PAD || kind == OPT_END
}

fn int_octets(value: u32, width: Option<u8>) -> Result<Vec<u8>> {
    let width = match width {
        Some(width) => usize::from(width),
        None if value <= 0xff => 1,
        None if value <= 0xffff => 2,
        None => 4,
    };
    if width == 0 || width > 4 || (width < 4 && value >> (8 * width) != 0) {
        return Err(Error::bad_template(format!("option value {} does not fit {} octets", value, width)));
    }
    Ok(value.to_be_bytes()[4 - width..].to_vec())
}

impl DhcpOption {
    /// Read an option from its template or pattern structure.
    pub fn from_node(node: &Node) -> Result<Self> {
        let octet = |label: &str| -> Result<Option<u8>> {
            node.int_child(label)?
                .map(|val| u8::try_from(val)
                    .map_err(|_| Error::bad_template(format!("option {} {} out of range", label, val))))
                .transpose()
        };

        let kind = octet("type")?.ok_or_else(|| Error::bad_template("option without `type`"))?;
        let length = octet("length")?;
        let options = options_from(Some(node))?;
        let value = match node.get_child("value") {
            None if options.is_empty() => None,
            None => Some(encode_list(&options)),
            Some(Node::Int(val)) => Some(int_octets(crate::du::int_from_i64(*val)?, length)?),
            Some(other) => Some(other.as_bytes()
                .ok_or_else(|| Error::bad_template("option value must be an integer or octets"))?
                .to_vec()),
        };
        if value.as_ref().map_or(false, |value| value.len() > 255) {
            return Err(Error::bad_template(format!("option {} longer than 255 octets", kind)));
        }

        Ok(DhcpOption { kind, length, value, options })
    }

    /// Append the encoded option.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind);
        if is_bare(self.kind) {
            return;
        }
        let value = self.value.as_deref().unwrap_or(&[]);
        out.push(self.length.unwrap_or(value.len() as u8));
        out.extend_from_slice(value);
    }

    /// Query whether a received option satisfies this pattern option.
    pub fn matches(&self, received: &DhcpOption) -> bool {
        self.kind == received.kind
            && self.length.map_or(true, |len| received.length == Some(len))
            && self.value.as_ref().map_or(true, |value| received.value.as_ref() == Some(value))
    }

    /// The option as a result structure.
    pub fn to_node(&self) -> Node {
        let mut children = vec![("type", Node::Int(self.kind.into()))];
        if let Some(length) = self.length {
            children.push(("length", Node::Int(length.into())));
        }
        if let Some(value) = &self.value {
            children.push(("value", Node::Bytes(value.clone())));
        }
        if !self.options.is_empty() {
            children.push(("options", Node::Seq(self.options.iter().map(DhcpOption::to_node).collect())));
        }
        Node::structure(children)
    }
}

fn options_from(node: Option<&Node>) -> Result<Vec<DhcpOption>> {
    match node {
        Some(node) => node.seq_child("options")?
            .unwrap_or(&[])
            .iter()
            .map(DhcpOption::from_node)
            .collect(),
        None => Ok(Vec::new()),
    }
}

/// Encode a list of options without cookie.
pub fn encode_list(options: &[DhcpOption]) -> Vec<u8> {
    let mut out = Vec::new();
    for option in options {
        option.encode(&mut out);
    }
    out
}

/// Decode options up to and including the end option.
///
/// Returns the options and the number of octets they occupy.
pub fn parse_list(bytes: &[u8]) -> Result<(Vec<DhcpOption>, usize)> {
    let mut options = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let kind = bytes[at];
        if is_bare(kind) {
            options.push(DhcpOption { kind, ..DhcpOption::default() });
            at += 1;
            if kind == OPT_END {
                break;
            }
            continue;
        }

        let length = *bytes.get(at + 1).ok_or(Error::Truncated)?;
        let value = bytes.get(at + 2..at + 2 + usize::from(length)).ok_or(Error::Truncated)?;
        let nested = if kind == OPT_VENDOR {
            // Vendors are free to not use the option format.
            parse_list(value).map(|(nested, _)| nested).unwrap_or_default()
        } else {
            Vec::new()
        };
        options.push(DhcpOption {
            kind,
            length: Some(length),
            value: Some(value.to_vec()),
            options: nested,
        });
        at += 2 + usize::from(length);
    }
    Ok((options, at))
}

fn options_of(pdu: &Pdu) -> &[DhcpOption] {
    match &pdu.ext {
        PduExt::Dhcp(options) => options,
        _ => &[],
    }
}

/// A DHCP layer instance.
pub struct Dhcp {
    def: FragDef,
}

impl Dhcp {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Dhcp { def: FragDef::init(&HEADER, params)? })
    }
}

impl Layer for Dhcp {
    fn kind(&self) -> LayerKind {
        LayerKind::Dhcp
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let mut hdr = self.def.nds_to_data(tmpl)?;
        if hdr.get("xid").is_undef() {
            hdr.set("xid", DataUnit::Int(rand::random()))?;
        }
        self.def.confirm_send(&hdr)?;
        Ok(Pdu { hdr, ext: PduExt::Dhcp(options_from(tmpl)?) })
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let mut message = self.def.generate_vec(&pdu.hdr, &cx.eval)?;
        message.extend_from_slice(&MAGIC_COOKIE);
        for option in options_of(pdu) {
            option.encode(&mut message);
        }

        Ok(sdus.into_iter()
            .map(|mut pkt| {
                pkt.prepend_seg(Segment::owned(message.clone()));
                pkt
            })
            .collect())
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        Ok(Pdu { hdr, ext: PduExt::Dhcp(options_from(ptrn)?) })
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let len = super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;
        let wanted = options_of(ptrn);
        let options_at = len + MAGIC_COOKIE.len();

        let (received, end) = if sdu.get(len..options_at) == Some(&MAGIC_COOKIE[..]) {
            let (received, used) = parse_list(&sdu[options_at..])?;
            (received, options_at + used)
        } else {
            (Vec::new(), len)
        };

        if !wanted.iter().all(|want| received.iter().any(|got| want.matches(got))) {
            return Err(Error::NotMatch { bit_offset: options_at * 8 });
        }
        pkt.ext = PduExt::Dhcp(received);
        Ok(sdu.slice(end..))
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        let options = options_of(pkt).iter().map(DhcpOption::to_node).collect();
        node.write("options", Node::Seq(options))?;
        Ok(node)
    }
}
