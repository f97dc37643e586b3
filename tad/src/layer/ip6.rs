//! The IPv6 layer.
//!
//! The payload length is always computed. Hop-by-Hop and Destination options headers are given
//! as an `ext-headers` sequence of choices:
//!
//! ```text
//! "ext-headers": { "seq": [
//!     { "choice": ["hop-by-hop", { "struct": { "options": { "seq": [
//!         { "choice": ["router-alert", { "struct": { "value": { "int": 0 } } }] },
//!         { "choice": ["tlv", { "struct": { "type": { "int": 1 }, "data": { "bytes": [0, 0] } } }] }
//!     ] } } }] }
//! ] }
//! ```
//!
//! Options are `pad1`, `tlv { type, length, data }` and `router-alert { value }`. The options of
//! a header must fill it to a multiple of eight octets, the header length field is derived from
//! them. The next header of the last extension header, or of the main header without extension
//! headers, defaults to the protocol of the layer above.
//!
//! CSAP parameters: `local-addr`, `remote-addr` (16 octets each), `next-header` and
//! `hop-limit`.
use std::convert::TryFrom;

use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragData, FragDef};
use crate::du::{DataUnit, DuKind, Value};
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::wire::IpProtocol;
use crate::{Error, Result};

use super::csum::Pseudo;
use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, PldChecksum, StackInfo};

/// Length of the fixed header.
pub const HEADER_LEN: usize = 40;

static HEADER: [FieldDesc; 8] = [
    FieldDesc::int("version", 4).fixed(6),
    FieldDesc::int("traffic-class", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("flow-label", 20).tx(DefaultSrc::Zero),
    FieldDesc::int("payload-length", 16).computed(),
    FieldDesc::int("next-header", 8).computed(),
    FieldDesc::int("hop-limit", 8).tx(DefaultSrc::ParamOr("hop-limit", 64)),
    FieldDesc::octets("src-addr", 128)
        .tx(DefaultSrc::Param("local-addr"))
        .rx(DefaultSrc::Param("remote-addr")),
    FieldDesc::octets("dst-addr", 128)
        .tx(DefaultSrc::Param("remote-addr"))
        .rx(DefaultSrc::Param("local-addr")),
];

/// The extension headers this layer builds and parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtKind {
    /// Hop-by-Hop options.
    HopByHop,
    /// Destination options.
    Destination,
}

/// One options extension header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtHeader {
    /// Which header.
    pub kind: ExtKind,
    /// The explicit next header, otherwise derived from what follows.
    pub next_header: Option<u8>,
    /// The encoded options.
    pub options: Vec<u8>,
}

/// The parts of an IPv6 PDU beyond the fixed header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ip6Ext {
    /// Extension headers in wire order.
    pub ext_headers: Vec<ExtHeader>,
    /// The source address the packet is sent with, if known at confirmation.
    pub src: Option<[u8; 16]>,
    /// The destination address the packet is sent with, if known at confirmation.
    pub dst: Option<[u8; 16]>,
    /// Treatment of the payload checksum.
    pub pld_checksum: PldChecksum,
}

/// An IPv6 layer instance.
pub struct Ip6 {
    def: FragDef,
    /// The protocol of the layer above, sent by and expected in the last header.
    upper: DataUnit,
}

impl ExtKind {
    /// The next header value that announces this header.
    pub fn protocol(self) -> IpProtocol {
        match self {
            ExtKind::HopByHop => IpProtocol::HopByHop,
            ExtKind::Destination => IpProtocol::Ipv6Opts,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ExtKind::HopByHop => "hop-by-hop",
            ExtKind::Destination => "destination",
        }
    }

    fn from_protocol(protocol: u8) -> Option<Self> {
        match IpProtocol::from(protocol) {
            IpProtocol::HopByHop => Some(ExtKind::HopByHop),
            IpProtocol::Ipv6Opts => Some(ExtKind::Destination),
            _ => None,
        }
    }
}

impl ExtHeader {
    /// Build an extension header from its template choice.
    pub fn from_node(node: &Node) -> Result<Self> {
        let (label, body) = node.as_choice()
            .ok_or_else(|| Error::bad_template("extension header must be a choice"))?;
        let kind = match label {
            "hop-by-hop" => ExtKind::HopByHop,
            "destination" => ExtKind::Destination,
            other => return Err(Error::bad_template(format!("unknown extension header `{}`", other))),
        };

        let next_header = match body.int_child("next-header")? {
            None => None,
            Some(val) => Some(u8::try_from(val)
                .map_err(|_| Error::bad_template(format!("next header {} out of range", val)))?),
        };

        let mut options = Vec::new();
        for option in body.seq_child("options")?.unwrap_or(&[]) {
            encode_option(option, &mut options)?;
        }
        if (2 + options.len()) % 8 != 0 {
            return Err(Error::bad_template(format!(
                "{} option octets do not fill the {} header to a multiple of 8",
                options.len(), kind.label())));
        }

        Ok(ExtHeader { kind, next_header, options })
    }

    /// The encoded length in octets.
    pub fn len(&self) -> usize {
        2 + self.options.len()
    }

    /// Query whether the header carries no options, which is never valid on the wire.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    fn encode(&self, next_header: u8, out: &mut Vec<u8>) {
        out.push(self.next_header.unwrap_or(next_header));
        out.push((self.len() / 8 - 1) as u8);
        out.extend_from_slice(&self.options);
    }
}

fn encode_option(node: &Node, out: &mut Vec<u8>) -> Result<()> {
    let byte = |body: &Node, label: &str| -> Result<Option<u8>> {
        match body.int_child(label)? {
            None => Ok(None),
            Some(val) => u8::try_from(val)
                .map(Some)
                .map_err(|_| Error::bad_template(format!("option `{}` out of range", label))),
        }
    };

    match node.as_choice() {
        Some(("pad1", _)) => out.push(0),
        Some(("tlv", body)) => {
            let ty = byte(body, "type")?
                .ok_or(Error::MissingForSend { field: "type" })?;
            let data = body.bytes_child("data")?.unwrap_or(&[]);
            let len = match byte(body, "length")? {
                Some(len) => len,
                None => u8::try_from(data.len())
                    .map_err(|_| Error::bad_template("option data longer than 255 octets"))?,
            };
            out.push(ty);
            out.push(len);
            out.extend_from_slice(data);
        },
        Some(("router-alert", body)) => {
            let value = body.int_child("value")?.unwrap_or(0);
            let value = u16::try_from(value)
                .map_err(|_| Error::bad_template(format!("router alert {} out of range", value)))?;
            out.extend_from_slice(&[5, 2]);
            out.extend_from_slice(&value.to_be_bytes());
        },
        Some((other, _)) => {
            return Err(Error::bad_template(format!("unknown IPv6 option `{}`", other)));
        },
        None => return Err(Error::bad_template("IPv6 option must be a choice")),
    }
    Ok(())
}

impl Ip6 {
    /// Create the layer from its CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        let def = FragDef::init(&HEADER, params)?;
        let upper = match params {
            Some(node) => node.read_as("next-header", DuKind::Int)?,
            None => DataUnit::Undef,
        };
        let upper = match (upper, stack.upper().and_then(LayerKind::ip_protocol)) {
            (DataUnit::Undef, Some(protocol)) => DataUnit::Int(u8::from(protocol).into()),
            (upper, _) => upper,
        };
        Ok(Ip6 { def, upper })
    }

    fn address(&self, data: &FragData, name: &str) -> Option<[u8; 16]> {
        self.def.tx_value(data, name)
            .as_octets()
            .and_then(|octets| <[u8; 16]>::try_from(octets).ok())
    }

    /// The protocol of the layer above, announced by the last header.
    fn upper_protocol(&self, data: &FragData, ext: &Ip6Ext) -> u8 {
        let explicit = match ext.ext_headers.last() {
            Some(last) => last.next_header.map(u32::from),
            None => data.get_int("next-header"),
        };
        explicit
            .or_else(|| self.upper.as_int())
            .unwrap_or_else(|| u8::from(IpProtocol::Ipv6NoNxt).into()) as u8
    }
}

fn ext_of(pdu: &Pdu) -> Result<&Ip6Ext> {
    match &pdu.ext {
        PduExt::Ip6(ext) => Ok(ext),
        _ => Err(Error::Fatal("IPv6 PDU without its extension")),
    }
}

impl Layer for Ip6 {
    fn kind(&self) -> LayerKind {
        LayerKind::Ip6
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&hdr)?;

        let ext_headers = match tmpl {
            Some(node) => node.seq_child("ext-headers")?
                .unwrap_or(&[])
                .iter()
                .map(ExtHeader::from_node)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let ext = Ip6Ext {
            ext_headers,
            src: self.address(&hdr, "src-addr"),
            dst: self.address(&hdr, "dst-addr"),
            pld_checksum: PldChecksum::from_node(tmpl)?,
        };
        Ok(Pdu { hdr, ext: PduExt::Ip6(ext) })
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let ext = ext_of(pdu)?;
        let protocol = self.upper_protocol(&pdu.hdr, ext);

        // The next header of each extension header is the kind of the one that follows.
        let mut ext_bytes = Vec::new();
        for (idx, header) in ext.ext_headers.iter().enumerate() {
            let next = ext.ext_headers.get(idx + 1)
                .map_or(protocol, |next| next.kind.protocol().into());
            header.encode(next, &mut ext_bytes);
        }

        let mut out = Vec::with_capacity(sdus.len());
        for mut sdu in sdus {
            let pseudo = match (&ext.src, &ext.dst) {
                (Some(src), Some(dst)) => Some(Pseudo::V6(src, dst)),
                _ => None,
            };
            ext.pld_checksum.apply(cx, protocol, pseudo, &mut sdu)?;

            let mut data = pdu.hdr.clone();
            data.set("payload-length", DataUnit::Int((ext_bytes.len() + sdu.len()) as u32))?;
            let next = match ext.ext_headers.first() {
                Some(first) => first.kind.protocol().into(),
                None => protocol,
            };
            data.set_if_undef("next-header", DataUnit::Int(next.into()))?;

            if !ext_bytes.is_empty() {
                sdu.prepend_seg(Segment::owned(ext_bytes.clone()));
            }
            super::prepend_header(&self.def, &data, &cx.eval, &mut sdu)?;
            out.push(sdu);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        Ok(Pdu { hdr, ext: PduExt::Ip6(Ip6Ext::default()) })
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        // The pattern's next header names the protocol above the extension headers, it is
        // compared once they have been skipped.
        let mut header_ptrn = ptrn.hdr.clone();
        header_ptrn.set("next-header", DataUnit::Undef)?;
        let len = super::match_header(&self.def, &header_ptrn, &mut pkt.hdr, &sdu, &cx.eval)?;

        let payload_len = pkt.hdr.get_int("payload-length").unwrap_or(0) as usize;
        if sdu.len() < len + payload_len {
            return Err(Error::Truncated);
        }
        let mut payload = sdu.slice(len..len + payload_len);

        let mut next = pkt.hdr.get_int("next-header").unwrap_or(0) as u8;
        let mut ext_headers = Vec::new();
        while let Some(kind) = ExtKind::from_protocol(next) {
            if payload.len() < 8 {
                return Err(Error::Truncated);
            }
            let ext_len = (usize::from(payload[1]) + 1) * 8;
            if payload.len() < ext_len {
                return Err(Error::Truncated);
            }
            ext_headers.push(ExtHeader {
                kind,
                next_header: Some(payload[0]),
                options: payload[2..ext_len].to_vec(),
            });
            next = payload[0];
            payload = payload.slice(ext_len..);
        }

        let expected = match ptrn.hdr.get("next-header") {
            DataUnit::Undef => &self.upper,
            du => du,
        };
        if !expected.matches(Value::Int(next.into()), &cx.eval)? {
            return Err(Error::NotMatch { bit_offset: 48 });
        }

        pkt.ext = PduExt::Ip6(Ip6Ext { ext_headers, ..Ip6Ext::default() });
        Ok(payload)
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        if let PduExt::Ip6(ext) = &pkt.ext {
            if !ext.ext_headers.is_empty() {
                let headers = ext.ext_headers.iter()
                    .map(|header| Node::choice(header.kind.label(), Node::structure(vec![
                        ("next-header", Node::Int(header.next_header.unwrap_or(0).into())),
                        ("length", Node::Int((header.len() / 8 - 1) as i64)),
                        ("options", Node::Bytes(header.options.clone())),
                    ])))
                    .collect();
                node.write("ext-headers", Node::Seq(headers))?;
            }
        }
        Ok(node)
    }
}
