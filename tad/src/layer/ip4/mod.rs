//! The IPv4 layer.
//!
//! Fills in the header length, total length and header checksum unless the template sets them,
//! and the checksum of an encapsulated UDP, TCP or ICMP message (see [`PldChecksum`]).
//!
//! A template may describe the fragments to emit in a `fragments` sequence. Every element
//! produces one packet whose header carries the element's fields verbatim and whose payload is
//! the slice `real-offset..real-offset + real-length` of the datagram:
//!
//! ```text
//! { "hdr-offset": 1, "more-frags": 0, "real-offset": 8, "real-length": 4 }
//! ```
//!
//! `hdr-offset` is in units of eight octets as on the wire, `hdr-length` defaults to the length
//! of the emitted fragment. Slices reaching past the datagram are filled with random octets.
//!
//! CSAP parameters: `local-addr`, `remote-addr` (4 octets each), `protocol` and
//! `time-to-live`. The protocol defaults to that of the layer above.
//!
//! [`PldChecksum`]: ../enum.PldChecksum.html
use std::convert::TryFrom;

use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragData, FragDef};
use crate::du::{DataUnit, EvalCx};
use crate::nds::Node;
use crate::packet::{FragPolicy, Packet, Segment};
use crate::wire::checksum;
use crate::{Error, Result};

use super::csum::Pseudo;
use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, PldChecksum, StackInfo};

#[cfg(test)]
mod tests;

/// Length of the header without options.
pub const HEADER_LEN: usize = 20;

static HEADER: [FieldDesc; 14] = [
    FieldDesc::int("version", 4).fixed(4),
    FieldDesc::int("h-length", 4).computed(),
    FieldDesc::int("type-of-service", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("total-length", 16).computed(),
    FieldDesc::int("ip-ident", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("reserved", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("dont-frag", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("more-frags", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("frag-offset", 13).tx(DefaultSrc::Zero),
    FieldDesc::int("time-to-live", 8).tx(DefaultSrc::ParamOr("time-to-live", 64)),
    FieldDesc::int("protocol", 8).both(DefaultSrc::Param("protocol")),
    FieldDesc::int("h-checksum", 16).computed(),
    FieldDesc::octets("src-addr", 32)
        .tx(DefaultSrc::Param("local-addr"))
        .rx(DefaultSrc::Param("remote-addr")),
    FieldDesc::octets("dst-addr", 32)
        .tx(DefaultSrc::Param("remote-addr"))
        .rx(DefaultSrc::Param("local-addr")),
];

/// The parts of an IPv4 PDU beyond the fixed header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ip4Ext {
    /// Raw header options.
    pub options: Vec<u8>,
    /// The fragments to emit, empty for an unfragmented datagram.
    pub fragments: Vec<FragmentSpec>,
    /// Treatment of the payload checksum.
    pub pld_checksum: PldChecksum,
}

/// The description of one emitted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSpec {
    /// The fragment offset written to the header, in units of eight octets.
    pub hdr_offset: u32,
    /// The total length written to the header, the emitted length if absent.
    pub hdr_length: Option<u32>,
    /// The more-fragments flag.
    pub more_frags: bool,
    /// The don't-fragment flag.
    pub dont_frag: bool,
    /// Start of the payload slice within the datagram.
    pub real_offset: usize,
    /// Length of the payload slice.
    pub real_length: usize,
}

/// An IPv4 layer instance.
pub struct Ip4 {
    def: FragDef,
}

impl FragmentSpec {
    /// Read a fragment description from a template node.
    pub fn from_node(node: &Node) -> Result<Self> {
        let required = |label: &str| -> Result<i64> {
            node.int_child(label)?
                .ok_or_else(|| Error::bad_template(format!("fragment lacks `{}`", label)))
        };
        let flag = |label: &str| -> Result<bool> {
            Ok(node.int_child(label)?.unwrap_or(0) != 0)
        };
        let unsigned = |label: &str, val: i64| -> Result<usize> {
            usize::try_from(val)
                .map_err(|_| Error::bad_template(format!("fragment `{}` is negative", label)))
        };

        let hdr_offset = node.int_child("hdr-offset")?.unwrap_or(0);
        if !(0..1 << 13).contains(&hdr_offset) {
            return Err(Error::bad_template(format!("fragment offset {} out of range", hdr_offset)));
        }
        let hdr_length = match node.int_child("hdr-length")? {
            None => None,
            Some(len) if (0..1 << 16).contains(&len) => Some(len as u32),
            Some(len) => return Err(Error::bad_template(format!("total length {} out of range", len))),
        };

        Ok(FragmentSpec {
            hdr_offset: hdr_offset as u32,
            hdr_length,
            more_frags: flag("more-frags")?,
            dont_frag: flag("dont-frag")?,
            real_offset: unsigned("real-offset", required("real-offset")?)?,
            real_length: unsigned("real-length", required("real-length")?)?,
        })
    }
}

impl Ip4 {
    /// Create the layer from its CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        let mut def = FragDef::init(&HEADER, params)?;
        if let Some(protocol) = stack.upper().and_then(LayerKind::ip_protocol) {
            def.infer_default("protocol", DataUnit::Int(u8::from(protocol).into()));
        }
        Ok(Ip4 { def })
    }

    fn addresses(&self, data: &FragData) -> Option<([u8; 4], [u8; 4])> {
        let addr = |name: &str| self.def.tx_value(data, name)
            .as_octets()
            .and_then(|octets| <[u8; 4]>::try_from(octets).ok());
        Some((addr("src-addr")?, addr("dst-addr")?))
    }

    /// Prepend one header, filling what the template leaves to the layer.
    fn emit(&self, eval: &EvalCx, mut data: FragData, options: &[u8], pkt: &mut Packet) -> Result<()> {
        let hdr_len = HEADER_LEN + options.len();
        super::set_computed(&mut data, "h-length", (hdr_len / 4) as u32)?;
        super::set_computed(&mut data, "total-length", (hdr_len + pkt.len()) as u32)?;

        let mut header = self.def.generate_vec(&data, eval)?;
        header.extend_from_slice(options);
        if !data.is_set("h-checksum") {
            let sum = checksum::finish(checksum::data(&header));
            header[10..12].copy_from_slice(&sum.to_be_bytes());
        }

        pkt.prepend_seg(Segment::owned(header));
        Ok(())
    }
}

fn ext_of(pdu: &Pdu) -> Result<&Ip4Ext> {
    match &pdu.ext {
        PduExt::Ip4(ext) => Ok(ext),
        _ => Err(Error::Fatal("IPv4 PDU without its extension")),
    }
}

impl Layer for Ip4 {
    fn kind(&self) -> LayerKind {
        LayerKind::Ip4
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&hdr)?;

        let fragments = match tmpl {
            Some(node) => node.seq_child("fragments")?
                .unwrap_or(&[])
                .iter()
                .map(FragmentSpec::from_node)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let ext = Ip4Ext {
            options: super::word_options(tmpl)?,
            fragments,
            pld_checksum: PldChecksum::from_node(tmpl)?,
        };
        Ok(Pdu { hdr, ext: PduExt::Ip4(ext) })
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let ext = ext_of(pdu)?;
        let protocol = self.def.tx_value(&pdu.hdr, "protocol").resolve(&cx.eval)?
            .as_int()
            .unwrap_or(0) as u8;
        let addresses = self.addresses(&pdu.hdr);

        let mut out = Vec::with_capacity(sdus.len() * ext.fragments.len().max(1));
        for mut sdu in sdus {
            let pseudo = addresses.as_ref().map(|(src, dst)| Pseudo::V4(src, dst));
            ext.pld_checksum.apply(cx, protocol, pseudo, &mut sdu)?;

            if ext.fragments.is_empty() {
                self.emit(&cx.eval, pdu.hdr.clone(), &ext.options, &mut sdu)?;
                out.push(sdu);
                continue;
            }

            for fragment in &ext.fragments {
                let mut frag = sdu.get_frag(fragment.real_offset, fragment.real_length, FragPolicy::Rand)?;
                let mut data = pdu.hdr.clone();
                data.set("frag-offset", DataUnit::Int(fragment.hdr_offset))?;
                data.set("more-frags", DataUnit::Int(fragment.more_frags.into()))?;
                data.set("dont-frag", DataUnit::Int(fragment.dont_frag.into()))?;
                if let Some(len) = fragment.hdr_length {
                    data.set("total-length", DataUnit::Int(len))?;
                }
                self.emit(&cx.eval, data, &ext.options, &mut frag)?;
                out.push(frag);
            }
        }

        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        let ext = Ip4Ext {
            options: super::word_options(ptrn)?,
            ..Ip4Ext::default()
        };
        Ok(Pdu { hdr, ext: PduExt::Ip4(ext) })
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;

        let hdr_len = pkt.hdr.get_int("h-length").unwrap_or(0) as usize * 4;
        let total = pkt.hdr.get_int("total-length").unwrap_or(0) as usize;
        if hdr_len < HEADER_LEN || total < hdr_len || sdu.len() < total {
            return Err(Error::Truncated);
        }
        // A pattern that names the checksum matches it like any other field.
        if !ptrn.hdr.is_set("h-checksum") && !checksum::verifies(&sdu[..hdr_len]) {
            return Err(Error::NotMatch { bit_offset: 80 });
        }

        let options = sdu[HEADER_LEN..hdr_len].to_vec();
        if let Ok(expected) = ext_of(ptrn) {
            if !expected.options.is_empty() && expected.options != options {
                return Err(Error::NotMatch { bit_offset: HEADER_LEN * 8 });
            }
        }
        pkt.ext = PduExt::Ip4(Ip4Ext { options, ..Ip4Ext::default() });

        // Anything past the total length is link layer padding.
        Ok(sdu.slice(hdr_len..total))
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        if let PduExt::Ip4(ext) = &pkt.ext {
            if !ext.options.is_empty() {
                node.write("options", Node::Bytes(ext.options.clone()))?;
            }
        }
        Ok(node)
    }
}
