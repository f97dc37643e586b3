//! The TCP layer, headers only.
//!
//! There is no connection state, every segment is built from its template. The header length is
//! derived from the `options`, which must be whole words, and the checksum is left to the IP
//! layer below.
//!
//! The generated packets carry a mark at the start of the TCP header. It survives the headers
//! prepended below and lets the [`flood`] helper find the sequence number in the final frame.
//!
//! CSAP parameters: `local-port` and `remote-port`.
//!
//! [`flood`]: flood/index.html
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, StackInfo};

pub mod flood;

#[cfg(test)]
mod tests;

/// Length of the header without options.
pub const HEADER_LEN: usize = 20;

/// Offset of the sequence number within the header.
pub const SEQ_OFFSET: usize = 4;

/// Offset of the checksum within the header.
pub const CHECKSUM_OFFSET: usize = 16;

static HEADER: [FieldDesc; 10] = [
    FieldDesc::int("src-port", 16)
        .tx(DefaultSrc::Param("local-port"))
        .rx(DefaultSrc::Param("remote-port")),
    FieldDesc::int("dst-port", 16)
        .tx(DefaultSrc::Param("remote-port"))
        .rx(DefaultSrc::Param("local-port")),
    FieldDesc::int("seqn", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("ackn", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("hlen", 4).computed(),
    FieldDesc::int("reserved", 4).tx(DefaultSrc::Zero),
    FieldDesc::int("flags", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("win-size", 16).tx(DefaultSrc::Const(65535)),
    FieldDesc::int("checksum", 16).computed(),
    FieldDesc::int("urg-p", 16).tx(DefaultSrc::Zero),
];

/// A TCP layer instance.
pub struct Tcp {
    def: FragDef,
}

fn options_of(pdu: &Pdu) -> &[u8] {
    match &pdu.ext {
        PduExt::Options(options) => options,
        _ => &[],
    }
}

impl Tcp {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Tcp { def: FragDef::init(&HEADER, params)? })
    }
}

impl Layer for Tcp {
    fn kind(&self) -> LayerKind {
        LayerKind::Tcp
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&hdr)?;
        let options = super::word_options(tmpl)?;
        Ok(Pdu { hdr, ext: PduExt::Options(options) })
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let options = options_of(pdu);
        let mut data = pdu.hdr.clone();
        super::set_computed(&mut data, "hlen", ((HEADER_LEN + options.len()) / 4) as u32)?;

        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            let mut header = self.def.generate_vec(&data, &cx.eval)?;
            header.extend_from_slice(options);
            pkt.prepend_seg(Segment::owned(header));
            pkt.set_mark(0);
            out.push(pkt);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        let options = super::word_options(ptrn)?;
        Ok(Pdu { hdr, ext: PduExt::Options(options) })
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;

        let hdr_len = pkt.hdr.get_int("hlen").unwrap_or(0) as usize * 4;
        if hdr_len < HEADER_LEN || sdu.len() < hdr_len {
            return Err(Error::Truncated);
        }
        let options = &sdu[HEADER_LEN..hdr_len];
        let expected = options_of(ptrn);
        if !expected.is_empty() && expected != options {
            return Err(Error::NotMatch { bit_offset: HEADER_LEN * 8 });
        }
        pkt.ext = PduExt::Options(options.to_vec());
        Ok(sdu.slice(hdr_len..))
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        let options = options_of(pkt);
        if !options.is_empty() {
            node.write("options", Node::Bytes(options.to_vec()))?;
        }
        Ok(node)
    }
}
