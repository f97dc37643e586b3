//! The UDP layer.
//!
//! The length is computed from the payload. The checksum is left to the IP layer below, which
//! knows the pseudo header, and is sent as zero when there is none.
//!
//! CSAP parameters: `local-port` and `remote-port`.
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::nds::Node;
use crate::packet::Packet;
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

/// Length of the header.
pub const HEADER_LEN: usize = 8;

static HEADER: [FieldDesc; 4] = [
    FieldDesc::int("src-port", 16)
        .tx(DefaultSrc::Param("local-port"))
        .rx(DefaultSrc::Param("remote-port")),
    FieldDesc::int("dst-port", 16)
        .tx(DefaultSrc::Param("remote-port"))
        .rx(DefaultSrc::Param("local-port")),
    FieldDesc::int("length", 16).computed(),
    FieldDesc::int("checksum", 16).computed(),
];

/// A UDP layer instance.
pub struct Udp {
    def: FragDef,
}

impl Udp {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Udp { def: FragDef::init(&HEADER, params)? })
    }
}

impl Layer for Udp {
    fn kind(&self) -> LayerKind {
        LayerKind::Udp
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let data = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            let mut data = pdu.hdr.clone();
            super::set_computed(&mut data, "length", (HEADER_LEN + pkt.len()) as u32)?;
            super::prepend_header(&self.def, &data, &cx.eval, &mut pkt)?;
            out.push(pkt);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        Ok(Pdu::new(self.def.nds_to_data(ptrn)?))
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let len = super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;
        let total = pkt.hdr.get_int("length").unwrap_or(0) as usize;
        if total < len || sdu.len() < total {
            return Err(Error::Truncated);
        }
        Ok(sdu.slice(len..total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::du::EvalCx;

    fn params() -> Node {
        Node::structure(vec![
            ("local-port", Node::Int(5000)),
            ("remote-port", Node::Int(53)),
        ])
    }

    #[test]
    fn header_from_params() {
        let kinds = [LayerKind::Udp];
        let mut udp = Udp::new(StackInfo { kinds: &kinds, idx: 0 }, Some(&params())).unwrap();
        let pdus = [udp.confirm_tmpl(None).unwrap()];
        let cx = GenCx { stack: StackInfo { kinds: &kinds, idx: 0 }, pdus: &pdus, eval: EvalCx::default() };
        let pkts = udp.generate(&cx, &pdus[0], vec![Packet::from_vec(vec![1, 2, 3])]).unwrap();
        assert_eq!(pkts[0].to_vec(), [0x13, 0x88, 0, 53, 0, 11, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn receive_trims_to_length() {
        let kinds = [LayerKind::Udp];
        let mut udp = Udp::new(StackInfo { kinds: &kinds, idx: 0 }, Some(&params())).unwrap();
        let ptrn = udp.confirm_ptrn(None).unwrap();
        let mut cx = MatchCx {
            stack: StackInfo { kinds: &kinds, idx: 0 },
            eval: EvalCx::default(),
            frame_seq: 0,
            atm_u2u: None,
        };

        let datagram = Bytes::from_static(&[0, 53, 0x13, 0x88, 0, 10, 0, 0, 7, 8, 0, 0]);
        let mut pkt = udp.match_pre(&ptrn).unwrap();
        let rest = udp.match_do(&mut cx, &ptrn, &mut pkt, datagram).unwrap();
        assert_eq!(&rest[..], &[7, 8]);

        // Sent to another port.
        let datagram = Bytes::from_static(&[0, 53, 0x13, 0x89, 0, 8, 0, 0]);
        let mut pkt = udp.match_pre(&ptrn).unwrap();
        assert_eq!(
            udp.match_do(&mut cx, &ptrn, &mut pkt, datagram).err(),
            Some(Error::NotMatch { bit_offset: 16 }));
    }
}
