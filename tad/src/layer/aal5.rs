//! The AAL5 common part convergence sublayer.
//!
//! A CPCS PDU is the payload followed by padding and an eight octet trailer so that the total is
//! a multiple of the 48 octet cell payload. The trailer carries the user-to-user octet, the
//! common part indicator, the payload length and a CRC-32 over everything before the CRC itself.
//! Length and CRC are computed unless the template gives them.
//!
//! Above an ATM layer the PDU is split into cells and the last cell is flagged with the ATM
//! user-to-user indication. On receipt, cell payloads are collected until a flagged cell
//! completes the PDU. Without an ATM layer below the PDU is sent and received in one piece.
use bytes::{Bytes, BytesMut};

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::nds::Node;
use crate::packet::{AtmHint, Packet, Segment};
use crate::wire::crc32;
use crate::{Error, Result};

use super::atm::PAYLOAD_LEN as CELL_PAYLOAD;
use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

/// Length of the trailer.
pub const TRAILER_LEN: usize = 8;

static TRAILER: [FieldDesc; 4] = [
    FieldDesc::int("cpcs-uu", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("cpi", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("length", 16).computed(),
    FieldDesc::int("crc", 32).computed(),
];

/// The longest CPCS PDU, a payload of 65535 octets with padding and trailer.
pub const MAX_PDU_LEN: usize = (0xffff + TRAILER_LEN + CELL_PAYLOAD - 1) / CELL_PAYLOAD * CELL_PAYLOAD;

static PADDING: [u8; CELL_PAYLOAD - 1] = [0; CELL_PAYLOAD - 1];

/// The padding needed after a payload of `len` octets.
pub fn pad_len(len: usize) -> usize {
    (CELL_PAYLOAD - (len + TRAILER_LEN) % CELL_PAYLOAD) % CELL_PAYLOAD
}

/// Cell payloads of a PDU under reassembly.
#[derive(Debug, Default)]
struct Reassembly {
    buf: BytesMut,
    /// The frame last appended to `buf`.
    last_seq: Option<u64>,
    /// A completed PDU and the frame that completed it.
    complete: Option<(u64, Bytes)>,
}

/// An AAL5 layer instance.
pub struct Aal5 {
    def: FragDef,
    over_atm: bool,
    rx: Reassembly,
}

impl Aal5 {
    /// Create the layer, it has no CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Aal5 {
            def: FragDef::init(&TRAILER, params)?,
            over_atm: stack.lower() == Some(LayerKind::Atm),
            rx: Reassembly::default(),
        })
    }

    fn cpcs_pdu(&self, cx: &GenCx, pdu: &Pdu, mut pkt: Packet) -> Result<Packet> {
        let len = pkt.len();
        if len > usize::from(u16::MAX) {
            return Err(Error::invalid(format!("AAL5 payload of {} octets", len)));
        }

        let pad = pad_len(len);
        if pad > 0 {
            pkt.append_seg(Segment::from_static(&PADDING[..pad]));
        }

        let mut data = pdu.hdr.clone();
        super::set_computed(&mut data, "length", len as u32)?;
        let mut trailer = self.def.generate_vec(&data, &cx.eval)?;
        if !data.is_set("crc") {
            let crc = crc32::checksum_iter(pkt.segments()
                .map(Segment::as_slice)
                .chain(Some(&trailer[..4])));
            trailer[4..].copy_from_slice(&crc.to_be_bytes());
        }
        pkt.append_seg(Segment::owned(trailer));
        Ok(pkt)
    }

    /// Feed one cell payload, returns the PDU once it is complete.
    fn reassemble(&mut self, cx: &MatchCx, cell: Bytes) -> Option<Bytes> {
        // Another pattern unit looks at the frame that completed the PDU.
        if let Some((seq, pdu)) = &self.rx.complete {
            if *seq == cx.frame_seq {
                return Some(pdu.clone());
            }
        }
        if self.rx.last_seq == Some(cx.frame_seq) {
            return None;
        }

        self.rx.complete = None;
        self.rx.last_seq = Some(cx.frame_seq);
        if self.rx.buf.len() + cell.len() > MAX_PDU_LEN {
            tracing::debug!(buffered = self.rx.buf.len(), "AAL5 PDU without end, discarded");
            self.rx.buf.clear();
            return None;
        }
        self.rx.buf.extend_from_slice(&cell);
        if cx.atm_u2u == Some(true) {
            let pdu = self.rx.buf.split().freeze();
            self.rx.complete = Some((cx.frame_seq, pdu.clone()));
            Some(pdu)
        } else {
            None
        }
    }
}

impl Layer for Aal5 {
    fn kind(&self) -> LayerKind {
        LayerKind::Aal5
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let data = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        for pkt in sdus {
            let mut cpcs = self.cpcs_pdu(cx, pdu, pkt)?;
            if !self.over_atm {
                out.push(cpcs);
                continue;
            }

            let mut cells = cpcs.fragment(CELL_PAYLOAD, 0, false)?;
            let last = cells.len() - 1;
            for (idx, cell) in cells.iter_mut().enumerate() {
                cell.set_hint(AtmHint { u2u: idx == last, user_data: true, ..AtmHint::default() });
            }
            tracing::trace!(cells = cells.len(), "segmented CPCS PDU");
            out.extend(cells);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        Ok(Pdu::new(self.def.nds_to_data(ptrn)?))
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let cpcs = if self.over_atm {
            self.reassemble(cx, sdu).ok_or(Error::NotMatch { bit_offset: 0 })?
        } else {
            sdu
        };
        if cpcs.len() < TRAILER_LEN {
            return Err(Error::Truncated);
        }

        let trailer_at = cpcs.len() - TRAILER_LEN;
        super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &cpcs[trailer_at..], &cx.eval)
            .map_err(|err| err.offset_by(trailer_at * 8))?;

        let len = pkt.hdr.get_int("length").unwrap_or(0) as usize;
        if len > trailer_at {
            return Err(Error::Truncated);
        }
        let crc = pkt.hdr.get_int("crc").unwrap_or(0);
        if crc32::checksum(&cpcs[..cpcs.len() - 4]) != crc {
            tracing::debug!(len, "AAL5 CRC mismatch");
            return Err(Error::NotMatch { bit_offset: (cpcs.len() - 4) * 8 });
        }
        Ok(cpcs.slice(..len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nds::{Pattern, Payload, Template};
    use crate::stack::Stack;

    fn aal5_over_atm() -> Stack {
        Stack::new(&[
            Node::choice("aal5", Node::empty()),
            Node::choice("atm", Node::structure(vec![
                ("vpi", Node::Int(0)),
                ("vci", Node::Int(100)),
            ])),
        ]).unwrap()
    }

    #[test]
    fn padding() {
        assert_eq!(pad_len(40), 0);
        assert_eq!(pad_len(41), 47);
        assert_eq!(pad_len(0), 40);
        assert_eq!(pad_len(88), 0);
    }

    #[test]
    fn single_cell_pdu() {
        let mut stack = aal5_over_atm();
        let template = Template::new(vec![])
            .with_payload(Payload::Bytes(vec![0xaa; 40]));
        let cells = stack.build(&template, None).unwrap();
        assert_eq!(cells.len(), 1);

        let cell = cells[0].to_vec();
        assert_eq!(cell.len(), 53);
        // Payload type with the user-to-user indication.
        assert_eq!(cell[3] & 0x0e, 0x02);
        assert_eq!(&cell[5..45], &[0xaa; 40][..]);
        assert_eq!(&cell[45..], &[0, 0, 0, 40, 0x07, 0xef, 0xa7, 0xb6]);
    }

    #[test]
    fn multi_cell_round_trip() {
        let mut stack = aal5_over_atm();
        let payload: Vec<u8> = (0..100).collect();
        let template = Template::new(vec![]).with_payload(Payload::Bytes(payload.clone()));
        let cells = stack.build(&template, None).unwrap();
        assert_eq!(cells.len(), 3);
        let flags: Vec<u8> = cells.iter().map(|cell| cell.to_vec()[3] & 0x02).collect();
        assert_eq!(flags, [0, 0, 2]);

        let mut receiver = aal5_over_atm();
        let units = receiver.confirm_ptrn(&Pattern::single(vec![])).unwrap();
        let mut results = Vec::new();
        for (seq, cell) in cells.iter().enumerate() {
            let frame = Bytes::from(cell.to_vec());
            results.push(receiver.match_frame(&units, frame, seq as u64, None).unwrap());
        }
        assert_eq!(results[0], None);
        assert_eq!(results[1], None);
        let matched = results[2].take().unwrap();
        assert_eq!(&matched.payload[..], &payload[..]);
        let (_, aal5) = matched.pdus[0].as_choice().unwrap();
        assert_eq!(aal5.int_child("length").unwrap(), Some(100));
    }

    #[test]
    fn endless_pdu_is_discarded() {
        let mut stack = aal5_over_atm();
        let payload: Vec<u8> = (0..100).collect();
        let template = Template::new(vec![]).with_payload(Payload::Bytes(payload.clone()));
        let cells = stack.build(&template, None).unwrap();
        let first = Bytes::from(cells[0].to_vec());

        let mut receiver = aal5_over_atm();
        let units = receiver.confirm_ptrn(&Pattern::single(vec![])).unwrap();
        // One cell more than the longest PDU holds, the last one empties the buffer.
        let endless = MAX_PDU_LEN / CELL_PAYLOAD + 1;
        for seq in 0..endless {
            let matched = receiver.match_frame(&units, first.clone(), seq as u64, None).unwrap();
            assert_eq!(matched, None);
        }

        let mut last = None;
        for (idx, cell) in cells.iter().enumerate() {
            let seq = (endless + idx) as u64;
            last = receiver.match_frame(&units, Bytes::from(cell.to_vec()), seq, None).unwrap();
        }
        assert_eq!(&last.unwrap().payload[..], &payload[..]);
    }

    #[test]
    fn corrupted_pdu_is_skipped() {
        let mut stack = aal5_over_atm();
        let template = Template::new(vec![]).with_payload(Payload::Bytes(vec![1; 10]));
        let mut cell = stack.build(&template, None).unwrap().remove(0).to_vec();
        cell[6] ^= 0xff;

        let units = stack.confirm_ptrn(&Pattern::single(vec![])).unwrap();
        assert_eq!(stack.match_frame(&units, Bytes::from(cell), 0, None).unwrap(), None);
    }

    #[test]
    fn explicit_trailer_values() {
        let mut stack = Stack::new(&[Node::choice("aal5", Node::empty())]).unwrap();
        let template = Template::new(vec![
            Node::choice("aal5", Node::structure(vec![
                ("cpcs-uu", Node::Int(7)),
                ("length", Node::Int(3)),
                ("crc", Node::Int(0x1234_5678)),
            ])),
        ]).with_payload(Payload::Bytes(vec![9; 5]));
        let pdu = stack.build(&template, None).unwrap().remove(0).to_vec();
        assert_eq!(pdu.len(), 48);
        assert_eq!(&pdu[40..], &[7, 0, 0, 3, 0x12, 0x34, 0x56, 0x78]);
    }
}
