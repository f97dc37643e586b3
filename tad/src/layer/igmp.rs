//! The IGMP layer, versions 1 to 3.
//!
//! The common header `type`, `max-resp-time`, `checksum` is followed by a body selected by the
//! type:
//!
//! * membership query (`0x11`): `group-address`, and for version 3 `s`, `qrv`, `qqic`,
//!   `number-of-sources` and a `source-address-list`. A template selects version 3 by setting
//!   any of these, a received query by being longer than eight octets.
//! * version 1 and 2 reports and leave group (`0x12`, `0x16`, `0x17`): `group-address`.
//! * version 3 report (`0x22`): `reserved`, `number-of-groups` and a `group-records` sequence,
//!   each record a structure of `record-type`, `multicast-address`, `source-address-list` and
//!   optional `aux-data`.
//!
//! Source lists are sequences of four octet addresses. Patterns match on the fixed fields only.
//! The layer always computes its own checksum.
use std::convert::TryFrom;

use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragData, FragDef};
use crate::du::{DataUnit, DuKind, EvalCx};
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::wire::checksum;
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, PduExt, StackInfo};

/// Length of the common header.
pub const HEADER_LEN: usize = 4;

/// Membership query.
pub const MEMBERSHIP_QUERY: u8 = 0x11;
/// Version 3 membership report.
pub const V3_REPORT: u8 = 0x22;

static HEADER: [FieldDesc; 3] = [
    FieldDesc::int("type", 8).both(DefaultSrc::Param("type")),
    FieldDesc::int("max-resp-time", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("checksum", 16).computed(),
];

static GROUP: [FieldDesc; 1] = [
    FieldDesc::octets("group-address", 32).tx(DefaultSrc::Zero),
];

static QUERY_V3: [FieldDesc; 6] = [
    FieldDesc::octets("group-address", 32).tx(DefaultSrc::Zero),
    FieldDesc::int("reserved", 4).tx(DefaultSrc::Zero),
    FieldDesc::int("s", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("qrv", 3).tx(DefaultSrc::Zero),
    FieldDesc::int("qqic", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("number-of-sources", 16).computed(),
];

static REPORT_V3: [FieldDesc; 2] = [
    FieldDesc::int("reserved", 16).tx(DefaultSrc::Zero),
    FieldDesc::int("number-of-groups", 16).computed(),
];

const V3_QUERY_LABELS: [&str; 4] = ["s", "qrv", "qqic", "source-address-list"];

/// One group record of a version 3 report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    /// The record type, e.g. 1 for `MODE_IS_INCLUDE`.
    pub record_type: u8,
    /// The multicast address.
    pub multicast_address: [u8; 4],
    /// The source addresses.
    pub sources: Vec<[u8; 4]>,
    /// Auxiliary data, a multiple of four octets.
    pub aux_data: Vec<u8>,
}

/// The type dependent body of an IGMP message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgmpExt {
    /// The fixed body fields.
    pub body: FragData,
    /// The source list of a version 3 query.
    pub sources: Vec<[u8; 4]>,
    /// The group records of a version 3 report.
    pub records: Vec<GroupRecord>,
    /// The pattern node, the body is only known once a type has been received.
    pub node: Option<Node>,
}

/// An IGMP layer instance.
pub struct Igmp {
    def: FragDef,
}

fn body_desc(ty: u8, v3_query: bool) -> Result<&'static [FieldDesc]> {
    match ty {
        MEMBERSHIP_QUERY if v3_query => Ok(&QUERY_V3),
        MEMBERSHIP_QUERY | 0x12 | 0x16 | 0x17 => Ok(&GROUP),
        V3_REPORT => Ok(&REPORT_V3),
        other => Err(Error::invalid(format!("unsupported IGMP type {:#04x}", other))),
    }
}

fn addresses(node: Option<&Node>, label: &str) -> Result<Vec<[u8; 4]>> {
    let items = match node {
        Some(node) => node.seq_child(label)?.unwrap_or(&[]),
        None => &[],
    };
    items.iter()
        .map(|item| item.as_bytes()
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .ok_or_else(|| Error::bad_template(format!("`{}` holds an address that is not 4 octets", label))))
        .collect()
}

fn address_nodes(addrs: &[[u8; 4]]) -> Node {
    Node::Seq(addrs.iter().map(|addr| Node::Bytes(addr.to_vec())).collect())
}

impl GroupRecord {
    /// Read a record from its template structure.
    pub fn from_node(node: &Node) -> Result<Self> {
        let record_type = node.int_child("record-type")?
            .ok_or(Error::MissingForSend { field: "record-type" })?;
        let record_type = u8::try_from(record_type)
            .map_err(|_| Error::bad_template(format!("record type {} out of range", record_type)))?;
        let multicast_address = node.bytes_child("multicast-address")?
            .ok_or(Error::MissingForSend { field: "multicast-address" })
            .and_then(|bytes| <[u8; 4]>::try_from(bytes)
                .map_err(|_| Error::bad_template("multicast address must be 4 octets")))?;
        let aux_data = node.bytes_child("aux-data")?.map(<[u8]>::to_vec).unwrap_or_default();
        if aux_data.len() % 4 != 0 || aux_data.len() > 255 * 4 {
            return Err(Error::bad_template("auxiliary data must be whole words"));
        }

        Ok(GroupRecord {
            record_type,
            multicast_address,
            sources: addresses(Some(node), "source-address-list")?,
            aux_data,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.record_type);
        out.push((self.aux_data.len() / 4) as u8);
        out.extend_from_slice(&(self.sources.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.multicast_address);
        for source in &self.sources {
            out.extend_from_slice(source);
        }
        out.extend_from_slice(&self.aux_data);
    }

    /// Parse one record, returning it and its encoded length.
    fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 8 {
            return Err(Error::Truncated);
        }
        let aux_len = usize::from(bytes[1]) * 4;
        let count = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
        let len = 8 + count * 4 + aux_len;
        if bytes.len() < len {
            return Err(Error::Truncated);
        }

        let mut multicast_address = [0; 4];
        multicast_address.copy_from_slice(&bytes[4..8]);
        let sources = bytes[8..8 + count * 4]
            .chunks_exact(4)
            .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3]])
            .collect();
        let record = GroupRecord {
            record_type: bytes[0],
            multicast_address,
            sources,
            aux_data: bytes[8 + count * 4..len].to_vec(),
        };
        Ok((record, len))
    }

    fn to_node(&self) -> Node {
        let mut children = vec![
            ("record-type", Node::Int(self.record_type.into())),
            ("aux-data-len", Node::Int((self.aux_data.len() / 4) as i64)),
            ("number-of-sources", Node::Int(self.sources.len() as i64)),
            ("multicast-address", Node::Bytes(self.multicast_address.to_vec())),
            ("source-address-list", address_nodes(&self.sources)),
        ];
        if !self.aux_data.is_empty() {
            children.push(("aux-data", Node::Bytes(self.aux_data.clone())));
        }
        Node::structure(children)
    }
}

fn ext_of(pdu: &Pdu) -> Result<&IgmpExt> {
    match &pdu.ext {
        PduExt::Igmp(ext) => Ok(ext),
        _ => Err(Error::Fatal("IGMP PDU without its body")),
    }
}

impl Igmp {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Igmp { def: FragDef::init(&HEADER, params)? })
    }

    fn encode(&self, eval: &EvalCx, pdu: &Pdu, ext: &IgmpExt) -> Result<Vec<u8>> {
        let mut msg = self.def.generate_vec(&pdu.hdr, eval)?;
        let ty = self.def.tx_value(&pdu.hdr, "type").as_int().unwrap_or(0) as u8;
        let v3_query = ext.body.is_set("s");

        let body_def = FragDef::init(body_desc(ty, v3_query)?, None)?;
        let mut body = ext.body.clone();
        if ty == MEMBERSHIP_QUERY && v3_query {
            super::set_computed(&mut body, "number-of-sources", ext.sources.len() as u32)?;
        }
        if ty == V3_REPORT {
            super::set_computed(&mut body, "number-of-groups", ext.records.len() as u32)?;
        }
        msg.extend(body_def.generate_vec(&body, eval)?);

        for source in &ext.sources {
            msg.extend_from_slice(source);
        }
        for record in &ext.records {
            record.encode(&mut msg);
        }
        Ok(msg)
    }
}

impl Layer for Igmp {
    fn kind(&self) -> LayerKind {
        LayerKind::Igmp
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&hdr)?;

        let ty = self.def.tx_value(&hdr, "type").as_int()
            .ok_or_else(|| Error::bad_template("IGMP type must be an integer"))?;
        let ty = u8::try_from(ty)
            .map_err(|_| Error::bad_template(format!("IGMP type {} out of range", ty)))?;
        let v3_query = ty == MEMBERSHIP_QUERY && tmpl.map_or(false, |node| {
            V3_QUERY_LABELS.iter().any(|label| node.get_child(label).is_some())
        });

        let body_def = FragDef::init(body_desc(ty, v3_query)?, None)?;
        let mut body = body_def.nds_to_data(tmpl)?;
        body_def.confirm_send(&body)?;
        if v3_query {
            // Marks the body as version 3 even when every field takes its default.
            body.set_if_undef("s", DataUnit::Int(0))?;
        }

        let records = match (ty, tmpl) {
            (V3_REPORT, Some(node)) => node.seq_child("group-records")?
                .unwrap_or(&[])
                .iter()
                .map(GroupRecord::from_node)
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };
        let sources = if v3_query { addresses(tmpl, "source-address-list")? } else { Vec::new() };

        let ext = IgmpExt { body, sources, records, node: None };
        Ok(Pdu { hdr, ext: PduExt::Igmp(ext) })
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let ext = ext_of(pdu)?;
        let fill = !pdu.hdr.is_set("checksum");

        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            pkt.prepend_seg(Segment::owned(self.encode(&cx.eval, pdu, ext)?));
            if fill {
                let sum = checksum::finish(checksum::data(&pkt.to_vec()));
                pkt.write_at(2, &sum.to_be_bytes())?;
            }
            out.push(pkt);
        }
        Ok(out)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        if let Some(node) = ptrn {
            node.read_as("type", DuKind::Int)?;
        }
        let ext = IgmpExt { node: ptrn.cloned(), ..IgmpExt::default() };
        Ok(Pdu { hdr, ext: PduExt::Igmp(ext) })
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        if sdu.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let mut bit_offset = 0;
        self.def.match_do(&ptrn.hdr, &mut pkt.hdr, &sdu, &mut bit_offset, &cx.eval)?;

        let ty = pkt.hdr.get_int("type").unwrap_or(0) as u8;
        let v3_query = ty == MEMBERSHIP_QUERY && sdu.len() >= 12;
        let body_def = FragDef::init(body_desc(ty, v3_query)?, None)?;
        let body_ptrn = body_def.nds_to_data(ext_of(ptrn)?.node.as_ref())?;
        let mut body = FragData::default();
        body_def.match_do(&body_ptrn, &mut body, &sdu, &mut bit_offset, &cx.eval)?;

        let mut offset = bit_offset / 8;
        let mut sources = Vec::new();
        let mut records = Vec::new();
        if v3_query {
            let count = body.get_int("number-of-sources").unwrap_or(0) as usize;
            let end = offset + count * 4;
            if sdu.len() < end {
                return Err(Error::Truncated);
            }
            sources = sdu[offset..end]
                .chunks_exact(4)
                .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3]])
                .collect();
            offset = end;
        }
        if ty == V3_REPORT {
            for _ in 0..body.get_int("number-of-groups").unwrap_or(0) {
                let (record, len) = GroupRecord::parse(&sdu[offset..])?;
                records.push(record);
                offset += len;
            }
        }

        pkt.ext = PduExt::Igmp(IgmpExt { body, sources, records, node: None });
        Ok(sdu.slice(offset..))
    }

    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        if let PduExt::Igmp(ext) = &pkt.ext {
            ext.body.write_into(&mut node)?;
            if ext.body.is_set("number-of-sources") {
                node.write("source-address-list", address_nodes(&ext.sources))?;
            }
            if !ext.records.is_empty() {
                let records = ext.records.iter().map(GroupRecord::to_node).collect();
                node.write("group-records", Node::Seq(records))?;
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_ADDR: [u8; 4] = [239, 1, 2, 3];

    fn build(tmpl: &Node) -> Result<Vec<u8>> {
        let kinds = [LayerKind::Igmp];
        let mut igmp = Igmp::new(StackInfo { kinds: &kinds, idx: 0 }, None)?;
        let pdus = [igmp.confirm_tmpl(Some(tmpl))?];
        let cx = GenCx { stack: StackInfo { kinds: &kinds, idx: 0 }, pdus: &pdus, eval: EvalCx::default() };
        let pkts = igmp.generate(&cx, &pdus[0], vec![Packet::new()])?;
        Ok(pkts[0].to_vec())
    }

    fn parse(bytes: &'static [u8]) -> Result<Node> {
        let kinds = [LayerKind::Igmp];
        let mut igmp = Igmp::new(StackInfo { kinds: &kinds, idx: 0 }, None)?;
        let ptrn = igmp.confirm_ptrn(None)?;
        let mut cx = MatchCx {
            stack: StackInfo { kinds: &kinds, idx: 0 },
            eval: EvalCx::default(),
            frame_seq: 0,
            atm_u2u: None,
        };
        let mut pkt = igmp.match_pre(&ptrn)?;
        igmp.match_do(&mut cx, &ptrn, &mut pkt, Bytes::from_static(bytes))?;
        igmp.match_post(&pkt)
    }

    #[test]
    fn v2_report() {
        let bytes = build(&Node::structure(vec![
            ("type", Node::Int(0x16)),
            ("group-address", Node::Bytes(GROUP_ADDR.to_vec())),
        ])).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..2], &[0x16, 0]);
        assert_eq!(&bytes[4..], &GROUP_ADDR);
        assert!(checksum::verifies(&bytes));
    }

    #[test]
    fn v3_query_with_sources() {
        let bytes = build(&Node::structure(vec![
            ("type", Node::Int(0x11)),
            ("max-resp-time", Node::Int(100)),
            ("qrv", Node::Int(2)),
            ("qqic", Node::Int(125)),
            ("source-address-list", Node::Seq(vec![
                Node::Bytes(vec![10, 0, 0, 1]),
                Node::Bytes(vec![10, 0, 0, 2]),
            ])),
        ])).unwrap();
        assert_eq!(bytes.len(), 12 + 8);
        assert_eq!(bytes[8], 0x02);
        assert_eq!(bytes[9], 125);
        assert_eq!(&bytes[10..12], &[0, 2]);
        assert_eq!(&bytes[16..], &[10, 0, 0, 2]);
        assert!(checksum::verifies(&bytes));
    }

    #[test]
    fn v3_report_records() {
        let bytes = build(&Node::structure(vec![
            ("type", Node::Int(0x22)),
            ("group-records", Node::Seq(vec![Node::structure(vec![
                ("record-type", Node::Int(4)),
                ("multicast-address", Node::Bytes(GROUP_ADDR.to_vec())),
            ])])),
        ])).unwrap();
        assert_eq!(bytes, {
            let mut expected = vec![0x22, 0, 0, 0, 0, 0, 0, 1, 4, 0, 0, 0];
            expected.extend_from_slice(&GROUP_ADDR);
            let sum = checksum::finish(checksum::data(&expected));
            expected[2..4].copy_from_slice(&sum.to_be_bytes());
            expected
        });
    }

    #[test]
    fn unknown_type() {
        let tmpl = Node::structure(vec![("type", Node::Int(0x30))]);
        assert!(matches!(build(&tmpl), Err(Error::Invalid(_))));
    }

    #[test]
    fn received_query_versions() {
        let v2 = parse(&[0x11, 100, 0, 0, 239, 1, 2, 3]).unwrap();
        assert_eq!(v2.bytes_child("group-address").unwrap(), Some(&GROUP_ADDR[..]));
        assert_eq!(v2.get_child("qqic"), None);

        let v3 = parse(&[0x11, 100, 0, 0, 0, 0, 0, 0, 0x0a, 125, 0, 1, 10, 0, 0, 9]).unwrap();
        assert_eq!(v3.int_child("qrv").unwrap(), Some(2));
        assert_eq!(v3.int_child("s").unwrap(), Some(1));
        assert_eq!(
            v3.seq_child("source-address-list").unwrap(),
            Some(&[Node::Bytes(vec![10, 0, 0, 9])][..]));
    }
}
