//! Message families shared by ICMPv4 and ICMPv6.
//!
//! Both start with `type`, `code` and `checksum`. The type selects the field list of the message
//! body, for templates when confirming and for received packets once the type is parsed.
use std::convert::TryFrom;

use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragData, FragDef};
use crate::du::{DuKind, EvalCx};
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::{Error, Result};

use super::{Pdu, PduExt};

/// Length of the common part of the header.
pub(super) const COMMON_LEN: usize = 4;

static COMMON: [FieldDesc; 3] = [
    FieldDesc::int("type", 8).both(DefaultSrc::Param("type")),
    FieldDesc::int("code", 8).tx(DefaultSrc::Zero),
    FieldDesc::int("checksum", 16).computed(),
];

/// The type dependent body of an ICMP message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcmpExt {
    /// The values of the body fields.
    pub body: FragData,
    /// The pattern node, the body is only known once a type has been received.
    pub node: Option<Node>,
}

/// Selects the body fields of a message type.
pub(super) type BodyFn = fn(u8) -> Option<&'static [FieldDesc]>;

pub(super) struct Family {
    def: FragDef,
    body: BodyFn,
    name: &'static str,
}

impl Family {
    pub(super) fn new(params: Option<&Node>, body: BodyFn, name: &'static str) -> Result<Self> {
        Ok(Family {
            def: FragDef::init(&COMMON, params)?,
            body,
            name,
        })
    }

    fn body_def(&self, ty: u32) -> Result<FragDef> {
        let desc = u8::try_from(ty).ok()
            .and_then(self.body)
            .ok_or_else(|| Error::invalid(format!("unsupported {} type {}", self.name, ty)))?;
        FragDef::init(desc, None)
    }

    pub(super) fn confirm_tmpl(&self, tmpl: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&hdr)?;

        let ty = self.def.tx_value(&hdr, "type").as_int()
            .ok_or_else(|| Error::bad_template(format!("{} type must be an integer", self.name)))?;
        let body_def = self.body_def(ty)?;
        let body = body_def.nds_to_data(tmpl)?;
        body_def.confirm_send(&body)?;

        Ok(Pdu { hdr, ext: PduExt::Icmp(IcmpExt { body, node: None }) })
    }

    /// Prepend header and body.
    pub(super) fn encode(&self, eval: &EvalCx, pdu: &Pdu, pkt: &mut Packet) -> Result<()> {
        let ext = ext_of(pdu)?;
        let ty = self.def.tx_value(&pdu.hdr, "type").as_int().unwrap_or(0);
        let mut header = self.def.generate_vec(&pdu.hdr, eval)?;
        header.extend(self.body_def(ty)?.generate_vec(&ext.body, eval)?);
        pkt.prepend_seg(Segment::owned(header));
        Ok(())
    }

    pub(super) fn confirm_ptrn(&self, ptrn: Option<&Node>) -> Result<Pdu> {
        let hdr = self.def.nds_to_data(ptrn)?;
        // Catch malformed values before the first packet arrives.
        if let Some(node) = ptrn {
            node.read_as("type", DuKind::Int)?;
        }
        Ok(Pdu { hdr, ext: PduExt::Icmp(IcmpExt { body: FragData::default(), node: ptrn.cloned() }) })
    }

    pub(super) fn match_do(&self, eval: &EvalCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let mut bit_offset = 0;
        self.def.match_do(&ptrn.hdr, &mut pkt.hdr, &sdu, &mut bit_offset, eval)?;

        let ty = pkt.hdr.get_int("type").unwrap_or(0);
        let body_def = self.body_def(ty)?;
        let body_ptrn = body_def.nds_to_data(ext_of(ptrn)?.node.as_ref())?;
        let mut body = FragData::default();
        body_def.match_do(&body_ptrn, &mut body, &sdu, &mut bit_offset, eval)?;

        pkt.ext = PduExt::Icmp(IcmpExt { body, node: None });
        Ok(sdu.slice(bit_offset / 8..))
    }

    pub(super) fn match_post(&self, pkt: &Pdu) -> Result<Node> {
        let mut node = pkt.hdr.to_node();
        if let PduExt::Icmp(ext) = &pkt.ext {
            ext.body.write_into(&mut node)?;
        }
        Ok(node)
    }
}

fn ext_of(pdu: &Pdu) -> Result<&IcmpExt> {
    match &pdu.ext {
        PduExt::Icmp(ext) => Ok(ext),
        _ => Err(Error::Fatal("ICMP PDU without its body")),
    }
}
