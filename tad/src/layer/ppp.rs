//! PPP and PPP over Ethernet.
//!
//! The PPP layer is the bare two octet protocol field, the usual encapsulation of PPP over
//! Ethernet sessions (RFC 2516). Address and control octets of HDLC-like framing are not sent.
//! The protocol defaults to the layer above.
//!
//! The PPPoE layer carries the six octet session header. Only the session stage is supported,
//! version and type are fixed to one and the payload length is computed.
//!
//! CSAP parameters: `protocol` for PPP, `session-id` and `code` for PPPoE.
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::du::DataUnit;
use crate::nds::Node;
use crate::packet::Packet;
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

/// Length of the PPPoE header.
pub const PPPOE_HEADER_LEN: usize = 6;

static PPP: [FieldDesc; 1] = [
    FieldDesc::int("protocol", 16).both(DefaultSrc::Param("protocol")),
];

static PPPOE: [FieldDesc; 5] = [
    FieldDesc::int("version", 4).fixed(1),
    FieldDesc::int("type", 4).fixed(1),
    FieldDesc::int("code", 8).both(DefaultSrc::ParamOr("code", 0)),
    FieldDesc::int("session-id", 16).both(DefaultSrc::Param("session-id")),
    FieldDesc::int("length", 16).computed(),
];

/// A PPP layer instance.
pub struct Ppp {
    def: FragDef,
}

impl Ppp {
    /// Create the layer from its CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        let mut def = FragDef::init(&PPP, params)?;
        if let Some(protocol) = stack.upper().and_then(LayerKind::ppp_protocol) {
            def.infer_default("protocol", DataUnit::Int(u16::from(protocol).into()));
        }
        Ok(Ppp { def })
    }
}

impl Layer for Ppp {
    fn kind(&self) -> LayerKind {
        LayerKind::Ppp
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let data = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        sdus.into_iter()
            .map(|mut pkt| {
                super::prepend_header(&self.def, &pdu.hdr, &cx.eval, &mut pkt)?;
                Ok(pkt)
            })
            .collect()
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        Ok(Pdu::new(self.def.nds_to_data(ptrn)?))
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let len = super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;
        Ok(sdu.slice(len..))
    }
}

/// A PPPoE layer instance.
pub struct Pppoe {
    def: FragDef,
}

impl Pppoe {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        Ok(Pppoe { def: FragDef::init(&PPPOE, params)? })
    }
}

impl Layer for Pppoe {
    fn kind(&self) -> LayerKind {
        LayerKind::Pppoe
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let data = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let mut out = Vec::with_capacity(sdus.len());
        for mut pkt in sdus {
            let len = pkt.len();
            if len > usize::from(u16::MAX) {
                return Err(Error::invalid(format!("PPPoE payload of {} octets", len)));
            }
            let mut data = pdu.hdr.clone();
            super::set_computed(&mut data, "length", len as u32)?;
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
        let payload = pkt.hdr.get_int("length").unwrap_or(0) as usize;
        if sdu.len() < len + payload {
            return Err(Error::Truncated);
        }
        Ok(sdu.slice(len..len + payload))
    }
}

#[cfg(test)]
mod tests {
    use crate::nds::{Node, Pattern, Payload, Template};
    use crate::stack::Stack;
    use crate::Error;

    const LOCAL: [u8; 6] = [0x02, 0, 0, 0, 0, 1];
    const REMOTE: [u8; 6] = [0x02, 0, 0, 0, 0, 2];

    fn session(local: [u8; 6], remote: [u8; 6]) -> Stack {
        Stack::new(&[
            Node::choice("ip4", Node::structure(vec![
                ("local-addr", Node::Bytes(vec![10, 0, 0, 1])),
                ("remote-addr", Node::Bytes(vec![10, 0, 0, 2])),
                ("protocol", Node::Int(253)),
            ])),
            Node::choice("ppp", Node::empty()),
            Node::choice("pppoe", Node::structure(vec![("session-id", Node::Int(0x1234))])),
            Node::choice("eth", Node::structure(vec![
                ("local-addr", Node::Bytes(local.to_vec())),
                ("remote-addr", Node::Bytes(remote.to_vec())),
            ])),
        ]).unwrap()
    }

    #[test]
    fn session_frame() {
        let mut stack = session(LOCAL, REMOTE);
        let template = Template::new(vec![]).with_payload(Payload::Bytes(vec![1, 2, 3, 4]));
        let frame = stack.build(&template, None).unwrap().remove(0).to_vec();
        assert_eq!(&frame[12..14], &[0x88, 0x64]);
        assert_eq!(&frame[14..20], &[0x11, 0x00, 0x12, 0x34, 0, 26]);
        assert_eq!(&frame[20..22], &[0x00, 0x21]);
        assert_eq!(frame[22], 0x45);
    }

    #[test]
    fn session_id_required() {
        let mut stack = Stack::new(&[
            Node::choice("pppoe", Node::empty()),
        ]).unwrap();
        let template = Template::new(vec![]);
        assert_eq!(
            stack.build(&template, None).err(),
            Some(Error::MissingForSend { field: "session-id" }));
    }

    #[test]
    fn receive_session() {
        let mut sender = session(LOCAL, REMOTE);
        let template = Template::new(vec![]).with_payload(Payload::Bytes(vec![7; 3]));
        let frame = sender.build(&template, None).unwrap().remove(0).to_vec();

        let mut receiver = Stack::new(&[
            Node::choice("ppp", Node::empty()),
            Node::choice("pppoe", Node::structure(vec![("session-id", Node::Int(0x1234))])),
            Node::choice("eth", Node::structure(vec![
                ("local-addr", Node::Bytes(REMOTE.to_vec())),
                ("remote-addr", Node::Bytes(LOCAL.to_vec())),
                ("ether-type", Node::Int(0x8864)),
            ])),
        ]).unwrap();
        let units = receiver.confirm_ptrn(&Pattern::single(vec![
            Node::choice("ppp", Node::structure(vec![("protocol", Node::Int(0x21))])),
        ])).unwrap();
        let matched = receiver.match_frame(&units, frame.into(), 0, None).unwrap().unwrap();
        // The IPv4 datagram, without the ethernet padding.
        assert_eq!(matched.payload.len(), 23);
        assert_eq!(matched.payload[0], 0x45);

        let (_, pppoe) = matched.pdus[1].as_choice().unwrap();
        assert_eq!(pppoe.int_child("length").unwrap(), Some(25));
    }
}
