//! The ethernet layer.
//!
//! Frames are Ethernet II without the frame check sequence, which the device adds. Frames shorter
//! than the minimum of 60 octets are padded with zeroes, the IP layers strip such padding again
//! on receipt by their own length fields.
//!
//! CSAP parameters: `local-addr`, `remote-addr` (6 octets each) and `ether-type`. The ether
//! type defaults to the protocol of the layer above. Addresses, in the parameters as well as in
//! templates and patterns, may also be strings such as `"02:00:00:00:00:01"`.
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::du::DataUnit;
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::wire::EthernetAddress;
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

/// The minimum frame length without the frame check sequence.
pub const MIN_FRAME_LEN: usize = 60;

static HEADER: [FieldDesc; 3] = [
    FieldDesc::octets("dst-addr", 48)
        .tx(DefaultSrc::Param("remote-addr"))
        .rx(DefaultSrc::Param("local-addr")),
    FieldDesc::octets("src-addr", 48)
        .tx(DefaultSrc::Param("local-addr"))
        .rx(DefaultSrc::Param("remote-addr")),
    FieldDesc::int("ether-type", 16).both(DefaultSrc::Param("ether-type")),
];

static PADDING: [u8; MIN_FRAME_LEN] = [0; MIN_FRAME_LEN];

/// Replace textual addresses under `labels` by their octets.
fn parse_addresses(node: Option<&Node>, labels: &[&str]) -> Result<Option<Node>> {
    let mut node = match node {
        Some(node) => node.clone(),
        None => return Ok(None),
    };
    for &label in labels {
        let text = match node.get_child(label) {
            Some(Node::Str(text)) => text.clone(),
            _ => continue,
        };
        let addr: EthernetAddress = text.parse()
            .map_err(|err| Error::bad_template(format!("{}: {}", label, err)))?;
        node.write(label, Node::Bytes(addr.as_bytes().to_vec()))?;
    }
    Ok(Some(node))
}

/// An ethernet layer instance.
pub struct Eth {
    def: FragDef,
}

impl Eth {
    /// Create the layer from its CSAP parameters.
    pub fn new(stack: StackInfo, params: Option<&Node>) -> Result<Self> {
        let params = parse_addresses(params, &["local-addr", "remote-addr"])?;
        let mut def = FragDef::init(&HEADER, params.as_ref())?;
        if let Some(ether_type) = stack.upper().and_then(LayerKind::ether_type) {
            def.infer_default("ether-type", DataUnit::Int(u16::from(ether_type).into()));
        }
        Ok(Eth { def })
    }
}

impl Layer for Eth {
    fn kind(&self) -> LayerKind {
        LayerKind::Eth
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let tmpl = parse_addresses(tmpl, &["dst-addr", "src-addr"])?;
        let data = self.def.nds_to_data(tmpl.as_ref())?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let mut frames = Vec::with_capacity(sdus.len());
        for mut frame in sdus {
            super::prepend_header(&self.def, &pdu.hdr, &cx.eval, &mut frame)?;
            let len = frame.len();
            if len < MIN_FRAME_LEN {
                frame.append_seg(Segment::from_static(&PADDING[..MIN_FRAME_LEN - len]));
            }
            frames.push(frame);
        }
        Ok(frames)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        let ptrn = parse_addresses(ptrn, &["dst-addr", "src-addr"])?;
        Ok(Pdu::new(self.def.nds_to_data(ptrn.as_ref())?))
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        let len = super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;
        Ok(sdu.slice(len..))
    }
}
