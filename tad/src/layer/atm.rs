//! The ATM cell layer.
//!
//! Every packet handed down must be exactly one 48 octet cell payload, the layer prepends the
//! five octet cell header. The format is selected by the `type` CSAP parameter, `0` for the user
//! network interface (UNI, with a generic flow control field and an 8 bit VPI) and `1` for the
//! network node interface (NNI, 12 bit VPI). The header error control octet is sent as zero.
//!
//! An [`AtmHint`] attached by the layer above raises the ATM user-to-user indication, the least
//! significant bit of the payload type, and may override VPI and VCI of a single cell. Received
//! cells report the indication to the layer above through the match context.
//!
//! CSAP parameters: `type`, `vpi` and `vci`.
//!
//! [`AtmHint`]: ../../packet/struct.AtmHint.html
use bytes::Bytes;

use crate::bps::{DefaultSrc, FieldDesc, FragDef};
use crate::du::DataUnit;
use crate::nds::Node;
use crate::packet::Packet;
use crate::{Error, Result};

use super::{GenCx, Layer, LayerKind, MatchCx, Pdu, StackInfo};

/// Length of the cell header.
pub const HEADER_LEN: usize = 5;

/// Length of the cell payload.
pub const PAYLOAD_LEN: usize = 48;

static UNI: [FieldDesc; 6] = [
    FieldDesc::int("gfc", 4).tx(DefaultSrc::Zero),
    FieldDesc::int("vpi", 8).both(DefaultSrc::Param("vpi")),
    FieldDesc::int("vci", 16).both(DefaultSrc::Param("vci")),
    FieldDesc::int("payload-type", 3).tx(DefaultSrc::Zero),
    FieldDesc::int("clp", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("hec", 8).tx(DefaultSrc::Zero),
];

static NNI: [FieldDesc; 5] = [
    FieldDesc::int("vpi", 12).both(DefaultSrc::Param("vpi")),
    FieldDesc::int("vci", 16).both(DefaultSrc::Param("vci")),
    FieldDesc::int("payload-type", 3).tx(DefaultSrc::Zero),
    FieldDesc::int("clp", 1).tx(DefaultSrc::Zero),
    FieldDesc::int("hec", 8).tx(DefaultSrc::Zero),
];

/// The interface a cell header is formatted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
    /// User network interface.
    Uni,
    /// Network node interface.
    Nni,
}

/// An ATM layer instance.
pub struct Atm {
    format: CellFormat,
    def: FragDef,
}

impl Atm {
    /// Create the layer from its CSAP parameters.
    pub fn new(_: StackInfo, params: Option<&Node>) -> Result<Self> {
        let format = match params.map(|node| node.int_child("type")).transpose()?.flatten() {
            None | Some(0) => CellFormat::Uni,
            Some(1) => CellFormat::Nni,
            Some(other) => return Err(Error::invalid(format!("unknown ATM cell format {}", other))),
        };
        let desc: &'static [FieldDesc] = match format {
            CellFormat::Uni => &UNI,
            CellFormat::Nni => &NNI,
        };
        Ok(Atm { format, def: FragDef::init(desc, params)? })
    }

    /// The configured header format.
    pub fn format(&self) -> CellFormat {
        self.format
    }
}

impl Layer for Atm {
    fn kind(&self) -> LayerKind {
        LayerKind::Atm
    }

    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu> {
        let data = self.def.nds_to_data(tmpl)?;
        self.def.confirm_send(&data)?;
        Ok(Pdu::new(data))
    }

    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>> {
        let pti = self.def.tx_value(&pdu.hdr, "payload-type").resolve(&cx.eval)?
            .as_int()
            .unwrap_or(0);

        let mut cells = Vec::with_capacity(sdus.len());
        for mut cell in sdus {
            if cell.len() != PAYLOAD_LEN {
                return Err(Error::invalid(format!(
                    "ATM cell payload of {} octets, must be {}", cell.len(), PAYLOAD_LEN)));
            }

            let mut data = pdu.hdr.clone();
            if let Some(hint) = cell.take_hint() {
                if hint.u2u {
                    data.set("payload-type", DataUnit::Int(pti | 1))?;
                }
                if let Some(vpi) = hint.vpi {
                    data.set("vpi", DataUnit::Int(vpi.into()))?;
                }
                if let Some(vci) = hint.vci {
                    data.set("vci", DataUnit::Int(vci.into()))?;
                }
            }
            super::prepend_header(&self.def, &data, &cx.eval, &mut cell)?;
            cells.push(cell);
        }
        Ok(cells)
    }

    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu> {
        Ok(Pdu::new(self.def.nds_to_data(ptrn)?))
    }

    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes> {
        if sdu.len() < HEADER_LEN + PAYLOAD_LEN {
            return Err(Error::Truncated);
        }
        let len = super::match_header(&self.def, &ptrn.hdr, &mut pkt.hdr, &sdu, &cx.eval)?;
        let pti = pkt.hdr.get_int("payload-type").unwrap_or(0);
        cx.atm_u2u = Some(pti & 1 != 0);
        Ok(sdu.slice(len..len + PAYLOAD_LEN))
    }
}
