//! Checksums an IP layer fills into the layer it encapsulates.
use crate::nds::Node;
use crate::packet::Packet;
use crate::wire::checksum;
use crate::{Error, Result};

use super::{GenCx, LayerKind};

/// How an IP layer treats the checksum of its payload.
///
/// Configured by the `pld-checksum` child of the IP template: `{ "disable": .. }` leaves the
/// payload untouched, `{ "offset": n }` writes the checksum at octet `n` of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PldChecksum {
    /// Compute at the well-known offset of the encapsulated protocol.
    Auto,
    /// Compute at a fixed offset.
    Offset(usize),
    /// Do not touch the payload.
    Disabled,
}

/// The addresses of the pseudo header.
pub(crate) enum Pseudo<'a> {
    V4(&'a [u8; 4], &'a [u8; 4]),
    V6(&'a [u8; 16], &'a [u8; 16]),
}

impl Default for PldChecksum {
    fn default() -> Self {
        PldChecksum::Auto
    }
}

impl PldChecksum {
    /// Read the setting from an IP template.
    pub fn from_node(tmpl: Option<&Node>) -> Result<Self> {
        let node = match tmpl.and_then(|node| node.get_child("pld-checksum")) {
            None => return Ok(PldChecksum::Auto),
            Some(node) => node,
        };
        if node.get_child("disable").is_some() {
            return Ok(PldChecksum::Disabled);
        }
        match node.int_child("offset")? {
            Some(offset) if offset >= 0 => Ok(PldChecksum::Offset(offset as usize)),
            Some(offset) => Err(Error::bad_template(format!("negative checksum offset {}", offset))),
            None => Ok(PldChecksum::Auto),
        }
    }

    fn offset(self, upper: Option<LayerKind>) -> Option<usize> {
        match (self, upper) {
            (PldChecksum::Disabled, _) => None,
            (PldChecksum::Offset(offset), _) => Some(offset),
            (PldChecksum::Auto, Some(LayerKind::Tcp)) => Some(16),
            (PldChecksum::Auto, Some(LayerKind::Udp)) => Some(6),
            (PldChecksum::Auto, Some(LayerKind::Icmp4)) => Some(2),
            (PldChecksum::Auto, _) => None,
        }
    }

    /// Fill the checksum of the encapsulated layer in `sdu`.
    ///
    /// Nothing is written when the template of the encapsulated layer holds its own checksum.
    /// Only UDP and TCP include the pseudo header.
    pub(crate) fn apply(self, cx: &GenCx, protocol: u8, pseudo: Option<Pseudo>, sdu: &mut Packet)
        -> Result<()>
    {
        let upper = cx.stack.upper();
        let offset = match self.offset(upper) {
            None => return Ok(()),
            Some(offset) => offset,
        };
        if cx.upper().map_or(false, |pdu| pdu.hdr.is_set("checksum")) {
            return Ok(());
        }

        let len = sdu.len();
        if offset + 2 > len {
            return Err(Error::bad_template(format!(
                "payload checksum offset {} beyond a payload of {} octets", offset, len)));
        }
        sdu.write_at(offset, &[0, 0])?;

        let mut sum = checksum::data(&sdu.to_vec());
        if matches!(upper, Some(LayerKind::Udp) | Some(LayerKind::Tcp)) {
            let pseudo = match pseudo {
                Some(Pseudo::V4(src, dst)) => checksum::pseudo_header_v4(src, dst, protocol, len as u16),
                Some(Pseudo::V6(src, dst)) => checksum::pseudo_header_v6(src, dst, protocol, len as u32),
                None => return Err(Error::MissingForSend { field: "src-addr" }),
            };
            sum = checksum::combine(&[sum, pseudo]);
        }

        let mut value = checksum::finish(sum);
        if upper == Some(LayerKind::Udp) && value == 0 {
            value = 0xffff;
        }
        sdu.write_at(offset, &value.to_be_bytes())
    }
}
