//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol layer is split into two parts; the field layout of its headers described
//! declaratively with the [`bps`] codec and the processing part in this module. A layer instance
//! is created once per CSAP from the parameters of its layer in the CSAP description. It keeps
//! the send and receive defaults of its fields and any state that must survive between packets,
//! such as a partially reassembled AAL5 frame.
//!
//! ## Sending
//!
//! A template holds one PDU per layer. All layers first confirm their PDU, top-most first, which
//! validates it and binds it to the layer's defaults. Then, again top-most first, every layer
//! receives the packets built by the layer above and wraps them. Most layers simply prepend a
//! header segment. Others append trailers (AAL5), split packets (IPv4 fragments, ATM cells) or
//! fill checksums of the layer they encapsulate (IPv4, IPv6).
//!
//! ## Receiving
//!
//! A captured frame is handed to the bottom-most layer first. Each layer parses its header, tests
//! it against the pattern and hands the remaining octets up. The first mismatch aborts the walk
//! with [`Error::NotMatch`], which the receive loop treats as a reason to skip the frame rather
//! than as a failure.
//!
//! [`bps`]: ../bps/index.html
//! [`Error::NotMatch`]: ../enum.Error.html#variant.NotMatch
use core::fmt;

use bytes::Bytes;

use crate::bps::{FragData, FragDef};
use crate::du::EvalCx;
use crate::nds::Node;
use crate::packet::{Packet, Segment};
use crate::wire::{EtherType, IpProtocol, PppProtocol};
use crate::{Error, Result};

pub mod aal5;
pub mod atm;
mod csum;
pub mod dhcp;
pub mod eth;
mod icmp;
pub mod icmp4;
pub mod icmp6;
pub mod igmp;
pub mod ip4;
pub mod ip6;
pub mod ppp;
pub mod tcp;
pub mod udp;

pub use csum::PldChecksum;
pub use icmp::IcmpExt;

/// The protocols a layer can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Ethernet II framing.
    Eth,
    /// Internet protocol version 4.
    Ip4,
    /// Internet protocol version 6.
    Ip6,
    /// ICMP for IPv4.
    Icmp4,
    /// ICMP for IPv6.
    Icmp6,
    /// IGMP versions 1 to 3.
    Igmp,
    /// The user datagram protocol.
    Udp,
    /// The transmission control protocol, headers only.
    Tcp,
    /// ATM cells, UNI or NNI.
    Atm,
    /// ATM adaptation layer 5.
    Aal5,
    /// The point-to-point protocol.
    Ppp,
    /// PPP over Ethernet, session stage.
    Pppoe,
    /// DHCP for IPv4.
    Dhcp,
}

/// The position of a layer within its stack.
#[derive(Debug, Clone, Copy)]
pub struct StackInfo<'a> {
    /// The kinds of all layers, top-most first.
    pub kinds: &'a [LayerKind],
    /// The index of the layer concerned.
    pub idx: usize,
}

/// The per-packet state of one layer.
///
/// Created by confirming a template or pattern PDU, or while matching a received packet.
#[derive(Debug, Clone, Default)]
pub struct Pdu {
    /// Values of the main header.
    pub hdr: FragData,
    /// Layer specific data that does not fit the main header.
    pub ext: PduExt,
}

/// Layer specific parts of a PDU.
#[derive(Debug, Clone)]
pub enum PduExt {
    /// Nothing beyond the header.
    None,
    /// Options and fragments of IPv4.
    Ip4(ip4::Ip4Ext),
    /// Extension headers and addresses of IPv6.
    Ip6(ip6::Ip6Ext),
    /// The message body selected by an ICMP type.
    Icmp(IcmpExt),
    /// The version dependent body of IGMP.
    Igmp(igmp::IgmpExt),
    /// Raw header options, as carried by TCP.
    Options(Vec<u8>),
    /// The options of a DHCP message.
    Dhcp(Vec<dhcp::DhcpOption>),
}

/// What a layer sees while generating.
#[derive(Clone, Copy)]
pub struct GenCx<'a> {
    /// The position of the generating layer.
    pub stack: StackInfo<'a>,
    /// The confirmed PDUs of all layers.
    pub pdus: &'a [Pdu],
    /// Script arguments of the packet being built.
    pub eval: EvalCx<'a>,
}

/// What a layer sees, and can leave for the layers above, while matching.
pub struct MatchCx<'a> {
    /// The position of the matching layer.
    pub stack: StackInfo<'a>,
    /// Evaluation of script values in the pattern.
    pub eval: EvalCx<'a>,
    /// A number identifying the captured frame, increasing by one per frame.
    pub frame_seq: u64,
    /// The user-to-user indication of the ATM cell below, if any.
    pub atm_u2u: Option<bool>,
}

/// The operations of one protocol layer.
///
/// Every method is only called by the thread driving the CSAP, one at a time.
pub trait Layer: Send {
    /// The protocol of this layer.
    fn kind(&self) -> LayerKind;

    /// Validate a template PDU and bind it to the layer's defaults.
    ///
    /// `None` is an empty PDU, all fields take their defaults.
    fn confirm_tmpl(&mut self, tmpl: Option<&Node>) -> Result<Pdu>;

    /// Wrap the packets built by the layer above.
    fn generate(&mut self, cx: &GenCx, pdu: &Pdu, sdus: Vec<Packet>) -> Result<Vec<Packet>>;

    /// Validate a pattern PDU.
    fn confirm_ptrn(&mut self, ptrn: Option<&Node>) -> Result<Pdu>;

    /// Allocate the packet side state for matching.
    fn match_pre(&mut self, _ptrn: &Pdu) -> Result<Pdu> {
        Ok(Pdu::default())
    }

    /// Parse the header at the start of `sdu` and test it against the pattern.
    ///
    /// Returns the octets handed to the layer above.
    fn match_do(&mut self, cx: &mut MatchCx, ptrn: &Pdu, pkt: &mut Pdu, sdu: Bytes) -> Result<Bytes>;

    /// Surface the parsed values.
    fn match_post(&mut self, pkt: &Pdu) -> Result<Node> {
        Ok(pkt.hdr.to_node())
    }

    /// Release a PDU that is no longer needed.
    fn release_pdu(&mut self, pdu: Pdu) {
        drop(pdu)
    }
}

impl LayerKind {
    /// All kinds.
    pub const ALL: [LayerKind; 13] = [
        LayerKind::Eth, LayerKind::Ip4, LayerKind::Ip6, LayerKind::Icmp4, LayerKind::Icmp6,
        LayerKind::Igmp, LayerKind::Udp, LayerKind::Tcp, LayerKind::Atm, LayerKind::Aal5,
        LayerKind::Ppp, LayerKind::Pppoe, LayerKind::Dhcp,
    ];

    /// The label of the layer in CSAP descriptions, templates and patterns.
    pub fn label(self) -> &'static str {
        match self {
            LayerKind::Eth => "eth",
            LayerKind::Ip4 => "ip4",
            LayerKind::Ip6 => "ip6",
            LayerKind::Icmp4 => "icmp4",
            LayerKind::Icmp6 => "icmp6",
            LayerKind::Igmp => "igmp",
            LayerKind::Udp => "udp",
            LayerKind::Tcp => "tcp",
            LayerKind::Atm => "atm",
            LayerKind::Aal5 => "aal5",
            LayerKind::Ppp => "ppp",
            LayerKind::Pppoe => "pppoe",
            LayerKind::Dhcp => "dhcp",
        }
    }

    /// Look up a kind by its label.
    pub fn from_label(label: &str) -> Option<Self> {
        LayerKind::ALL.iter().copied().find(|kind| kind.label() == label)
    }

    /// The IP protocol number under which the layer is encapsulated.
    pub fn ip_protocol(self) -> Option<IpProtocol> {
        match self {
            LayerKind::Icmp4 => Some(IpProtocol::Icmp),
            LayerKind::Icmp6 => Some(IpProtocol::Icmpv6),
            LayerKind::Igmp => Some(IpProtocol::Igmp),
            LayerKind::Udp => Some(IpProtocol::Udp),
            LayerKind::Tcp => Some(IpProtocol::Tcp),
            _ => None,
        }
    }

    /// The ethernet type under which the layer is encapsulated.
    pub fn ether_type(self) -> Option<EtherType> {
        match self {
            LayerKind::Ip4 => Some(EtherType::Ipv4),
            LayerKind::Ip6 => Some(EtherType::Ipv6),
            LayerKind::Pppoe => Some(EtherType::PppoeSession),
            _ => None,
        }
    }

    /// The PPP protocol under which the layer is encapsulated.
    pub fn ppp_protocol(self) -> Option<PppProtocol> {
        match self {
            LayerKind::Ip4 => Some(PppProtocol::Ipv4),
            LayerKind::Ip6 => Some(PppProtocol::Ipv6),
            _ => None,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl StackInfo<'_> {
    /// The kind of the layer concerned.
    pub fn kind(&self) -> LayerKind {
        self.kinds[self.idx]
    }

    /// The kind of the layer directly above.
    pub fn upper(&self) -> Option<LayerKind> {
        self.idx.checked_sub(1).map(|idx| self.kinds[idx])
    }

    /// The kind of the layer directly below.
    pub fn lower(&self) -> Option<LayerKind> {
        self.kinds.get(self.idx + 1).copied()
    }
}

impl Pdu {
    /// A PDU of only a header.
    pub fn new(hdr: FragData) -> Self {
        Pdu { hdr, ext: PduExt::None }
    }
}

impl Default for PduExt {
    fn default() -> Self {
        PduExt::None
    }
}

impl GenCx<'_> {
    /// The confirmed PDU of the layer directly above.
    pub fn upper(&self) -> Option<&Pdu> {
        self.stack.idx.checked_sub(1).and_then(|idx| self.pdus.get(idx))
    }

    /// The confirmed PDU of the layer directly below.
    pub fn lower(&self) -> Option<&Pdu> {
        self.pdus.get(self.stack.idx + 1)
    }
}

/// Create the layer at `stack.idx` from its CSAP parameters.
pub fn init(stack: StackInfo, params: Option<&Node>) -> Result<Box<dyn Layer>> {
    let layer: Box<dyn Layer> = match stack.kind() {
        LayerKind::Eth => Box::new(eth::Eth::new(stack, params)?),
        LayerKind::Ip4 => Box::new(ip4::Ip4::new(stack, params)?),
        LayerKind::Ip6 => Box::new(ip6::Ip6::new(stack, params)?),
        LayerKind::Icmp4 => Box::new(icmp4::Icmp4::new(stack, params)?),
        LayerKind::Icmp6 => Box::new(icmp6::Icmp6::new(stack, params)?),
        LayerKind::Igmp => Box::new(igmp::Igmp::new(stack, params)?),
        LayerKind::Udp => Box::new(udp::Udp::new(stack, params)?),
        LayerKind::Tcp => Box::new(tcp::Tcp::new(stack, params)?),
        LayerKind::Atm => Box::new(atm::Atm::new(stack, params)?),
        LayerKind::Aal5 => Box::new(aal5::Aal5::new(stack, params)?),
        LayerKind::Ppp => Box::new(ppp::Ppp::new(stack, params)?),
        LayerKind::Pppoe => Box::new(ppp::Pppoe::new(stack, params)?),
        LayerKind::Dhcp => Box::new(dhcp::Dhcp::new(stack, params)?),
    };
    Ok(layer)
}

/// Parse a fixed header at the start of `sdu`.
///
/// Returns the header length in octets.
pub(crate) fn match_header(def: &FragDef, ptrn: &FragData, pkt: &mut FragData, sdu: &[u8], eval: &EvalCx)
    -> Result<usize>
{
    let mut bit_offset = 0;
    def.match_do(ptrn, pkt, sdu, &mut bit_offset, eval)?;
    Ok(bit_offset / 8)
}

/// Encode a header with the values of one packet and prepend it.
pub(crate) fn prepend_header(def: &FragDef, data: &FragData, eval: &EvalCx, pkt: &mut Packet)
    -> Result<()>
{
    let header = def.generate_vec(data, eval)?;
    pkt.prepend_seg(Segment::owned(header));
    Ok(())
}

/// Read an `options` octet child whose length must be a multiple of four.
pub(crate) fn word_options(node: Option<&Node>) -> Result<Vec<u8>> {
    let options = match node {
        Some(node) => node.bytes_child("options")?.map(<[u8]>::to_vec).unwrap_or_default(),
        None => Vec::new(),
    };
    if options.len() % 4 != 0 || options.len() > 40 {
        return Err(Error::bad_template(format!(
            "options of {} octets are not a multiple of 4 up to 40", options.len())));
    }
    Ok(options)
}

/// Replace a field with a computed value unless the template already set it.
pub(crate) fn set_computed(data: &mut FragData, name: &str, value: u32) -> Result<()> {
    data.set_if_undef(name, crate::du::DataUnit::Int(value))
}
