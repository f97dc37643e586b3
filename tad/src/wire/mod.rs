// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
/*! Low-level wire helpers shared by the layers.

The layers themselves describe their headers declaratively (see the [`bps`] module), the helpers
here cover what does not fit a field list:

 * Registered protocol numbers: [`EtherType`], [`IpProtocol`] and [`PppProtocol`]. The value a
   lower layer writes for its encapsulated layer is derived from these.
 * The RFC 1071 internet [`checksum`], including pseudo headers and the incremental update of
   RFC 1624.
 * The AAL5 [`crc32`].
 * Parsing and printing of hardware addresses.

[`bps`]: ../bps/index.html
[`EtherType`]: enum.EtherType.html
[`IpProtocol`]: enum.IpProtocol.html
[`PppProtocol`]: enum.PppProtocol.html
[`checksum`]: checksum/index.html
[`crc32`]: crc32/index.html
*/
use core::fmt;

pub mod checksum;
pub mod crc32;
mod ethernet;

pub use self::ethernet::{Address as EthernetAddress, ParseAddressError};

enum_with_unknown! {
    /// Ethernet protocol type.
    pub enum EtherType(u16) {
        Ipv4 = 0x0800,
        Arp  = 0x0806,
        Ipv6 = 0x86DD,
        PppoeDiscovery = 0x8863,
        PppoeSession = 0x8864,
    }
}

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum IpProtocol(u8) {
        HopByHop  = 0x00,
        Icmp      = 0x01,
        Igmp      = 0x02,
        Tcp       = 0x06,
        Udp       = 0x11,
        Ipv6Route = 0x2b,
        Ipv6Frag  = 0x2c,
        Icmpv6    = 0x3a,
        Ipv6NoNxt = 0x3b,
        Ipv6Opts  = 0x3c,
    }
}

enum_with_unknown! {
    /// Protocol field of a PPP frame.
    pub enum PppProtocol(u16) {
        Ipv4 = 0x0021,
        Ipv6 = 0x0057,
        Lcp  = 0xc021,
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Arp  => write!(f, "ARP"),
            EtherType::PppoeDiscovery => write!(f, "PPPoE-Discovery"),
            EtherType::PppoeSession => write!(f, "PPPoE-Session"),
            EtherType::Unknown(id) => write!(f, "0x{:04x}", id)
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpProtocol::HopByHop  => write!(f, "Hop-by-Hop"),
            IpProtocol::Icmp      => write!(f, "ICMP"),
            IpProtocol::Igmp      => write!(f, "IGMP"),
            IpProtocol::Tcp       => write!(f, "TCP"),
            IpProtocol::Udp       => write!(f, "UDP"),
            IpProtocol::Ipv6Route => write!(f, "IPv6-Route"),
            IpProtocol::Ipv6Frag  => write!(f, "IPv6-Frag"),
            IpProtocol::Icmpv6    => write!(f, "ICMPv6"),
            IpProtocol::Ipv6NoNxt => write!(f, "IPv6-NoNxt"),
            IpProtocol::Ipv6Opts  => write!(f, "IPv6-Opts"),
            IpProtocol::Unknown(id) => write!(f, "0x{:02x}", id)
        }
    }
}
