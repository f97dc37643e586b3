use core::{fmt, str::FromStr};

/// A six-octet Ethernet II address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// The broadcast address.
    pub const BROADCAST: Address = Address([0xff; 6]);

    /// Construct an Ethernet address from a sequence of octets, in big-endian.
    ///
    /// Returns `None` if `data` is not six octets long.
    pub fn from_bytes(data: &[u8]) -> Option<Address> {
        let mut bytes = [0; 6];
        if data.len() != bytes.len() {
            return None;
        }
        bytes.copy_from_slice(data);
        Some(Address(bytes))
    }

    /// Return an Ethernet address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An address string was not six colon separated hex octets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseAddressError {
    kind: ParseAddressErrorKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParseAddressErrorKind {
    ComponentError,
    SeparatorError,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5])
    }
}

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ParseAddressErrorKind::ComponentError => write!(f, "invalid hex octet"),
            ParseAddressErrorKind::SeparatorError => write!(f, "expected six `:` separated octets"),
        }
    }
}

impl std::error::Error for ParseAddressError {}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(src: &str) -> core::result::Result<Self, ParseAddressError> {
        let mut parsed = [0; 6];
        let mut components = src.split(|c| c == ':' || c == '-');
        for c in parsed.iter_mut() {
            let part = components
                .next()
                .ok_or(ParseAddressError {
                    kind: ParseAddressErrorKind::SeparatorError,
                })?;
            *c = u8::from_str_radix(part, 16)
                .map_err(|_| ParseAddressError {
                    kind: ParseAddressErrorKind::ComponentError,
                })?;
        }

        if components.next().is_some() {
            Err(ParseAddressError {
                kind: ParseAddressErrorKind::SeparatorError,
            })
        } else {
            Ok(Address(parsed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let addr: Address = "02:00:00:00:00:01".parse().unwrap();
        assert_eq!(addr, Address([2, 0, 0, 0, 0, 1]));
        assert_eq!(addr.to_string(), "02:00:00:00:00:01");
        assert_eq!("ff-ff-ff-ff-ff-ff".parse::<Address>(), Ok(Address::BROADCAST));
        assert!("02:00:00:00:00".parse::<Address>().is_err());
        assert!("02:00:00:00:00:01:03".parse::<Address>().is_err());
        assert!("zz:00:00:00:00:01".parse::<Address>().is_err());
        assert_eq!(Address::from_bytes(&[1; 5]), None);
    }
}
