/// Represents an "ether type" present in a Ethernet II header.
///
/// You can access the underlying `u16` value by using `.0` and any `u16`
/// can be converted to an `EtherType`:
///
/// ```
/// use picostack::EtherType;
///
/// assert_eq!(EtherType::IPV4.0, 0x0800);
/// let ether_type: EtherType = 0x0800.into();
/// assert_eq!(EtherType::IPV4, ether_type);
/// ```
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: EtherType = EtherType(0x0800);
    pub const ARP: EtherType = EtherType(0x0806);
    pub const IPV6: EtherType = EtherType(0x86dd);
    pub const VLAN_TAGGED_FRAME: EtherType = EtherType(0x8100);
}

impl From<u16> for EtherType {
    #[inline]
    fn from(value: u16) -> Self {
        EtherType(value)
    }
}

impl From<EtherType> for u16 {
    #[inline]
    fn from(value: EtherType) -> Self {
        value.0
    }
}

impl core::fmt::Debug for EtherType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            EtherType::IPV4 => write!(f, "{:#06X} (Internet Protocol version 4 (IPv4))", self.0),
            EtherType::ARP => write!(f, "{:#06X} (Address Resolution Protocol (ARP))", self.0),
            EtherType::IPV6 => write!(f, "{:#06X} (Internet Protocol Version 6 (IPV6))", self.0),
            EtherType::VLAN_TAGGED_FRAME => {
                write!(f, "{:#06X} (VLAN-tagged frame (IEEE 802.1Q))", self.0)
            }
            _ => write!(f, "{:#06X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn to_u16() {
        assert_eq!(0x0800, u16::from(EtherType::IPV4));
        assert_eq!(0x86dd, u16::from(EtherType::IPV6));
        assert_eq!(0x0806, u16::from(EtherType::ARP));
    }

    #[test]
    fn from_u16() {
        assert_eq!(EtherType::from(0x0800), EtherType::IPV4);
        assert_eq!(EtherType::from(0x86dd), EtherType::IPV6);
        assert_eq!(EtherType::from(0x0806), EtherType::ARP);
        assert_eq!(EtherType::from(0x1234), EtherType(0x1234));
    }

    #[test]
    fn dbg() {
        assert_eq!(
            "0x0800 (Internet Protocol version 4 (IPv4))",
            format!("{:?}", EtherType::IPV4)
        );
        assert_eq!("0x1234", format!("{:?}", EtherType(0x1234)));
    }
}
