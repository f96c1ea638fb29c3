/// Identifies the protocol encapsulated in the payload of an IPv4 packet
/// or in an IPv6 "next header" field.
///
/// You can access the underlying `u8` value by using `.0` and any `u8`
/// can be converted to an `IpNumber`:
///
/// ```
/// use picostack::IpNumber;
///
/// assert_eq!(IpNumber::TCP.0, 6);
/// let num: IpNumber = 6.into();
/// assert_eq!(IpNumber::TCP, num);
/// ```
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IpNumber(pub u8);

impl IpNumber {
    /// IPv6 Hop-by-Hop Option \[RFC8200\]
    pub const IPV6_HOP_BY_HOP: IpNumber = IpNumber(0);
    /// Internet Control Message \[RFC792\]
    pub const ICMP: IpNumber = IpNumber(1);
    /// Internet Group Management \[RFC1112\]
    pub const IGMP: IpNumber = IpNumber(2);
    /// Transmission Control \[RFC793\]
    pub const TCP: IpNumber = IpNumber(6);
    /// User Datagram \[RFC768\]
    pub const UDP: IpNumber = IpNumber(17);
    /// Routing Header for IPv6 \[RFC8200\]
    pub const IPV6_ROUTE: IpNumber = IpNumber(43);
    /// Fragment Header for IPv6 \[RFC8200\]
    pub const IPV6_FRAG: IpNumber = IpNumber(44);
    /// ICMP for IPv6 \[RFC8200\]
    pub const IPV6_ICMP: IpNumber = IpNumber(58);
    /// No Next Header for IPv6 \[RFC8200\]
    pub const IPV6_NO_NEXT: IpNumber = IpNumber(59);
    /// Destination Options for IPv6 \[RFC8200\]
    pub const IPV6_DEST_OPTIONS: IpNumber = IpNumber(60);

    /// True if the value is an IPv6 extension header this stack walks
    /// through on input (hop-by-hop, routing, fragment, destination
    /// options).
    #[inline]
    pub fn is_ipv6_ext_header(self) -> bool {
        matches!(
            self,
            IpNumber::IPV6_HOP_BY_HOP
                | IpNumber::IPV6_ROUTE
                | IpNumber::IPV6_FRAG
                | IpNumber::IPV6_DEST_OPTIONS
        )
    }
}

impl From<u8> for IpNumber {
    #[inline]
    fn from(value: u8) -> Self {
        IpNumber(value)
    }
}

impl From<IpNumber> for u8 {
    #[inline]
    fn from(value: IpNumber) -> Self {
        value.0
    }
}

impl core::fmt::Debug for IpNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            IpNumber::IPV6_HOP_BY_HOP => write!(f, "0 (IPv6 Hop-by-Hop Option)"),
            IpNumber::ICMP => write!(f, "1 (ICMP)"),
            IpNumber::IGMP => write!(f, "2 (IGMP)"),
            IpNumber::TCP => write!(f, "6 (TCP)"),
            IpNumber::UDP => write!(f, "17 (UDP)"),
            IpNumber::IPV6_ROUTE => write!(f, "43 (IPv6 Route)"),
            IpNumber::IPV6_FRAG => write!(f, "44 (IPv6 Frag)"),
            IpNumber::IPV6_ICMP => write!(f, "58 (ICMPv6)"),
            IpNumber::IPV6_NO_NEXT => write!(f, "59 (IPv6 No Next Header)"),
            IpNumber::IPV6_DEST_OPTIONS => write!(f, "60 (IPv6 Destination Options)"),
            _ => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn constants() {
        assert_eq!(1, IpNumber::ICMP.0);
        assert_eq!(2, IpNumber::IGMP.0);
        assert_eq!(6, IpNumber::TCP.0);
        assert_eq!(17, IpNumber::UDP.0);
        assert_eq!(58, IpNumber::IPV6_ICMP.0);
    }

    #[test]
    fn is_ipv6_ext_header() {
        assert!(IpNumber::IPV6_HOP_BY_HOP.is_ipv6_ext_header());
        assert!(IpNumber::IPV6_ROUTE.is_ipv6_ext_header());
        assert!(IpNumber::IPV6_FRAG.is_ipv6_ext_header());
        assert!(IpNumber::IPV6_DEST_OPTIONS.is_ipv6_ext_header());
        assert_eq!(false, IpNumber::TCP.is_ipv6_ext_header());
        assert_eq!(false, IpNumber::IPV6_NO_NEXT.is_ipv6_ext_header());
    }

    #[test]
    fn from_into() {
        let num: IpNumber = 6u8.into();
        assert_eq!(num, IpNumber::TCP);
        let raw: u8 = IpNumber::UDP.into();
        assert_eq!(17, raw);
    }

    #[test]
    fn dbg() {
        assert_eq!("6 (TCP)", format!("{:?}", IpNumber::TCP));
        assert_eq!("99", format!("{:?}", IpNumber(99)));
    }
}
