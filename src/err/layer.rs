/// Layers on which an error can occur.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Layer {
    /// Error occurred in the Ethernet II header.
    Ethernet2Header,
    /// Error occurred in the ARP packet.
    ArpPacket,
    /// Error occurred in the IPv4 header.
    Ipv4Header,
    /// Error occurred verifying the total length of an IPv4 packet.
    Ipv4TotalLength,
    /// Error occurred in the IPv6 header.
    Ipv6Header,
    /// Error occurred in an IPv6 extension header.
    Ipv6ExtHeader,
    /// Error occurred in the IPv6 fragment header.
    Ipv6FragHeader,
    /// Error occurred in the ICMPv4 packet.
    Icmpv4,
    /// Error occurred in the ICMPv6 packet.
    Icmpv6,
    /// Error occurred in the IGMP message.
    IgmpMessage,
    /// Error occurred in the UDP header.
    UdpHeader,
    /// Error occurred in the TCP header.
    TcpHeader,
}

impl Layer {
    /// String that is used as a name for the layer in error messages.
    pub fn error_title(&self) -> &'static str {
        use Layer::*;
        match self {
            Ethernet2Header => "Ethernet 2 Header Error",
            ArpPacket => "ARP Packet Error",
            Ipv4Header => "IPv4 Header Error",
            Ipv4TotalLength => "IPv4 Total Length Error",
            Ipv6Header => "IPv6 Header Error",
            Ipv6ExtHeader => "IPv6 Extension Header Error",
            Ipv6FragHeader => "IPv6 Fragment Header Error",
            Icmpv4 => "ICMPv4 Packet Error",
            Icmpv6 => "ICMPv6 Packet Error",
            IgmpMessage => "IGMP Message Error",
            UdpHeader => "UDP Header Error",
            TcpHeader => "TCP Header Error",
        }
    }
}

impl core::fmt::Display for Layer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use Layer::*;
        match self {
            Ethernet2Header => write!(f, "Ethernet 2 header"),
            ArpPacket => write!(f, "ARP packet"),
            Ipv4Header => write!(f, "IPv4 header"),
            Ipv4TotalLength => write!(f, "IPv4 total length"),
            Ipv6Header => write!(f, "IPv6 header"),
            Ipv6ExtHeader => write!(f, "IPv6 extension header"),
            Ipv6FragHeader => write!(f, "IPv6 fragment header"),
            Icmpv4 => write!(f, "ICMPv4 packet"),
            Icmpv6 => write!(f, "ICMPv6 packet"),
            IgmpMessage => write!(f, "IGMP message"),
            UdpHeader => write!(f, "UDP header"),
            TcpHeader => write!(f, "TCP header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Layer::*;
    use alloc::format;

    #[test]
    fn debug_clone_eq() {
        let layer = Ipv4Header;
        assert_eq!("Ipv4Header", format!("{:?}", layer));
        assert_eq!(layer, layer.clone());
    }

    #[test]
    fn error_title() {
        let tests = [
            (Ethernet2Header, "Ethernet 2 Header Error"),
            (ArpPacket, "ARP Packet Error"),
            (Ipv4Header, "IPv4 Header Error"),
            (Ipv4TotalLength, "IPv4 Total Length Error"),
            (Ipv6Header, "IPv6 Header Error"),
            (Ipv6ExtHeader, "IPv6 Extension Header Error"),
            (Ipv6FragHeader, "IPv6 Fragment Header Error"),
            (Icmpv4, "ICMPv4 Packet Error"),
            (Icmpv6, "ICMPv6 Packet Error"),
            (IgmpMessage, "IGMP Message Error"),
            (UdpHeader, "UDP Header Error"),
            (TcpHeader, "TCP Header Error"),
        ];
        for (layer, expected) in tests {
            assert_eq!(expected, layer.error_title());
        }
    }

    #[test]
    fn fmt() {
        assert_eq!("IPv4 header", format!("{}", Ipv4Header));
        assert_eq!("TCP header", format!("{}", TcpHeader));
    }
}
