/// Sources of length values that limit lower layers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LenSource {
    /// Limiting length was the length of the slice or buffer chain
    /// (we don't know what determined that one originally).
    Slice,
    /// Length calculated from the IPv4 header "total length" field.
    Ipv4HeaderTotalLen,
    /// Length calculated from the IPv6 header "payload length" field.
    Ipv6HeaderPayloadLen,
    /// Length calculated from the UDP header "length" field.
    UdpHeaderLen,
    /// Length calculated from the TCP header "data offset" field.
    TcpHeaderLen,
}

#[cfg(test)]
mod tests {
    use super::LenSource::*;
    use alloc::format;

    #[test]
    fn debug_clone_eq() {
        let value = Slice;
        assert_eq!("Slice", format!("{:?}", value));
        assert_eq!(value, value.clone());
    }
}
