/// Errors that can be encountered while decoding an ARP packet.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PacketError {
    /// Error when the hardware type is not Ethernet.
    UnsupportedHardwareType {
        /// The hardware type value present in the packet.
        hardware_type: u16,
    },
    /// Error when the protocol type is not IPv4.
    UnsupportedProtocolType {
        /// The protocol type value present in the packet.
        protocol_type: u16,
    },
    /// Error when the hardware or protocol address length does not
    /// match Ethernet/IPv4 (6 and 4).
    UnsupportedAddressLengths {
        /// Hardware address length present in the packet.
        hw_addr_len: u8,
        /// Protocol address length present in the packet.
        proto_addr_len: u8,
    },
    /// Error when the operation is neither request (1) nor reply (2).
    UnknownOperation {
        /// Operation value present in the packet.
        operation: u16,
    },
}

impl core::fmt::Display for PacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use PacketError::*;
        match self {
            UnsupportedHardwareType { hardware_type } => write!(
                f,
                "ARP Packet Error: Unsupported hardware type {hardware_type} (only Ethernet (1) is supported)."
            ),
            UnsupportedProtocolType { protocol_type } => write!(
                f,
                "ARP Packet Error: Unsupported protocol type {protocol_type:#06x} (only IPv4 (0x0800) is supported)."
            ),
            UnsupportedAddressLengths { hw_addr_len, proto_addr_len } => write!(
                f,
                "ARP Packet Error: Unsupported address lengths (hardware: {hw_addr_len}, protocol: {proto_addr_len}); expected 6 and 4 for Ethernet/IPv4."
            ),
            UnknownOperation { operation } => write!(
                f,
                "ARP Packet Error: Unknown operation {operation} (only request (1) and reply (2) are supported)."
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for PacketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
