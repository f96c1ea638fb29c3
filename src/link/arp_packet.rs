use crate::err::arp::PacketError;
use crate::err::{Layer, LenError, LenSource};

/// ARP operation field values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArpOperation {
    /// Who-has request.
    Request,
    /// Is-at reply.
    Reply,
}

impl ArpOperation {
    /// Numeric value used on the wire.
    #[inline]
    pub fn value(self) -> u16 {
        match self {
            ArpOperation::Request => 1,
            ArpOperation::Reply => 2,
        }
    }
}

/// An Ethernet/IPv4 ARP packet (RFC 826).
///
/// Only the Ethernet + IPv4 combination is supported, which fixes the
/// packet to 28 bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArpPacket {
    /// Operation (request or reply).
    pub operation: ArpOperation,
    /// Hardware address of the sender.
    pub sender_hw_addr: [u8; 6],
    /// IPv4 address of the sender.
    pub sender_ip: [u8; 4],
    /// Hardware address of the target (zeroed in requests).
    pub target_hw_addr: [u8; 6],
    /// IPv4 address of the target.
    pub target_ip: [u8; 4],
}

impl ArpPacket {
    /// Serialized size of an Ethernet/IPv4 ARP packet in bytes/octets.
    pub const LEN: usize = 28;

    /// Hardware type value for Ethernet.
    pub const HW_TYPE_ETHERNET: u16 = 1;

    /// Read an ARP packet from a slice.
    pub fn from_slice(slice: &[u8]) -> Result<ArpPacket, ArpReadError> {
        use ArpReadError::*;

        if slice.len() < ArpPacket::LEN {
            return Err(Len(LenError {
                required_len: ArpPacket::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::ArpPacket,
            }));
        }

        let hardware_type = u16::from_be_bytes([slice[0], slice[1]]);
        if hardware_type != ArpPacket::HW_TYPE_ETHERNET {
            return Err(Content(PacketError::UnsupportedHardwareType { hardware_type }));
        }

        let protocol_type = u16::from_be_bytes([slice[2], slice[3]]);
        if protocol_type != 0x0800 {
            return Err(Content(PacketError::UnsupportedProtocolType { protocol_type }));
        }

        let (hw_addr_len, proto_addr_len) = (slice[4], slice[5]);
        if hw_addr_len != 6 || proto_addr_len != 4 {
            return Err(Content(PacketError::UnsupportedAddressLengths {
                hw_addr_len,
                proto_addr_len,
            }));
        }

        let operation = match u16::from_be_bytes([slice[6], slice[7]]) {
            1 => ArpOperation::Request,
            2 => ArpOperation::Reply,
            operation => return Err(Content(PacketError::UnknownOperation { operation })),
        };

        Ok(ArpPacket {
            operation,
            sender_hw_addr: [slice[8], slice[9], slice[10], slice[11], slice[12], slice[13]],
            sender_ip: [slice[14], slice[15], slice[16], slice[17]],
            target_hw_addr: [
                slice[18], slice[19], slice[20], slice[21], slice[22], slice[23],
            ],
            target_ip: [slice[24], slice[25], slice[26], slice[27]],
        })
    }

    /// Returns the serialized form of the packet as a statically
    /// sized byte array.
    pub fn to_bytes(&self) -> [u8; 28] {
        let op_be = self.operation.value().to_be_bytes();
        let mut bytes = [0u8; 28];
        bytes[0..2].copy_from_slice(&ArpPacket::HW_TYPE_ETHERNET.to_be_bytes());
        bytes[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
        bytes[4] = 6;
        bytes[5] = 4;
        bytes[6..8].copy_from_slice(&op_be);
        bytes[8..14].copy_from_slice(&self.sender_hw_addr);
        bytes[14..18].copy_from_slice(&self.sender_ip);
        bytes[18..24].copy_from_slice(&self.target_hw_addr);
        bytes[24..28].copy_from_slice(&self.target_ip);
        bytes
    }
}

/// Error while reading an ARP packet from a slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArpReadError {
    /// Not enough data.
    Len(LenError),
    /// Unsupported or malformed field content.
    Content(PacketError),
}

impl core::fmt::Display for ArpReadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArpReadError::Len(err) => err.fmt(f),
            ArpReadError::Content(err) => err.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for ArpReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArpReadError::Len(err) => Some(err),
            ArpReadError::Content(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn example() -> ArpPacket {
        ArpPacket {
            operation: ArpOperation::Request,
            sender_hw_addr: [1, 2, 3, 4, 5, 6],
            sender_ip: [192, 168, 1, 1],
            target_hw_addr: [0; 6],
            target_ip: [192, 168, 1, 2],
        }
    }

    #[test]
    fn operation_value() {
        assert_eq!(1, ArpOperation::Request.value());
        assert_eq!(2, ArpOperation::Reply.value());
    }

    #[test]
    fn round_trip() {
        let packet = example();
        let bytes = packet.to_bytes();
        assert_eq!(ArpPacket::from_slice(&bytes).unwrap(), packet);
    }

    #[test]
    fn from_slice_len_error() {
        let bytes = example().to_bytes();
        assert_matches!(
            ArpPacket::from_slice(&bytes[..27]),
            Err(ArpReadError::Len(_))
        );
    }

    #[test]
    fn from_slice_content_errors() {
        // bad hardware type
        {
            let mut bytes = example().to_bytes();
            bytes[1] = 2;
            assert_matches!(
                ArpPacket::from_slice(&bytes),
                Err(ArpReadError::Content(
                    PacketError::UnsupportedHardwareType { hardware_type: 2 }
                ))
            );
        }
        // bad protocol type
        {
            let mut bytes = example().to_bytes();
            bytes[2] = 0x86;
            bytes[3] = 0xdd;
            assert_matches!(
                ArpPacket::from_slice(&bytes),
                Err(ArpReadError::Content(
                    PacketError::UnsupportedProtocolType { .. }
                ))
            );
        }
        // bad address lengths
        {
            let mut bytes = example().to_bytes();
            bytes[4] = 8;
            assert_matches!(
                ArpPacket::from_slice(&bytes),
                Err(ArpReadError::Content(
                    PacketError::UnsupportedAddressLengths { .. }
                ))
            );
        }
        // bad operation
        {
            let mut bytes = example().to_bytes();
            bytes[7] = 3;
            assert_matches!(
                ArpPacket::from_slice(&bytes),
                Err(ArpReadError::Content(PacketError::UnknownOperation {
                    operation: 3
                }))
            );
        }
    }
}
