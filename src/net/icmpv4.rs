use crate::checksum::Sum16BitWords;
use crate::err::{Layer, LenError, LenSource};

/// Echo request/reply header content (id + sequence number), shared by
/// ICMPv4 and ICMPv6.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IcmpEchoHeader {
    /// Identifier to match requests and replies.
    pub id: u16,
    /// Sequence number of the echo.
    pub seq: u16,
}

impl IcmpEchoHeader {
    /// Encode to the 4 "rest of header" bytes.
    #[inline]
    pub fn to_bytes(&self) -> [u8; 4] {
        let id_be = self.id.to_be_bytes();
        let seq_be = self.seq.to_be_bytes();
        [id_be[0], id_be[1], seq_be[0], seq_be[1]]
    }

    /// Decode from the 4 "rest of header" bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> IcmpEchoHeader {
        IcmpEchoHeader {
            id: u16::from_be_bytes([bytes[0], bytes[1]]),
            seq: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// "Destination Unreachable" codes (RFC 792 + RFC 1122).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DestUnreachableCode {
    Network,
    Host,
    Protocol,
    Port,
    FragmentationNeeded { next_hop_mtu: u16 },
    SourceRouteFailed,
}

impl DestUnreachableCode {
    /// Decode from the code byte and the "rest of header" bytes.
    pub fn from_values(code: u8, rest: [u8; 4]) -> Option<DestUnreachableCode> {
        use DestUnreachableCode::*;
        match code {
            0 => Some(Network),
            1 => Some(Host),
            2 => Some(Protocol),
            3 => Some(Port),
            4 => Some(FragmentationNeeded {
                next_hop_mtu: u16::from_be_bytes([rest[2], rest[3]]),
            }),
            5 => Some(SourceRouteFailed),
            _ => None,
        }
    }

    /// The code byte value.
    pub fn code_u8(&self) -> u8 {
        use DestUnreachableCode::*;
        match self {
            Network => 0,
            Host => 1,
            Protocol => 2,
            Port => 3,
            FragmentationNeeded { .. } => 4,
            SourceRouteFailed => 5,
        }
    }
}

/// Decoded ICMPv4 message type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Icmpv4Type {
    /// Echo reply (type 0).
    EchoReply(IcmpEchoHeader),
    /// Destination unreachable (type 3).
    DestinationUnreachable(DestUnreachableCode),
    /// Echo request (type 8).
    EchoRequest(IcmpEchoHeader),
    /// Time exceeded (type 11); code 0 = TTL exceeded in transit,
    /// code 1 = fragment reassembly time exceeded.
    TimeExceeded {
        /// Code byte.
        code: u8,
    },
    /// Parameter problem (type 12) with the pointer into the offending
    /// header.
    ParameterProblem {
        /// Offset of the error within the offending packet.
        pointer: u8,
    },
    /// Any type/code combination this stack does not interpret.
    Unknown {
        type_u8: u8,
        code_u8: u8,
        bytes5to8: [u8; 4],
    },
}

impl Icmpv4Type {
    /// (type, code, rest-of-header) triple for serialization.
    fn to_values(&self) -> (u8, u8, [u8; 4]) {
        use Icmpv4Type::*;
        match self {
            EchoReply(echo) => (0, 0, echo.to_bytes()),
            DestinationUnreachable(code) => {
                let rest = match code {
                    DestUnreachableCode::FragmentationNeeded { next_hop_mtu } => {
                        let mtu_be = next_hop_mtu.to_be_bytes();
                        [0, 0, mtu_be[0], mtu_be[1]]
                    }
                    _ => [0; 4],
                };
                (3, code.code_u8(), rest)
            }
            EchoRequest(echo) => (8, 0, echo.to_bytes()),
            TimeExceeded { code } => (11, *code, [0; 4]),
            ParameterProblem { pointer } => (12, 0, [*pointer, 0, 0, 0]),
            Unknown {
                type_u8,
                code_u8,
                bytes5to8,
            } => (*type_u8, *code_u8, *bytes5to8),
        }
    }
}

/// ICMPv4 header (type + code + checksum, 8 bytes on the wire).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Icmpv4Header {
    /// Decoded type (includes the code and rest-of-header values).
    pub icmp_type: Icmpv4Type,
    /// Checksum over the ICMP header and payload.
    pub checksum: u16,
}

impl Icmpv4Header {
    /// Serialized size of an ICMPv4 header in bytes/octets.
    pub const LEN: usize = 8;

    /// Read an ICMPv4 header from a slice and return the header and
    /// the payload after it.
    pub fn from_slice(slice: &[u8]) -> Result<(Icmpv4Header, &[u8]), LenError> {
        if slice.len() < Icmpv4Header::LEN {
            return Err(LenError {
                required_len: Icmpv4Header::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Icmpv4,
            });
        }
        let bytes5to8 = [slice[4], slice[5], slice[6], slice[7]];
        let icmp_type = match slice[0] {
            0 if slice[1] == 0 => Icmpv4Type::EchoReply(IcmpEchoHeader::from_bytes(bytes5to8)),
            3 => match DestUnreachableCode::from_values(slice[1], bytes5to8) {
                Some(code) => Icmpv4Type::DestinationUnreachable(code),
                None => Icmpv4Type::Unknown {
                    type_u8: 3,
                    code_u8: slice[1],
                    bytes5to8,
                },
            },
            8 if slice[1] == 0 => Icmpv4Type::EchoRequest(IcmpEchoHeader::from_bytes(bytes5to8)),
            11 if slice[1] <= 1 => Icmpv4Type::TimeExceeded { code: slice[1] },
            12 if slice[1] == 0 => Icmpv4Type::ParameterProblem { pointer: bytes5to8[0] },
            type_u8 => Icmpv4Type::Unknown {
                type_u8,
                code_u8: slice[1],
                bytes5to8,
            },
        };
        Ok((
            Icmpv4Header {
                icmp_type,
                checksum: u16::from_be_bytes([slice[2], slice[3]]),
            },
            &slice[Icmpv4Header::LEN..],
        ))
    }

    /// Calculates the checksum over the header and the given payload
    /// (ICMPv4 checksums do not include a pseudo header).
    pub fn calc_checksum(icmp_type: &Icmpv4Type, payload: &[u8]) -> u16 {
        let (type_u8, code_u8, rest) = icmp_type.to_values();
        Sum16BitWords::new()
            .add_2bytes([type_u8, code_u8])
            .add_4bytes(rest)
            .add_slice(payload)
            .ones_complement()
    }

    /// Create a header with the checksum calculated for the given
    /// payload.
    pub fn with_checksum(icmp_type: Icmpv4Type, payload: &[u8]) -> Icmpv4Header {
        let checksum = Icmpv4Header::calc_checksum(&icmp_type, payload);
        Icmpv4Header {
            icmp_type,
            checksum,
        }
    }

    /// Returns the serialized form of the header as a statically
    /// sized byte array.
    pub fn to_bytes(&self) -> [u8; 8] {
        let (type_u8, code_u8, rest) = self.icmp_type.to_values();
        let checksum_be = self.checksum.to_be_bytes();
        [
            type_u8,
            code_u8,
            checksum_be[0],
            checksum_be[1],
            rest[0],
            rest[1],
            rest[2],
            rest[3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_round_trip() {
        let header = Icmpv4Header::with_checksum(
            Icmpv4Type::EchoRequest(IcmpEchoHeader { id: 0x1234, seq: 2 }),
            &[1, 2, 3, 4],
        );
        let bytes = header.to_bytes();
        let (decoded, rest) = Icmpv4Header::from_slice(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn checksum_validates() {
        let payload = [1u8, 2, 3, 4, 5];
        let icmp_type = Icmpv4Type::EchoReply(IcmpEchoHeader { id: 9, seq: 10 });
        let header = Icmpv4Header::with_checksum(icmp_type.clone(), &payload);
        // recalculating with the checksum field zeroed must give the
        // stored value
        assert_eq!(header.checksum, Icmpv4Header::calc_checksum(&icmp_type, &payload));
    }

    #[test]
    fn dest_unreachable_codes() {
        for (code, expected) in [
            (0u8, DestUnreachableCode::Network),
            (1, DestUnreachableCode::Host),
            (2, DestUnreachableCode::Protocol),
            (3, DestUnreachableCode::Port),
            (5, DestUnreachableCode::SourceRouteFailed),
        ] {
            assert_eq!(
                DestUnreachableCode::from_values(code, [0; 4]).unwrap(),
                expected
            );
            assert_eq!(expected.code_u8(), code);
        }
        // fragmentation needed carries the next hop mtu
        let code = DestUnreachableCode::from_values(4, [0, 0, 0x05, 0xdc]).unwrap();
        assert_eq!(
            code,
            DestUnreachableCode::FragmentationNeeded { next_hop_mtu: 1500 }
        );
        // unknown code
        assert_eq!(None, DestUnreachableCode::from_values(200, [0; 4]));
    }

    #[test]
    fn unknown_type_preserved() {
        let header = Icmpv4Header {
            icmp_type: Icmpv4Type::Unknown {
                type_u8: 200,
                code_u8: 3,
                bytes5to8: [1, 2, 3, 4],
            },
            checksum: 0,
        };
        let (decoded, _) = Icmpv4Header::from_slice(&header.to_bytes()).unwrap();
        assert_eq!(decoded.icmp_type, header.icmp_type);
    }

    #[test]
    fn from_slice_len_error() {
        assert!(Icmpv4Header::from_slice(&[0u8; 7]).is_err());
    }
}
