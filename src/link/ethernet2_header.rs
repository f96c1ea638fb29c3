use crate::err::{Layer, LenError, LenSource};
use crate::EtherType;

/// Ethernet II header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ethernet2Header {
    /// Destination MAC address.
    pub destination: [u8; 6],
    /// Source MAC address.
    pub source: [u8; 6],
    /// Protocol present after the ethernet2 header.
    pub ether_type: EtherType,
}

impl Ethernet2Header {
    /// Serialized size of an Ethernet II header in bytes/octets.
    pub const LEN: usize = 14;

    /// The broadcast MAC address (all ones).
    pub const BROADCAST: [u8; 6] = [0xff; 6];

    /// Read an Ethernet II header from a slice and return the header
    /// and the rest of the slice.
    #[inline]
    pub fn from_slice(slice: &[u8]) -> Result<(Ethernet2Header, &[u8]), LenError> {
        if slice.len() < Ethernet2Header::LEN {
            return Err(LenError {
                required_len: Ethernet2Header::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Ethernet2Header,
            });
        }
        Ok((
            Ethernet2Header {
                destination: [slice[0], slice[1], slice[2], slice[3], slice[4], slice[5]],
                source: [slice[6], slice[7], slice[8], slice[9], slice[10], slice[11]],
                ether_type: EtherType(u16::from_be_bytes([slice[12], slice[13]])),
            },
            &slice[Ethernet2Header::LEN..],
        ))
    }

    /// Returns the serialized form of the header as a statically
    /// sized byte array.
    #[inline]
    pub fn to_bytes(&self) -> [u8; 14] {
        let ether_type_be = self.ether_type.0.to_be_bytes();
        [
            self.destination[0],
            self.destination[1],
            self.destination[2],
            self.destination[3],
            self.destination[4],
            self.destination[5],
            self.source[0],
            self.source[1],
            self.source[2],
            self.source[3],
            self.source[4],
            self.source[5],
            ether_type_be[0],
            ether_type_be[1],
        ]
    }
}
