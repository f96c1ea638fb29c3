use crate::checksum::Sum16BitWords;
use crate::err::{Layer, LenError, LenSource};
use crate::IpNumber;

/// UDP header according to RFC 768.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct UdpHeader {
    /// Source port of the packet (optional).
    pub source_port: u16,
    /// Destination port of the packet.
    pub destination_port: u16,
    /// Length of the packet (includes the UDP header length of 8 bytes).
    pub length: u16,
    /// The checksum of the packet, calculated from a pseudo header,
    /// the UDP header and the payload. The value 0 signals "no
    /// checksum calculated".
    pub checksum: u16,
}

impl UdpHeader {
    /// Serialized size of an UDP header in bytes/octets.
    pub const LEN: usize = 8;

    /// Read an UDP header from a slice and return the header and the
    /// rest of the slice.
    pub fn from_slice(slice: &[u8]) -> Result<(UdpHeader, &[u8]), LenError> {
        if slice.len() < UdpHeader::LEN {
            return Err(LenError {
                required_len: UdpHeader::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::UdpHeader,
            });
        }
        Ok((
            UdpHeader {
                source_port: u16::from_be_bytes([slice[0], slice[1]]),
                destination_port: u16::from_be_bytes([slice[2], slice[3]]),
                length: u16::from_be_bytes([slice[4], slice[5]]),
                checksum: u16::from_be_bytes([slice[6], slice[7]]),
            },
            &slice[UdpHeader::LEN..],
        ))
    }

    /// Returns the serialized form of the header as a statically
    /// sized byte array.
    pub fn to_bytes(&self) -> [u8; 8] {
        let source_be = self.source_port.to_be_bytes();
        let dest_be = self.destination_port.to_be_bytes();
        let length_be = self.length.to_be_bytes();
        let checksum_be = self.checksum.to_be_bytes();
        [
            source_be[0],
            source_be[1],
            dest_be[0],
            dest_be[1],
            length_be[0],
            length_be[1],
            checksum_be[0],
            checksum_be[1],
        ]
    }

    /// Calculates the checksum of the header with an IPv4 pseudo
    /// header (returns 0xffff when the sum would be 0, as 0 means "no
    /// checksum").
    pub fn calc_checksum_ipv4(&self, source: [u8; 4], destination: [u8; 4], payload: &[u8]) -> u16 {
        Sum16BitWords::new()
            .add_4bytes(source)
            .add_4bytes(destination)
            .add_2bytes([0, IpNumber::UDP.0])
            .add_2bytes(self.length.to_be_bytes())
            .add_slice(&self.header_bytes_for_checksum())
            .add_slice(payload)
            .to_ones_complement_with_no_zero()
    }

    /// Calculates the checksum of the header with an IPv6 pseudo
    /// header (for IPv6 the checksum is mandatory).
    pub fn calc_checksum_ipv6(
        &self,
        source: [u8; 16],
        destination: [u8; 16],
        payload: &[u8],
    ) -> u16 {
        Sum16BitWords::new()
            .add_16bytes(source)
            .add_16bytes(destination)
            .add_4bytes(u32::from(self.length).to_be_bytes())
            .add_2bytes([0, IpNumber::UDP.0])
            .add_slice(&self.header_bytes_for_checksum())
            .add_slice(payload)
            .to_ones_complement_with_no_zero()
    }

    /// Header bytes with the checksum field zeroed out.
    fn header_bytes_for_checksum(&self) -> [u8; 8] {
        let mut bytes = self.to_bytes();
        bytes[6] = 0;
        bytes[7] = 0;
        bytes
    }
}
