use crate::err::{ipv6::HeaderError, Layer, LenError, LenSource};
use crate::IpNumber;

/// IPv6 base header (RFC 8200).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv6Header {
    /// Traffic class field (DSCP + ECN bits).
    pub traffic_class: u8,
    /// Flow label (20 bit value).
    pub flow_label: u32,
    /// Length of everything after the base header in bytes.
    pub payload_length: u16,
    /// Protocol or extension header that follows the base header.
    pub next_header: IpNumber,
    /// Remaining hops the packet may take.
    pub hop_limit: u8,
    /// Source IPv6 address.
    pub source: [u8; 16],
    /// Destination IPv6 address.
    pub destination: [u8; 16],
}

impl Ipv6Header {
    /// Serialized size of an IPv6 base header in bytes/octets.
    pub const LEN: usize = 40;

    /// Read an IPv6 base header from a slice and return the header
    /// and the rest of the slice.
    pub fn from_slice(slice: &[u8]) -> Result<(Ipv6Header, &[u8]), Ipv6ReadError> {
        use Ipv6ReadError::*;

        if slice.len() < Ipv6Header::LEN {
            return Err(Len(LenError {
                required_len: Ipv6Header::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Ipv6Header,
            }));
        }

        let version_number = slice[0] >> 4;
        if version_number != 6 {
            return Err(Content(HeaderError::UnexpectedVersion { version_number }));
        }

        let mut source = [0u8; 16];
        source.copy_from_slice(&slice[8..24]);
        let mut destination = [0u8; 16];
        destination.copy_from_slice(&slice[24..40]);

        Ok((
            Ipv6Header {
                traffic_class: (slice[0] << 4) | (slice[1] >> 4),
                flow_label: u32::from_be_bytes([0, slice[1] & 0xf, slice[2], slice[3]]),
                payload_length: u16::from_be_bytes([slice[4], slice[5]]),
                next_header: IpNumber(slice[6]),
                hop_limit: slice[7],
                source,
                destination,
            },
            &slice[Ipv6Header::LEN..],
        ))
    }

    /// Returns the serialized form of the header as a statically
    /// sized byte array.
    pub fn to_bytes(&self) -> [u8; 40] {
        debug_assert!(self.flow_label <= 0xfffff);

        let payload_len_be = self.payload_length.to_be_bytes();
        let flow_label_be = self.flow_label.to_be_bytes();

        let mut bytes = [0u8; 40];
        bytes[0] = (6 << 4) | (self.traffic_class >> 4);
        bytes[1] = (self.traffic_class << 4) | (flow_label_be[1] & 0xf);
        bytes[2] = flow_label_be[2];
        bytes[3] = flow_label_be[3];
        bytes[4] = payload_len_be[0];
        bytes[5] = payload_len_be[1];
        bytes[6] = self.next_header.0;
        bytes[7] = self.hop_limit;
        bytes[8..24].copy_from_slice(&self.source);
        bytes[24..40].copy_from_slice(&self.destination);
        bytes
    }
}

/// Error while reading an IPv6 header from a slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ipv6ReadError {
    /// Not enough data.
    Len(LenError),
    /// Malformed field content.
    Content(HeaderError),
}

impl core::fmt::Display for Ipv6ReadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Ipv6ReadError::Len(err) => err.fmt(f),
            Ipv6ReadError::Content(err) => err.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for Ipv6ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Ipv6ReadError::Len(err) => Some(err),
            Ipv6ReadError::Content(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn example() -> Ipv6Header {
        Ipv6Header {
            traffic_class: 0xa5,
            flow_label: 0x12345,
            payload_length: 256,
            next_header: IpNumber::TCP,
            hop_limit: 64,
            source: [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
            destination: [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
        }
    }

    #[test]
    fn round_trip() {
        let header = example();
        let bytes = header.to_bytes();
        let (decoded, rest) = Ipv6Header::from_slice(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn version_and_fields_on_wire() {
        let bytes = example().to_bytes();
        assert_eq!(bytes[0] >> 4, 6);
        // traffic class spans the two first bytes
        assert_eq!((bytes[0] << 4) | (bytes[1] >> 4), 0xa5);
        assert_eq!(bytes[6], 6); // TCP
        assert_eq!(bytes[7], 64);
    }

    #[test]
    fn from_slice_errors() {
        assert_matches!(
            Ipv6Header::from_slice(&[0u8; 39]),
            Err(Ipv6ReadError::Len(LenError {
                required_len: 40,
                ..
            }))
        );
        let mut bytes = example().to_bytes();
        bytes[0] = 4 << 4;
        assert_matches!(
            Ipv6Header::from_slice(&bytes),
            Err(Ipv6ReadError::Content(HeaderError::UnexpectedVersion {
                version_number: 4
            }))
        );
    }
}
