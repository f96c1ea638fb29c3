use arrayvec::ArrayVec;

use crate::checksum::Sum16BitWords;
use crate::err::{ipv4::HeaderError, Layer, LenError, LenSource};
use crate::IpNumber;

/// IPv4 header (RFC 791) with options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Header {
    /// Type of service field (DSCP + ECN bits, passed through unchanged).
    pub tos: u8,
    /// Total length of the IPv4 header (including options) and the payload.
    pub total_len: u16,
    /// Number used to identify packets that contain the same datagram
    /// when fragmented.
    pub identification: u16,
    /// If set the packet must not be fragmented on the way.
    pub dont_fragment: bool,
    /// Indicates that this is not the last fragment of the datagram.
    pub more_fragments: bool,
    /// Offset of this fragment within the original datagram, in bytes
    /// (the wire value is in units of 8 bytes; only multiples of 8 up to
    /// `0x1fff * 8` are representable).
    pub fragment_offset: u16,
    /// Remaining hops the packet may take.
    pub time_to_live: u8,
    /// Protocol of the payload.
    pub protocol: IpNumber,
    /// Checksum present in the header (not validated or updated
    /// automatically; see [`Ipv4Header::calc_header_checksum`]).
    pub header_checksum: u16,
    /// Source IPv4 address.
    pub source: [u8; 4],
    /// Destination IPv4 address.
    pub destination: [u8; 4],
    /// Options (0 to 40 bytes, length must be a multiple of 4).
    pub options: ArrayVec<u8, 40>,
}

impl Ipv4Header {
    /// Minimum length of an IPv4 header in bytes/octets (without options).
    pub const MIN_LEN: usize = 20;

    /// Maximum length of an IPv4 header in bytes/octets (with the
    /// maximum of 40 option bytes).
    pub const MAX_LEN: usize = 60;

    /// Maximum representable fragment offset in bytes.
    pub const MAX_FRAGMENT_OFFSET: u16 = 0x1fff * 8;

    /// Create a header for an unfragmented packet with the given
    /// payload length.
    pub fn new(
        payload_len: u16,
        time_to_live: u8,
        protocol: IpNumber,
        source: [u8; 4],
        destination: [u8; 4],
    ) -> Ipv4Header {
        Ipv4Header {
            tos: 0,
            total_len: payload_len + Ipv4Header::MIN_LEN as u16,
            identification: 0,
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            time_to_live,
            protocol,
            header_checksum: 0,
            source,
            destination,
            options: ArrayVec::new(),
        }
    }

    /// Length of the header (including options) in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        Ipv4Header::MIN_LEN + self.options.len()
    }

    /// Length of the payload in bytes based on `total_len`.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        self.total_len - self.header_len() as u16
    }

    /// True if the header indicates the payload is fragmented
    /// (more-fragments set or a non zero fragment offset).
    #[inline]
    pub fn is_fragmenting_payload(&self) -> bool {
        self.more_fragments || 0 != self.fragment_offset
    }

    /// Read an IPv4 header from a slice and return the header and the
    /// rest of the slice after the options.
    ///
    /// The header checksum is NOT verified here; the input pipeline
    /// verifies it separately so checksum offloading netifs can skip it.
    pub fn from_slice(slice: &[u8]) -> Result<(Ipv4Header, &[u8]), Ipv4ReadError> {
        use Ipv4ReadError::*;

        if slice.len() < Ipv4Header::MIN_LEN {
            return Err(Len(LenError {
                required_len: Ipv4Header::MIN_LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Ipv4Header,
            }));
        }

        let version_number = slice[0] >> 4;
        if version_number != 4 {
            return Err(Content(HeaderError::UnexpectedVersion { version_number }));
        }

        let ihl = slice[0] & 0xf;
        if ihl < 5 {
            return Err(Content(HeaderError::HeaderLengthSmallerThanHeader { ihl }));
        }
        let header_len = usize::from(ihl) * 4;
        if slice.len() < header_len {
            return Err(Len(LenError {
                required_len: header_len,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Ipv4Header,
            }));
        }

        let total_len = u16::from_be_bytes([slice[2], slice[3]]);
        if usize::from(total_len) < header_len {
            return Err(Content(HeaderError::TotalLengthSmallerThanHeader {
                total_length: total_len,
                min_expected_length: header_len as u16,
            }));
        }

        let flags_frag = u16::from_be_bytes([slice[6], slice[7]]);

        Ok((
            Ipv4Header {
                tos: slice[1],
                total_len,
                identification: u16::from_be_bytes([slice[4], slice[5]]),
                dont_fragment: 0 != flags_frag & 0x4000,
                more_fragments: 0 != flags_frag & 0x2000,
                fragment_offset: (flags_frag & 0x1fff) * 8,
                time_to_live: slice[8],
                protocol: IpNumber(slice[9]),
                header_checksum: u16::from_be_bytes([slice[10], slice[11]]),
                source: [slice[12], slice[13], slice[14], slice[15]],
                destination: [slice[16], slice[17], slice[18], slice[19]],
                options: {
                    let mut options = ArrayVec::new();
                    options
                        .try_extend_from_slice(&slice[Ipv4Header::MIN_LEN..header_len])
                        .unwrap();
                    options
                },
            },
            &slice[header_len..],
        ))
    }

    /// Calculate the header checksum over the serialized header with
    /// the checksum field counted as zero.
    pub fn calc_header_checksum(&self) -> u16 {
        let bytes = self.to_bytes();
        // zero out the stored checksum before summing
        Sum16BitWords::new()
            .add_slice(&bytes[..10])
            .add_slice(&bytes[12..])
            .ones_complement()
    }

    /// Returns the serialized form of the header (checksum field is
    /// written as currently stored in `header_checksum`).
    pub fn to_bytes(&self) -> ArrayVec<u8, { Ipv4Header::MAX_LEN }> {
        debug_assert!(self.options.len() % 4 == 0);
        debug_assert!(self.fragment_offset % 8 == 0);

        let ihl = (self.header_len() / 4) as u8;
        let flags_frag = {
            let mut value = self.fragment_offset / 8;
            if self.dont_fragment {
                value |= 0x4000;
            }
            if self.more_fragments {
                value |= 0x2000;
            }
            value.to_be_bytes()
        };
        let total_len_be = self.total_len.to_be_bytes();
        let id_be = self.identification.to_be_bytes();
        let checksum_be = self.header_checksum.to_be_bytes();

        let mut bytes = ArrayVec::new();
        bytes.push((4 << 4) | ihl);
        bytes.push(self.tos);
        bytes.push(total_len_be[0]);
        bytes.push(total_len_be[1]);
        bytes.push(id_be[0]);
        bytes.push(id_be[1]);
        bytes.push(flags_frag[0]);
        bytes.push(flags_frag[1]);
        bytes.push(self.time_to_live);
        bytes.push(self.protocol.0);
        bytes.push(checksum_be[0]);
        bytes.push(checksum_be[1]);
        let _ = bytes.try_extend_from_slice(&self.source);
        let _ = bytes.try_extend_from_slice(&self.destination);
        let _ = bytes.try_extend_from_slice(&self.options);
        bytes
    }
}

/// Error while reading an IPv4 header from a slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ipv4ReadError {
    /// Not enough data.
    Len(LenError),
    /// Malformed field content.
    Content(HeaderError),
}

impl core::fmt::Display for Ipv4ReadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Ipv4ReadError::Len(err) => err.fmt(f),
            Ipv4ReadError::Content(err) => err.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for Ipv4ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Ipv4ReadError::Len(err) => Some(err),
            Ipv4ReadError::Content(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn example() -> Ipv4Header {
        let mut header = Ipv4Header::new(
            100,
            64,
            IpNumber::UDP,
            [192, 168, 1, 1],
            [192, 168, 1, 2],
        );
        header.identification = 0x1234;
        header
    }

    #[test]
    fn new() {
        let header = example();
        assert_eq!(header.total_len, 120);
        assert_eq!(header.header_len(), 20);
        assert_eq!(header.payload_len(), 100);
        assert_eq!(false, header.is_fragmenting_payload());
    }

    #[test]
    fn is_fragmenting_payload() {
        let mut header = example();
        assert_eq!(false, header.is_fragmenting_payload());
        header.more_fragments = true;
        assert!(header.is_fragmenting_payload());
        header.more_fragments = false;
        header.fragment_offset = 8;
        assert!(header.is_fragmenting_payload());
    }

    #[test]
    fn round_trip() {
        let mut header = example();
        header.dont_fragment = true;
        header.header_checksum = header.calc_header_checksum();
        let bytes = header.to_bytes();
        let (decoded, rest) = Ipv4Header::from_slice(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
        // a correct checksum verifies to the stored value
        assert_eq!(decoded.calc_header_checksum(), decoded.header_checksum);
    }

    #[test]
    fn round_trip_with_fragmentation() {
        let mut header = example();
        header.fragment_offset = 1480;
        header.more_fragments = true;
        let bytes = header.to_bytes();
        let (decoded, _) = Ipv4Header::from_slice(&bytes).unwrap();
        assert_eq!(decoded.fragment_offset, 1480);
        assert!(decoded.more_fragments);
    }

    #[test]
    fn from_slice_errors() {
        // len error
        assert_matches!(
            Ipv4Header::from_slice(&[0u8; 19]),
            Err(Ipv4ReadError::Len(_))
        );
        // version error
        {
            let mut bytes = example().to_bytes();
            bytes[0] = (6 << 4) | 5;
            assert_matches!(
                Ipv4Header::from_slice(&bytes),
                Err(Ipv4ReadError::Content(HeaderError::UnexpectedVersion {
                    version_number: 6
                }))
            );
        }
        // ihl too small
        {
            let mut bytes = example().to_bytes();
            bytes[0] = (4 << 4) | 4;
            assert_matches!(
                Ipv4Header::from_slice(&bytes),
                Err(Ipv4ReadError::Content(
                    HeaderError::HeaderLengthSmallerThanHeader { ihl: 4 }
                ))
            );
        }
        // total length smaller than header
        {
            let mut bytes = example().to_bytes();
            bytes[2] = 0;
            bytes[3] = 19;
            assert_matches!(
                Ipv4Header::from_slice(&bytes),
                Err(Ipv4ReadError::Content(
                    HeaderError::TotalLengthSmallerThanHeader { .. }
                ))
            );
        }
        // ihl larger than slice
        {
            let mut bytes = alloc::vec::Vec::new();
            bytes.extend_from_slice(&example().to_bytes());
            bytes[0] = (4 << 4) | 6; // claims 24 bytes of header
            bytes.truncate(22);
            assert_matches!(
                Ipv4Header::from_slice(&bytes),
                Err(Ipv4ReadError::Len(LenError {
                    required_len: 24,
                    ..
                }))
            );
        }
    }

    #[test]
    fn options_round_trip() {
        let mut header = example();
        header
            .options
            .try_extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();
        header.total_len += 8;
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 28);
        let (decoded, _) = Ipv4Header::from_slice(&bytes).unwrap();
        assert_eq!(&decoded.options[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decoded.header_len(), 28);
    }
}
