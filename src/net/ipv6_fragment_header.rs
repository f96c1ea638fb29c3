use crate::err::{Layer, LenError, LenSource};
use crate::IpNumber;

/// IPv6 fragment header (RFC 8200, section 4.5).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv6FragmentHeader {
    /// Protocol or extension header that follows this header.
    pub next_header: IpNumber,
    /// Offset of this fragment within the original payload, in bytes
    /// (the wire value is in units of 8 bytes).
    pub fragment_offset: u16,
    /// True if more fragments follow this one.
    pub more_fragments: bool,
    /// Identification of the fragmented datagram.
    pub identification: u32,
}

impl Ipv6FragmentHeader {
    /// Serialized size of the fragment header in bytes/octets.
    pub const LEN: usize = 8;

    /// Read a fragment header from a slice and return the header and
    /// the rest of the slice.
    pub fn from_slice(slice: &[u8]) -> Result<(Ipv6FragmentHeader, &[u8]), LenError> {
        if slice.len() < Ipv6FragmentHeader::LEN {
            return Err(LenError {
                required_len: Ipv6FragmentHeader::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::Ipv6FragHeader,
            });
        }
        let offset_flags = u16::from_be_bytes([slice[2], slice[3]]);
        Ok((
            Ipv6FragmentHeader {
                next_header: IpNumber(slice[0]),
                fragment_offset: (offset_flags & 0xfff8),
                more_fragments: 0 != offset_flags & 1,
                identification: u32::from_be_bytes([slice[4], slice[5], slice[6], slice[7]]),
            },
            &slice[Ipv6FragmentHeader::LEN..],
        ))
    }

    /// True if the header describes an actual fragment (either a non
    /// zero offset or more fragments following). RFC 8200 allows
    /// "atomic" fragments where neither is set.
    #[inline]
    pub fn is_fragmenting_payload(&self) -> bool {
        self.more_fragments || 0 != self.fragment_offset
    }

    /// Returns the serialized form of the header as a statically
    /// sized byte array.
    pub fn to_bytes(&self) -> [u8; 8] {
        debug_assert!(self.fragment_offset % 8 == 0);

        let offset_flags = {
            let mut value = self.fragment_offset & 0xfff8;
            if self.more_fragments {
                value |= 1;
            }
            value.to_be_bytes()
        };
        let id_be = self.identification.to_be_bytes();
        [
            self.next_header.0,
            0,
            offset_flags[0],
            offset_flags[1],
            id_be[0],
            id_be[1],
            id_be[2],
            id_be[3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = Ipv6FragmentHeader {
            next_header: IpNumber::UDP,
            fragment_offset: 1480,
            more_fragments: true,
            identification: 0xdead_beef,
        };
        let bytes = header.to_bytes();
        let (decoded, rest) = Ipv6FragmentHeader::from_slice(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn is_fragmenting_payload() {
        let mut header = Ipv6FragmentHeader {
            next_header: IpNumber::UDP,
            fragment_offset: 0,
            more_fragments: false,
            identification: 1,
        };
        // atomic fragment
        assert_eq!(false, header.is_fragmenting_payload());
        header.more_fragments = true;
        assert!(header.is_fragmenting_payload());
        header.more_fragments = false;
        header.fragment_offset = 8;
        assert!(header.is_fragmenting_payload());
    }

    #[test]
    fn from_slice_len_error() {
        assert_eq!(
            Ipv6FragmentHeader::from_slice(&[0u8; 7]).unwrap_err(),
            LenError {
                required_len: 8,
                len: 7,
                len_source: LenSource::Slice,
                layer: Layer::Ipv6FragHeader,
            }
        );
    }
}
