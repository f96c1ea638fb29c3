use arrayvec::ArrayVec;

use crate::checksum::Sum16BitWords;
use crate::err::{tcp::HeaderError, Layer, LenError, LenSource};
use crate::transport::TcpOptions;
use crate::IpNumber;

/// TCP header according to RFC 793 with options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TcpHeader {
    /// The source port number.
    pub source_port: u16,
    /// The destination port number.
    pub destination_port: u16,
    /// The sequence number of the first data octet in this segment
    /// (except when SYN is present, then it is the initial sequence
    /// number and the first data octet is ISN+1).
    pub sequence_number: u32,
    /// If the ACK control bit is set this field contains the next
    /// sequence number the sender of the segment is expecting to
    /// receive.
    pub acknowledgment_number: u32,
    /// No more data from sender.
    pub fin: bool,
    /// Synchronize sequence numbers.
    pub syn: bool,
    /// Reset the connection.
    pub rst: bool,
    /// Push function.
    pub psh: bool,
    /// Acknowledgment field significant.
    pub ack: bool,
    /// Urgent pointer field significant.
    pub urg: bool,
    /// ECN-echo (RFC 3168).
    pub ece: bool,
    /// Congestion window reduced (RFC 3168).
    pub cwr: bool,
    /// The number of data octets beginning with the one indicated in
    /// the acknowledgment field which the sender of this segment is
    /// willing to accept.
    pub window_size: u16,
    /// Checksum (16 bit one's complement) of the pseudo ip header,
    /// this tcp header and the payload.
    pub checksum: u16,
    /// Offset from the sequence number to the octet following urgent
    /// data (only interpreted when `urg` is set).
    pub urgent_pointer: u16,
    /// Options of the header.
    pub options: TcpOptions,
}

impl TcpHeader {
    /// Minimum length of a TCP header in bytes/octets.
    pub const MIN_LEN: usize = 5 * 4;

    /// Maximum length of a TCP header in bytes/octets.
    pub const MAX_LEN: usize = 15 * 4;

    /// Creates a TcpHeader with the given values and the rest
    /// initialized with default values.
    pub fn new(
        source_port: u16,
        destination_port: u16,
        sequence_number: u32,
        window_size: u16,
    ) -> TcpHeader {
        TcpHeader {
            source_port,
            destination_port,
            sequence_number,
            window_size,
            ..Default::default()
        }
    }

    /// Returns the length of the header including the options.
    #[inline]
    pub fn header_len(&self) -> usize {
        TcpHeader::MIN_LEN + self.options.len()
    }

    /// The data offset field value (header length in 4 byte words).
    #[inline]
    pub fn data_offset(&self) -> u8 {
        (self.header_len() / 4) as u8
    }

    /// Read a TCP header from a slice and return the header and the
    /// slice containing the payload.
    ///
    /// The checksum is NOT verified here; the input pipeline verifies
    /// it over the full segment with the pseudo header.
    pub fn from_slice(slice: &[u8]) -> Result<(TcpHeader, &[u8]), TcpReadError> {
        use TcpReadError::*;

        if slice.len() < TcpHeader::MIN_LEN {
            return Err(Len(LenError {
                required_len: TcpHeader::MIN_LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::TcpHeader,
            }));
        }

        let data_offset = slice[12] >> 4;
        if data_offset < 5 {
            return Err(Content(HeaderError::DataOffsetTooSmall { data_offset }));
        }
        let header_len = usize::from(data_offset) * 4;
        if slice.len() < header_len {
            return Err(Len(LenError {
                required_len: header_len,
                len: slice.len(),
                len_source: LenSource::TcpHeaderLen,
                layer: Layer::TcpHeader,
            }));
        }

        let flags = slice[13];
        Ok((
            TcpHeader {
                source_port: u16::from_be_bytes([slice[0], slice[1]]),
                destination_port: u16::from_be_bytes([slice[2], slice[3]]),
                sequence_number: u32::from_be_bytes([slice[4], slice[5], slice[6], slice[7]]),
                acknowledgment_number: u32::from_be_bytes([
                    slice[8], slice[9], slice[10], slice[11],
                ]),
                fin: 0 != flags & 1,
                syn: 0 != flags & 2,
                rst: 0 != flags & 4,
                psh: 0 != flags & 8,
                ack: 0 != flags & 16,
                urg: 0 != flags & 32,
                ece: 0 != flags & 64,
                cwr: 0 != flags & 128,
                window_size: u16::from_be_bytes([slice[14], slice[15]]),
                checksum: u16::from_be_bytes([slice[16], slice[17]]),
                urgent_pointer: u16::from_be_bytes([slice[18], slice[19]]),
                options: TcpOptions::from_raw(&slice[TcpHeader::MIN_LEN..header_len])
                    .expect("options fit by construction (data offset <= 15)"),
            },
            &slice[header_len..],
        ))
    }

    /// Returns the serialized form of the header (checksum field is
    /// written as currently stored in `checksum`).
    pub fn to_bytes(&self) -> ArrayVec<u8, { TcpHeader::MAX_LEN }> {
        let mut bytes: ArrayVec<u8, { TcpHeader::MAX_LEN }> = ArrayVec::new();

        let _ = bytes.try_extend_from_slice(&self.source_port.to_be_bytes());
        let _ = bytes.try_extend_from_slice(&self.destination_port.to_be_bytes());
        let _ = bytes.try_extend_from_slice(&self.sequence_number.to_be_bytes());
        let _ = bytes.try_extend_from_slice(&self.acknowledgment_number.to_be_bytes());
        bytes.push(self.data_offset() << 4);
        bytes.push({
            let mut flags = 0u8;
            if self.fin {
                flags |= 1;
            }
            if self.syn {
                flags |= 2;
            }
            if self.rst {
                flags |= 4;
            }
            if self.psh {
                flags |= 8;
            }
            if self.ack {
                flags |= 16;
            }
            if self.urg {
                flags |= 32;
            }
            if self.ece {
                flags |= 64;
            }
            if self.cwr {
                flags |= 128;
            }
            flags
        });
        let _ = bytes.try_extend_from_slice(&self.window_size.to_be_bytes());
        let _ = bytes.try_extend_from_slice(&self.checksum.to_be_bytes());
        let _ = bytes.try_extend_from_slice(&self.urgent_pointer.to_be_bytes());
        let _ = bytes.try_extend_from_slice(self.options.as_slice());
        bytes
    }

    /// Calculates the checksum for the current header in ipv4 mode and
    /// returns the result. This does NOT set the checksum.
    pub fn calc_checksum_ipv4(&self, source: [u8; 4], destination: [u8; 4], payload: &[u8]) -> u16 {
        let tcp_len = (self.header_len() + payload.len()) as u16;
        self.sum_header_and_payload(
            Sum16BitWords::new()
                .add_4bytes(source)
                .add_4bytes(destination)
                .add_2bytes([0, IpNumber::TCP.0])
                .add_2bytes(tcp_len.to_be_bytes()),
            payload,
        )
    }

    /// Calculates the checksum for the current header in ipv6 mode and
    /// returns the result. This does NOT set the checksum.
    pub fn calc_checksum_ipv6(
        &self,
        source: [u8; 16],
        destination: [u8; 16],
        payload: &[u8],
    ) -> u16 {
        let tcp_len = (self.header_len() + payload.len()) as u32;
        self.sum_header_and_payload(
            Sum16BitWords::new()
                .add_16bytes(source)
                .add_16bytes(destination)
                .add_4bytes(tcp_len.to_be_bytes())
                .add_2bytes([0, IpNumber::TCP.0]),
            payload,
        )
    }

    fn sum_header_and_payload(&self, pseudo_sum: Sum16BitWords, payload: &[u8]) -> u16 {
        let bytes = {
            let mut header = self.clone();
            header.checksum = 0;
            header.to_bytes()
        };
        pseudo_sum
            .add_slice(&bytes)
            .add_slice(payload)
            .ones_complement()
    }
}

/// Error while reading a TCP header from a slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TcpReadError {
    /// Not enough data.
    Len(LenError),
    /// Malformed field content.
    Content(HeaderError),
}

impl core::fmt::Display for TcpReadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TcpReadError::Len(err) => err.fmt(f),
            TcpReadError::Content(err) => err.fmt(f),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for TcpReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TcpReadError::Len(err) => Some(err),
            TcpReadError::Content(err) => Some(err),
        }
    }
}
