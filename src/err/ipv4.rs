/// Errors that can be encountered while decoding an IPv4 header.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HeaderError {
    /// Error when the IP header version field is not equal 4.
    UnexpectedVersion {
        /// The unexpected version number in the IP header.
        version_number: u8,
    },
    /// Error when the IPv4 header length is smaller than the minimum of 5.
    HeaderLengthSmallerThanHeader {
        /// The internal header length (in 4 byte words).
        ihl: u8,
    },
    /// Error when the IPv4 "total length" field is smaller than the
    /// header itself.
    TotalLengthSmallerThanHeader {
        /// The total length value present in the header.
        total_length: u16,
        /// The minimum expected length based on the header length.
        min_expected_length: u16,
    },
    /// Error when the header checksum does not match the header contents.
    ChecksumMismatch {
        /// Checksum present in the header.
        expected: u16,
        /// Checksum calculated over the received header.
        actual: u16,
    },
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use HeaderError::*;
        match self {
            UnexpectedVersion { version_number } => write!(
                f,
                "IPv4 Header Error: Encountered '{version_number}' in the version field of the header (must be '4' for an IPv4 header)."
            ),
            HeaderLengthSmallerThanHeader { ihl } => write!(
                f,
                "IPv4 Header Error: The 'internet header length' of {ihl} is smaller than the minimum of 5 needed for the header itself."
            ),
            TotalLengthSmallerThanHeader { total_length, min_expected_length } => write!(
                f,
                "IPv4 Header Error: The 'total length' of {total_length} byte(s) is smaller than the header itself ({min_expected_length} byte(s))."
            ),
            ChecksumMismatch { expected, actual } => write!(
                f,
                "IPv4 Header Error: The header checksum {expected:#06x} does not match the calculated checksum {actual:#06x}."
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
