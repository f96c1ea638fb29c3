/// Errors that can be encountered while decoding an IPv6 header or its
/// extension headers.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HeaderError {
    /// Error when the IP header version field is not equal 6.
    UnexpectedVersion {
        /// The unexpected version number in the IP header.
        version_number: u8,
    },
    /// Error when a hop-by-hop options header is encountered in a
    /// position other than directly after the IPv6 base header
    /// (RFC 8200 requires it to be first).
    HopByHopNotAtStart,
    /// Error when an extension header declares a length that leaves
    /// the remaining payload inconsistent.
    ExtHeaderLengthTooBig {
        /// Protocol number of the offending extension header.
        protocol: u8,
        /// Declared length of the extension header in bytes.
        declared_len: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// Error when the chain of extension headers exceeds the supported
    /// maximum (a loop-guard, not a wire-format rule).
    TooManyExtHeaders,
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use HeaderError::*;
        match self {
            UnexpectedVersion { version_number } => write!(
                f,
                "IPv6 Header Error: Encountered '{version_number}' in the version field of the header (must be '6' for an IPv6 header)."
            ),
            HopByHopNotAtStart => write!(
                f,
                "IPv6 Header Error: Encountered a hop-by-hop options header that is not directly located after the IPv6 base header (required by RFC 8200)."
            ),
            ExtHeaderLengthTooBig { protocol, declared_len, available } => write!(
                f,
                "IPv6 Header Error: The extension header (protocol {protocol}) declares a length of {declared_len} byte(s) but only {available} byte(s) are available."
            ),
            TooManyExtHeaders => write!(
                f,
                "IPv6 Header Error: More extension headers than supported are chained after the IPv6 base header."
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
