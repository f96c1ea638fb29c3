/// Errors that can be encountered while decoding a TCP header.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HeaderError {
    /// Error when the data_offset is so small that the data would
    /// start within the TCP header itself.
    DataOffsetTooSmall {
        /// The data offset value (in 4 byte words) present in the header.
        data_offset: u8,
    },
    /// Error when the checksum does not match the pseudo header,
    /// TCP header and payload.
    ChecksumMismatch {
        /// Checksum present in the header.
        expected: u16,
        /// Checksum calculated over the received segment.
        actual: u16,
    },
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use HeaderError::*;
        match self {
            DataOffsetTooSmall { data_offset } => write!(
                f,
                "TCP Header Error: 'data offset' too small ({data_offset}). The 'data offset' must be at least 5 so the data is not overlapping with the TCP header itself."
            ),
            ChecksumMismatch { expected, actual } => write!(
                f,
                "TCP Header Error: The checksum {expected:#06x} does not match the calculated checksum {actual:#06x}."
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

#[cfg(test)]
mod tests {
    use super::HeaderError::*;
    use alloc::format;

    #[test]
    fn debug_clone_eq() {
        let err = DataOffsetTooSmall { data_offset: 1 };
        assert_eq!(
            "DataOffsetTooSmall { data_offset: 1 }",
            format!("{:?}", err)
        );
        assert_eq!(err, err.clone());
    }

    #[test]
    fn fmt() {
        assert_eq!(
            "TCP Header Error: 'data offset' too small (1). The 'data offset' must be at least 5 so the data is not overlapping with the TCP header itself.",
            format!("{}", DataOffsetTooSmall { data_offset: 1 })
        );
        assert!(format!(
            "{}",
            ChecksumMismatch {
                expected: 0,
                actual: 1
            }
        )
        .contains("does not match"));
    }
}
