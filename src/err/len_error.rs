use crate::err::{Layer, LenSource};

/// Error when different lengths are conflicting with each other (e.g. not
/// enough data in a buffer to decode a header).
///
/// When the error is caused by not enough data being available
/// `required_len > len` must be true. When a length inherited from an
/// upper layer is too big for the lower layer the inverse
/// (`required_len < len`) must be true.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct LenError {
    /// Expected minimum or maximum length conflicting with the
    /// `len` value.
    pub required_len: usize,

    /// Length limiting or exceeding the required length.
    pub len: usize,

    /// Source of the outer length (e.g. Slice or a length specified by
    /// an upper level protocol).
    pub len_source: LenSource,

    /// Layer in which the length error was encountered.
    pub layer: Layer,
}

impl core::fmt::Display for LenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len_source: &'static str = {
            use LenSource::*;
            match self.len_source {
                Slice => "slice length",
                Ipv4HeaderTotalLen => "length calculated from the IPv4 header 'total length' field",
                Ipv6HeaderPayloadLen => {
                    "length calculated from the IPv6 header 'payload length' field"
                }
                UdpHeaderLen => "length calculated from the UDP header 'length' field",
                TcpHeaderLen => "length calculated from the TCP header 'data offset' field",
            }
        };

        if self.required_len > self.len {
            write!(
                f,
                "{}: Not enough data to decode '{}'. {} byte(s) would be required, but only {} byte(s) are available (based on the {}).",
                self.layer.error_title(),
                self.layer,
                self.required_len,
                self.len,
                len_source
            )
        } else {
            write!(
                f,
                "{}: Length of {} byte(s) is too big for a '{}' (maximum is {} byte(s), based on the {}).",
                self.layer.error_title(),
                self.len,
                self.layer,
                self.required_len,
                len_source
            )
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for LenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn debug_clone_eq() {
        let err = LenError {
            required_len: 2,
            len: 1,
            len_source: LenSource::Slice,
            layer: Layer::UdpHeader,
        };
        assert_eq!(err, err.clone());
        let _ = format!("{:?}", err);
    }

    #[test]
    fn fmt_too_little_data() {
        let text = format!(
            "{}",
            LenError {
                required_len: 8,
                len: 1,
                len_source: LenSource::Slice,
                layer: Layer::UdpHeader,
            }
        );
        assert!(text.contains("8 byte(s) would be required"));
        assert!(text.contains("only 1 byte(s) are available"));
    }

    #[test]
    fn fmt_too_much_data() {
        let text = format!(
            "{}",
            LenError {
                required_len: 100,
                len: 200,
                len_source: LenSource::Ipv4HeaderTotalLen,
                layer: Layer::Ipv4TotalLength,
            }
        );
        assert!(text.contains("200 byte(s) is too big"));
    }

    #[cfg(feature = "std")]
    #[test]
    fn source() {
        use std::error::Error;
        assert!(LenError {
            required_len: 2,
            len: 1,
            len_source: LenSource::Slice,
            layer: Layer::TcpHeader,
        }
        .source()
        .is_none());
    }
}
