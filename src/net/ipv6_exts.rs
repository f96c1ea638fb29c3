use crate::err::ipv6::HeaderError;
use crate::net::Ipv6FragmentHeader;
use crate::IpNumber;

/// Maximum number of extension headers the walk follows before giving
/// up (loop guard).
pub const IPV6_MAX_EXT_HEADERS: usize = 8;

/// Result of walking the IPv6 extension header chain of a received
/// packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv6ExtSummary {
    /// Protocol of the payload after all extension headers.
    pub payload_protocol: IpNumber,
    /// Offset from the start of the walked slice to the payload.
    pub payload_offset: usize,
    /// Fragment header if one was present, together with the offset
    /// of the byte following it (where the fragmented payload part
    /// starts).
    pub fragment: Option<(Ipv6FragmentHeader, usize)>,
}

/// What to do with a packet whose extension chain could not be
/// accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Ipv6ExtFailure {
    /// The chain is malformed; drop silently.
    Malformed(HeaderError),
    /// An option with an unrecognized type demanded a discard via its
    /// two high "action" bits (RFC 8200, section 4.2).
    UnrecognizedOption {
        /// Offset of the offending option type byte from the start of
        /// the walked slice (for the ICMP parameter problem pointer).
        pointer: usize,
        /// True if a parameter problem message should be sent.
        send_icmp: bool,
        /// True if the ICMP response must be suppressed when the
        /// packet's destination was a multicast address.
        suppress_if_multicast: bool,
    },
}

/// Walk the extension headers starting at `slice` whose first header
/// type is `first_header`.
///
/// Enforces the RFC 8200 rule that a hop-by-hop options header may only
/// appear directly after the base header and processes the options of
/// hop-by-hop and destination options headers (only padding options are
/// known; everything else is dispatched on its action bits).
pub fn walk_ipv6_extensions(
    first_header: IpNumber,
    slice: &[u8],
) -> Result<Ipv6ExtSummary, Ipv6ExtFailure> {
    use Ipv6ExtFailure::*;

    let mut next = first_header;
    let mut offset = 0usize;
    let mut fragment = None;
    let mut headers_walked = 0usize;

    loop {
        match next {
            IpNumber::IPV6_HOP_BY_HOP => {
                if headers_walked != 0 {
                    return Err(Malformed(HeaderError::HopByHopNotAtStart));
                }
                let (next_header, len) = read_options_header(slice, offset)?;
                check_options(&slice[offset + 2..offset + len], offset + 2)?;
                next = next_header;
                offset += len;
            }
            IpNumber::IPV6_DEST_OPTIONS => {
                let (next_header, len) = read_options_header(slice, offset)?;
                check_options(&slice[offset + 2..offset + len], offset + 2)?;
                next = next_header;
                offset += len;
            }
            IpNumber::IPV6_ROUTE => {
                let (next_header, len) = read_options_header(slice, offset)?;
                // segments_left != 0 with an unhandled routing type has
                // to trigger a parameter problem pointing at the type
                // field (RFC 8200 section 4.4)
                let segments_left = slice[offset + 3];
                if segments_left != 0 {
                    return Err(UnrecognizedOption {
                        pointer: offset + 2,
                        send_icmp: true,
                        suppress_if_multicast: false,
                    });
                }
                next = next_header;
                offset += len;
            }
            IpNumber::IPV6_FRAG => {
                let remaining = &slice[offset.min(slice.len())..];
                let (header, _) = Ipv6FragmentHeader::from_slice(remaining).map_err(|err| {
                    Malformed(HeaderError::ExtHeaderLengthTooBig {
                        protocol: IpNumber::IPV6_FRAG.0,
                        declared_len: err.required_len,
                        available: err.len,
                    })
                })?;
                next = header.next_header;
                offset += Ipv6FragmentHeader::LEN;
                fragment = Some((header, offset));
            }
            payload_protocol => {
                return Ok(Ipv6ExtSummary {
                    payload_protocol,
                    payload_offset: offset,
                    fragment,
                });
            }
        }
        headers_walked += 1;
        if headers_walked > IPV6_MAX_EXT_HEADERS {
            return Err(Malformed(HeaderError::TooManyExtHeaders));
        }
    }
}

/// Read the common (next_header, length) prefix shared by the
/// hop-by-hop, routing and destination options headers.
fn read_options_header(slice: &[u8], offset: usize) -> Result<(IpNumber, usize), Ipv6ExtFailure> {
    use Ipv6ExtFailure::*;

    let remaining = &slice[offset.min(slice.len())..];
    if remaining.len() < 8 {
        return Err(Malformed(HeaderError::ExtHeaderLengthTooBig {
            protocol: 0,
            declared_len: 8,
            available: remaining.len(),
        }));
    }
    let len = (usize::from(remaining[1]) + 1) * 8;
    if remaining.len() < len {
        return Err(Malformed(HeaderError::ExtHeaderLengthTooBig {
            protocol: remaining[0],
            declared_len: len,
            available: remaining.len(),
        }));
    }
    Ok((IpNumber(remaining[0]), len))
}

/// Process the TLV options of a hop-by-hop or destination options
/// header. `base_offset` is the offset of `options` within the walked
/// slice (used for parameter problem pointers).
fn check_options(options: &[u8], base_offset: usize) -> Result<(), Ipv6ExtFailure> {
    use Ipv6ExtFailure::*;

    let mut i = 0usize;
    while i < options.len() {
        match options[i] {
            // Pad1
            0 => i += 1,
            // PadN
            1 => {
                if i + 1 >= options.len() {
                    return Err(Malformed(HeaderError::ExtHeaderLengthTooBig {
                        protocol: 0,
                        declared_len: i + 2,
                        available: options.len(),
                    }));
                }
                i += 2 + usize::from(options[i + 1]);
            }
            option_type => {
                // dispatch on the two high action bits
                match option_type >> 6 {
                    // skip over
                    0b00 => {
                        if i + 1 >= options.len() {
                            return Err(Malformed(HeaderError::ExtHeaderLengthTooBig {
                                protocol: 0,
                                declared_len: i + 2,
                                available: options.len(),
                            }));
                        }
                        i += 2 + usize::from(options[i + 1]);
                    }
                    // discard silently
                    0b01 => {
                        return Err(UnrecognizedOption {
                            pointer: base_offset + i,
                            send_icmp: false,
                            suppress_if_multicast: false,
                        })
                    }
                    // discard, send parameter problem
                    0b10 => {
                        return Err(UnrecognizedOption {
                            pointer: base_offset + i,
                            send_icmp: true,
                            suppress_if_multicast: false,
                        })
                    }
                    // discard, send parameter problem unless multicast
                    _ => {
                        return Err(UnrecognizedOption {
                            pointer: base_offset + i,
                            send_icmp: true,
                            suppress_if_multicast: true,
                        })
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use assert_matches::assert_matches;

    /// Build an options header (next_header, ext len in 8 byte units - 1,
    /// then options padded with PadN).
    fn options_header(next_header: u8, options: &[u8]) -> Vec<u8> {
        let content_len = 2 + options.len();
        let padded_len = content_len.div_ceil(8) * 8;
        let mut bytes = Vec::new();
        bytes.push(next_header);
        bytes.push((padded_len / 8 - 1) as u8);
        bytes.extend_from_slice(options);
        // pad with PadN
        let pad = padded_len - content_len;
        if pad == 1 {
            bytes.push(0);
        } else if pad > 1 {
            bytes.push(1);
            bytes.push((pad - 2) as u8);
            bytes.resize(padded_len, 0);
        }
        bytes
    }

    #[test]
    fn no_extensions() {
        let summary = walk_ipv6_extensions(IpNumber::TCP, &[]).unwrap();
        assert_eq!(summary.payload_protocol, IpNumber::TCP);
        assert_eq!(summary.payload_offset, 0);
        assert!(summary.fragment.is_none());
    }

    #[test]
    fn hop_by_hop_then_payload() {
        let bytes = options_header(IpNumber::UDP.0, &[]);
        let summary = walk_ipv6_extensions(IpNumber::IPV6_HOP_BY_HOP, &bytes).unwrap();
        assert_eq!(summary.payload_protocol, IpNumber::UDP);
        assert_eq!(summary.payload_offset, 8);
    }

    #[test]
    fn hop_by_hop_not_first_is_rejected() {
        // destination options followed by hop-by-hop
        let mut bytes = options_header(IpNumber::IPV6_HOP_BY_HOP.0, &[]);
        bytes.extend_from_slice(&options_header(IpNumber::UDP.0, &[]));
        assert_matches!(
            walk_ipv6_extensions(IpNumber::IPV6_DEST_OPTIONS, &bytes),
            Err(Ipv6ExtFailure::Malformed(HeaderError::HopByHopNotAtStart))
        );
    }

    #[test]
    fn fragment_header_is_reported() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            &Ipv6FragmentHeader {
                next_header: IpNumber::UDP,
                fragment_offset: 1480,
                more_fragments: true,
                identification: 7,
            }
            .to_bytes(),
        );
        bytes.extend_from_slice(&[0xab; 16]);
        let summary = walk_ipv6_extensions(IpNumber::IPV6_FRAG, &bytes).unwrap();
        assert_eq!(summary.payload_protocol, IpNumber::UDP);
        assert_eq!(summary.payload_offset, 8);
        let (frag, frag_payload_offset) = summary.fragment.unwrap();
        assert_eq!(frag.identification, 7);
        assert_eq!(frag_payload_offset, 8);
    }

    #[test]
    fn unknown_option_action_bits() {
        // action 00 -> skipped
        {
            let bytes = options_header(IpNumber::UDP.0, &[0x02, 0x00]);
            assert!(walk_ipv6_extensions(IpNumber::IPV6_HOP_BY_HOP, &bytes).is_ok());
        }
        // action 01 -> silent discard
        {
            let bytes = options_header(IpNumber::UDP.0, &[0x42, 0x00]);
            assert_matches!(
                walk_ipv6_extensions(IpNumber::IPV6_HOP_BY_HOP, &bytes),
                Err(Ipv6ExtFailure::UnrecognizedOption {
                    send_icmp: false,
                    ..
                })
            );
        }
        // action 10 -> discard + icmp
        {
            let bytes = options_header(IpNumber::UDP.0, &[0x82, 0x00]);
            assert_matches!(
                walk_ipv6_extensions(IpNumber::IPV6_HOP_BY_HOP, &bytes),
                Err(Ipv6ExtFailure::UnrecognizedOption {
                    send_icmp: true,
                    suppress_if_multicast: false,
                    ..
                })
            );
        }
        // action 11 -> discard + icmp unless multicast
        {
            let bytes = options_header(IpNumber::UDP.0, &[0xc2, 0x00]);
            assert_matches!(
                walk_ipv6_extensions(IpNumber::IPV6_HOP_BY_HOP, &bytes),
                Err(Ipv6ExtFailure::UnrecognizedOption {
                    send_icmp: true,
                    suppress_if_multicast: true,
                    ..
                })
            );
        }
    }

    #[test]
    fn routing_with_segments_left_triggers_param_problem() {
        let mut bytes = options_header(IpNumber::UDP.0, &[0, 0]);
        bytes[2] = 0; // routing type
        bytes[3] = 1; // segments left
        assert_matches!(
            walk_ipv6_extensions(IpNumber::IPV6_ROUTE, &bytes),
            Err(Ipv6ExtFailure::UnrecognizedOption {
                pointer: 2,
                send_icmp: true,
                suppress_if_multicast: false,
            })
        );
    }

    #[test]
    fn truncated_extension_is_malformed() {
        let bytes = [IpNumber::UDP.0, 3, 0, 0, 0, 0, 0, 0]; // claims 32 bytes
        assert_matches!(
            walk_ipv6_extensions(IpNumber::IPV6_DEST_OPTIONS, &bytes),
            Err(Ipv6ExtFailure::Malformed(
                HeaderError::ExtHeaderLengthTooBig { .. }
            ))
        );
    }
}
