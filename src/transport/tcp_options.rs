use arrayvec::ArrayVec;

/// Module containing the constants for tcp options (id number + sizes).
pub mod tcp_option {
    /// End of options list.
    pub const KIND_END: u8 = 0;
    /// No operation (padding).
    pub const KIND_NOOP: u8 = 1;
    /// Maximum segment size.
    pub const KIND_MAXIMUM_SEGMENT_SIZE: u8 = 2;
    /// Window scale (RFC 7323).
    pub const KIND_WINDOW_SCALE: u8 = 3;
    /// SACK permitted (RFC 2018).
    pub const KIND_SELECTIVE_ACK_PERMITTED: u8 = 4;
    /// SACK blocks (RFC 2018).
    pub const KIND_SELECTIVE_ACK: u8 = 5;
    /// Timestamps (RFC 7323).
    pub const KIND_TIMESTAMP: u8 = 8;

    pub const LEN_MAXIMUM_SEGMENT_SIZE: u8 = 4;
    pub const LEN_WINDOW_SCALE: u8 = 3;
    pub const LEN_SELECTIVE_ACK_PERMITTED: u8 = 2;
    pub const LEN_TIMESTAMP: u8 = 10;
}

/// A single known TCP option.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TcpOptionElement {
    /// No operation (used for padding between options).
    Noop,
    /// Largest segment the sender of the option is willing to receive.
    MaximumSegmentSize(u16),
    /// Window scale shift count (RFC 7323).
    WindowScale(u8),
    /// The sender supports selective acknowledgements (RFC 2018).
    SelectiveAcknowledgementPermitted,
    /// Up to four sack blocks (RFC 2018). The first block is always
    /// present, the other three are optional.
    SelectiveAcknowledgement((u32, u32), [Option<(u32, u32)>; 3]),
    /// Timestamp value + echo reply (RFC 7323).
    Timestamp(u32, u32),
}

/// Error when not enough space is available in a TCP header to store
/// the requested options.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TcpOptionWriteError {
    /// Number of bytes that would have been needed.
    pub required_len: usize,
}

impl core::fmt::Display for TcpOptionWriteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "TCP Option Write Error: {} byte(s) of options do not fit in the 40 bytes of option space of a TCP header.",
            self.required_len
        )
    }
}

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
impl std::error::Error for TcpOptionWriteError {}

/// Options of a TCP header (0 to 40 bytes, multiple of 4).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TcpOptions {
    buffer: ArrayVec<u8, 40>,
}

impl TcpOptions {
    /// Maximum number of option bytes a TCP header can carry.
    pub const MAX_LEN: usize = 40;

    /// Options from raw bytes (padded to a multiple of 4 with
    /// end-of-list bytes).
    pub fn from_raw(data: &[u8]) -> Result<TcpOptions, TcpOptionWriteError> {
        if data.len() > TcpOptions::MAX_LEN {
            return Err(TcpOptionWriteError {
                required_len: data.len(),
            });
        }
        let mut buffer = ArrayVec::new();
        let _ = buffer.try_extend_from_slice(data);
        while buffer.len() % 4 != 0 {
            buffer.push(tcp_option::KIND_END);
        }
        Ok(TcpOptions { buffer })
    }

    /// Serialize the given option elements.
    pub fn from_elements(
        elements: &[TcpOptionElement],
    ) -> Result<TcpOptions, TcpOptionWriteError> {
        use tcp_option::*;
        use TcpOptionElement::*;

        let required_len = elements.iter().fold(0usize, |acc, element| {
            acc + match element {
                Noop => 1,
                MaximumSegmentSize(_) => usize::from(LEN_MAXIMUM_SEGMENT_SIZE),
                WindowScale(_) => usize::from(LEN_WINDOW_SCALE),
                SelectiveAcknowledgementPermitted => usize::from(LEN_SELECTIVE_ACK_PERMITTED),
                SelectiveAcknowledgement(_, rest) => {
                    rest.iter().fold(10, |acc2, block| match block {
                        None => acc2,
                        Some(_) => acc2 + 8,
                    })
                }
                Timestamp(_, _) => usize::from(LEN_TIMESTAMP),
            }
        });
        if required_len > TcpOptions::MAX_LEN {
            return Err(TcpOptionWriteError { required_len });
        }

        let mut buffer: ArrayVec<u8, 40> = ArrayVec::new();
        for element in elements {
            match element {
                Noop => buffer.push(KIND_NOOP),
                MaximumSegmentSize(mss) => {
                    buffer.push(KIND_MAXIMUM_SEGMENT_SIZE);
                    buffer.push(LEN_MAXIMUM_SEGMENT_SIZE);
                    let _ = buffer.try_extend_from_slice(&mss.to_be_bytes());
                }
                WindowScale(shift) => {
                    buffer.push(KIND_WINDOW_SCALE);
                    buffer.push(LEN_WINDOW_SCALE);
                    buffer.push(*shift);
                }
                SelectiveAcknowledgementPermitted => {
                    buffer.push(KIND_SELECTIVE_ACK_PERMITTED);
                    buffer.push(LEN_SELECTIVE_ACK_PERMITTED);
                }
                SelectiveAcknowledgement(first, rest) => {
                    let block_count = 1 + rest.iter().filter(|block| block.is_some()).count();
                    buffer.push(KIND_SELECTIVE_ACK);
                    buffer.push(2 + 8 * block_count as u8);
                    let _ = buffer.try_extend_from_slice(&first.0.to_be_bytes());
                    let _ = buffer.try_extend_from_slice(&first.1.to_be_bytes());
                    for (start, end) in rest.iter().flatten() {
                        let _ = buffer.try_extend_from_slice(&start.to_be_bytes());
                        let _ = buffer.try_extend_from_slice(&end.to_be_bytes());
                    }
                }
                Timestamp(value, echo) => {
                    buffer.push(KIND_TIMESTAMP);
                    buffer.push(LEN_TIMESTAMP);
                    let _ = buffer.try_extend_from_slice(&value.to_be_bytes());
                    let _ = buffer.try_extend_from_slice(&echo.to_be_bytes());
                }
            }
        }
        while buffer.len() % 4 != 0 {
            buffer.push(KIND_END);
        }
        Ok(TcpOptions { buffer })
    }

    /// Raw option bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Length of the options in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if no options are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns an iterator over all known options.
    pub fn elements_iter(&self) -> TcpOptionsIterator<'_> {
        TcpOptionsIterator {
            options: &self.buffer,
        }
    }
}

/// Iterator over the known options of a TCP header. Unknown options
/// are skipped via their length byte; malformed trailers end the
/// iteration.
#[derive(Clone, Debug)]
pub struct TcpOptionsIterator<'a> {
    options: &'a [u8],
}

impl<'a> TcpOptionsIterator<'a> {
    pub fn new(options: &'a [u8]) -> TcpOptionsIterator<'a> {
        TcpOptionsIterator { options }
    }
}

impl<'a> Iterator for TcpOptionsIterator<'a> {
    type Item = TcpOptionElement;

    fn next(&mut self) -> Option<TcpOptionElement> {
        use tcp_option::*;
        use TcpOptionElement::*;

        loop {
            if self.options.is_empty() {
                return None;
            }
            match self.options[0] {
                KIND_END => {
                    self.options = &[];
                    return None;
                }
                KIND_NOOP => {
                    self.options = &self.options[1..];
                    return Some(Noop);
                }
                kind => {
                    if self.options.len() < 2 {
                        self.options = &[];
                        return None;
                    }
                    let len = usize::from(self.options[1]);
                    if len < 2 || self.options.len() < len {
                        self.options = &[];
                        return None;
                    }
                    let body = &self.options[..len];
                    self.options = &self.options[len..];
                    match kind {
                        KIND_MAXIMUM_SEGMENT_SIZE if len == 4 => {
                            return Some(MaximumSegmentSize(u16::from_be_bytes([
                                body[2], body[3],
                            ])));
                        }
                        KIND_WINDOW_SCALE if len == 3 => {
                            return Some(WindowScale(body[2]));
                        }
                        KIND_SELECTIVE_ACK_PERMITTED if len == 2 => {
                            return Some(SelectiveAcknowledgementPermitted);
                        }
                        KIND_SELECTIVE_ACK if len >= 10 && (len - 2) % 8 == 0 => {
                            let read_block = |offset: usize| -> (u32, u32) {
                                (
                                    u32::from_be_bytes([
                                        body[offset],
                                        body[offset + 1],
                                        body[offset + 2],
                                        body[offset + 3],
                                    ]),
                                    u32::from_be_bytes([
                                        body[offset + 4],
                                        body[offset + 5],
                                        body[offset + 6],
                                        body[offset + 7],
                                    ]),
                                )
                            };
                            let first = read_block(2);
                            let mut rest = [None, None, None];
                            let block_count = ((len - 2) / 8).min(4);
                            for (i, slot) in rest.iter_mut().take(block_count - 1).enumerate() {
                                *slot = Some(read_block(2 + 8 * (i + 1)));
                            }
                            return Some(SelectiveAcknowledgement(first, rest));
                        }
                        KIND_TIMESTAMP if len == 10 => {
                            return Some(Timestamp(
                                u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                                u32::from_be_bytes([body[6], body[7], body[8], body[9]]),
                            ));
                        }
                        // unknown or badly sized option, skip it
                        _ => continue,
                    }
                }
            }
        }
    }
}
