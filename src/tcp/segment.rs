use crate::buf::Buf;
use crate::tcp::SeqNum;
use crate::time::Instant;

/// One queued TCP segment: the payload chain plus everything needed to
/// (re)build its header at transmit time.
///
/// Sent segments stay on the unacked queue until cumulatively
/// acknowledged; the first-send stamp feeds RTT sampling unless the
/// segment was retransmitted (Karn's rule).
#[derive(Debug)]
pub struct TcpSegment {
    /// Sequence number of the first byte (or of the SYN).
    pub seq: SeqNum,
    /// Payload bytes (no header).
    pub payload: Buf,
    pub syn: bool,
    pub fin: bool,
    pub psh: bool,
    /// When this segment was first transmitted.
    pub first_tx: Option<Instant>,
    /// True once retransmitted; excluded from RTT sampling.
    pub retransmitted: bool,
}

impl TcpSegment {
    /// A data segment.
    pub fn data(seq: SeqNum, payload: Buf, psh: bool) -> TcpSegment {
        TcpSegment {
            seq,
            payload,
            syn: false,
            fin: false,
            psh,
            first_tx: None,
            retransmitted: false,
        }
    }

    /// Length in sequence space: payload bytes plus the SYN/FIN
    /// phantom octets.
    #[inline]
    pub fn seq_len(&self) -> u32 {
        self.payload.tot_len() as u32 + u32::from(self.syn) + u32::from(self.fin)
    }

    /// Sequence number just past this segment.
    #[inline]
    pub fn end_seq(&self) -> SeqNum {
        self.seq.add(self.seq_len())
    }

    /// True if the whole segment is acknowledged by `ack`.
    #[inline]
    pub fn acked_by(&self, ack: SeqNum) -> bool {
        self.end_seq().le(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_len_counts_phantoms() {
        let mut seg = TcpSegment::data(SeqNum(100), Buf::from_static(b"hello"), false);
        assert_eq!(seg.seq_len(), 5);
        assert_eq!(seg.end_seq(), SeqNum(105));
        seg.fin = true;
        assert_eq!(seg.seq_len(), 6);
        seg.syn = true;
        assert_eq!(seg.seq_len(), 7);
    }

    #[test]
    fn acked_by_is_cumulative() {
        let seg = TcpSegment::data(SeqNum(100), Buf::from_static(b"hello"), false);
        assert_eq!(false, seg.acked_by(SeqNum(104)));
        assert!(seg.acked_by(SeqNum(105)));
        assert!(seg.acked_by(SeqNum(200)));
    }

    #[test]
    fn empty_syn_segment() {
        let seg = TcpSegment {
            seq: SeqNum(0xffff_ffff),
            payload: Buf::empty(),
            syn: true,
            fin: false,
            psh: false,
            first_tx: None,
            retransmitted: false,
        };
        assert_eq!(seg.seq_len(), 1);
        // wraps
        assert_eq!(seg.end_seq(), SeqNum(0));
    }
}
