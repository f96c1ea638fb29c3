//! The TCP transmit pipeline: `tcp_output` drains the unsent queue
//! subject to the send window, Nagle and silly-window avoidance;
//! the builders here also serve retransmission, probes, pure ACKs
//! and RSTs.

use alloc::vec::Vec;

use crate::addr::IpAddr;
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::stack::Stack;
use crate::tcp::{SeqNum, TcbId, TcpState};
use crate::transport::{TcpHeader, TcpOptionElement, TcpOptions};
use crate::IpNumber;

/// Zero-window probe intervals per backoff step (milliseconds).
const PERSIST_BACKOFF_MS: [u32; 7] = [1500, 3000, 6000, 12_000, 24_000, 48_000, 60_000];

pub(crate) fn persist_interval_ms(backoff: u8) -> u32 {
    let index = usize::from(backoff.saturating_sub(1)).min(PERSIST_BACKOFF_MS.len() - 1);
    PERSIST_BACKOFF_MS[index]
}

/// Window scale shift needed to announce `wnd` in 16 bits.
pub(crate) fn scale_shift_for(wnd: u32) -> u8 {
    let mut shift = 0u8;
    while shift < 14 && (wnd >> shift) > 0xffff {
        shift += 1;
    }
    shift
}

enum Decision {
    Send,
    StartPersist,
    Stop,
}

impl Stack {
    /// Drain the unsent queue as far as the windows and the sender
    /// side algorithms allow, then flush a pending forced ACK.
    pub(crate) fn tcp_output(&mut self, id: TcbId) -> Result<(), StackError> {
        let mut sent_any = false;
        loop {
            let decision = {
                let Some(tcb) = self.tcbs.get(id) else {
                    return Err(StackError::Argument);
                };
                match tcb.unsent.front() {
                    None => Decision::Stop,
                    Some(seg) => {
                        let mss = u32::from(tcb.mss);
                        let payload_len = seg.payload.tot_len() as u32;
                        if tcb.snd_wnd == 0
                            && tcb.unacked.is_empty()
                            && tcb.persist_backoff == 0
                            && payload_len > 0
                        {
                            Decision::StartPersist
                        } else if seg.end_seq().diff(tcb.snd_una).max(0) as u32
                            > tcb.effective_send_window()
                        {
                            // send window full
                            Decision::Stop
                        } else if payload_len > 0 && payload_len < mss && !seg.psh && !seg.fin {
                            // sub-mss data segment: Nagle first, then
                            // silly window avoidance
                            let nagle_allows = tcb.nagle_disabled || tcb.unacked.is_empty();
                            let sws_allows = tcb.unsent.len() == 1 || tcb.snd_wnd >= mss;
                            if nagle_allows && sws_allows {
                                Decision::Send
                            } else {
                                Decision::Stop
                            }
                        } else {
                            Decision::Send
                        }
                    }
                }
            };

            match decision {
                Decision::Stop => break,
                Decision::StartPersist => {
                    let tcb = self.tcbs.get_mut(id).expect("checked");
                    tcb.persist_backoff = 1;
                    tcb.persist_timer_ms = persist_interval_ms(1);
                    break;
                }
                Decision::Send => {
                    self.tcp_send_unsent_head(id)?;
                    sent_any = true;
                }
            }
        }

        let force_ack = self.tcbs.get(id).map(|tcb| tcb.ack_now).unwrap_or(false);
        if force_ack && !sent_any {
            self.tcp_send_empty_ack(id)?;
        }
        Ok(())
    }

    /// Move the head of the unsent queue to the wire and onto the
    /// unacked queue.
    fn tcp_send_unsent_head(&mut self, id: TcbId) -> Result<(), StackError> {
        let now = self.now;
        let (seq, payload, syn, fin, psh) = {
            let tcb = self.tcbs.get_mut(id).expect("caller checked");
            let mut seg = tcb.unsent.pop_front().expect("caller checked");
            if seg.first_tx.is_none() {
                seg.first_tx = Some(now);
            }
            let parts = (
                seg.seq,
                seg.payload.clone(),
                seg.syn,
                seg.fin,
                seg.psh,
            );
            let end = seg.end_seq();
            if end.gt(tcb.snd_nxt) {
                tcb.snd_nxt = end;
            }
            if end.gt(tcb.snd_max) {
                tcb.snd_max = end;
            }
            tcb.arm_rtx_timer();
            tcb.unacked.push_back(seg);
            parts
        };
        self.tcp_transmit(id, seq, payload, syn, fin, psh)
    }

    /// Build the header for one segment of this endpoint and ship it
    /// through the IP layer. ACK and window reflect the live receive
    /// state.
    pub(crate) fn tcp_transmit(
        &mut self,
        id: TcbId,
        seq: SeqNum,
        payload: Buf,
        syn: bool,
        fin: bool,
        psh: bool,
    ) -> Result<(), StackError> {
        let (header, local, remote) = {
            let mtu_mss = {
                let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
                match tcb.netif {
                    Some(netif) => self.tcp_mss_for(netif, matches!(tcb.remote_ip, IpAddr::V6(_))),
                    None => self.cfg.tcp_mss,
                }
            };
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;

            // the very first SYN of an active open carries no ACK
            let ack_flag = !(syn && tcb.state == TcpState::SynSent);
            let ann_wnd = tcb.announced_window();
            let shift = if syn { 0 } else { u32::from(tcb.rcv_scale) };
            let wnd_field = (ann_wnd >> shift).min(0xffff) as u16;

            let mut header = TcpHeader::new(tcb.local_port, tcb.remote_port, seq.0, wnd_field);
            header.syn = syn;
            header.fin = fin;
            header.psh = psh || payload.push;
            header.ack = ack_flag;
            if ack_flag {
                header.acknowledgment_number = tcb.rcv_nxt.0;
            }
            if syn {
                let mut elements = Vec::new();
                elements.push(TcpOptionElement::MaximumSegmentSize(mtu_mss));
                if tcb.rcv_scale > 0 {
                    elements.push(TcpOptionElement::WindowScale(tcb.rcv_scale));
                    elements.push(TcpOptionElement::Noop);
                }
                elements.push(TcpOptionElement::SelectiveAcknowledgementPermitted);
                header.options =
                    TcpOptions::from_elements(&elements).expect("fixed options fit");
            }
            tcb.ack_now = false;
            tcb.ack_delayed = false;
            tcb.data_segs_since_ack = 0;
            (header, tcb.local_ip, tcb.remote_ip)
        };

        self.stats.tcp_tx += 1;
        self.tcp_ship(header, payload, local, remote)
    }

    /// Checksum and transmit an assembled header + payload.
    fn tcp_ship(
        &mut self,
        mut header: TcpHeader,
        payload: Buf,
        local: IpAddr,
        remote: IpAddr,
    ) -> Result<(), StackError> {
        let data = payload.to_vec();
        match (local, remote) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                header.checksum = header.calc_checksum_ipv4(src.octets(), dst.octets(), &data);
                let packet = Self::tcp_packet(&header, &data);
                self.ipv4_output(
                    packet,
                    Some(src),
                    dst,
                    self.cfg.ip_default_ttl,
                    0,
                    IpNumber::TCP,
                )
            }
            (IpAddr::V6(src), IpAddr::V6(dst)) => {
                header.checksum = header.calc_checksum_ipv6(src.octets(), dst.octets(), &data);
                let packet = Self::tcp_packet(&header, &data);
                self.ipv6_output(packet, Some(src), dst, self.cfg.ip_default_ttl, IpNumber::TCP)
            }
            _ => Err(StackError::Argument),
        }
    }

    fn tcp_packet(header: &TcpHeader, data: &[u8]) -> Buf {
        let bytes = header.to_bytes();
        let mut packet = Buf::alloc_heap(Headroom::Ip, bytes.len() + data.len());
        packet
            .copy_from_slice(0, &bytes)
            .expect("sized allocation");
        packet
            .copy_from_slice(bytes.len(), data)
            .expect("sized allocation");
        packet
    }

    /// An empty ACK segment; clears every pending-ACK flag.
    pub(crate) fn tcp_send_empty_ack(&mut self, id: TcbId) -> Result<(), StackError> {
        let seq = self
            .tcbs
            .get(id)
            .ok_or(StackError::Argument)?
            .snd_nxt;
        self.tcp_transmit(id, seq, Buf::empty(), false, false, false)
    }

    /// A zero-window probe: one byte past the usable window.
    pub(crate) fn tcp_send_persist_probe(&mut self, id: TcbId) -> Result<(), StackError> {
        let (seq, byte) = {
            let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
            let byte = tcb
                .unsent
                .front()
                .and_then(|seg| seg.payload.read_u8_at(0));
            (tcb.snd_nxt, byte)
        };
        let payload = match byte {
            Some(byte) => {
                let mut payload = Buf::alloc_heap(Headroom::Transport, 1);
                payload.copy_from_slice(0, &[byte]).expect("one byte");
                payload
            }
            None => Buf::empty(),
        };
        self.tcp_transmit(id, seq, payload, false, false, false)
    }

    /// A keepalive probe (sequence number one below the next to keep
    /// it outside the window, forcing an ACK).
    pub(crate) fn tcp_send_keepalive_probe(&mut self, id: TcbId) -> Result<(), StackError> {
        let seq = self
            .tcbs
            .get(id)
            .ok_or(StackError::Argument)?
            .snd_nxt
            .sub(1);
        self.tcp_transmit(id, seq, Buf::empty(), false, false, false)
    }

    /// A RST not tied to any endpoint (closed ports, half-open
    /// cleanups).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn tcp_send_rst(
        &mut self,
        local: IpAddr,
        local_port: u16,
        remote: IpAddr,
        remote_port: u16,
        seq: SeqNum,
        ack: SeqNum,
        ack_flag: bool,
    ) {
        let mut header = TcpHeader::new(local_port, remote_port, seq.0, 0);
        header.rst = true;
        header.ack = ack_flag;
        if ack_flag {
            header.acknowledgment_number = ack.0;
        }
        self.stats.tcp_rst_tx += 1;
        self.stats.tcp_tx += 1;
        let _ = self.tcp_ship(header, Buf::empty(), local, remote);
    }

    /// Retransmit the head of the unacked queue (fast retransmit and
    /// RTO share this).
    pub(crate) fn tcp_retransmit_head(&mut self, id: TcbId) -> Result<(), StackError> {
        let parts = {
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
            tcb.unacked.front_mut().map(|seg| {
                seg.retransmitted = true;
                (
                    seg.seq,
                    seg.payload.clone(),
                    seg.syn,
                    seg.fin,
                    seg.psh,
                )
            })
        };
        match parts {
            Some((seq, payload, syn, fin, psh)) => {
                self.stats.tcp_retransmits += 1;
                self.tcp_transmit(id, seq, payload, syn, fin, psh)
            }
            None => Ok(()),
        }
    }
}
