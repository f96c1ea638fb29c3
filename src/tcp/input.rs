//! TCP segment input processing: lookup, acceptability, ACK and data
//! handling, the state machine transitions.

use alloc::collections::VecDeque;

use crate::addr::IpAddr;
use crate::buf::Buf;
use crate::err::StackError;
use crate::iface::NetifId;
use crate::stack::Stack;
use crate::tcp::{SeqNum, Tcb, TcbId, TcpSegment, TcpState};
use crate::transport::{TcpHeader, TcpOptionElement};

/// A parsed inbound segment.
struct SegIn {
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
    seq: SeqNum,
    ack: SeqNum,
    wnd_raw: u16,
    syn: bool,
    fin: bool,
    rst: bool,
    psh: bool,
    has_ack: bool,
    /// Peer options (SYN segments only).
    mss: Option<u16>,
    wscale: Option<u8>,
    sack_permitted: bool,
    payload: Buf,
}

impl SegIn {
    /// Length in sequence space.
    fn seq_len(&self) -> u32 {
        self.payload.tot_len() as u32 + u32::from(self.syn) + u32::from(self.fin)
    }
}

impl Stack {
    /// Entry point for one received TCP segment (IP header already
    /// stripped and trimmed).
    pub(crate) fn tcp_input(&mut self, mut packet: Buf, netif: NetifId, src: IpAddr, dst: IpAddr) {
        self.stats.tcp_rx += 1;

        let header = {
            let Ok(head) = packet.pullup(TcpHeader::MIN_LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            let data_offset = usize::from(head[12] >> 4) * 4;
            let Ok(head) = packet.pullup(data_offset.max(TcpHeader::MIN_LEN)) else {
                self.stats.rx_dropped += 1;
                return;
            };
            match TcpHeader::from_slice(head) {
                Ok((header, _)) => header,
                Err(err) => {
                    log::trace!("tcp: dropping malformed header: {err}");
                    self.stats.rx_dropped += 1;
                    return;
                }
            }
        };

        // checksum over pseudo header + entire segment
        let flat = packet.to_vec();
        let checksum_ok = match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => {
                crate::checksum::Sum16BitWords::new()
                    .add_4bytes(s.octets())
                    .add_4bytes(d.octets())
                    .add_2bytes([0, crate::IpNumber::TCP.0])
                    .add_2bytes((flat.len() as u16).to_be_bytes())
                    .add_slice(&flat)
                    .ones_complement()
                    == 0
            }
            (IpAddr::V6(s), IpAddr::V6(d)) => {
                crate::checksum::Sum16BitWords::new()
                    .add_16bytes(s.octets())
                    .add_16bytes(d.octets())
                    .add_4bytes((flat.len() as u32).to_be_bytes())
                    .add_2bytes([0, crate::IpNumber::TCP.0])
                    .add_slice(&flat)
                    .ones_complement()
                    == 0
            }
            _ => false,
        };
        if !checksum_ok {
            self.stats.tcp_checksum_errors += 1;
            return;
        }

        packet
            .header_adjust_force(-(header.header_len() as i32))
            .expect("header present");

        let mut seg = SegIn {
            src,
            dst,
            src_port: header.source_port,
            dst_port: header.destination_port,
            seq: SeqNum(header.sequence_number),
            ack: SeqNum(header.acknowledgment_number),
            wnd_raw: header.window_size,
            syn: header.syn,
            fin: header.fin,
            rst: header.rst,
            psh: header.psh,
            has_ack: header.ack,
            mss: None,
            wscale: None,
            sack_permitted: false,
            payload: packet,
        };
        if header.syn {
            for option in header.options.elements_iter() {
                match option {
                    TcpOptionElement::MaximumSegmentSize(mss) => seg.mss = Some(mss),
                    TcpOptionElement::WindowScale(shift) => seg.wscale = Some(shift.min(14)),
                    TcpOptionElement::SelectiveAcknowledgementPermitted => {
                        seg.sack_permitted = true
                    }
                    _ => {}
                }
            }
        }

        if let Some(id) = self.tcp_find_active(dst, seg.dst_port, src, seg.src_port) {
            self.tcp_process(id, seg);
        } else if let Some(id) = self.tcp_find_time_wait(dst, seg.dst_port, src, seg.src_port) {
            self.tcp_time_wait_input(id, seg);
        } else if seg.syn && !seg.has_ack && !seg.rst {
            match self.tcp_find_listen(dst, seg.dst_port) {
                Some(listener) => self.tcp_listen_input(listener, seg, netif),
                None => self.tcp_reset_for(&seg),
            }
        } else if !seg.rst {
            self.tcp_reset_for(&seg);
        }
    }

    /// RST in response to a segment that matched no endpoint
    /// (RFC 793, "if the state is CLOSED").
    fn tcp_reset_for(&mut self, seg: &SegIn) {
        if seg.has_ack {
            self.tcp_send_rst(
                seg.dst,
                seg.dst_port,
                seg.src,
                seg.src_port,
                seg.ack,
                SeqNum(0),
                false,
            );
        } else {
            self.tcp_send_rst(
                seg.dst,
                seg.dst_port,
                seg.src,
                seg.src_port,
                SeqNum(0),
                seg.seq.add(seg.seq_len()),
                true,
            );
        }
    }

    /// SYN for a listener: create the half-open child and answer
    /// SYN+ACK.
    fn tcp_listen_input(&mut self, listener: TcbId, seg: SegIn, netif: NetifId) {
        let (mss_cap, wnd, snd_buf) = (
            self.tcp_mss_for(netif, matches!(seg.src, IpAddr::V6(_))),
            self.cfg.tcp_wnd,
            self.cfg.tcp_snd_buf,
        );
        let iss = SeqNum(self.rng.next_u32());
        let now = self.now;

        let mut child = Tcb::new(wnd, snd_buf, mss_cap);
        child.local_ip = seg.dst;
        child.local_port = seg.dst_port;
        child.remote_ip = seg.src;
        child.remote_port = seg.src_port;
        child.netif = Some(netif);
        child.state = TcpState::SynRcvd;
        child.listen_backref = Some(listener);
        child.last_activity = now;
        child.mss = match seg.mss {
            Some(peer_mss) => mss_cap.min(peer_mss.max(64)),
            None => 536.min(mss_cap),
        };
        child.cwnd = u32::from(child.mss);
        child.sack_permitted = seg.sack_permitted;
        if let Some(peer_shift) = seg.wscale {
            child.snd_scale = peer_shift;
            child.rcv_scale = crate::tcp::output::scale_shift_for(wnd);
        }
        child.rcv_nxt = seg.seq.add(1);
        child.rcv_ann_right_edge = child.rcv_nxt;
        child.snd_una = iss;
        child.snd_nxt = iss;
        child.snd_max = iss;
        child.snd_lbb = iss.add(1);
        child.snd_wnd = u32::from(seg.wnd_raw);
        child.snd_wl1 = seg.seq;
        child.snd_wl2 = iss;
        child.unsent.push_back(TcpSegment {
            seq: iss,
            payload: Buf::empty(),
            syn: true,
            fin: false,
            psh: false,
            first_tx: None,
            retransmitted: false,
        });

        let Some(id) = self.tcbs.acquire(child) else {
            // endpoint pool exhausted: the SYN is silently dropped,
            // the peer will retransmit
            log::debug!("tcp: no endpoint for inbound connection");
            return;
        };
        self.tcp_active.push(id);
        let _ = self.tcp_output(id);
    }

    /// Segment for a fully looked-up active endpoint.
    fn tcp_process(&mut self, id: TcbId, seg: SegIn) {
        if let Some(tcb) = self.tcbs.get_mut(id) {
            tcb.last_activity = self.now;
            tcb.keep_probes_sent = 0;
        }
        let state = match self.tcbs.get(id) {
            Some(tcb) => tcb.state,
            None => return,
        };
        if state == TcpState::SynSent {
            self.tcp_synsent_input(id, seg);
            return;
        }

        // sequence acceptability (RFC 793 page 69 / RFC 5961)
        let acceptable = {
            let tcb = self.tcbs.get(id).expect("present");
            let wnd = tcb.rcv_wnd;
            let len = seg.seq_len();
            match (len, wnd) {
                (0, 0) => seg.seq == tcb.rcv_nxt,
                (0, _) => seg.seq.in_window(tcb.rcv_nxt, wnd),
                (_, 0) => false,
                (_, _) => {
                    seg.seq.in_window(tcb.rcv_nxt, wnd)
                        || seg.seq.add(len - 1).in_window(tcb.rcv_nxt, wnd)
                }
            }
        };
        if !acceptable {
            if !seg.rst {
                if let Some(tcb) = self.tcbs.get_mut(id) {
                    tcb.ack_now = true;
                }
                let _ = self.tcp_send_empty_ack(id);
            }
            return;
        }

        // RST: exact match aborts, in-window elicits a challenge ACK
        // (RFC 5961, section 3.2)
        if seg.rst {
            let at_rcv_nxt = self.tcbs.get(id).expect("present").rcv_nxt == seg.seq;
            if at_rcv_nxt {
                self.tcp_fire_error(id, StackError::Reset);
            } else {
                let _ = self.tcp_send_empty_ack(id);
            }
            return;
        }

        // SYN on a synchronized connection: reset it
        if seg.syn {
            let (local, lport, remote, rport, snd_nxt, rcv_nxt) = {
                let tcb = self.tcbs.get(id).expect("present");
                (
                    tcb.local_ip,
                    tcb.local_port,
                    tcb.remote_ip,
                    tcb.remote_port,
                    tcb.snd_nxt,
                    tcb.rcv_nxt,
                )
            };
            self.tcp_send_rst(local, lport, remote, rport, snd_nxt, rcv_nxt, true);
            self.tcp_fire_error(id, StackError::Reset);
            return;
        }

        if !seg.has_ack {
            return;
        }
        if !self.tcp_ack_input(id, &seg) {
            return;
        }
        self.tcp_data_input(id, seg);

        // drive the output side: piggybacked ACKs, newly opened
        // window, pending data
        let _ = self.tcp_output(id);
    }

    /// Process the ACK field. Returns false when the segment must not
    /// be processed further (connection gone or segment refused).
    fn tcp_ack_input(&mut self, id: TcbId, seg: &SegIn) -> bool {
        // SYN_RCVD: the handshake completes (or the ACK is bogus)
        let state = self.tcbs.get(id).expect("present").state;
        if state == TcpState::SynRcvd {
            let good = {
                let tcb = self.tcbs.get(id).expect("present");
                seg.ack.gt(tcb.snd_una) && seg.ack.le(tcb.snd_max)
            };
            if !good {
                self.tcp_send_rst(
                    seg.dst,
                    seg.dst_port,
                    seg.src,
                    seg.src_port,
                    seg.ack,
                    SeqNum(0),
                    false,
                );
                return false;
            }
            if let Some(tcb) = self.tcbs.get_mut(id) {
                tcb.state = TcpState::Established;
            }
            self.tcp_fire_accepted(id);
            if self.tcbs.get(id).is_none() {
                return false;
            }
        }

        let now = self.now;
        let mut acked_payload = 0usize;
        {
            let mss;
            let tcb = self.tcbs.get_mut(id).expect("present");

            if seg.ack.gt(tcb.snd_max) {
                // ack of data never sent
                tcb.ack_now = true;
                return false;
            }
            mss = u32::from(tcb.mss);

            if seg.ack == tcb.snd_una {
                // possible duplicate ack (RFC 5681: no data, no
                // window change, data outstanding)
                let same_wnd = (u32::from(seg.wnd_raw) << tcb.snd_scale) == tcb.snd_wnd;
                if !tcb.unacked.is_empty()
                    && seg.seq_len() == 0
                    && same_wnd
                {
                    tcb.dupacks = tcb.dupacks.saturating_add(1);
                    if tcb.dupacks == 3 {
                        // fast retransmit: halve, retransmit, inflate
                        let flight = tcb.flight_size();
                        tcb.ssthresh = (flight / 2).max(2 * mss);
                        tcb.cwnd = tcb.ssthresh + 3 * mss;
                        tcb.fast_recovery = true;
                        drop(tcb);
                        let _ = self.tcp_retransmit_head(id);
                        return true;
                    } else if tcb.dupacks > 3 && tcb.fast_recovery {
                        tcb.cwnd = tcb.cwnd.saturating_add(mss);
                    }
                }
            } else if seg.ack.gt(tcb.snd_una) {
                tcb.dupacks = 0;
                tcb.snd_una = seg.ack;

                // release what is cumulatively acknowledged
                let mut rtt_sample_ms: Option<u32> = None;
                let mut fresh_acked = false;
                while let Some(head) = tcb.unacked.front() {
                    if head.acked_by(seg.ack) {
                        let head = tcb.unacked.pop_front().expect("front exists");
                        acked_payload += head.payload.tot_len();
                        if !head.retransmitted {
                            fresh_acked = true;
                            if let Some(first_tx) = head.first_tx {
                                rtt_sample_ms =
                                    Some((now - first_tx).as_millis() as u32);
                            }
                        }
                    } else {
                        break;
                    }
                }
                // a partially acknowledged head is trimmed in place
                if let Some(head) = tcb.unacked.front_mut() {
                    let overlap = seg.ack.diff(head.seq);
                    if overlap > 0 {
                        let trim = (overlap as usize).min(head.payload.tot_len());
                        let _ = head.payload.header_adjust_force(-(trim as i32));
                        head.seq = head.seq.add(overlap as u32);
                        head.syn = false;
                        acked_payload += trim;
                    }
                }
                if let Some(rtt) = rtt_sample_ms {
                    tcb.rtt_sample(rtt);
                }

                // congestion window: deflate after recovery, otherwise
                // grow per ACK of fresh data. Phantom-only acks (the
                // handshake's) and acks covering only retransmitted
                // segments do not count, the latter per Karn's rule.
                if tcb.fast_recovery {
                    tcb.cwnd = tcb.ssthresh;
                    tcb.fast_recovery = false;
                } else if acked_payload > 0 && fresh_acked {
                    if tcb.cwnd < tcb.ssthresh {
                        // slow start
                        tcb.cwnd += mss;
                    } else {
                        // congestion avoidance
                        tcb.cwnd += (mss * mss / tcb.cwnd).max(1);
                    }
                }

                tcb.snd_buf =
                    (tcb.snd_buf + acked_payload as u32).min(self.cfg.tcp_snd_buf);
                if tcb.unacked.is_empty() {
                    tcb.clear_rtx_timer();
                } else {
                    tcb.nrtx = 0;
                    tcb.rtx_timer_ms = Some(tcb.rto_ms);
                }
            }

            // window update ordering rule (SEG.WL1, SEG.WL2)
            let tcb = self.tcbs.get_mut(id).expect("present");
            if tcb.snd_wl1.lt(seg.seq)
                || (tcb.snd_wl1 == seg.seq && tcb.snd_wl2.le(seg.ack))
            {
                tcb.snd_wnd = u32::from(seg.wnd_raw) << tcb.snd_scale;
                tcb.snd_wl1 = seg.seq;
                tcb.snd_wl2 = seg.ack;
                if tcb.snd_wnd > 0 && tcb.persist_backoff > 0 {
                    tcb.persist_backoff = 0;
                    tcb.persist_timer_ms = 0;
                }
            }
        }

        // closing transitions once our FIN is acknowledged
        let fin_acked = {
            let tcb = self.tcbs.get(id).expect("present");
            tcb.fin_queued && tcb.queues_empty() && tcb.snd_una == tcb.snd_lbb
        };
        let state = self.tcbs.get(id).expect("present").state;
        if fin_acked {
            match state {
                TcpState::FinWait1 => {
                    self.tcbs.get_mut(id).expect("present").state = TcpState::FinWait2;
                }
                TcpState::Closing => {
                    self.tcp_enter_time_wait(id);
                    return false;
                }
                TcpState::LastAck => {
                    // the close we asked for has completed
                    self.tcp_release(id);
                    return false;
                }
                _ => {}
            }
        }

        if acked_payload > 0 {
            self.with_tcp_hooks(id, |hooks, cx| hooks.sent(cx, acked_payload));
            if self.tcbs.get(id).is_none() {
                return false;
            }
        }
        true
    }

    /// In-order delivery, out-of-order queueing and FIN processing.
    fn tcp_data_input(&mut self, id: TcbId, seg: SegIn) {
        let mut payload = seg.payload;
        let mut seq = seg.seq;
        let mut fin = seg.fin;

        // states past the peer's FIN ignore further data
        let state = match self.tcbs.get(id) {
            Some(tcb) => tcb.state,
            None => return,
        };
        if matches!(
            state,
            TcpState::CloseWait | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait
        ) {
            return;
        }

        // trim data below rcv_nxt and beyond the window
        {
            let tcb = self.tcbs.get_mut(id).expect("present");
            let before = tcb.rcv_nxt.diff(seq);
            if before > 0 {
                let trim = (before as usize).min(payload.tot_len());
                let _ = payload.header_adjust_force(-(trim as i32));
                seq = seq.add(before as u32);
                if before as usize > trim {
                    // even the fin is old news
                    fin = false;
                }
            }
            let wnd_right = tcb.rcv_nxt.add(tcb.rcv_wnd);
            let beyond = seq.add(payload.tot_len() as u32).diff(wnd_right);
            if beyond > 0 {
                let keep = payload.tot_len().saturating_sub(beyond as usize);
                let _ = payload.realloc(keep);
                // the fin lies outside the window as well
                fin = false;
            }
        }

        let mut deliveries: VecDeque<Buf> = VecDeque::new();
        let mut fin_reached = false;

        {
            let oos_max_segments = usize::from(self.cfg.tcp_oos_max_segments);
            let oos_max_bytes =
                usize::from(self.cfg.tcp_oos_max_pbufs) * usize::from(self.cfg.tcp_mss);
            let tcb = self.tcbs.get_mut(id).expect("present");

            if seq == tcb.rcv_nxt && (payload.tot_len() > 0 || fin) {
                // in-order: take the data, then whatever the ooseq
                // queue can extend it with
                let len = payload.tot_len();
                tcb.rcv_nxt = tcb.rcv_nxt.add(len as u32);
                tcb.rcv_wnd = tcb.rcv_wnd.saturating_sub(len as u32);
                if len > 0 {
                    payload.push = seg.psh;
                    deliveries.push_back(payload);
                }
                if fin {
                    fin_reached = true;
                    tcb.rcv_nxt = tcb.rcv_nxt.add(1);
                }

                // drain newly contiguous out-of-order segments
                while !fin_reached {
                    match tcb.ooseq.front() {
                        Some(head) if head.seq.le(tcb.rcv_nxt) => {}
                        _ => break,
                    }
                    let mut head = tcb.ooseq.pop_front().expect("peeked");
                    // partially duplicate segments get trimmed
                    let overlap = tcb.rcv_nxt.diff(head.seq);
                    if overlap > 0 {
                        let trim = (overlap as usize).min(head.payload.tot_len());
                        let _ = head.payload.header_adjust_force(-(trim as i32));
                        head.seq = tcb.rcv_nxt;
                    }
                    let len = head.payload.tot_len();
                    tcb.rcv_nxt = tcb.rcv_nxt.add(len as u32);
                    tcb.rcv_wnd = tcb.rcv_wnd.saturating_sub(len as u32);
                    if len > 0 {
                        deliveries.push_back(head.payload);
                    }
                    if head.fin {
                        fin_reached = true;
                        tcb.rcv_nxt = tcb.rcv_nxt.add(1);
                    }
                }

                // stricter delayed-ack reading: any two data segments
                // force an ack, as do pushes and ooseq pressure
                tcb.data_segs_since_ack = tcb.data_segs_since_ack.saturating_add(1);
                if tcb.data_segs_since_ack >= 2 || seg.psh || !tcb.ooseq.is_empty() || fin_reached
                {
                    tcb.ack_now = true;
                } else {
                    tcb.ack_delayed = true;
                }
            } else if payload.tot_len() > 0 || fin {
                // out of order: queue it, force an immediate duplicate
                // ack so the peer can fast-retransmit
                Self::ooseq_insert(
                    tcb,
                    seq,
                    payload,
                    fin,
                    oos_max_segments,
                    oos_max_bytes,
                );
                tcb.ack_now = true;
            }
        }

        // hand the data up; the window reopens via recved()
        let rx_shutdown = self
            .tcbs
            .get(id)
            .map(|tcb| tcb.rx_shutdown)
            .unwrap_or(true);
        for data in deliveries {
            if rx_shutdown {
                // discarded, but window accounting already happened:
                // give it back right away
                let len = data.tot_len();
                let _ = self.tcp_recved(id, len);
                continue;
            }
            self.with_tcp_hooks(id, |hooks, cx| hooks.received(cx, data));
            if self.tcbs.get(id).is_none() {
                return;
            }
        }

        if fin_reached {
            self.tcp_process_fin(id);
        }
    }

    /// The peer's FIN became in-order: walk the close states.
    fn tcp_process_fin(&mut self, id: TcbId) {
        let state = match self.tcbs.get(id) {
            Some(tcb) => tcb.state,
            None => return,
        };
        if let Some(tcb) = self.tcbs.get_mut(id) {
            tcb.ack_now = true;
        }

        let fin_acked = {
            let tcb = self.tcbs.get(id).expect("present");
            tcb.fin_queued && tcb.queues_empty() && tcb.snd_una == tcb.snd_lbb
        };
        match state {
            TcpState::SynRcvd | TcpState::Established => {
                if let Some(tcb) = self.tcbs.get_mut(id) {
                    tcb.state = TcpState::CloseWait;
                }
                self.with_tcp_hooks(id, |hooks, cx| hooks.remote_closed(cx));
            }
            TcpState::FinWait1 => {
                if fin_acked {
                    self.with_tcp_hooks(id, |hooks, cx| hooks.remote_closed(cx));
                    self.tcp_enter_time_wait(id);
                } else if let Some(tcb) = self.tcbs.get_mut(id) {
                    tcb.state = TcpState::Closing;
                }
            }
            TcpState::FinWait2 => {
                self.with_tcp_hooks(id, |hooks, cx| hooks.remote_closed(cx));
                self.tcp_enter_time_wait(id);
            }
            _ => {}
        }
    }

    /// SYN_SENT: only a SYN(+ACK) moves us forward.
    fn tcp_synsent_input(&mut self, id: TcbId, seg: SegIn) {
        let (iss, snd_nxt) = {
            let tcb = self.tcbs.get(id).expect("present");
            (tcb.snd_una, tcb.snd_nxt)
        };
        // iss == snd_una until something is acknowledged
        if seg.has_ack && (seg.ack.le(iss) || seg.ack.gt(snd_nxt.add(1))) {
            if !seg.rst {
                self.tcp_send_rst(
                    seg.dst,
                    seg.dst_port,
                    seg.src,
                    seg.src_port,
                    seg.ack,
                    SeqNum(0),
                    false,
                );
            }
            return;
        }
        if seg.rst {
            if seg.has_ack {
                self.tcp_fire_error(id, StackError::Reset);
            }
            return;
        }
        if !seg.syn {
            return;
        }

        let established = {
            let tcb = self.tcbs.get_mut(id).expect("present");
            tcb.rcv_nxt = seg.seq.add(1);
            tcb.rcv_ann_right_edge = tcb.rcv_nxt;
            if let Some(peer_mss) = seg.mss {
                tcb.mss = tcb.mss.min(peer_mss.max(64));
            }
            match seg.wscale {
                Some(peer_shift) => {
                    tcb.snd_scale = peer_shift;
                    // rcv_scale keeps our offer from the SYN
                }
                None => {
                    tcb.snd_scale = 0;
                    tcb.rcv_scale = 0;
                }
            }
            tcb.sack_permitted = seg.sack_permitted;
            tcb.snd_wnd = u32::from(seg.wnd_raw);
            tcb.snd_wl1 = seg.seq;
            tcb.snd_wl2 = seg.ack;
            tcb.cwnd = u32::from(tcb.mss);

            if seg.has_ack && seg.ack.gt(tcb.snd_una) {
                tcb.snd_una = seg.ack;
                // the SYN leaves the unacked queue
                tcb.unacked.clear();
                tcb.clear_rtx_timer();
                tcb.state = TcpState::Established;
                tcb.ack_now = true;
                true
            } else {
                // simultaneous open
                tcb.state = TcpState::SynRcvd;
                tcb.ack_now = true;
                false
            }
        };

        if established {
            self.with_tcp_hooks(id, |hooks, cx| hooks.connected(cx));
            if self.tcbs.get(id).is_none() {
                return;
            }
            // ack the SYN+ACK (and anything queued meanwhile)
            let _ = self.tcp_output(id);
            // data may ride on the synack; its bytes start after the
            // SYN phantom
            let mut data = seg;
            data.seq = data.seq.add(1);
            data.syn = false;
            self.tcp_data_input(id, data);
        } else {
            let _ = self.tcp_output(id);
        }
    }

    /// Segment against a TIME_WAIT endpoint: re-ack, restart 2MSL.
    fn tcp_time_wait_input(&mut self, id: TcbId, seg: SegIn) {
        if seg.rst {
            self.tcp_release(id);
            return;
        }
        if seg.seq_len() > 0 || seg.syn {
            let msl2 = 2 * self.cfg.tcp_msl_ms;
            if let Some(tcb) = self.tcbs.get_mut(id) {
                tcb.tw_timer_ms = msl2;
                tcb.ack_now = true;
            }
            let _ = self.tcp_send_empty_ack(id);
        }
    }

    /// Move an endpoint into TIME_WAIT (2·MSL lingering). No
    /// application hooks fire in this state.
    pub(crate) fn tcp_enter_time_wait(&mut self, id: TcbId) {
        {
            let msl2 = 2 * self.cfg.tcp_msl_ms;
            let Some(tcb) = self.tcbs.get_mut(id) else {
                return;
            };
            tcb.state = TcpState::TimeWait;
            tcb.tw_timer_ms = msl2;
            tcb.rtx_timer_ms = None;
            tcb.persist_backoff = 0;
            tcb.keepalive = None;
            tcb.unsent.clear();
            tcb.unacked.clear();
            tcb.ooseq.clear();
            tcb.hooks = None;
        }
        let _ = self.tcp_send_empty_ack(id);
        self.tcp_detach(id);
        if self.tcp_time_wait.len() >= self.cfg.max_tcp_time_wait {
            // recycle the oldest lingering endpoint
            let oldest = self.tcp_time_wait.first().copied();
            if let Some(oldest) = oldest {
                self.tcp_release(oldest);
            }
        }
        self.tcp_time_wait.push(id);
    }

    /// The listener's accepted hook supplies the child's hooks.
    fn tcp_fire_accepted(&mut self, child: TcbId) {
        let Some(listener) = self.tcbs.get(child).and_then(|tcb| tcb.listen_backref) else {
            return;
        };
        let Some(mut hooks) = self.tcbs.get_mut(listener).and_then(|tcb| tcb.hooks.take())
        else {
            return;
        };
        let child_hooks = {
            let mut cx = crate::tcp::TcpCtx {
                stack: self,
                tcb: child,
            };
            hooks.accepted(&mut cx)
        };
        if let Some(tcb) = self.tcbs.get_mut(listener) {
            if tcb.hooks.is_none() {
                tcb.hooks = Some(hooks);
            }
        }
        if let Some(child_hooks) = child_hooks {
            if let Some(tcb) = self.tcbs.get_mut(child) {
                tcb.hooks = Some(child_hooks);
            }
        }
    }

    /// Insert into the sorted out-of-order queue, trimming the new
    /// segment around already queued data (earlier data wins) and
    /// enforcing the configured caps.
    fn ooseq_insert(
        tcb: &mut Tcb,
        mut seq: SeqNum,
        mut payload: Buf,
        mut fin: bool,
        max_segments: usize,
        max_bytes: usize,
    ) {
        // find the insert position
        let mut index = 0;
        while index < tcb.ooseq.len() && tcb.ooseq[index].seq.lt(seq) {
            index += 1;
        }

        // trim against the predecessor
        if index > 0 {
            let prev_end = tcb.ooseq[index - 1].end_seq();
            let overlap = prev_end.diff(seq);
            if overlap > 0 {
                if overlap as usize >= payload.tot_len() {
                    // fully contained in already queued data
                    return;
                }
                let trim = overlap as usize;
                let _ = payload.header_adjust_force(-(trim as i32));
                seq = seq.add(trim as u32);
            }
        }
        // trim against the successor
        if index < tcb.ooseq.len() {
            let next_seq = tcb.ooseq[index].seq;
            let end = seq.add(payload.tot_len() as u32);
            let overlap = end.diff(next_seq);
            if overlap > 0 {
                let keep = payload.tot_len().saturating_sub(overlap as usize);
                let _ = payload.realloc(keep);
                fin = false;
            }
        }
        if payload.tot_len() == 0 && !fin {
            return;
        }

        let mut entry = TcpSegment::data(seq, payload, false);
        entry.fin = fin;
        tcb.ooseq.insert(index, entry);

        // bound the queue: the furthest-ahead data is the cheapest to
        // drop, the peer will retransmit it
        let mut total: usize = tcb.ooseq.iter().map(|seg| seg.payload.tot_len()).sum();
        while tcb.ooseq.len() > max_segments || (total > max_bytes && tcb.ooseq.len() > 1) {
            if let Some(dropped) = tcb.ooseq.pop_back() {
                total -= dropped.payload.tot_len();
            } else {
                break;
            }
        }
    }
}
