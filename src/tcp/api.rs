//! The application-facing TCP operations.

use alloc::boxed::Box;

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::ipv4::Ipv4Route;
use crate::stack::Stack;
use crate::tcp::{local_addr_matches, SeqNum, Tcb, TcbId, TcpHooks, TcpSegment, TcpState};

/// Diagnostic snapshot of one TCP endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TcpInfo {
    pub state: TcpState,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub rcv_nxt: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub mss: u16,
    pub snd_buf: u32,
    pub rto_ms: u32,
    pub unsent_segments: usize,
    pub unacked_segments: usize,
    pub ooseq_segments: usize,
}

impl Stack {
    /// Create a TCP endpoint in CLOSED state.
    pub fn tcp_new(&mut self) -> Result<TcbId, StackError> {
        if !self.cfg.tcp {
            return Err(StackError::Argument);
        }
        let tcb = Tcb::new(self.cfg.tcp_wnd, self.cfg.tcp_snd_buf, self.cfg.tcp_mss);
        self.tcbs.acquire(tcb).ok_or(StackError::OutOfMemory)
    }

    /// Install the endpoint hooks.
    pub fn tcp_set_hooks(&mut self, id: TcbId, hooks: Box<dyn TcpHooks>) -> Result<(), StackError> {
        let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
        tcb.hooks = Some(hooks);
        Ok(())
    }

    /// Disable or re-enable the Nagle algorithm.
    pub fn tcp_set_nodelay(&mut self, id: TcbId, nodelay: bool) -> Result<(), StackError> {
        let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
        tcb.nagle_disabled = nodelay;
        Ok(())
    }

    /// Enable keepalive probing with explicit parameters; `None`
    /// disables it.
    pub fn tcp_set_keepalive(
        &mut self,
        id: TcbId,
        keepalive: Option<crate::tcp::Keepalive>,
    ) -> Result<(), StackError> {
        let now = self.now;
        let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
        tcb.keepalive = keepalive;
        tcb.keep_probes_sent = 0;
        tcb.last_activity = now;
        Ok(())
    }

    /// Enable keepalive with the stack defaults.
    pub fn tcp_keepalive_defaults(&mut self, id: TcbId) -> Result<(), StackError> {
        let defaults = crate::tcp::Keepalive {
            idle_ms: self.cfg.tcp_keep_idle_ms,
            interval_ms: self.cfg.tcp_keep_interval_ms,
            count: self.cfg.tcp_keep_count,
        };
        self.tcp_set_keepalive(id, Some(defaults))
    }

    /// Current state of an endpoint (stale handles read as CLOSED).
    pub fn tcp_state(&self, id: TcbId) -> TcpState {
        self.tcbs.get(id).map(|tcb| tcb.state).unwrap_or(TcpState::Closed)
    }

    /// A diagnostic snapshot of one endpoint.
    pub fn tcp_info(&self, id: TcbId) -> Option<TcpInfo> {
        self.tcbs.get(id).map(|tcb| TcpInfo {
            state: tcb.state,
            snd_una: tcb.snd_una.0,
            snd_nxt: tcb.snd_nxt.0,
            rcv_nxt: tcb.rcv_nxt.0,
            snd_wnd: tcb.snd_wnd,
            rcv_wnd: tcb.rcv_wnd,
            cwnd: tcb.cwnd,
            ssthresh: tcb.ssthresh,
            mss: tcb.mss,
            snd_buf: tcb.snd_buf,
            rto_ms: tcb.rto_ms,
            unsent_segments: tcb.unsent.len(),
            unacked_segments: tcb.unacked.len(),
            ooseq_segments: tcb.ooseq.len(),
        })
    }

    /// Bind the local side of the endpoint.
    pub fn tcp_bind(&mut self, id: TcbId, addr: IpAddr, mut port: u16) -> Result<(), StackError> {
        {
            let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
            if tcb.state != TcpState::Closed {
                return Err(StackError::Connection);
            }
        }
        if port == 0 {
            port = self.free_tcp_port().ok_or(StackError::AddressInUse)?;
        } else {
            let conflict = self
                .tcp_bound
                .iter()
                .chain(self.tcp_listen.iter())
                .chain(self.tcp_active.iter())
                .copied()
                .filter(|other| *other != id)
                .filter_map(|other| self.tcbs.get(other))
                .any(|other| {
                    other.local_port == port
                        && (local_addr_matches(other.local_ip, addr)
                            || local_addr_matches(addr, other.local_ip))
                });
            if conflict {
                return Err(StackError::AddressInUse);
            }
        }
        let tcb = self.tcbs.get_mut(id).expect("checked");
        tcb.local_ip = addr;
        tcb.local_port = port;
        if !self.tcp_bound.contains(&id) {
            self.tcp_bound.push(id);
        }
        Ok(())
    }

    /// Move a bound endpoint into LISTEN.
    pub fn tcp_listen(&mut self, id: TcbId) -> Result<(), StackError> {
        {
            let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
            if tcb.state != TcpState::Closed || tcb.local_port == 0 {
                return Err(StackError::Connection);
            }
        }
        if self.tcp_listen.len() >= self.cfg.max_tcp_listen {
            return Err(StackError::OutOfMemory);
        }
        self.tcp_detach(id);
        self.tcp_listen.push(id);
        self.tcbs.get_mut(id).expect("checked").state = TcpState::Listen;
        Ok(())
    }

    /// Active open: send a SYN towards `remote`.
    pub fn tcp_connect(
        &mut self,
        id: TcbId,
        remote: IpAddr,
        remote_port: u16,
    ) -> Result<(), StackError> {
        if remote_port == 0 {
            return Err(StackError::Argument);
        }
        {
            let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
            if tcb.state != TcpState::Closed {
                return Err(StackError::Connection);
            }
        }

        // route now: the local address and mss depend on the netif
        let (netif, local_ip) = match remote {
            IpAddr::V4(dst) => {
                let netif = match self.route_ipv4(dst)? {
                    Ipv4Route::Local { netif } => netif,
                    Ipv4Route::Forward { netif, .. } => netif,
                };
                let src = self
                    .netifs
                    .get(netif)
                    .and_then(|n| n.ipv4)
                    .map(|c| c.addr)
                    .ok_or(StackError::Routing)?;
                (netif, IpAddr::V4(src))
            }
            IpAddr::V6(dst) => {
                let route = self.route_ipv6(dst)?;
                let src = self
                    .select_ipv6_source(route.netif(), dst)
                    .ok_or(StackError::Routing)?;
                (route.netif(), IpAddr::V6(src))
            }
        };

        let needs_bind = self.tcbs.get(id).expect("checked").local_port == 0;
        if needs_bind {
            let any = match remote {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            self.tcp_bind(id, any, 0)?;
        }

        let mss_cap = self.tcp_mss_for(netif, matches!(remote, IpAddr::V6(_)));
        let iss = SeqNum(self.rng.next_u32());
        let now = self.now;
        {
            let tcb = self.tcbs.get_mut(id).expect("checked");
            tcb.local_ip = match tcb.local_ip {
                addr if local_addr_matches(addr, local_ip) => local_ip,
                addr => addr,
            };
            tcb.remote_ip = remote;
            tcb.remote_port = remote_port;
            tcb.netif = Some(netif);
            tcb.mss = mss_cap;
            tcb.cwnd = u32::from(mss_cap);
            // assume a full window until the SYN+ACK announces the
            // real one, so the SYN itself is sendable
            tcb.snd_wnd = self.cfg.tcp_wnd;
            tcb.snd_una = iss;
            tcb.snd_nxt = iss;
            tcb.snd_max = iss;
            tcb.snd_lbb = iss.add(1);
            tcb.state = TcpState::SynSent;
            tcb.last_activity = now;
            // offered receive window scale; withdrawn if the peer
            // does not negotiate it
            tcb.rcv_scale = crate::tcp::output::scale_shift_for(tcb.rcv_wnd);
            tcb.unsent.push_back(TcpSegment {
                seq: iss,
                payload: Buf::empty(),
                syn: true,
                fin: false,
                psh: false,
                first_tx: None,
                retransmitted: false,
            });
        }
        self.tcp_detach(id);
        self.tcp_active.push(id);
        self.tcp_output(id)
    }

    /// Queue application bytes on the unsent queue. Returns how many
    /// bytes the send buffer accepted; zero free budget is an error
    /// the caller may retry after the `sent` hook.
    pub fn tcp_write(&mut self, id: TcbId, data: &[u8], push: bool) -> Result<usize, StackError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mss;
        let accepted;
        {
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
            if !tcb.state.may_send() || tcb.fin_queued {
                return Err(StackError::Connection);
            }
            if tcb.snd_buf == 0 {
                return Err(StackError::OutOfMemory);
            }
            // never allow more than 2^31-1 bytes outstanding, the
            // cyclic comparisons would become ambiguous
            let outstanding = tcb.snd_lbb.diff(tcb.snd_una).max(0) as u32;
            let room = (i32::MAX as u32 - 1)
                .saturating_sub(outstanding)
                .min(tcb.snd_buf);
            if room == 0 {
                return Err(StackError::OutOfMemory);
            }
            accepted = data.len().min(room as usize);
            mss = usize::from(tcb.mss);

            let mut taken = 0usize;
            while taken < accepted {
                // aggregate into the tail segment while it has room up
                // to one mss
                let appended = match tcb.unsent.back_mut() {
                    Some(tail)
                        if !tail.syn && !tail.fin && tail.payload.tot_len() < mss =>
                    {
                        let want = (mss - tail.payload.tot_len()).min(accepted - taken);
                        tail.payload.append_in_tail(&data[taken..taken + want])
                    }
                    _ => 0,
                };
                if appended > 0 {
                    taken += appended;
                    continue;
                }
                // fresh segment sized to one mss
                let chunk = (accepted - taken).min(mss);
                let mut payload = Buf::alloc_heap(Headroom::Transport, mss);
                payload
                    .copy_from_slice(0, &data[taken..taken + chunk])
                    .expect("chunk <= mss");
                payload.realloc(chunk).expect("shrink to chunk");
                let seq = tcb.snd_lbb.add(taken as u32);
                tcb.unsent.push_back(TcpSegment::data(seq, payload, false));
                taken += chunk;
            }
            tcb.snd_lbb = tcb.snd_lbb.add(accepted as u32);
            tcb.snd_buf -= accepted as u32;
            if push {
                if let Some(tail) = tcb.unsent.back_mut() {
                    tail.psh = true;
                    tail.payload.push = true;
                }
            }
        }
        self.tcp_output(id)?;
        Ok(accepted)
    }

    /// Reopen receive window the application has consumed.
    pub fn tcp_recved(&mut self, id: TcbId, n: usize) -> Result<(), StackError> {
        let announce_now = {
            let max_wnd = self.cfg.tcp_wnd;
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
            let before = tcb.rcv_wnd;
            tcb.rcv_wnd = (tcb.rcv_wnd + n as u32).min(max_wnd);
            // reopening across an mss boundary is worth an immediate
            // window update
            before < u32::from(tcb.mss) && tcb.rcv_wnd >= u32::from(tcb.mss)
        };
        if announce_now {
            if let Some(tcb) = self.tcbs.get_mut(id) {
                tcb.ack_now = true;
            }
            self.tcp_output(id)?;
        }
        Ok(())
    }

    /// Graceful close. CLOSED/LISTEN/SYN_SENT endpoints are released
    /// immediately; synchronized states queue a FIN and walk the
    /// state machine.
    pub fn tcp_close(&mut self, id: TcbId) -> Result<(), StackError> {
        let state = {
            let tcb = self.tcbs.get(id).ok_or(StackError::Argument)?;
            tcb.state
        };
        match state {
            TcpState::Closed | TcpState::Listen | TcpState::SynSent => {
                self.tcp_release(id);
                Ok(())
            }
            TcpState::SynRcvd | TcpState::Established => {
                self.tcp_queue_fin(id, TcpState::FinWait1)
            }
            TcpState::CloseWait => self.tcp_queue_fin(id, TcpState::LastAck),
            // already closing
            TcpState::FinWait1
            | TcpState::FinWait2
            | TcpState::Closing
            | TcpState::LastAck
            | TcpState::TimeWait => Ok(()),
        }
    }

    /// Shut down the receive and/or transmit side independently.
    pub fn tcp_shutdown(&mut self, id: TcbId, rx: bool, tx: bool) -> Result<(), StackError> {
        if rx {
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
            tcb.rx_shutdown = true;
        }
        if tx {
            let state = self.tcbs.get(id).ok_or(StackError::Argument)?.state;
            match state {
                TcpState::SynRcvd | TcpState::Established => {
                    self.tcp_queue_fin(id, TcpState::FinWait1)?;
                }
                TcpState::CloseWait => {
                    self.tcp_queue_fin(id, TcpState::LastAck)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Hard abort: RST to the peer, error hook with `Abort`, endpoint
    /// released.
    pub fn tcp_abort(&mut self, id: TcbId) {
        let rst_params = self.tcbs.get(id).and_then(|tcb| {
            tcb.state.is_synchronized().then(|| {
                (
                    tcb.local_ip,
                    tcb.local_port,
                    tcb.remote_ip,
                    tcb.remote_port,
                    tcb.snd_nxt,
                    tcb.rcv_nxt,
                )
            })
        });
        if let Some((local, lport, remote, rport, seq, ack)) = rst_params {
            self.tcp_send_rst(local, lport, remote, rport, seq, ack, true);
        }
        self.tcp_fire_error(id, StackError::Abort);
    }

    /// Queue the FIN and transition; shared by close and shutdown.
    fn tcp_queue_fin(&mut self, id: TcbId, next_state: TcpState) -> Result<(), StackError> {
        {
            let tcb = self.tcbs.get_mut(id).ok_or(StackError::Argument)?;
            if !tcb.fin_queued {
                // a FIN rides on the last unsent data segment when one
                // exists
                match tcb.unsent.back_mut() {
                    Some(tail) if !tail.syn && !tail.fin => {
                        tail.fin = true;
                    }
                    _ => {
                        let seq = tcb.snd_lbb;
                        tcb.unsent.push_back(TcpSegment {
                            seq,
                            payload: Buf::empty(),
                            syn: false,
                            fin: true,
                            psh: false,
                            first_tx: None,
                            retransmitted: false,
                        });
                    }
                }
                tcb.snd_lbb = tcb.snd_lbb.add(1);
                tcb.fin_queued = true;
            }
            tcb.state = next_state;
        }
        self.tcp_output(id)
    }

    /// Effective MSS for a netif: configured cap bounded by the MTU.
    pub(crate) fn tcp_mss_for(&self, netif: crate::iface::NetifId, is_v6: bool) -> u16 {
        let mtu = self
            .netifs
            .get(netif)
            .map(|n| n.mtu)
            .unwrap_or(1500);
        let ip_overhead = if is_v6 { 40 } else { 20 };
        self.cfg
            .tcp_mss
            .min(mtu.saturating_sub(ip_overhead + 20).max(1))
    }

    fn free_tcp_port(&mut self) -> Option<u16> {
        for _ in 0..0x4000 {
            let candidate = self.next_ephemeral();
            let taken = self
                .tcp_bound
                .iter()
                .chain(self.tcp_listen.iter())
                .chain(self.tcp_active.iter())
                .chain(self.tcp_time_wait.iter())
                .copied()
                .filter_map(|other| self.tcbs.get(other))
                .any(|tcb| tcb.local_port == candidate);
            if !taken {
                return Some(candidate);
            }
        }
        None
    }
}
