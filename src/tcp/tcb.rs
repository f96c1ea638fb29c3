use alloc::boxed::Box;
use alloc::collections::VecDeque;

use crate::addr::IpAddr;
use crate::buf::Buf;
use crate::err::StackError;
use crate::iface::NetifId;
use crate::pool::PoolId;
use crate::tcp::{SeqNum, TcpCtx, TcpSegment};
use crate::time::Instant;

/// Handle to a TCP endpoint owned by the stack.
pub type TcbId = PoolId<Tcb>;

/// TCP connection state (RFC 793, section 3.2).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// True if application data may still be queued for sending.
    pub fn may_send(&self) -> bool {
        matches!(
            self,
            TcpState::Established | TcpState::CloseWait | TcpState::SynSent | TcpState::SynRcvd
        )
    }

    /// True if the connection is past the handshake.
    pub fn is_synchronized(&self) -> bool {
        !matches!(
            self,
            TcpState::Closed | TcpState::Listen | TcpState::SynSent
        )
    }
}

/// Application hooks of a TCP endpoint.
///
/// Every hook runs in the core context with a [`TcpCtx`] that allows
/// writing, closing and window updates on the endpoint. The `error`
/// hook consumes the hooks by move: when it runs, the stack has
/// already released the TCB and the endpoint handle is dead.
#[allow(unused_variables)]
pub trait TcpHooks {
    /// Active open completed (SYN+ACK acknowledged).
    fn connected(&mut self, cx: &mut TcpCtx<'_>) {}

    /// A child connection of this listener reached ESTABLISHED. The
    /// context addresses the child; the returned hooks are installed
    /// on it.
    fn accepted(&mut self, cx: &mut TcpCtx<'_>) -> Option<Box<dyn TcpHooks>> {
        None
    }

    /// In-order data arrived. The window is not reopened until
    /// [`TcpCtx::recved`] is called.
    fn received(&mut self, cx: &mut TcpCtx<'_>, data: Buf) {}

    /// The peer closed its side (FIN processed, EOF).
    fn remote_closed(&mut self, cx: &mut TcpCtx<'_>) {}

    /// `acked` bytes of previously written data were acknowledged and
    /// their send-buffer budget is available again.
    fn sent(&mut self, cx: &mut TcpCtx<'_>, acked: usize) {}

    /// Periodic liveness poll from the slow timer.
    fn poll(&mut self, cx: &mut TcpCtx<'_>) {}

    /// Terminal failure: the TCB has been released, only the reason
    /// remains.
    fn error(self: Box<Self>, reason: StackError) {}
}

/// Keepalive parameters of one endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Keepalive {
    /// Idle time before the first probe.
    pub idle_ms: u32,
    /// Interval between probes.
    pub interval_ms: u32,
    /// Probes without an answer before the connection is aborted.
    pub count: u8,
}

/// The transmission control block: every field of one TCP connection.
pub struct Tcb {
    // identity
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    pub local_port: u16,
    pub remote_port: u16,
    pub(crate) netif: Option<NetifId>,
    pub(crate) state: TcpState,

    // send side
    pub(crate) snd_una: SeqNum,
    pub(crate) snd_nxt: SeqNum,
    pub(crate) snd_max: SeqNum,
    /// Sequence number for the next byte the application queues
    /// (last byte buffered).
    pub(crate) snd_lbb: SeqNum,
    pub(crate) snd_wnd: u32,
    pub(crate) snd_wl1: SeqNum,
    pub(crate) snd_wl2: SeqNum,
    /// Bytes of send-buffer budget still free.
    pub(crate) snd_buf: u32,
    pub(crate) cwnd: u32,
    pub(crate) ssthresh: u32,
    pub(crate) mss: u16,
    pub(crate) unsent: VecDeque<TcpSegment>,
    pub(crate) unacked: VecDeque<TcpSegment>,

    // receive side
    pub(crate) rcv_nxt: SeqNum,
    pub(crate) rcv_wnd: u32,
    pub(crate) rcv_ann_wnd: u32,
    pub(crate) rcv_ann_right_edge: SeqNum,
    pub(crate) ooseq: VecDeque<TcpSegment>,

    // retransmission (RFC 6298; all milliseconds)
    pub(crate) srtt_ms: i32,
    pub(crate) rttvar_ms: i32,
    pub(crate) rtt_valid: bool,
    pub(crate) rto_ms: u32,
    /// Remaining time on the retransmission timer; `None` = stopped.
    pub(crate) rtx_timer_ms: Option<u32>,
    pub(crate) nrtx: u8,

    // persist (zero window probing)
    pub(crate) persist_backoff: u8,
    pub(crate) persist_timer_ms: u32,

    // keepalive
    pub(crate) keepalive: Option<Keepalive>,
    pub(crate) keep_probes_sent: u8,
    pub(crate) last_activity: Instant,

    // fast retransmit / recovery
    pub(crate) dupacks: u8,
    pub(crate) fast_recovery: bool,

    // delayed ACK
    pub(crate) ack_delayed: bool,
    pub(crate) ack_now: bool,
    pub(crate) data_segs_since_ack: u8,

    // option state
    pub(crate) nagle_disabled: bool,
    pub(crate) sack_permitted: bool,
    pub(crate) snd_scale: u8,
    pub(crate) rcv_scale: u8,

    // lifecycle
    pub(crate) listen_backref: Option<TcbId>,
    pub(crate) mss_cap: u16,
    pub(crate) fin_queued: bool,
    pub(crate) rx_shutdown: bool,
    pub(crate) tw_timer_ms: u32,

    pub(crate) hooks: Option<Box<dyn TcpHooks>>,
}

impl Tcb {
    /// Initial retransmission timeout (RFC 6298, section 2.1... with
    /// the traditional 3 s value the original implementation uses).
    pub(crate) const INITIAL_RTO_MS: u32 = 3000;
    /// Lower RTO clamp.
    pub(crate) const MIN_RTO_MS: u32 = 1000;
    /// Upper RTO clamp.
    pub(crate) const MAX_RTO_MS: u32 = 64_000;

    /// A closed endpoint bound to nothing.
    pub(crate) fn new(wnd: u32, snd_buf: u32, mss: u16) -> Tcb {
        Tcb {
            local_ip: IpAddr::V4(crate::addr::Ipv4Addr::UNSPECIFIED),
            remote_ip: IpAddr::V4(crate::addr::Ipv4Addr::UNSPECIFIED),
            local_port: 0,
            remote_port: 0,
            netif: None,
            state: TcpState::Closed,
            snd_una: SeqNum(0),
            snd_nxt: SeqNum(0),
            snd_max: SeqNum(0),
            snd_lbb: SeqNum(0),
            snd_wnd: 0,
            snd_wl1: SeqNum(0),
            snd_wl2: SeqNum(0),
            snd_buf,
            cwnd: u32::from(mss),
            ssthresh: wnd,
            mss,
            unsent: VecDeque::new(),
            unacked: VecDeque::new(),
            rcv_nxt: SeqNum(0),
            rcv_wnd: wnd,
            rcv_ann_wnd: wnd,
            rcv_ann_right_edge: SeqNum(0),
            ooseq: VecDeque::new(),
            srtt_ms: 0,
            rttvar_ms: 0,
            rtt_valid: false,
            rto_ms: Tcb::INITIAL_RTO_MS,
            rtx_timer_ms: None,
            nrtx: 0,
            persist_backoff: 0,
            persist_timer_ms: 0,
            keepalive: None,
            keep_probes_sent: 0,
            last_activity: Instant::ZERO,
            dupacks: 0,
            fast_recovery: false,
            ack_delayed: false,
            ack_now: false,
            data_segs_since_ack: 0,
            nagle_disabled: false,
            sack_permitted: false,
            snd_scale: 0,
            rcv_scale: 0,
            listen_backref: None,
            mss_cap: mss,
            fin_queued: false,
            rx_shutdown: false,
            tw_timer_ms: 0,
            hooks: None,
        }
    }

    /// Connection state.
    #[inline]
    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Bytes currently in flight.
    #[inline]
    pub(crate) fn flight_size(&self) -> u32 {
        self.snd_nxt.diff(self.snd_una).max(0) as u32
    }

    /// The window the sender may currently fill: the smaller of the
    /// congestion window and the peer's advertised window.
    #[inline]
    pub(crate) fn effective_send_window(&self) -> u32 {
        self.cwnd.min(self.snd_wnd)
    }

    /// Feed one round-trip sample into the smoothed estimator and
    /// recompute the RTO (RFC 6298, section 2).
    pub(crate) fn rtt_sample(&mut self, rtt_ms: u32) {
        let rtt = rtt_ms as i32;
        if self.rtt_valid {
            // RTTVAR <- (1 - 1/4) * RTTVAR + 1/4 * |SRTT - R'|
            self.rttvar_ms = (3 * self.rttvar_ms + (self.srtt_ms - rtt).abs()) / 4;
            // SRTT <- (1 - 1/8) * SRTT + 1/8 * R'
            self.srtt_ms = (7 * self.srtt_ms + rtt) / 8;
        } else {
            self.srtt_ms = rtt;
            self.rttvar_ms = rtt / 2;
            self.rtt_valid = true;
        }
        let rto = self.srtt_ms + (4 * self.rttvar_ms).max(100);
        self.rto_ms = (rto as u32).clamp(Tcb::MIN_RTO_MS, Tcb::MAX_RTO_MS);
    }

    /// The receive window to advertise, avoiding window shrink: the
    /// advertised right edge never moves left (RFC 1122, 4.2.2.16).
    pub(crate) fn announced_window(&mut self) -> u32 {
        let new_right = self.rcv_nxt.add(self.rcv_wnd);
        if new_right.lt(self.rcv_ann_right_edge) {
            // keep the old edge: announce whatever distance remains
            let remaining = self.rcv_ann_right_edge.diff(self.rcv_nxt);
            self.rcv_ann_wnd = remaining.max(0) as u32;
        } else {
            self.rcv_ann_right_edge = new_right;
            self.rcv_ann_wnd = self.rcv_wnd;
        }
        self.rcv_ann_wnd
    }

    /// Number of data bytes queued but not yet transmitted.
    pub(crate) fn unsent_len(&self) -> usize {
        self.unsent.iter().map(|seg| seg.payload.tot_len()).sum()
    }

    /// True if every queue is empty and nothing is in flight.
    pub(crate) fn queues_empty(&self) -> bool {
        self.unsent.is_empty() && self.unacked.is_empty()
    }

    /// Start the retransmission timer if it is not running.
    #[inline]
    pub(crate) fn arm_rtx_timer(&mut self) {
        if self.rtx_timer_ms.is_none() {
            self.rtx_timer_ms = Some(self.rto_ms);
        }
    }

    /// Stop the retransmission timer and reset the backoff counter.
    #[inline]
    pub(crate) fn clear_rtx_timer(&mut self) {
        self.rtx_timer_ms = None;
        self.nrtx = 0;
    }
}

impl core::fmt::Debug for Tcb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tcb")
            .field("state", &self.state)
            .field("local", &(self.local_ip, self.local_port))
            .field("remote", &(self.remote_ip, self.remote_port))
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("cwnd", &self.cwnd)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb() -> Tcb {
        Tcb::new(16384, 16384, 1460)
    }

    #[test]
    fn initial_values() {
        let tcb = tcb();
        assert_eq!(tcb.state(), TcpState::Closed);
        assert_eq!(tcb.cwnd, 1460);
        assert_eq!(tcb.rto_ms, Tcb::INITIAL_RTO_MS);
        assert!(tcb.queues_empty());
    }

    #[test]
    fn rtt_first_sample() {
        let mut tcb = tcb();
        tcb.rtt_sample(200);
        assert_eq!(tcb.srtt_ms, 200);
        assert_eq!(tcb.rttvar_ms, 100);
        // rto = srtt + 4*rttvar = 600, clamped to the minimum
        assert_eq!(tcb.rto_ms, Tcb::MIN_RTO_MS);
    }

    #[test]
    fn rtt_smoothing_converges() {
        let mut tcb = tcb();
        for _ in 0..50 {
            tcb.rtt_sample(100);
        }
        assert!((90..=110).contains(&tcb.srtt_ms));
        assert_eq!(tcb.rto_ms, Tcb::MIN_RTO_MS);

        // a large spike raises the rto
        tcb.rtt_sample(5000);
        assert!(tcb.rto_ms > Tcb::MIN_RTO_MS);
    }

    #[test]
    fn announced_window_never_shrinks_right_edge() {
        let mut tcb = tcb();
        tcb.rcv_nxt = SeqNum(1000);
        tcb.rcv_wnd = 1000;
        assert_eq!(tcb.announced_window(), 1000);
        assert_eq!(tcb.rcv_ann_right_edge, SeqNum(2000));

        // window buffer shrank: right edge must hold
        tcb.rcv_wnd = 100;
        assert_eq!(tcb.announced_window(), 1000);

        // receive advances: edge may move right again
        tcb.rcv_nxt = SeqNum(1900);
        tcb.rcv_wnd = 1000;
        assert_eq!(tcb.announced_window(), 1000);
        assert_eq!(tcb.rcv_ann_right_edge, SeqNum(2900));
    }

    #[test]
    fn effective_send_window() {
        let mut tcb = tcb();
        tcb.cwnd = 2920;
        tcb.snd_wnd = 8000;
        assert_eq!(tcb.effective_send_window(), 2920);
        tcb.snd_wnd = 1000;
        assert_eq!(tcb.effective_send_window(), 1000);
    }

    #[test]
    fn rtx_timer_arming() {
        let mut tcb = tcb();
        tcb.arm_rtx_timer();
        assert_eq!(tcb.rtx_timer_ms, Some(Tcb::INITIAL_RTO_MS));
        // arming again does not restart
        tcb.rtx_timer_ms = Some(100);
        tcb.arm_rtx_timer();
        assert_eq!(tcb.rtx_timer_ms, Some(100));
        tcb.clear_rtx_timer();
        assert_eq!(tcb.rtx_timer_ms, None);
    }

    #[test]
    fn state_predicates() {
        assert!(TcpState::Established.may_send());
        assert!(TcpState::CloseWait.may_send());
        assert_eq!(false, TcpState::FinWait1.may_send());
        assert_eq!(false, TcpState::TimeWait.may_send());
        assert!(TcpState::Established.is_synchronized());
        assert_eq!(false, TcpState::SynSent.is_synchronized());
    }
}
