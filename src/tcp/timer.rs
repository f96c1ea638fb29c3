//! The two TCP tick handlers: the 500 ms slow timer (retransmission,
//! persist, keepalive, TIME_WAIT) and the 250 ms fast timer (delayed
//! ACK flush).

use crate::err::StackError;
use crate::stack::Stack;
use crate::tcp::output::persist_interval_ms;
use crate::tcp::{Tcb, TcbId, TcpState};

impl Stack {
    /// 500 ms tick driving every per-endpoint logical timer.
    pub(crate) fn tcp_slow_tick(&mut self) {
        let tick_ms = self.cfg.tcp_slow_tick_ms;

        for id in self.tcp_active.clone() {
            if self.tcbs.get(id).is_none() {
                continue;
            }
            if self.tcp_slow_tick_rtx(id, tick_ms) {
                continue; // endpoint aborted
            }
            if self.tcp_slow_tick_persist(id, tick_ms) {
                continue;
            }
            if self.tcp_slow_tick_keepalive(id) {
                continue;
            }
            self.with_tcp_hooks(id, |hooks, cx| hooks.poll(cx));
        }

        // TIME_WAIT endpoints only wait for their 2·MSL to pass
        for id in self.tcp_time_wait.clone() {
            let expired = match self.tcbs.get_mut(id) {
                Some(tcb) => {
                    tcb.tw_timer_ms = tcb.tw_timer_ms.saturating_sub(tick_ms);
                    tcb.tw_timer_ms == 0
                }
                None => continue,
            };
            if expired {
                self.tcp_release(id);
            }
        }
    }

    /// Retransmission timeout handling; true if the endpoint died.
    fn tcp_slow_tick_rtx(&mut self, id: TcbId, tick_ms: u32) -> bool {
        let expired = {
            let Some(tcb) = self.tcbs.get_mut(id) else {
                return true;
            };
            match tcb.rtx_timer_ms {
                Some(remaining) => {
                    let remaining = remaining.saturating_sub(tick_ms);
                    if remaining == 0 {
                        true
                    } else {
                        tcb.rtx_timer_ms = Some(remaining);
                        false
                    }
                }
                None => false,
            }
        };
        if !expired {
            return false;
        }

        let give_up = {
            let tcb = self.tcbs.get_mut(id).expect("present");
            tcb.nrtx = tcb.nrtx.saturating_add(1);
            let limit = if matches!(tcb.state, TcpState::SynSent | TcpState::SynRcvd) {
                self.cfg.tcp_syn_max_rtx
            } else {
                self.cfg.tcp_max_rtx
            };
            tcb.nrtx > limit
        };
        if give_up {
            log::debug!("tcp: retransmission limit reached, aborting");
            self.tcp_fire_error(id, StackError::Timeout);
            return true;
        }

        {
            let tcb = self.tcbs.get_mut(id).expect("present");
            let mss = u32::from(tcb.mss);

            // exponential backoff, capped
            tcb.rto_ms = (tcb.rto_ms * 2).min(Tcb::MAX_RTO_MS);
            tcb.rtx_timer_ms = Some(tcb.rto_ms);

            // congestion response: back to slow start
            let flight = tcb.flight_size();
            tcb.ssthresh = (flight / 2).max(2 * mss);
            tcb.cwnd = mss;
            tcb.fast_recovery = false;
            tcb.dupacks = 0;

            // everything in flight goes back onto the unsent queue,
            // marked so Karn's rule skips their RTT samples
            while let Some(mut seg) = tcb.unacked.pop_back() {
                seg.retransmitted = true;
                tcb.unsent.push_front(seg);
            }
        }
        self.stats.tcp_retransmits += 1;
        let _ = self.tcp_output(id);
        false
    }

    /// Zero-window probing; true if the endpoint died.
    fn tcp_slow_tick_persist(&mut self, id: TcbId, tick_ms: u32) -> bool {
        let probe = {
            let Some(tcb) = self.tcbs.get_mut(id) else {
                return true;
            };
            if tcb.persist_backoff == 0 {
                false
            } else {
                tcb.persist_timer_ms = tcb.persist_timer_ms.saturating_sub(tick_ms);
                if tcb.persist_timer_ms == 0 {
                    tcb.persist_backoff = (tcb.persist_backoff + 1).min(7);
                    tcb.persist_timer_ms = persist_interval_ms(tcb.persist_backoff);
                    true
                } else {
                    false
                }
            }
        };
        if probe {
            let _ = self.tcp_send_persist_probe(id);
        }
        false
    }

    /// Keepalive probing; true if the endpoint died.
    fn tcp_slow_tick_keepalive(&mut self, id: TcbId) -> bool {
        let now = self.now;
        let action = {
            let Some(tcb) = self.tcbs.get(id) else {
                return true;
            };
            let Some(ka) = tcb.keepalive else {
                return false;
            };
            if tcb.state != TcpState::Established || !tcb.queues_empty() {
                return false;
            }
            let idle_ms = (now - tcb.last_activity).as_millis();
            let due = u64::from(ka.idle_ms)
                + u64::from(ka.interval_ms) * u64::from(tcb.keep_probes_sent);
            if idle_ms < due {
                None
            } else if tcb.keep_probes_sent >= ka.count {
                Some(true) // give up
            } else {
                Some(false) // probe
            }
        };
        match action {
            Some(true) => {
                log::debug!("tcp: keepalive gave up, aborting");
                self.tcp_fire_error(id, StackError::Abort);
                true
            }
            Some(false) => {
                if let Some(tcb) = self.tcbs.get_mut(id) {
                    tcb.keep_probes_sent += 1;
                }
                let _ = self.tcp_send_keepalive_probe(id);
                false
            }
            None => false,
        }
    }

    /// 250 ms tick: flush pending delayed ACKs.
    pub(crate) fn tcp_fast_tick(&mut self) {
        for id in self.tcp_active.clone() {
            let pending = self
                .tcbs
                .get(id)
                .map(|tcb| tcb.ack_delayed || tcb.ack_now)
                .unwrap_or(false);
            if pending {
                let _ = self.tcp_send_empty_ack(id);
            }
        }
    }
}
