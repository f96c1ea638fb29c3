//! The core context: one value owning every table of the stack.
//!
//! All state mutation happens through `&mut Stack` methods, so a
//! single thread (or the mailbox runner) serializes the whole stack.
//! Drivers and timers are polled from [`Stack::poll`]; nothing inside
//! the core ever blocks or suspends.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::addr::{ipv6_link_local_from_hwaddr, Ipv4Addr, Ipv6Addr};
use crate::buf::{Buf, BufPool};
use crate::err::StackError;
use crate::group::GroupTable;
use crate::iface::{
    Ipv4Config, Ipv6AddrSlot, Ipv6AddrState, Netif, NetifEvent, NetifId,
};
use crate::neigh::{ArpCache, NdCache};
use crate::pool::Pool;
use crate::raw::RawEndpoint;
use crate::reass::ReassemblyPool;
use crate::tcp::{Tcb, TcbId};
use crate::time::{Duration, Instant, TimerQueue};
use crate::udp::UdpEndpoint;

mod config;
pub use config::*;

#[cfg(feature = "std")]
mod mailbox;
#[cfg(feature = "std")]
pub use mailbox::*;

mod stats;
pub use stats::*;

/// Timer events dispatched by `Stack::poll`. The protocol ticks
/// re-register themselves; callbacks are one-shot.
pub(crate) enum TimerEvent {
    ArpTick,
    NdTick,
    ReassTick,
    TcpSlowTick,
    TcpFastTick,
    IgmpTick,
    MldTick,
    Dad { netif: NetifId, slot: usize },
    Callback(Box<dyn FnOnce(&mut Stack)>),
}

pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> XorShift64 {
        XorShift64 {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform-ish value in `[0, bound)`.
    pub(crate) fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.next_u32() % bound
        }
    }
}

/// The network stack core. See the crate docs for the threading model.
pub struct Stack {
    pub(crate) cfg: Config,
    pub(crate) now: Instant,
    pub(crate) rng: XorShift64,
    pub(crate) stats: Stats,

    pub(crate) netifs: Pool<Netif>,
    pub(crate) default_netif: Option<NetifId>,
    pub(crate) ext_callbacks: Vec<Box<dyn FnMut(NetifId, &NetifEvent)>>,
    next_client_data_slot: usize,

    pub(crate) buf_pool: BufPool,

    pub(crate) arp: ArpCache,
    pub(crate) nd: NdCache,
    pub(crate) ip4_reass: ReassemblyPool,
    pub(crate) ip6_reass: ReassemblyPool,
    pub(crate) ip4_ident: u16,
    pub(crate) ip6_ident: u32,

    pub(crate) udp: Pool<UdpEndpoint>,
    pub(crate) raw: Pool<RawEndpoint>,

    pub(crate) tcbs: Pool<Tcb>,
    /// Bound but closed endpoints (bind conflict checks only).
    pub(crate) tcp_bound: Vec<TcbId>,
    pub(crate) tcp_listen: Vec<TcbId>,
    pub(crate) tcp_active: Vec<TcbId>,
    pub(crate) tcp_time_wait: Vec<TcbId>,

    pub(crate) igmp: GroupTable<Ipv4Addr>,
    pub(crate) mld: GroupTable<Ipv6Addr>,

    /// Default routers learned from router advertisements.
    pub(crate) ip6_routers: Vec<crate::ipv6::Ipv6Router>,

    pub(crate) timers: TimerQueue<TimerEvent>,

    /// Optional decorator deciding whether an ICMP error to the given
    /// destination may be sent now (rate limiting hook).
    pub(crate) icmp_limiter: Option<Box<dyn FnMut(crate::addr::IpAddr) -> bool>>,

    /// Self-addressed packets awaiting their asynchronous local
    /// delivery at the next poll.
    pub(crate) pending_local: alloc::collections::VecDeque<(NetifId, Buf)>,

    pub(crate) next_ephemeral_port: u16,
}

impl Stack {
    /// Build a stack from its configuration. The protocol tick timers
    /// for the enabled features are registered immediately.
    pub fn new(cfg: Config) -> Stack {
        let mut stack = Stack {
            now: Instant::ZERO,
            rng: XorShift64::new(cfg.rng_seed),
            stats: Stats::default(),
            netifs: Pool::new(cfg.max_netifs),
            default_netif: None,
            ext_callbacks: Vec::new(),
            next_client_data_slot: 0,
            buf_pool: BufPool::new(cfg.buf_pool_blocks, cfg.buf_block_size),
            arp: ArpCache::new(usize::from(cfg.arp_table_size)),
            nd: NdCache::new(usize::from(cfg.nd_cache_size)),
            ip4_reass: ReassemblyPool::new(
                usize::from(cfg.ip_reass_max_blocks),
                cfg.ip_reass_max_age_ms,
            ),
            ip6_reass: ReassemblyPool::new(
                usize::from(cfg.ip_reass_max_blocks),
                cfg.ip_reass_max_age_ms,
            ),
            ip4_ident: 0,
            ip6_ident: 0,
            udp: Pool::new(cfg.max_udp_endpoints),
            raw: Pool::new(cfg.max_raw_endpoints),
            tcbs: Pool::new(cfg.max_tcp_endpoints),
            tcp_bound: Vec::new(),
            tcp_listen: Vec::new(),
            tcp_active: Vec::new(),
            tcp_time_wait: Vec::new(),
            igmp: GroupTable::new(),
            mld: GroupTable::new(),
            ip6_routers: Vec::new(),
            timers: TimerQueue::new(),
            icmp_limiter: None,
            pending_local: alloc::collections::VecDeque::new(),
            next_ephemeral_port: 0xc000,
            cfg,
        };

        let now = stack.now;
        if stack.cfg.ipv4 {
            stack
                .timers
                .schedule(now + Duration::from_millis(u64::from(stack.cfg.arp_tick_ms)), TimerEvent::ArpTick);
        }
        if stack.cfg.ipv6 {
            stack
                .timers
                .schedule(now + Duration::from_millis(u64::from(stack.cfg.nd_tick_ms)), TimerEvent::NdTick);
        }
        stack
            .timers
            .schedule(now + Duration::from_millis(u64::from(stack.cfg.reass_tick_ms)), TimerEvent::ReassTick);
        if stack.cfg.tcp {
            stack.timers.schedule(
                now + Duration::from_millis(u64::from(stack.cfg.tcp_slow_tick_ms)),
                TimerEvent::TcpSlowTick,
            );
            stack.timers.schedule(
                now + Duration::from_millis(u64::from(stack.cfg.tcp_fast_tick_ms)),
                TimerEvent::TcpFastTick,
            );
        }
        if stack.cfg.igmp {
            stack.timers.schedule(
                now + Duration::from_millis(u64::from(stack.cfg.group_tick_ms)),
                TimerEvent::IgmpTick,
            );
        }
        if stack.cfg.mld {
            stack.timers.schedule(
                now + Duration::from_millis(u64::from(stack.cfg.group_tick_ms)),
                TimerEvent::MldTick,
            );
        }
        stack
    }

    /// The configuration the stack was built with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Current stack time (the last `poll` timestamp).
    #[inline]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Packet counters.
    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Statistics of the shared buffer pool.
    pub fn buf_pool_stats(&self) -> crate::pool::PoolStats {
        self.buf_pool.stats()
    }

    /// Install the ICMP error rate limiting decorator. The callback
    /// gets the destination of a would-be ICMP error and returns
    /// whether it may be sent.
    pub fn set_icmp_limiter(
        &mut self,
        limiter: Box<dyn FnMut(crate::addr::IpAddr) -> bool>,
    ) {
        self.icmp_limiter = Some(limiter);
    }

    /// Run `f` in the core context after `delay`.
    pub fn call_later(&mut self, delay: Duration, f: Box<dyn FnOnce(&mut Stack)>) {
        let at = self.now + delay;
        self.timers.schedule(at, TimerEvent::Callback(f));
    }

    /// The earliest time at which `poll` has work to do.
    pub fn poll_at(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Advance the clock to `now`, drain driver receive queues and
    /// fire all due timers. Returns the number of frames processed.
    pub fn poll(&mut self, now: Instant) -> usize {
        if now > self.now {
            self.now = now;
        }

        // drain polled drivers (loopback, pipes) and the local queue
        let mut frames = 0usize;
        loop {
            let mut any = false;
            while let Some((id, packet)) = self.pending_local.pop_front() {
                any = true;
                frames += 1;
                self.ip_input(packet, id);
            }
            for id in self.netifs.ids() {
                let frame = {
                    let Some(netif) = self.netifs.get_mut(id) else {
                        continue;
                    };
                    if !netif.flags.up {
                        continue;
                    }
                    netif.driver.poll_receive()
                };
                if let Some(frame) = frame {
                    any = true;
                    frames += 1;
                    self.input(frame, id);
                }
            }
            if !any {
                break;
            }
        }

        // fire due timers
        while let Some((_, event)) = self.timers.pop_due(self.now) {
            self.dispatch_timer(event);
        }
        frames
    }

    /// Classify and process one received frame. Ethernet netifs expect
    /// an Ethernet II frame, everything else a raw IP packet.
    pub fn input(&mut self, frame: Buf, netif: NetifId) {
        self.stats.rx_frames += 1;
        let is_ethernet = match self.netifs.get(netif) {
            Some(n) if n.flags.up => n.flags.ethernet,
            _ => {
                self.stats.rx_dropped += 1;
                return;
            }
        };
        if is_ethernet {
            self.ethernet_input(frame, netif);
        } else {
            self.ip_input(frame, netif);
        }
    }

    /// Raw IP classification by version nibble.
    pub(crate) fn ip_input(&mut self, frame: Buf, netif: NetifId) {
        match frame.read_u8_at(0).map(|byte| byte >> 4) {
            Some(4) if self.cfg.ipv4 => self.ipv4_input(frame, netif),
            Some(6) if self.cfg.ipv6 => self.ipv6_input(frame, netif),
            _ => {
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn dispatch_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ArpTick => {
                self.arp_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.arp_tick_ms));
                self.timers.schedule(at, TimerEvent::ArpTick);
            }
            TimerEvent::NdTick => {
                self.nd_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.nd_tick_ms));
                self.timers.schedule(at, TimerEvent::NdTick);
            }
            TimerEvent::ReassTick => {
                self.reass_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.reass_tick_ms));
                self.timers.schedule(at, TimerEvent::ReassTick);
            }
            TimerEvent::TcpSlowTick => {
                self.tcp_slow_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.tcp_slow_tick_ms));
                self.timers.schedule(at, TimerEvent::TcpSlowTick);
            }
            TimerEvent::TcpFastTick => {
                self.tcp_fast_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.tcp_fast_tick_ms));
                self.timers.schedule(at, TimerEvent::TcpFastTick);
            }
            TimerEvent::IgmpTick => {
                self.igmp_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.group_tick_ms));
                self.timers.schedule(at, TimerEvent::IgmpTick);
            }
            TimerEvent::MldTick => {
                self.mld_tick();
                let at = self.now + Duration::from_millis(u64::from(self.cfg.group_tick_ms));
                self.timers.schedule(at, TimerEvent::MldTick);
            }
            TimerEvent::Dad { netif, slot } => self.dad_timer(netif, slot),
            TimerEvent::Callback(f) => f(self),
        }
    }

    // ---- netif management -------------------------------------------------

    /// Register a netif. Fires `NetifEvent::Added`.
    pub fn add_netif(&mut self, netif: Netif) -> Result<NetifId, StackError> {
        let id = self
            .netifs
            .acquire(netif)
            .ok_or(StackError::OutOfMemory)?;
        if self.default_netif.is_none() {
            self.default_netif = Some(id);
        }
        self.fire_netif_event(id, NetifEvent::Added);
        Ok(id)
    }

    /// Remove a netif: flushes neighbor caches and multicast
    /// memberships, aborts endpoints bound to it, fires `Removed`.
    pub fn remove_netif(&mut self, id: NetifId) -> Result<(), StackError> {
        if self.netifs.get(id).is_none() {
            return Err(StackError::Argument);
        }
        self.netif_set_down(id)?;
        self.arp.flush_netif(id);
        self.nd.flush_netif(id);
        let _ = self.igmp.flush_netif(id);
        let _ = self.mld.flush_netif(id);
        self.tcp_abort_on_netif(id);
        self.fire_netif_event(id, NetifEvent::Removed);
        self.netifs.release(id);
        if self.default_netif == Some(id) {
            self.default_netif = self.netifs.ids().first().copied();
        }
        Ok(())
    }

    /// Administratively enable the netif. On the first up-transition
    /// of an IPv6 capable ethernet netif a link-local address is
    /// derived from the hardware address.
    pub fn netif_set_up(&mut self, id: NetifId) -> Result<(), StackError> {
        let (was_up, derive_ll) = {
            let netif = self.netifs.get_mut(id).ok_or(StackError::Argument)?;
            let was_up = netif.flags.up;
            netif.flags.up = true;
            let derive_ll = netif.ipv6.is_empty() && netif.flags.ethernet;
            (was_up, derive_ll)
        };
        if !was_up {
            self.fire_netif_event(id, NetifEvent::StatusChanged { up: true });
            if self.cfg.ipv6 && derive_ll {
                let hwaddr = self.netifs.get(id).expect("checked").hwaddr;
                let ll = ipv6_link_local_from_hwaddr(hwaddr);
                let _ = self.netif_add_ipv6(id, ll);
            }
        }
        Ok(())
    }

    /// Administratively disable the netif.
    pub fn netif_set_down(&mut self, id: NetifId) -> Result<(), StackError> {
        let was_up = {
            let netif = self.netifs.get_mut(id).ok_or(StackError::Argument)?;
            let was_up = netif.flags.up;
            netif.flags.up = false;
            was_up
        };
        if was_up {
            self.fire_netif_event(id, NetifEvent::StatusChanged { up: false });
        }
        Ok(())
    }

    /// Report a link state change from the driver.
    pub fn netif_set_link(&mut self, id: NetifId, link_up: bool) -> Result<(), StackError> {
        let changed = {
            let netif = self.netifs.get_mut(id).ok_or(StackError::Argument)?;
            let changed = netif.flags.link_up != link_up;
            netif.flags.link_up = link_up;
            changed
        };
        if changed {
            self.fire_netif_event(id, NetifEvent::LinkChanged { link_up });
        }
        Ok(())
    }

    /// Set or clear the IPv4 configuration.
    pub fn netif_set_ipv4(
        &mut self,
        id: NetifId,
        config: Option<Ipv4Config>,
    ) -> Result<(), StackError> {
        let old = {
            let netif = self.netifs.get_mut(id).ok_or(StackError::Argument)?;
            core::mem::replace(&mut netif.ipv4, config)
        };
        if old != config {
            self.fire_netif_event(id, NetifEvent::Ipv4AddressChanged { old });
        }
        Ok(())
    }

    /// Add an IPv6 address. With DAD enabled it starts tentative and
    /// is probed before becoming preferred.
    pub fn netif_add_ipv6(&mut self, id: NetifId, addr: Ipv6Addr) -> Result<usize, StackError> {
        let dad = self.cfg.dad && self.cfg.ipv6;
        let max_slots = usize::from(self.cfg.ipv6_addrs_per_netif);
        let slot = {
            let netif = self.netifs.get_mut(id).ok_or(StackError::Argument)?;
            if netif.ipv6.len() >= max_slots || netif.ipv6.is_full() {
                return Err(StackError::OutOfMemory);
            }
            let state = if dad {
                Ipv6AddrState::Tentative { probes_sent: 0 }
            } else {
                Ipv6AddrState::Preferred
            };
            netif.ipv6.push(Ipv6AddrSlot { addr, state });
            netif.ipv6.len() - 1
        };
        self.fire_netif_event(
            id,
            NetifEvent::Ipv6AddressChanged {
                slot,
                old_state: Ipv6AddrState::Invalid,
            },
        );
        if dad {
            self.dad_start(id, slot);
        }
        Ok(slot)
    }

    /// Make `id` the fallback route target.
    pub fn set_default_netif(&mut self, id: NetifId) -> Result<(), StackError> {
        if self.netifs.get(id).is_none() {
            return Err(StackError::Argument);
        }
        self.default_netif = Some(id);
        Ok(())
    }

    /// The current default netif.
    pub fn default_netif(&self) -> Option<NetifId> {
        self.default_netif
    }

    /// Shared access to a netif.
    pub fn netif(&self, id: NetifId) -> Option<&Netif> {
        self.netifs.get(id)
    }

    /// Exclusive access to a netif (addresses must be changed through
    /// the stack methods so events fire).
    pub fn netif_mut(&mut self, id: NetifId) -> Option<&mut Netif> {
        self.netifs.get_mut(id)
    }

    /// Ids of all registered netifs.
    pub fn netif_ids(&self) -> Vec<NetifId> {
        self.netifs.ids()
    }

    /// Register an observer for netif lifecycle events. Fired
    /// synchronously on the mutating call.
    pub fn add_netif_ext_callback(&mut self, callback: Box<dyn FnMut(NetifId, &NetifEvent)>) {
        self.ext_callbacks.push(callback);
    }

    /// Allocate a netif client-data slot id for a protocol client.
    pub fn alloc_client_data_slot(&mut self) -> usize {
        let slot = self.next_client_data_slot;
        self.next_client_data_slot += 1;
        slot
    }

    pub(crate) fn fire_netif_event(&mut self, id: NetifId, event: NetifEvent) {
        for callback in self.ext_callbacks.iter_mut() {
            callback(id, &event);
        }
    }

    /// An ephemeral local port for implicit binds; loops through
    /// 0xc000..=0xffff.
    pub(crate) fn next_ephemeral(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = if port == 0xffff { 0xc000 } else { port + 1 };
        port
    }

    /// True if the ICMP limiter (when installed) allows an error
    /// towards `dst`.
    pub(crate) fn icmp_error_allowed(&mut self, dst: crate::addr::IpAddr) -> bool {
        match self.icmp_limiter.as_mut() {
            Some(limiter) => limiter(dst),
            None => true,
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("now", &self.now)
            .field("netifs", &self.netifs.len())
            .field("udp", &self.udp.len())
            .field("tcbs", &self.tcbs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{LoopbackDriver, NetifFlags};

    fn loopback_netif() -> Netif {
        Netif::new(
            "lo0",
            [0; 6],
            1500,
            NetifFlags {
                up: false,
                link_up: true,
                broadcast: false,
                multicast: true,
                ethernet: false,
            },
            Box::new(LoopbackDriver::new()),
        )
    }

    #[test]
    fn add_and_default_netif() {
        let mut stack = Stack::new(Config::default());
        let id = stack.add_netif(loopback_netif()).unwrap();
        assert_eq!(stack.default_netif(), Some(id));
        assert_eq!(stack.netif(id).unwrap().name, "lo0");
    }

    #[test]
    fn netif_pool_exhaustion() {
        let mut stack = Stack::new(Config {
            max_netifs: 1,
            ..Config::default()
        });
        stack.add_netif(loopback_netif()).unwrap();
        assert_eq!(
            stack.add_netif(loopback_netif()).unwrap_err(),
            StackError::OutOfMemory
        );
    }

    #[test]
    fn events_fire_on_lifecycle() {
        use alloc::rc::Rc;
        use core::cell::RefCell;

        let mut stack = Stack::new(Config::default());
        let events: Rc<RefCell<Vec<NetifEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        stack.add_netif_ext_callback(Box::new(move |_, event| {
            sink.borrow_mut().push(event.clone());
        }));

        let id = stack.add_netif(loopback_netif()).unwrap();
        stack.netif_set_up(id).unwrap();
        stack.netif_set_up(id).unwrap(); // no duplicate event
        stack.netif_set_down(id).unwrap();
        stack.remove_netif(id).unwrap();

        let events = events.borrow();
        assert!(matches!(events[0], NetifEvent::Added));
        assert!(matches!(events[1], NetifEvent::StatusChanged { up: true }));
        assert!(matches!(
            events[2],
            NetifEvent::StatusChanged { up: false }
        ));
        assert!(matches!(events.last().unwrap(), NetifEvent::Removed));
    }

    #[test]
    fn poll_advances_clock_monotonically() {
        let mut stack = Stack::new(Config::default());
        stack.poll(Instant::from_millis(100));
        assert_eq!(stack.now().as_millis(), 100);
        stack.poll(Instant::from_millis(50));
        assert_eq!(stack.now().as_millis(), 100);
    }

    #[test]
    fn call_later_fires_in_order() {
        use alloc::rc::Rc;
        use core::cell::RefCell;

        let mut stack = Stack::new(Config::default());
        let order: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        stack.call_later(
            Duration::from_millis(10),
            Box::new(move |_| a.borrow_mut().push(1)),
        );
        stack.call_later(
            Duration::from_millis(10),
            Box::new(move |_| b.borrow_mut().push(2)),
        );
        stack.poll(Instant::from_millis(10));
        assert_eq!(*order.borrow(), alloc::vec![1, 2]);
    }

    #[test]
    fn ethernet_netif_gets_link_local_on_up() {
        struct Null;
        impl crate::iface::LinkDriver for Null {
            fn link_output(&mut self, _f: &Buf) -> Result<(), StackError> {
                Ok(())
            }
        }
        let mut stack = Stack::new(Config::default());
        let id = stack
            .add_netif(Netif::new(
                "en0",
                [2, 0, 0, 0, 0, 7],
                1500,
                NetifFlags {
                    ethernet: true,
                    link_up: true,
                    ..Default::default()
                },
                Box::new(Null),
            ))
            .unwrap();
        stack.netif_set_up(id).unwrap();
        let slots = stack.netif(id).unwrap().ipv6_slots();
        assert_eq!(slots.len(), 1);
        assert!(matches!(
            slots[0].state,
            Ipv6AddrState::Tentative { .. }
        ));
        let octets = slots[0].addr.octets();
        assert_eq!(&octets[..2], &[0xfe, 0x80]);
    }

    #[test]
    fn ephemeral_ports_cycle() {
        let mut stack = Stack::new(Config::default());
        let first = stack.next_ephemeral();
        assert_eq!(first, 0xc000);
        stack.next_ephemeral_port = 0xffff;
        assert_eq!(stack.next_ephemeral(), 0xffff);
        assert_eq!(stack.next_ephemeral(), 0xc000);
    }
}
