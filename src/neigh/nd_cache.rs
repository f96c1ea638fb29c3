use alloc::vec::Vec;

use crate::addr::Ipv6Addr;
use crate::buf::Buf;
use crate::iface::NetifId;

/// Neighbor cache entry state (RFC 4861, section 7.3.2).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NdState {
    /// Multicast solicitation sent, awaiting an advertisement.
    Incomplete { probes_sent: u8 },
    /// Confirmed reachable recently.
    Reachable,
    /// Usable, reachability unconfirmed.
    Stale,
    /// First packet sent to a stale neighbor; waiting before probing.
    Delay,
    /// Unicast probes in flight.
    Probe { probes_sent: u8 },
}

/// One neighbor cache entry.
#[derive(Debug)]
pub struct NdEntry {
    pub ip: Ipv6Addr,
    pub netif: NetifId,
    pub hwaddr: [u8; 6],
    pub state: NdState,
    pub is_router: bool,
    /// Ticks (1 s granularity) remaining in the current state.
    pub timer: u16,
    /// Single outbound chain awaiting resolution (INCOMPLETE only).
    pub pending: Option<Buf>,
}

/// Actions the neighbor discovery tick asks the stack to perform.
#[derive(Debug)]
pub enum NdTickAction {
    /// Send a multicast neighbor solicitation for `ip` (to its
    /// solicited-node group).
    SolicitMulticast { netif: NetifId, ip: Ipv6Addr },
    /// Send a unicast neighbor solicitation probe.
    SolicitUnicast {
        netif: NetifId,
        ip: Ipv6Addr,
        hwaddr: [u8; 6],
    },
}

/// Result of a resolution attempt on the output path.
#[derive(Debug)]
pub enum NdResolve {
    /// Use this link address; the chain is handed back for
    /// transmission.
    Resolved([u8; 6], Buf),
    /// Chain parked; a multicast solicitation must be sent.
    Pending,
    /// Cache full of unresolvable entries; the chain was dropped.
    Full,
}

/// Maximum multicast solicitations for address resolution
/// (RFC 4861 MAX_MULTICAST_SOLICIT).
const MAX_MULTICAST_SOLICIT: u8 = 3;
/// Maximum unicast probes (RFC 4861 MAX_UNICAST_SOLICIT).
const MAX_UNICAST_SOLICIT: u8 = 3;

/// The IPv6 neighbor cache. Ticked once per second.
#[derive(Debug)]
pub struct NdCache {
    entries: Vec<NdEntry>,
    capacity: usize,
    /// Seconds a confirmed entry counts as reachable
    /// (REACHABLE_TIME).
    pub reachable_secs: u16,
    /// Seconds to linger in DELAY before probing (DELAY_FIRST_PROBE_TIME).
    pub delay_secs: u16,
    /// Seconds between solicitations (RETRANS_TIMER).
    pub retrans_secs: u16,
}

impl NdCache {
    pub fn new(capacity: usize) -> NdCache {
        NdCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            reachable_secs: 30,
            delay_secs: 5,
            retrans_secs: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_mut(&mut self, netif: NetifId, ip: Ipv6Addr) -> Option<&mut NdEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.netif == netif && entry.ip == ip)
    }

    /// Look up a usable link address (everything but INCOMPLETE; a
    /// stale entry transitions to DELAY as the RFC's "send and verify"
    /// rule requires).
    pub fn lookup_for_send(&mut self, netif: NetifId, ip: Ipv6Addr) -> Option<[u8; 6]> {
        let delay_secs = self.delay_secs;
        let entry = self.find_mut(netif, ip)?;
        match entry.state {
            NdState::Incomplete { .. } => None,
            NdState::Stale => {
                entry.state = NdState::Delay;
                entry.timer = delay_secs;
                Some(entry.hwaddr)
            }
            _ => Some(entry.hwaddr),
        }
    }

    /// Resolve `ip` for transmission of `chain`.
    pub fn resolve(&mut self, netif: NetifId, ip: Ipv6Addr, chain: Buf) -> NdResolve {
        if let Some(hwaddr) = self.lookup_for_send(netif, ip) {
            return NdResolve::Resolved(hwaddr, chain);
        }
        if let Some(entry) = self.find_mut(netif, ip) {
            // incomplete: park the newest chain
            entry.pending = Some(chain);
            return NdResolve::Pending;
        }
        if !self.make_room() {
            return NdResolve::Full;
        }
        self.entries.push(NdEntry {
            ip,
            netif,
            hwaddr: [0; 6],
            state: NdState::Incomplete { probes_sent: 1 },
            is_router: false,
            timer: self.retrans_secs,
            pending: Some(chain),
        });
        NdResolve::Pending
    }

    /// Process a link-layer address learned from a neighbor
    /// solicitation's source option (RFC 4861 7.2.3: create/refresh as
    /// STALE).
    pub fn learn_from_solicitation(&mut self, netif: NetifId, ip: Ipv6Addr, hwaddr: [u8; 6]) {
        if let Some(entry) = self.find_mut(netif, ip) {
            if entry.hwaddr != hwaddr || matches!(entry.state, NdState::Incomplete { .. }) {
                entry.hwaddr = hwaddr;
                entry.state = NdState::Stale;
                entry.timer = 0;
            }
            return;
        }
        if self.make_room() {
            self.entries.push(NdEntry {
                ip,
                netif,
                hwaddr,
                state: NdState::Stale,
                is_router: false,
                timer: 0,
                pending: None,
            });
        }
    }

    /// Process a neighbor advertisement (RFC 4861, section 7.2.5).
    /// Returns a parked chain that can now be transmitted.
    pub fn process_advertisement(
        &mut self,
        netif: NetifId,
        target: Ipv6Addr,
        hwaddr: Option<[u8; 6]>,
        solicited: bool,
        override_flag: bool,
        is_router: bool,
    ) -> Option<Buf> {
        let reachable_secs = self.reachable_secs;
        let entry = self.find_mut(netif, target)?;

        let incomplete = matches!(entry.state, NdState::Incomplete { .. });
        if incomplete {
            let hwaddr = hwaddr?;
            entry.hwaddr = hwaddr;
            entry.is_router = is_router;
            if solicited {
                entry.state = NdState::Reachable;
                entry.timer = reachable_secs;
            } else {
                entry.state = NdState::Stale;
            }
            return entry.pending.take();
        }

        // not incomplete: only update when override is set or the
        // address matches the cached one
        let same_addr = hwaddr.is_none() || hwaddr == Some(entry.hwaddr);
        if !override_flag && !same_addr {
            // conflicting unsolicited advertisement: demote to stale
            if matches!(entry.state, NdState::Reachable) {
                entry.state = NdState::Stale;
            }
            return None;
        }
        if let Some(hwaddr) = hwaddr {
            entry.hwaddr = hwaddr;
        }
        entry.is_router = is_router;
        if solicited {
            entry.state = NdState::Reachable;
            entry.timer = reachable_secs;
        } else if !same_addr {
            entry.state = NdState::Stale;
        }
        None
    }

    /// One second tick driving the per-entry timers.
    pub fn tick(&mut self) -> Vec<NdTickAction> {
        let mut actions = Vec::new();
        let retrans_secs = self.retrans_secs;

        for entry in self.entries.iter_mut() {
            if entry.timer > 0 {
                entry.timer -= 1;
                if entry.timer > 0 {
                    continue;
                }
            } else if !matches!(entry.state, NdState::Incomplete { .. }) {
                continue;
            }
            match entry.state {
                NdState::Incomplete { probes_sent } => {
                    if probes_sent < MAX_MULTICAST_SOLICIT {
                        entry.state = NdState::Incomplete {
                            probes_sent: probes_sent + 1,
                        };
                        entry.timer = retrans_secs;
                        actions.push(NdTickAction::SolicitMulticast {
                            netif: entry.netif,
                            ip: entry.ip,
                        });
                    }
                    // else: expired, removed below (pending dropped)
                }
                NdState::Reachable => {
                    entry.state = NdState::Stale;
                }
                NdState::Delay => {
                    entry.state = NdState::Probe { probes_sent: 1 };
                    entry.timer = retrans_secs;
                    actions.push(NdTickAction::SolicitUnicast {
                        netif: entry.netif,
                        ip: entry.ip,
                        hwaddr: entry.hwaddr,
                    });
                }
                NdState::Probe { probes_sent } => {
                    if probes_sent < MAX_UNICAST_SOLICIT {
                        entry.state = NdState::Probe {
                            probes_sent: probes_sent + 1,
                        };
                        entry.timer = retrans_secs;
                        actions.push(NdTickAction::SolicitUnicast {
                            netif: entry.netif,
                            ip: entry.ip,
                            hwaddr: entry.hwaddr,
                        });
                    }
                    // else: unreachable, removed below
                }
                NdState::Stale => {}
            }
        }

        self.entries.retain(|entry| match entry.state {
            NdState::Incomplete { probes_sent } => {
                probes_sent < MAX_MULTICAST_SOLICIT || entry.timer > 0
            }
            NdState::Probe { probes_sent } => probes_sent < MAX_UNICAST_SOLICIT || entry.timer > 0,
            _ => true,
        });
        actions
    }

    /// Drop all entries bound to `netif`.
    pub fn flush_netif(&mut self, netif: NetifId) {
        self.entries.retain(|entry| entry.netif != netif);
    }

    fn make_room(&mut self) -> bool {
        if self.entries.len() < self.capacity {
            return true;
        }
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !matches!(entry.state, NdState::Incomplete { .. }))
            .map(|(i, _)| i)
            .next_back()
            .or_else(|| self.entries.len().checked_sub(1));
        match victim {
            Some(i) => {
                self.entries.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Netif;
    use crate::pool::Pool;

    fn netif_id() -> NetifId {
        struct Null;
        impl crate::iface::LinkDriver for Null {
            fn link_output(&mut self, _f: &Buf) -> Result<(), crate::err::StackError> {
                Ok(())
            }
        }
        let mut netifs: Pool<Netif> = Pool::new(1);
        netifs
            .acquire(Netif::new(
                "t0",
                [0; 6],
                1500,
                Default::default(),
                alloc::boxed::Box::new(Null),
            ))
            .unwrap()
    }

    fn addr(tail: u16) -> Ipv6Addr {
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, tail)
    }

    const MAC1: [u8; 6] = [2, 0, 0, 0, 0, 1];

    #[test]
    fn resolve_then_solicited_advertisement() {
        let id = netif_id();
        let mut cache = NdCache::new(4);

        assert!(matches!(
            cache.resolve(id, addr(1), Buf::from_static(b"parked")),
            NdResolve::Pending
        ));
        let released = cache
            .process_advertisement(id, addr(1), Some(MAC1), true, true, false)
            .unwrap();
        assert_eq!(released.to_vec(), b"parked");
        assert!(matches!(
            cache.resolve(id, addr(1), Buf::empty()),
            NdResolve::Resolved(MAC1, _)
        ));
    }

    #[test]
    fn unsolicited_advertisement_leaves_stale() {
        let id = netif_id();
        let mut cache = NdCache::new(4);
        cache.resolve(id, addr(1), Buf::empty());
        cache.process_advertisement(id, addr(1), Some(MAC1), false, true, false);
        // usable, but entry went stale -> sending flips it to delay
        assert!(cache.lookup_for_send(id, addr(1)).is_some());
    }

    #[test]
    fn incomplete_retransmits_then_dies() {
        let id = netif_id();
        let mut cache = NdCache::new(4);
        cache.resolve(id, addr(1), Buf::from_static(b"doomed"));

        let mut solicits = 0;
        for _ in 0..8 {
            solicits += cache
                .tick()
                .iter()
                .filter(|a| matches!(a, NdTickAction::SolicitMulticast { .. }))
                .count();
        }
        // 2 retransmissions after the initial solicitation
        assert_eq!(solicits, MAX_MULTICAST_SOLICIT as usize - 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn reachable_ages_to_stale_then_probes() {
        let id = netif_id();
        let mut cache = NdCache::new(4);
        cache.reachable_secs = 1;
        cache.resolve(id, addr(1), Buf::empty());
        cache.process_advertisement(id, addr(1), Some(MAC1), true, true, false);

        cache.tick(); // reachable timer expires -> stale
        assert_eq!(cache.lookup_for_send(id, addr(1)), Some(MAC1)); // stale -> delay
        let mut unicast_probes = 0;
        for _ in 0..16 {
            unicast_probes += cache
                .tick()
                .iter()
                .filter(|a| matches!(a, NdTickAction::SolicitUnicast { .. }))
                .count();
        }
        assert_eq!(unicast_probes, MAX_UNICAST_SOLICIT as usize);
        // neighbor never answered the probes: entry dropped
        assert!(cache.is_empty());
    }

    #[test]
    fn learn_from_solicitation_creates_stale() {
        let id = netif_id();
        let mut cache = NdCache::new(4);
        cache.learn_from_solicitation(id, addr(9), MAC1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup_for_send(id, addr(9)), Some(MAC1));
    }

    #[test]
    fn router_flag_tracked() {
        let id = netif_id();
        let mut cache = NdCache::new(4);
        cache.resolve(id, addr(1), Buf::empty());
        cache.process_advertisement(id, addr(1), Some(MAC1), true, true, true);
        assert!(cache.entries[0].is_router);
    }
}
