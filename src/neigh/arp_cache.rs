use alloc::vec::Vec;

use crate::addr::Ipv4Addr;
use crate::buf::Buf;
use crate::iface::NetifId;

/// State of one ARP cache entry. Absent entries are the spec's EMPTY
/// state; EXPIRED is the transient state an aged-out entry passes
/// through while the tick removes it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArpState {
    /// Request sent, awaiting the reply. May hold one queued outbound
    /// chain.
    Incomplete,
    /// Resolved recently.
    Reachable,
    /// Resolved, but old enough that the next use should refresh it.
    Stale,
}

/// One ARP table entry.
#[derive(Debug)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub netif: NetifId,
    pub hwaddr: [u8; 6],
    pub state: ArpState,
    /// Coarse timer ticks since the last state change.
    pub age: u16,
    /// Single outbound chain awaiting resolution (INCOMPLETE only).
    pub pending: Option<Buf>,
}

/// Actions the coarse aging tick asks the stack to perform.
#[derive(Debug)]
pub enum ArpTickAction {
    /// Retransmit a request for a still unresolved entry.
    Retransmit { netif: NetifId, ip: Ipv4Addr },
}

/// Result of a resolution attempt on the output path.
#[derive(Debug)]
pub enum ArpResolve {
    /// Use this link address; the chain is handed back for
    /// transmission.
    Resolved([u8; 6], Buf),
    /// Entry created or refreshed; a request must be sent. The chain
    /// was queued (or replaced the previously queued one).
    Pending,
    /// The table is full of unresolvable entries; the chain was
    /// dropped.
    Full,
}

/// The ARP cache: a fixed number of entries aged by a coarse periodic
/// timer.
#[derive(Debug)]
pub struct ArpCache {
    entries: Vec<ArpEntry>,
    capacity: usize,
    /// Ticks after which a reachable entry becomes stale.
    pub reachable_ticks: u16,
    /// Ticks after which a stale entry is dropped.
    pub stale_ticks: u16,
    /// Ticks an incomplete entry may wait for a reply.
    pub incomplete_ticks: u16,
}

impl ArpCache {
    pub fn new(capacity: usize) -> ArpCache {
        ArpCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            // defaults for a 5 second tick: 4 minutes reachable,
            // 1 more minute stale, 2 ticks for resolution
            reachable_ticks: 48,
            stale_ticks: 12,
            incomplete_ticks: 2,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the link address for `ip`. Only resolved entries
    /// satisfy lookups.
    pub fn lookup(&self, netif: NetifId, ip: Ipv4Addr) -> Option<[u8; 6]> {
        self.entries
            .iter()
            .find(|entry| entry.netif == netif && entry.ip == ip)
            .filter(|entry| entry.state != ArpState::Incomplete)
            .map(|entry| entry.hwaddr)
    }

    /// Resolve `ip` for transmission of `chain`. When unresolved the
    /// chain is parked on the entry (replacing and dropping any older
    /// parked chain) and `Pending` asks the caller to send a request.
    pub fn resolve(&mut self, netif: NetifId, ip: Ipv4Addr, chain: Buf) -> ArpResolve {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.netif == netif && entry.ip == ip)
        {
            return match entry.state {
                ArpState::Incomplete => {
                    // single queue slot: newest chain wins
                    entry.pending = Some(chain);
                    ArpResolve::Pending
                }
                ArpState::Reachable | ArpState::Stale => {
                    ArpResolve::Resolved(entry.hwaddr, chain)
                }
            };
        }

        if !self.make_room() {
            return ArpResolve::Full;
        }
        self.entries.push(ArpEntry {
            ip,
            netif,
            hwaddr: [0; 6],
            state: ArpState::Incomplete,
            age: 0,
            pending: Some(chain),
        });
        ArpResolve::Pending
    }

    /// Record a (sender ip, sender hw) binding learned from an ARP
    /// packet. Returns a parked chain that can now be transmitted.
    ///
    /// `create` controls whether a new entry may be made for an
    /// unsolicited binding (gratuitous ARP filtering happens in the
    /// caller).
    pub fn learn(
        &mut self,
        netif: NetifId,
        ip: Ipv4Addr,
        hwaddr: [u8; 6],
        create: bool,
    ) -> Option<Buf> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.netif == netif && entry.ip == ip)
        {
            entry.hwaddr = hwaddr;
            entry.state = ArpState::Reachable;
            entry.age = 0;
            return entry.pending.take();
        }
        if create && self.make_room() {
            self.entries.push(ArpEntry {
                ip,
                netif,
                hwaddr,
                state: ArpState::Reachable,
                age: 0,
                pending: None,
            });
        }
        None
    }

    /// Coarse aging tick. Expired entries are removed (dropping any
    /// parked chain); still unresolved entries get their request
    /// retransmitted.
    pub fn tick(&mut self) -> Vec<ArpTickAction> {
        let mut actions = Vec::new();
        let reachable_ticks = self.reachable_ticks;
        let stale_ticks = self.stale_ticks;
        let incomplete_ticks = self.incomplete_ticks;

        for entry in self.entries.iter_mut() {
            entry.age = entry.age.saturating_add(1);
            match entry.state {
                ArpState::Reachable if entry.age >= reachable_ticks => {
                    entry.state = ArpState::Stale;
                    entry.age = 0;
                }
                ArpState::Incomplete if entry.age < incomplete_ticks => {
                    actions.push(ArpTickAction::Retransmit {
                        netif: entry.netif,
                        ip: entry.ip,
                    });
                }
                _ => {}
            }
        }
        // drop expired entries (incomplete past their wait, stale past
        // their lifetime); parked chains die with the entry
        self.entries.retain(|entry| match entry.state {
            ArpState::Incomplete => entry.age < incomplete_ticks,
            ArpState::Stale => entry.age < stale_ticks,
            ArpState::Reachable => true,
        });
        actions
    }

    /// Drop all entries bound to `netif` (netif removal).
    pub fn flush_netif(&mut self, netif: NetifId) {
        self.entries.retain(|entry| entry.netif != netif);
    }

    /// Ensure a slot is available, evicting the oldest recyclable
    /// entry if needed. Entries awaiting resolution are only evicted
    /// when nothing else can be.
    fn make_room(&mut self) -> bool {
        if self.entries.len() < self.capacity {
            return true;
        }
        // prefer evicting the oldest resolved entry
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state != ArpState::Incomplete)
            .max_by_key(|(_, entry)| entry.age)
            .map(|(i, _)| i)
            .or_else(|| {
                self.entries
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, entry)| entry.age)
                    .map(|(i, _)| i)
            });
        match victim {
            Some(i) => {
                // recycling drops any queued chain
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

    const IP1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const IP2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const MAC1: [u8; 6] = [2, 0, 0, 0, 0, 1];

    #[test]
    fn resolve_queues_and_learn_releases() {
        let id = netif_id();
        let mut cache = ArpCache::new(4);

        assert!(matches!(
            cache.resolve(id, IP1, Buf::from_static(b"queued")),
            ArpResolve::Pending
        ));
        // unresolved entries do not satisfy lookups
        assert_eq!(cache.lookup(id, IP1), None);

        let released = cache.learn(id, IP1, MAC1, false).unwrap();
        assert_eq!(released.to_vec(), b"queued");
        assert_eq!(cache.lookup(id, IP1), Some(MAC1));

        // further resolves hit directly and hand the chain back
        match cache.resolve(id, IP1, Buf::from_static(b"x")) {
            ArpResolve::Resolved(mac, chain) => {
                assert_eq!(mac, MAC1);
                assert_eq!(chain.to_vec(), b"x");
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn newest_pending_chain_wins() {
        let id = netif_id();
        let mut cache = ArpCache::new(4);
        cache.resolve(id, IP1, Buf::from_static(b"old"));
        cache.resolve(id, IP1, Buf::from_static(b"new"));
        let released = cache.learn(id, IP1, MAC1, false).unwrap();
        assert_eq!(released.to_vec(), b"new");
    }

    #[test]
    fn unsolicited_learn_respects_create_flag() {
        let id = netif_id();
        let mut cache = ArpCache::new(4);
        assert!(cache.learn(id, IP2, MAC1, false).is_none());
        assert_eq!(cache.lookup(id, IP2), None);
        cache.learn(id, IP2, MAC1, true);
        assert_eq!(cache.lookup(id, IP2), Some(MAC1));
    }

    #[test]
    fn aging_stale_then_gone() {
        let id = netif_id();
        let mut cache = ArpCache::new(4);
        cache.reachable_ticks = 2;
        cache.stale_ticks = 2;
        cache.learn(id, IP1, MAC1, true);

        cache.tick();
        cache.tick(); // becomes stale
        assert_eq!(cache.lookup(id, IP1), Some(MAC1)); // stale still answers
        cache.tick();
        cache.tick(); // stale lifetime over
        assert_eq!(cache.lookup(id, IP1), None);
    }

    #[test]
    fn incomplete_entry_expires_and_drops_chain() {
        let id = netif_id();
        let mut cache = ArpCache::new(4);
        cache.incomplete_ticks = 2;
        cache.resolve(id, IP1, Buf::from_static(b"doomed"));

        let actions = cache.tick();
        assert_eq!(actions.len(), 1); // one retransmit
        let actions = cache.tick();
        assert!(actions.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_prefers_resolved_entries() {
        let id = netif_id();
        let mut cache = ArpCache::new(2);
        cache.learn(id, IP1, MAC1, true);
        cache.resolve(id, IP2, Buf::from_static(b"waiting"));
        // full: next resolve for a third address evicts the resolved
        // entry, not the incomplete one
        let ip3 = Ipv4Addr::new(10, 0, 0, 3);
        assert!(matches!(
            cache.resolve(id, ip3, Buf::from_static(b"y")),
            ArpResolve::Pending
        ));
        assert_eq!(cache.lookup(id, IP1), None);
        // the incomplete entry survived
        let released = cache.learn(id, IP2, MAC1, false).unwrap();
        assert_eq!(released.to_vec(), b"waiting");
    }
}
