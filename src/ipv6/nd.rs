//! Neighbor discovery (RFC 4861) and duplicate address detection
//! (RFC 4862) glue between the ICMPv6 input path and the neighbor
//! cache.

use alloc::vec::Vec;

use crate::addr::{ipv6_link_local_from_hwaddr, ipv6_multicast_mac, ipv6_solicited_node, Ipv6Addr};
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::iface::{Ipv6AddrState, NetifEvent, NetifId};
use crate::ipv6::Ipv6Router;
use crate::link::EtherType;
use crate::neigh::NdTickAction;
use crate::net::{Icmpv6Header, Icmpv6Type, NdOption, NdOptionsIterator};
use crate::stack::{Stack, TimerEvent};
use crate::time::Duration;
use crate::IpNumber;

impl Stack {
    /// Dispatch one neighbor discovery message.
    pub(crate) fn nd_input(
        &mut self,
        icmp_type: Icmpv6Type,
        options: &[u8],
        netif: NetifId,
        src: Ipv6Addr,
        _dst: Ipv6Addr,
    ) {
        let mut iterator = NdOptionsIterator::new(options);
        let mut source_lladdr = None;
        let mut target_lladdr = None;
        let mut prefixes = Vec::new();
        for option in &mut iterator {
            match option {
                NdOption::SourceLinkLayerAddr(addr) => source_lladdr = Some(addr),
                NdOption::TargetLinkLayerAddr(addr) => target_lladdr = Some(addr),
                NdOption::PrefixInformation {
                    prefix_len,
                    autonomous,
                    valid_lifetime_s,
                    prefix,
                    ..
                } => prefixes.push((prefix_len, autonomous, valid_lifetime_s, prefix)),
                NdOption::Mtu(_) | NdOption::Unknown { .. } => {}
            }
        }
        if iterator.malformed {
            self.stats.rx_dropped += 1;
            return;
        }

        match icmp_type {
            Icmpv6Type::NeighborSolicitation { target } => {
                self.ns_input(netif, src, target.into(), source_lladdr);
            }
            Icmpv6Type::NeighborAdvertisement {
                router,
                solicited,
                override_flag,
                target,
            } => {
                self.na_input(
                    netif,
                    target.into(),
                    target_lladdr,
                    solicited,
                    override_flag,
                    router,
                );
            }
            Icmpv6Type::RouterAdvertisement(ra) => {
                // only link-local routers are believed (RFC 4861 6.1.2)
                if crate::addr::ipv6_scope(src) != 0x02 {
                    return;
                }
                if let Some(lladdr) = source_lladdr {
                    self.nd.learn_from_solicitation(netif, src, lladdr);
                }
                self.update_router(netif, src, ra.router_lifetime_s);
                for (prefix_len, autonomous, valid_lifetime_s, prefix) in prefixes {
                    if autonomous && prefix_len == 64 && valid_lifetime_s > 0 {
                        self.slaac_configure(netif, prefix.into());
                    }
                }
            }
            Icmpv6Type::Redirect { target, .. } => {
                if let Some(lladdr) = target_lladdr {
                    self.nd.learn_from_solicitation(netif, target.into(), lladdr);
                }
            }
            // hosts do not answer router solicitations
            Icmpv6Type::RouterSolicitation => {}
            _ => {}
        }
    }

    fn ns_input(
        &mut self,
        netif: NetifId,
        src: Ipv6Addr,
        target: Ipv6Addr,
        source_lladdr: Option<[u8; 6]>,
    ) {
        let slot_state = self.ipv6_slot_state(netif, target);

        if src.is_unspecified() {
            // the sender is performing DAD on `target`
            match slot_state {
                Some((slot, Ipv6AddrState::Tentative { .. })) => {
                    // both of us want the address: neither gets it
                    self.dad_conflict(netif, slot);
                }
                Some((_, state)) if state.is_valid() => {
                    // defend our address towards all nodes
                    self.send_neighbor_advertisement(
                        netif,
                        target,
                        Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1),
                        false,
                    );
                }
                _ => {}
            }
            return;
        }

        if let Some((_, state)) = slot_state {
            if state.is_valid() {
                if let Some(lladdr) = source_lladdr {
                    self.nd.learn_from_solicitation(netif, src, lladdr);
                }
                self.send_neighbor_advertisement(netif, target, src, true);
            }
        }
    }

    fn na_input(
        &mut self,
        netif: NetifId,
        target: Ipv6Addr,
        target_lladdr: Option<[u8; 6]>,
        solicited: bool,
        override_flag: bool,
        router: bool,
    ) {
        // an advertisement for our tentative address is a DAD failure
        if let Some((slot, Ipv6AddrState::Tentative { .. })) = self.ipv6_slot_state(netif, target)
        {
            self.dad_conflict(netif, slot);
            return;
        }
        if let Some(released) = self.nd.process_advertisement(
            netif,
            target,
            target_lladdr,
            solicited,
            override_flag,
            router,
        ) {
            // the parked chain can leave now
            if let Some(hwaddr) = target_lladdr {
                let _ = self.ethernet_output(netif, hwaddr, EtherType::IPV6, released);
            }
        }
    }

    fn ipv6_slot_state(
        &self,
        netif: NetifId,
        addr: Ipv6Addr,
    ) -> Option<(usize, Ipv6AddrState)> {
        self.netifs.get(netif)?.ipv6_slots().iter().enumerate().find_map(|(index, slot)| {
            (slot.addr == addr && !matches!(slot.state, Ipv6AddrState::Invalid))
                .then_some((index, slot.state))
        })
    }

    fn update_router(&mut self, netif: NetifId, addr: Ipv6Addr, lifetime_s: u16) {
        if let Some(router) = self
            .ip6_routers
            .iter_mut()
            .find(|router| router.netif == netif && router.addr == addr)
        {
            router.lifetime_s = lifetime_s;
        } else if lifetime_s > 0 {
            self.ip6_routers.push(Ipv6Router {
                netif,
                addr,
                lifetime_s,
            });
        }
        self.ip6_routers.retain(|router| router.lifetime_s > 0);
    }

    /// Stateless autoconfiguration from an advertised /64 prefix.
    fn slaac_configure(&mut self, netif: NetifId, prefix: Ipv6Addr) {
        let Some(n) = self.netifs.get(netif) else {
            return;
        };
        if !n.flags.ethernet {
            return;
        }
        let iid = ipv6_link_local_from_hwaddr(n.hwaddr).octets();
        let prefix_octets = prefix.octets();
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&prefix_octets[..8]);
        octets[8..].copy_from_slice(&iid[8..]);
        let addr = Ipv6Addr::from(octets);
        if n.ipv6_slots().iter().any(|slot| slot.addr == addr) {
            return;
        }
        let _ = self.netif_add_ipv6(netif, addr);
    }

    // ---- message transmit -------------------------------------------------

    /// Build one ICMPv6 message and transmit it directly (the callers
    /// always know the link destination, so no resolution recursion).
    fn send_nd_message(
        &mut self,
        netif: NetifId,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        dst_mac: Option<[u8; 6]>,
        icmp_type: Icmpv6Type,
        options: &[u8],
    ) -> Result<(), StackError> {
        let header =
            Icmpv6Header::with_checksum(icmp_type, src.octets(), dst.octets(), options);
        let fixed = header.to_bytes();
        let mut payload = Buf::alloc_heap(Headroom::Ip, fixed.len() + options.len());
        payload
            .copy_from_slice(0, &fixed)
            .expect("sized allocation");
        payload
            .copy_from_slice(fixed.len(), options)
            .expect("sized allocation");

        let ip = crate::net::Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            payload_length: payload.tot_len() as u16,
            next_header: IpNumber::IPV6_ICMP,
            // all neighbor discovery packets use the maximum hop limit
            hop_limit: 255,
            source: src.octets(),
            destination: dst.octets(),
        };
        let packet = Self::prepend_ipv6_header(&ip, payload);

        self.stats.icmp_tx += 1;
        self.stats.ip6_tx += 1;
        let ethernet = self
            .netifs
            .get(netif)
            .map(|n| n.flags.ethernet)
            .unwrap_or(false);
        if !ethernet {
            return self.raw_link_output(netif, &packet);
        }
        let mac = match dst_mac {
            Some(mac) => mac,
            None if dst.is_multicast() => ipv6_multicast_mac(dst),
            // unicast without a resolved link address: nothing to do
            None => return Ok(()),
        };
        self.ethernet_output(netif, mac, EtherType::IPV6, packet)
    }

    /// Multicast (resolution) or unicast (probe) neighbor
    /// solicitation.
    pub(crate) fn send_neighbor_solicitation(
        &mut self,
        netif: NetifId,
        target: Ipv6Addr,
        unicast_hwaddr: Option<[u8; 6]>,
    ) {
        let Some(src) = self.select_ipv6_source(netif, target) else {
            return;
        };
        let hwaddr = match self.netifs.get(netif) {
            Some(n) => n.hwaddr,
            None => return,
        };
        let mut options = Vec::new();
        NdOption::SourceLinkLayerAddr(hwaddr).write(&mut options);

        let (dst, dst_mac) = match unicast_hwaddr {
            Some(mac) => (target, Some(mac)),
            None => (ipv6_solicited_node(target), None),
        };
        let _ = self.send_nd_message(
            netif,
            src,
            dst,
            dst_mac,
            Icmpv6Type::NeighborSolicitation {
                target: target.octets(),
            },
            &options,
        );
    }

    pub(crate) fn send_neighbor_advertisement(
        &mut self,
        netif: NetifId,
        target: Ipv6Addr,
        dst: Ipv6Addr,
        solicited: bool,
    ) {
        let hwaddr = match self.netifs.get(netif) {
            Some(n) => n.hwaddr,
            None => return,
        };
        let mut options = Vec::new();
        NdOption::TargetLinkLayerAddr(hwaddr).write(&mut options);
        let dst_mac = if dst.is_multicast() {
            None
        } else {
            self.nd.lookup_for_send(netif, dst)
        };
        let _ = self.send_nd_message(
            netif,
            target,
            dst,
            dst_mac,
            Icmpv6Type::NeighborAdvertisement {
                router: false,
                solicited,
                override_flag: true,
                target: target.octets(),
            },
            &options,
        );
    }

    /// Ask the routers on the link to advertise themselves (sent when
    /// an address finishes DAD, RFC 4861 section 6.3.7).
    pub(crate) fn send_router_solicitation(&mut self, netif: NetifId) {
        let Some(src) = self
            .select_ipv6_source(netif, Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2))
        else {
            return;
        };
        let hwaddr = match self.netifs.get(netif) {
            Some(n) => n.hwaddr,
            None => return,
        };
        let mut options = Vec::new();
        NdOption::SourceLinkLayerAddr(hwaddr).write(&mut options);
        let _ = self.send_nd_message(
            netif,
            src,
            Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2),
            None,
            Icmpv6Type::RouterSolicitation,
            &options,
        );
    }

    /// One second neighbor discovery tick: cache transitions plus
    /// router lifetime aging.
    pub(crate) fn nd_tick(&mut self) {
        for action in self.nd.tick() {
            match action {
                NdTickAction::SolicitMulticast { netif, ip } => {
                    self.send_neighbor_solicitation(netif, ip, None);
                }
                NdTickAction::SolicitUnicast { netif, ip, hwaddr } => {
                    self.send_neighbor_solicitation(netif, ip, Some(hwaddr));
                }
            }
        }
        for router in self.ip6_routers.iter_mut() {
            router.lifetime_s = router.lifetime_s.saturating_sub(1);
        }
        self.ip6_routers.retain(|router| router.lifetime_s > 0);
    }

    // ---- duplicate address detection --------------------------------------

    /// Kick off DAD for a freshly added (tentative) address.
    pub(crate) fn dad_start(&mut self, netif: NetifId, slot: usize) {
        // random delay before the first probe desynchronizes hosts
        // that woke up together
        let jitter = u64::from(self.rng.below(self.cfg.dad_retrans_ms.max(1)));
        let at = self.now + Duration::from_millis(jitter);
        self.timers.schedule(at, TimerEvent::Dad { netif, slot });
    }

    /// DAD probe timer: send the next solicitation or promote the
    /// address.
    pub(crate) fn dad_timer(&mut self, netif: NetifId, slot: usize) {
        let Some((addr, probes_sent)) = self.netifs.get(netif).and_then(|n| {
            n.ipv6_slots().get(slot).and_then(|entry| match entry.state {
                Ipv6AddrState::Tentative { probes_sent } => Some((entry.addr, probes_sent)),
                _ => None,
            })
        }) else {
            return;
        };

        if probes_sent >= self.cfg.dad_probes {
            // nobody objected: the address is ours
            if let Some(n) = self.netifs.get_mut(netif) {
                if let Some(entry) = n.ipv6.get_mut(slot) {
                    entry.state = Ipv6AddrState::Preferred;
                }
            }
            self.fire_netif_event(
                netif,
                NetifEvent::Ipv6AddressChanged {
                    slot,
                    old_state: Ipv6AddrState::Tentative { probes_sent },
                },
            );
            // with a usable address, ask the routers to identify
            // themselves
            self.send_router_solicitation(netif);
            return;
        }

        // probe with the unspecified source
        let solicited_node = ipv6_solicited_node(addr);
        let _ = self.send_nd_message(
            netif,
            Ipv6Addr::UNSPECIFIED,
            solicited_node,
            None,
            Icmpv6Type::NeighborSolicitation {
                target: addr.octets(),
            },
            &[],
        );
        if let Some(n) = self.netifs.get_mut(netif) {
            if let Some(entry) = n.ipv6.get_mut(slot) {
                entry.state = Ipv6AddrState::Tentative {
                    probes_sent: probes_sent + 1,
                };
            }
        }
        let at = self.now + Duration::from_millis(u64::from(self.cfg.dad_retrans_ms));
        self.timers.schedule(at, TimerEvent::Dad { netif, slot });
    }

    /// Another node owns (or also wants) a tentative address.
    fn dad_conflict(&mut self, netif: NetifId, slot: usize) {
        let old_state = {
            let Some(n) = self.netifs.get_mut(netif) else {
                return;
            };
            let Some(entry) = n.ipv6.get_mut(slot) else {
                return;
            };
            let old = entry.state;
            entry.state = Ipv6AddrState::Invalid;
            old
        };
        log::warn!("ipv6: duplicate address detected, slot {slot} invalidated");
        self.fire_netif_event(netif, NetifEvent::Ipv6AddressChanged { slot, old_state });
    }
}
