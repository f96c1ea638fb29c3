//! IPv6 input and output pipelines.

use crate::addr::{
    ipv6_common_prefix_len, ipv6_multicast_mac, ipv6_scope, ipv6_solicited_node, IpAddr, Ipv6Addr,
};
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::iface::{Ipv6AddrState, NetifId};
use crate::neigh::NdResolve;
use crate::net::{
    walk_ipv6_extensions, Ipv6ExtFailure, Ipv6FragmentHeader, Ipv6Header,
};
use crate::reass::{ReassError, ReassKey};
use crate::stack::Stack;
use crate::IpNumber;

mod nd;

/// A default router learned from a router advertisement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ipv6Router {
    pub netif: NetifId,
    pub addr: Ipv6Addr,
    /// Remaining lifetime in seconds.
    pub lifetime_s: u16,
}

/// Routing decision for an IPv6 destination.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Ipv6Route {
    pub netif: NetifId,
    pub next_hop: Ipv6Addr,
    pub local: bool,
}

impl Ipv6Route {
    #[inline]
    pub(crate) fn netif(&self) -> NetifId {
        self.netif
    }
}

impl Stack {
    /// Route `dst`: own addresses deliver locally, on-link prefixes
    /// and link-local destinations resolve directly, everything else
    /// goes through a default router.
    pub(crate) fn route_ipv6(&self, dst: Ipv6Addr) -> Result<Ipv6Route, StackError> {
        if dst.is_loopback() {
            let netif = self.default_netif.ok_or(StackError::Routing)?;
            return Ok(Ipv6Route {
                netif,
                next_hop: dst,
                local: true,
            });
        }
        for (id, netif) in self.netifs.iter() {
            if netif.has_ipv6_addr(dst) {
                return Ok(Ipv6Route {
                    netif: id,
                    next_hop: dst,
                    local: true,
                });
            }
        }

        let usable_default = || -> Option<NetifId> {
            self.default_netif
                .filter(|id| {
                    self.netifs
                        .get(*id)
                        .map(|n| n.is_usable())
                        .unwrap_or(false)
                })
                .or_else(|| {
                    self.netifs
                        .iter()
                        .find(|(_, n)| n.is_usable())
                        .map(|(id, _)| id)
                })
        };

        if dst.is_multicast() {
            let netif = usable_default().ok_or(StackError::Routing)?;
            return Ok(Ipv6Route {
                netif,
                next_hop: dst,
                local: false,
            });
        }

        // on-link: link-local destinations and destinations sharing a
        // /64 with one of our addresses
        let link_local = ipv6_scope(dst) == 0x02;
        for (id, netif) in self.netifs.iter() {
            if !netif.is_usable() {
                continue;
            }
            if link_local && !netif.ipv6_slots().is_empty() {
                return Ok(Ipv6Route {
                    netif: id,
                    next_hop: dst,
                    local: false,
                });
            }
            for slot in netif.ipv6_slots() {
                if slot.state.is_valid() && ipv6_common_prefix_len(slot.addr, dst) >= 64 {
                    return Ok(Ipv6Route {
                        netif: id,
                        next_hop: dst,
                        local: false,
                    });
                }
            }
        }

        // off-link: pick a live default router
        if let Some(router) = self.ip6_routers.iter().find(|router| {
            router.lifetime_s > 0
                && self
                    .netifs
                    .get(router.netif)
                    .map(|n| n.is_usable())
                    .unwrap_or(false)
        }) {
            return Ok(Ipv6Route {
                netif: router.netif,
                next_hop: router.addr,
                local: false,
            });
        }
        Err(StackError::Routing)
    }

    /// RFC 6724 source selection, simplified: same scope beats wider,
    /// preferred beats deprecated, then longest common prefix, then
    /// the lowest slot index.
    pub(crate) fn select_ipv6_source(&self, netif: NetifId, dst: Ipv6Addr) -> Option<Ipv6Addr> {
        let slots = self.netifs.get(netif)?.ipv6_slots();
        let dst_scope = ipv6_scope(dst);
        let mut best: Option<(u8, bool, u8, usize, Ipv6Addr)> = None;
        for (index, slot) in slots.iter().enumerate() {
            if !slot.state.is_valid() {
                continue;
            }
            let same_scope = u8::from(ipv6_scope(slot.addr) == dst_scope);
            let preferred = matches!(slot.state, Ipv6AddrState::Preferred);
            let prefix = ipv6_common_prefix_len(slot.addr, dst);
            let candidate = (same_scope, preferred, prefix, index, slot.addr);
            let better = match &best {
                None => true,
                Some(current) => {
                    (
                        candidate.0,
                        candidate.1,
                        candidate.2,
                        core::cmp::Reverse(candidate.3),
                    ) > (
                        current.0,
                        current.1,
                        current.2,
                        core::cmp::Reverse(current.3),
                    )
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        best.map(|(_, _, _, _, addr)| addr)
    }

    /// Process one received IPv6 packet (link header already
    /// stripped).
    pub(crate) fn ipv6_input(&mut self, mut packet: Buf, inbound: NetifId) {
        self.stats.ip6_rx += 1;

        let header = {
            let Ok(head) = packet.pullup(Ipv6Header::LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            match Ipv6Header::from_slice(head) {
                Ok((header, _)) => header,
                Err(err) => {
                    log::trace!("ipv6: dropping malformed header: {err}");
                    self.stats.rx_dropped += 1;
                    return;
                }
            }
        };

        let total = Ipv6Header::LEN + usize::from(header.payload_length);
        if total > packet.tot_len() {
            self.stats.rx_dropped += 1;
            return;
        }
        packet.realloc(total).expect("total <= tot_len");
        packet
            .header_adjust_force(-(Ipv6Header::LEN as i32))
            .expect("base header present");

        let src = Ipv6Addr::from(header.source);
        let dst = Ipv6Addr::from(header.destination);

        if !self.classify_ipv6_dst(dst, inbound) {
            // host stack: never forwarded
            self.stats.rx_dropped += 1;
            return;
        }

        // walk the extension chain over a flat view
        let flat = packet.to_vec();
        let summary = match walk_ipv6_extensions(header.next_header, &flat) {
            Ok(summary) => summary,
            Err(Ipv6ExtFailure::Malformed(err)) => {
                log::trace!("ipv6: malformed extension chain: {err}");
                self.stats.rx_dropped += 1;
                return;
            }
            Err(Ipv6ExtFailure::UnrecognizedOption {
                pointer,
                send_icmp,
                suppress_if_multicast,
            }) => {
                self.stats.rx_dropped += 1;
                if send_icmp && !(suppress_if_multicast && dst.is_multicast()) {
                    // pointer is relative to the extension area; the
                    // quoted packet starts at the base header
                    let mut offending = alloc::vec::Vec::new();
                    offending.extend_from_slice(&header.to_bytes());
                    offending.extend_from_slice(&flat);
                    self.send_icmp6_param_problem(
                        src,
                        2,
                        (Ipv6Header::LEN + pointer) as u32,
                        &offending,
                    );
                }
                return;
            }
        };

        let (protocol, payload) = match summary.fragment {
            Some((frag, frag_payload_offset)) if frag.is_fragmenting_payload() => {
                let key = ReassKey::V6 {
                    source: header.source,
                    destination: header.destination,
                    identification: frag.identification,
                };
                match self.ip6_reass.add(
                    key,
                    frag.next_header,
                    u32::from(frag.fragment_offset),
                    frag.more_fragments,
                    &flat[frag_payload_offset..],
                ) {
                    Ok(Some(done)) => {
                        self.stats.ip6_reass_ok += 1;
                        (done.protocol, Buf::from_vec(done.payload))
                    }
                    Ok(None) => return,
                    Err(ReassError::Overlap)
                    | Err(ReassError::BadLength)
                    | Err(ReassError::PoolExhausted) => {
                        self.stats.ip6_reass_failed += 1;
                        return;
                    }
                }
            }
            Some((frag, frag_payload_offset)) => {
                // atomic fragment: no reassembly needed
                (
                    frag.next_header,
                    Buf::from_vec(flat[frag_payload_offset..].to_vec()),
                )
            }
            None => (
                summary.payload_protocol,
                Buf::from_vec(flat[summary.payload_offset..].to_vec()),
            ),
        };

        self.ipv6_deliver(&header, protocol, payload, inbound, src, dst);
    }

    fn ipv6_deliver(
        &mut self,
        header: &Ipv6Header,
        protocol: IpNumber,
        payload: Buf,
        netif: NetifId,
        src: Ipv6Addr,
        dst: Ipv6Addr,
    ) {
        if self.cfg.raw && self.raw_deliver(protocol, &payload, true, IpAddr::V6(src)) {
            return;
        }
        match protocol {
            IpNumber::IPV6_ICMP => self.icmpv6_input(payload, netif, src, dst),
            IpNumber::UDP if self.cfg.udp => {
                let quote = {
                    let mut quote = alloc::vec::Vec::new();
                    quote.extend_from_slice(&header.to_bytes());
                    let take = payload.tot_len().min(8);
                    let mut tail = alloc::vec![0u8; take];
                    let _ = payload.copy_to_slice(0, &mut tail);
                    quote.extend_from_slice(&tail);
                    quote
                };
                let delivered = self.udp_input(
                    payload,
                    netif,
                    IpAddr::V6(src),
                    IpAddr::V6(dst),
                    dst.is_multicast(),
                );
                if !delivered && !dst.is_multicast() {
                    self.send_icmp6_port_unreachable(src, &quote);
                }
            }
            IpNumber::TCP if self.cfg.tcp => {
                if !dst.is_multicast() {
                    self.tcp_input(payload, netif, IpAddr::V6(src), IpAddr::V6(dst));
                }
            }
            IpNumber::IPV6_NO_NEXT => {}
            _ => {
                log::debug!("ipv6: no handler for protocol {:?}", protocol);
                if !dst.is_multicast() {
                    // unrecognized next header: parameter problem
                    // pointing at the next header field
                    let mut offending = alloc::vec::Vec::new();
                    offending.extend_from_slice(&header.to_bytes());
                    offending.extend_from_slice(&payload.to_vec());
                    self.send_icmp6_param_problem(src, 1, 6, &offending);
                }
            }
        }
    }

    /// True if `dst` addresses this host on `inbound`.
    fn classify_ipv6_dst(&self, dst: Ipv6Addr, inbound: NetifId) -> bool {
        if dst.is_loopback() {
            return true;
        }
        let Some(netif) = self.netifs.get(inbound) else {
            return false;
        };
        if dst.is_multicast() {
            // all-nodes, joined groups and the solicited-node groups
            // of all our addresses (tentative included, for DAD)
            if dst == Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1) {
                return true;
            }
            if self.mld.is_member(inbound, dst) {
                return true;
            }
            return netif
                .ipv6_slots()
                .iter()
                .filter(|slot| !matches!(slot.state, Ipv6AddrState::Invalid))
                .any(|slot| ipv6_solicited_node(slot.addr) == dst);
        }
        // tentative addresses receive ND traffic only; the ND input
        // handlers check the state themselves
        netif.owns_ipv6_addr(dst)
    }

    /// Build and transmit an IPv6 packet. `src` of `None` runs source
    /// selection on the routed netif.
    pub(crate) fn ipv6_output(
        &mut self,
        payload: Buf,
        src: Option<Ipv6Addr>,
        dst: Ipv6Addr,
        hop_limit: u8,
        protocol: IpNumber,
    ) -> Result<(), StackError> {
        let route = self.route_ipv6(dst)?;
        let src = match src {
            Some(src) => src,
            None => self
                .select_ipv6_source(route.netif, dst)
                .ok_or(StackError::Routing)?,
        };
        if payload.tot_len() > 0xffff {
            return Err(StackError::Argument);
        }

        let header = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            payload_length: payload.tot_len() as u16,
            next_header: protocol,
            hop_limit,
            source: src.octets(),
            destination: dst.octets(),
        };

        self.stats.ip6_tx += 1;
        let mtu = usize::from(
            self.netifs
                .get(route.netif)
                .ok_or(StackError::Routing)?
                .mtu,
        );
        if Ipv6Header::LEN + payload.tot_len() <= mtu {
            let packet = Self::prepend_ipv6_header(&header, payload);
            return self.dispatch_ipv6_packet(route, packet);
        }
        self.ipv6_output_fragmented(header, payload, route, mtu)
    }

    /// Split an oversized payload into a fragment train (RFC 8200,
    /// section 4.5). The unfragmentable part is just the base header.
    fn ipv6_output_fragmented(
        &mut self,
        base: Ipv6Header,
        mut payload: Buf,
        route: Ipv6Route,
        mtu: usize,
    ) -> Result<(), StackError> {
        let room = mtu - Ipv6Header::LEN - Ipv6FragmentHeader::LEN;
        let chunk = room & !7;
        if chunk == 0 {
            return Err(StackError::Argument);
        }
        self.ip6_ident = self.ip6_ident.wrapping_add(1);
        let identification = self.ip6_ident;

        let mut offset = 0usize;
        loop {
            let remaining = payload.tot_len();
            let take = remaining.min(chunk);
            let rest = if remaining > take {
                Some(payload.split_off(take)?)
            } else {
                None
            };

            let frag = Ipv6FragmentHeader {
                next_header: base.next_header,
                fragment_offset: offset as u16,
                more_fragments: rest.is_some(),
                identification,
            };
            let mut header = base.clone();
            header.next_header = IpNumber::IPV6_FRAG;
            header.payload_length = (Ipv6FragmentHeader::LEN + take) as u16;

            let mut piece = payload;
            if piece.header_adjust(Ipv6FragmentHeader::LEN as i32).is_ok() {
                piece
                    .copy_from_slice(0, &frag.to_bytes())
                    .expect("fragment header fits");
            } else {
                let mut framed = Buf::alloc_heap(Headroom::Ip, Ipv6FragmentHeader::LEN);
                framed
                    .copy_from_slice(0, &frag.to_bytes())
                    .expect("sized allocation");
                framed.concat(piece);
                piece = framed;
            }
            let packet = Self::prepend_ipv6_header(&header, piece);
            self.dispatch_ipv6_packet(route, packet)?;

            match rest {
                Some(rest) => {
                    offset += take;
                    payload = rest;
                }
                None => return Ok(()),
            }
        }
    }

    pub(crate) fn prepend_ipv6_header(header: &Ipv6Header, mut payload: Buf) -> Buf {
        let bytes = header.to_bytes();
        if payload.header_adjust(bytes.len() as i32).is_ok() {
            payload
                .copy_from_slice(0, &bytes)
                .expect("header fits the adjusted front");
            payload
        } else {
            let mut packet = Buf::alloc_heap(Headroom::Link, bytes.len());
            packet
                .copy_from_slice(0, &bytes)
                .expect("sized allocation");
            packet.concat(payload);
            packet
        }
    }

    /// Send one ready IPv6 packet: local queue, driver, or neighbor
    /// resolution depending on the route and netif kind.
    fn dispatch_ipv6_packet(&mut self, route: Ipv6Route, packet: Buf) -> Result<(), StackError> {
        let Some(netif) = self.netifs.get(route.netif) else {
            return Err(StackError::Routing);
        };
        let ethernet = netif.flags.ethernet;

        if route.local {
            if !ethernet {
                return self.raw_link_output(route.netif, &packet);
            }
            self.pending_local.push_back((route.netif, packet));
            return Ok(());
        }
        if !ethernet {
            return self.raw_link_output(route.netif, &packet);
        }
        if route.next_hop.is_multicast() {
            let dst_mac = ipv6_multicast_mac(route.next_hop);
            return self.ethernet_output(
                route.netif,
                dst_mac,
                crate::link::EtherType::IPV6,
                packet,
            );
        }
        match self.nd.resolve(route.netif, route.next_hop, packet) {
            NdResolve::Resolved(dst_mac, packet) => {
                self.ethernet_output(route.netif, dst_mac, crate::link::EtherType::IPV6, packet)
            }
            NdResolve::Pending => {
                self.send_neighbor_solicitation(route.netif, route.next_hop, None);
                Ok(())
            }
            NdResolve::Full => Err(StackError::OutOfMemory),
        }
    }
}
