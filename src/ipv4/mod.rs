//! IPv4 input and output pipelines.

use crate::addr::{ipv4_is_broadcast_for, IpAddr, Ipv4Addr};
use crate::buf::Buf;
use crate::checksum::{self, Sum16BitWords};
use crate::err::StackError;
use crate::iface::NetifId;
use crate::net::Ipv4Header;
use crate::reass::{ReassError, ReassKey};
use crate::stack::Stack;
use crate::IpNumber;

mod arp;

/// Routing decision for an IPv4 destination.
#[derive(Debug)]
pub(crate) enum Ipv4Route {
    /// The destination is one of our own addresses.
    Local { netif: NetifId },
    /// Transmit on `netif` towards `next_hop`.
    Forward { netif: NetifId, next_hop: Ipv4Addr },
}

impl Stack {
    /// Pick the netif (and next hop) for `dst`: exact host match,
    /// then longest configured subnet match, then the default netif.
    pub(crate) fn route_ipv4(&self, dst: Ipv4Addr) -> Result<Ipv4Route, StackError> {
        if dst.is_loopback() {
            // any netif will do for loopback, prefer the default
            let netif = self.default_netif.ok_or(StackError::Routing)?;
            return Ok(Ipv4Route::Local { netif });
        }
        for (id, netif) in self.netifs.iter() {
            if let Some(ipv4) = netif.ipv4 {
                if ipv4.addr == dst {
                    return Ok(Ipv4Route::Local { netif: id });
                }
            }
        }
        if dst.is_multicast() || dst == Ipv4Addr::BROADCAST {
            // multicast and limited broadcast go out the default netif
            // (or the only usable one)
            let netif = self
                .default_netif
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
                .ok_or(StackError::Routing)?;
            return Ok(Ipv4Route::Forward {
                netif,
                next_hop: dst,
            });
        }
        for (id, netif) in self.netifs.iter() {
            if !netif.is_usable() {
                continue;
            }
            if let Some(ipv4) = netif.ipv4 {
                if crate::addr::ipv4_in_subnet(dst, ipv4.addr, ipv4.mask) {
                    return Ok(Ipv4Route::Forward {
                        netif: id,
                        next_hop: dst,
                    });
                }
            }
        }
        // fall back to the default netif's gateway
        if let Some(id) = self.default_netif {
            if let Some(netif) = self.netifs.get(id) {
                if netif.is_usable() {
                    if let Some(ipv4) = netif.ipv4 {
                        let next_hop = if ipv4.gateway.is_unspecified() {
                            dst
                        } else {
                            ipv4.gateway
                        };
                        return Ok(Ipv4Route::Forward { netif: id, next_hop });
                    }
                }
            }
        }
        Err(StackError::Routing)
    }

    /// Process one received IPv4 packet (link header already
    /// stripped).
    pub(crate) fn ipv4_input(&mut self, mut packet: Buf, inbound: NetifId) {
        self.stats.ip4_rx += 1;

        // parse the header; a second pullup covers options
        let header = {
            let Ok(head) = packet.pullup(Ipv4Header::MIN_LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            let header_len = usize::from(head[0] & 0xf) * 4;
            let Ok(head) = packet.pullup(header_len.max(Ipv4Header::MIN_LEN)) else {
                self.stats.rx_dropped += 1;
                return;
            };
            match Ipv4Header::from_slice(head) {
                Ok((header, _)) => header,
                Err(err) => {
                    log::trace!("ipv4: dropping malformed header: {err}");
                    self.stats.rx_dropped += 1;
                    return;
                }
            }
        };

        if usize::from(header.total_len) > packet.tot_len() {
            // truncated on the wire
            self.stats.rx_dropped += 1;
            return;
        }

        // verify the header checksum unless the netif hardware did
        if !self.cfg.rx_checksum_offload {
            let verify = Sum16BitWords::new()
                .add_slice(&packet.pullup(header.header_len()).expect("parsed above"))
                .ones_complement();
            if verify != 0 {
                self.stats.ip4_checksum_errors += 1;
                return;
            }
        }

        let src = Ipv4Addr::from(header.source);
        let dst = Ipv4Addr::from(header.destination);

        // drop link padding, then strip the header
        packet
            .realloc(usize::from(header.total_len))
            .expect("total_len <= tot_len checked");
        packet
            .header_adjust_force(-(header.header_len() as i32))
            .expect("header bytes are present");

        // destination classification
        let (for_us, is_group) = self.classify_ipv4_dst(dst, inbound, header.protocol);
        if !for_us {
            if self.cfg.ip_forward && !is_group && !src.is_unspecified() {
                self.ipv4_forward(header, packet, inbound);
            } else {
                self.stats.rx_dropped += 1;
            }
            return;
        }

        // reassembly
        let packet = if header.is_fragmenting_payload() {
            let key = ReassKey::V4 {
                source: header.source,
                destination: header.destination,
                identification: header.identification,
                protocol: header.protocol.0,
            };
            let flat = packet.to_vec();
            match self.ip4_reass.add(
                key,
                header.protocol,
                u32::from(header.fragment_offset),
                header.more_fragments,
                &flat,
            ) {
                Ok(Some(done)) => {
                    self.stats.ip4_reass_ok += 1;
                    Buf::from_vec(done.payload)
                }
                Ok(None) => return,
                Err(ReassError::PoolExhausted) | Err(ReassError::Overlap)
                | Err(ReassError::BadLength) => {
                    self.stats.ip4_reass_failed += 1;
                    return;
                }
            }
        } else {
            packet
        };

        self.ipv4_deliver(&header, packet, inbound, src, dst, is_group);
    }

    /// Hand a complete datagram to its protocol. Raw endpoints get a
    /// chance to claim it first.
    fn ipv4_deliver(
        &mut self,
        header: &Ipv4Header,
        packet: Buf,
        netif: NetifId,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        is_group: bool,
    ) {
        let protocol = header.protocol;
        if self.cfg.raw && self.raw_deliver(protocol, &packet, false, IpAddr::V4(src)) {
            return;
        }
        match protocol {
            IpNumber::ICMP => self.icmpv4_input(packet, netif, src, dst),
            IpNumber::IGMP if self.cfg.igmp => self.igmp_input(packet, netif, src, dst),
            IpNumber::UDP if self.cfg.udp => {
                // quote the IP header + UDP ports before the packet is
                // consumed, in case nobody is listening
                let quote = Self::quote_ipv4(header, &packet);
                let delivered =
                    self.udp_input(packet, netif, IpAddr::V4(src), IpAddr::V4(dst), is_group);
                if !delivered && !is_group {
                    self.send_icmp4_port_unreachable(src, &quote);
                }
            }
            IpNumber::TCP if self.cfg.tcp => {
                if !is_group {
                    self.tcp_input(packet, netif, IpAddr::V4(src), IpAddr::V4(dst));
                }
            }
            _ => {
                log::debug!("ipv4: no handler for protocol {:?}", protocol);
                if !is_group {
                    self.send_icmp4_protocol_unreachable(header, &packet);
                }
            }
        }
    }

    /// True if `dst` addresses this host ((unicast, broadcast, joined
    /// multicast), plus whether it is a group/broadcast address).
    fn classify_ipv4_dst(
        &self,
        dst: Ipv4Addr,
        inbound: NetifId,
        protocol: IpNumber,
    ) -> (bool, bool) {
        if dst.is_loopback() {
            return (true, false);
        }
        if dst.is_multicast() {
            // all-hosts is always accepted, as is anything IGMP so
            // group specific queries reach the machine
            let member = dst == Ipv4Addr::new(224, 0, 0, 1)
                || protocol == IpNumber::IGMP
                || self.igmp.is_member(inbound, dst);
            return (member, true);
        }
        for (_, netif) in self.netifs.iter() {
            if let Some(ipv4) = netif.ipv4 {
                if ipv4.addr == dst {
                    return (true, false);
                }
            }
        }
        if let Some(ipv4) = self.netifs.get(inbound).and_then(|n| n.ipv4) {
            if ipv4_is_broadcast_for(dst, ipv4.addr, ipv4.mask) {
                return (true, true);
            }
        } else if dst == Ipv4Addr::BROADCAST {
            return (true, true);
        }
        (false, false)
    }

    /// Forward a packet that is not for us (TTL handling per RFC
    /// 1812: decrement, incremental checksum fix, time exceeded on
    /// expiry).
    fn ipv4_forward(&mut self, header: Ipv4Header, payload: Buf, inbound: NetifId) {
        let dst = Ipv4Addr::from(header.destination);

        if header.time_to_live <= 1 {
            self.send_icmp4_time_exceeded(&header, &payload);
            self.stats.rx_dropped += 1;
            return;
        }
        let Ok(Ipv4Route::Forward { netif, next_hop }) = self.route_ipv4(dst) else {
            self.stats.rx_dropped += 1;
            return;
        };
        if netif == inbound {
            // we would bounce it right back; no redirect support
            self.stats.rx_dropped += 1;
            return;
        }

        let mut header = header;
        header.time_to_live -= 1;
        // RFC 1624 incremental update: the TTL/protocol word changed
        let old_word = u16::from_be_bytes([header.time_to_live + 1, header.protocol.0]);
        let new_word = u16::from_be_bytes([header.time_to_live, header.protocol.0]);
        header.header_checksum = checksum::update_u16(header.header_checksum, old_word, new_word);

        self.stats.ip4_forwarded += 1;
        let _ = self.transmit_ipv4(header, payload, netif, next_hop);
    }

    /// Build and transmit an IPv4 packet.
    ///
    /// `src` of `None` is filled from the selected netif. Payloads
    /// exceeding the netif MTU leave as a fragment train.
    pub(crate) fn ipv4_output(
        &mut self,
        payload: Buf,
        src: Option<Ipv4Addr>,
        dst: Ipv4Addr,
        ttl: u8,
        tos: u8,
        protocol: IpNumber,
    ) -> Result<(), StackError> {
        let route = self.route_ipv4(dst)?;
        let (netif, next_hop, local) = match route {
            Ipv4Route::Local { netif } => (netif, dst, true),
            Ipv4Route::Forward { netif, next_hop } => (netif, next_hop, false),
        };

        let src = match src {
            Some(src) => src,
            None => {
                self.netifs
                    .get(netif)
                    .and_then(|n| n.ipv4)
                    .map(|ipv4| ipv4.addr)
                    .ok_or(StackError::Routing)?
            }
        };

        if payload.tot_len() + Ipv4Header::MIN_LEN > 0xffff {
            return Err(StackError::Argument);
        }
        let mut header = Ipv4Header::new(
            payload.tot_len() as u16,
            ttl,
            protocol,
            src.octets(),
            dst.octets(),
        );
        header.tos = tos;
        self.ip4_ident = self.ip4_ident.wrapping_add(1);
        header.identification = self.ip4_ident;

        self.stats.ip4_tx += 1;
        if local {
            self.deliver_local_ipv4(header, payload, netif)
        } else {
            self.transmit_ipv4(header, payload, netif, next_hop)
        }
    }

    /// Transmit a header+payload pair on `netif`, fragmenting when the
    /// packet exceeds the MTU. The header checksum is (re)computed
    /// here.
    pub(crate) fn transmit_ipv4(
        &mut self,
        mut header: Ipv4Header,
        mut payload: Buf,
        netif: NetifId,
        next_hop: Ipv4Addr,
    ) -> Result<(), StackError> {
        let mtu = usize::from(self.netifs.get(netif).ok_or(StackError::Routing)?.mtu);
        let header_len = header.header_len();

        if header_len + payload.tot_len() <= mtu {
            header.total_len = (header_len + payload.tot_len()) as u16;
            // the forwarding path arrives with an incrementally
            // updated checksum; everything else with zero
            if header.header_checksum == 0 {
                header.header_checksum = header.calc_header_checksum();
            }
            let packet = Self::prepend_ipv4_header(&header, payload);
            return self.dispatch_ipv4_frame(netif, next_hop, packet);
        }

        if header.dont_fragment {
            return Err(StackError::Routing);
        }

        // fragment: data per fragment must be a multiple of 8
        let chunk = (mtu - header_len) & !7;
        if chunk == 0 {
            return Err(StackError::Argument);
        }
        let base_offset = header.fragment_offset;
        let originally_more = header.more_fragments;
        let mut offset = 0usize;
        loop {
            let remaining = payload.tot_len();
            let take = remaining.min(chunk);
            let rest = if remaining > take {
                Some(payload.split_off(take)?)
            } else {
                None
            };

            let mut frag_header = header.clone();
            frag_header.fragment_offset = base_offset + offset as u16;
            frag_header.more_fragments = rest.is_some() || originally_more;
            frag_header.total_len = (header_len + take) as u16;
            frag_header.header_checksum = 0;
            frag_header.header_checksum = frag_header.calc_header_checksum();

            let fragment = Self::prepend_ipv4_header(&frag_header, payload);
            self.stats.ip4_frag_tx += 1;
            self.dispatch_ipv4_frame(netif, next_hop, fragment)?;

            match rest {
                Some(rest) => {
                    offset += take;
                    payload = rest;
                }
                None => return Ok(()),
            }
        }
    }

    /// Send one ready IPv4 frame to the link (ARP resolution for
    /// ethernet netifs, direct driver output otherwise).
    fn dispatch_ipv4_frame(
        &mut self,
        netif: NetifId,
        next_hop: Ipv4Addr,
        packet: Buf,
    ) -> Result<(), StackError> {
        let ethernet = self
            .netifs
            .get(netif)
            .ok_or(StackError::Routing)?
            .flags
            .ethernet;
        if ethernet {
            self.etharp_output(netif, next_hop, packet)
        } else {
            self.raw_link_output(netif, &packet)
        }
    }

    /// Deliver a self-addressed packet. Non-ethernet netifs loop it
    /// through their driver queue; for ethernet netifs it goes through
    /// the internal local queue so the delivery stays asynchronous.
    fn deliver_local_ipv4(
        &mut self,
        mut header: Ipv4Header,
        payload: Buf,
        netif: NetifId,
    ) -> Result<(), StackError> {
        header.total_len = (header.header_len() + payload.tot_len()) as u16;
        header.header_checksum = 0;
        header.header_checksum = header.calc_header_checksum();
        let packet = Self::prepend_ipv4_header(&header, payload);

        let non_ethernet_driver = self
            .netifs
            .get(netif)
            .map(|n| !n.flags.ethernet)
            .unwrap_or(false);
        if non_ethernet_driver {
            self.raw_link_output(netif, &packet)
        } else {
            self.pending_local.push_back((netif, packet));
            Ok(())
        }
    }

    pub(crate) fn prepend_ipv4_header(header: &Ipv4Header, mut payload: Buf) -> Buf {
        let bytes = header.to_bytes();
        if payload.header_adjust(bytes.len() as i32).is_ok() {
            payload
                .copy_from_slice(0, &bytes)
                .expect("header fits the adjusted front");
            payload
        } else {
            let mut packet = Buf::alloc_heap(crate::buf::Headroom::Link, bytes.len());
            packet
                .copy_from_slice(0, &bytes)
                .expect("sized allocation");
            packet.concat(payload);
            packet
        }
    }

    /// Reassembly aging for both families. Expired blocks disappear
    /// without emitting stale data; the time exceeded error is
    /// omitted since the quoted first fragment is no longer held.
    pub(crate) fn reass_tick(&mut self) {
        let elapsed = self.cfg.reass_tick_ms;
        for (key, _has_first) in self.ip4_reass.tick(elapsed) {
            self.stats.ip4_reass_failed += 1;
            log::debug!("ipv4: reassembly expired for {key:?}");
        }
        for (key, _has_first) in self.ip6_reass.tick(elapsed) {
            self.stats.ip6_reass_failed += 1;
            log::debug!("ipv6: reassembly expired for {key:?}");
        }
    }
}
