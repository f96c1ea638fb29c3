use crate::addr::{ipv4_in_subnet, Ipv4Addr};
use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::iface::NetifId;
use crate::link::{ArpOperation, ArpPacket, Ethernet2Header, EtherType};
use crate::neigh::{ArpResolve, ArpTickAction};
use crate::stack::Stack;

impl Stack {
    /// Process a received ARP packet (ethernet header already
    /// stripped).
    pub(crate) fn arp_input(&mut self, mut frame: Buf, netif: NetifId) {
        let packet = {
            let Ok(slice) = frame.pullup(ArpPacket::LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            match ArpPacket::from_slice(slice) {
                Ok(packet) => packet,
                Err(err) => {
                    log::trace!("arp: dropping malformed packet: {err}");
                    self.stats.rx_dropped += 1;
                    return;
                }
            }
        };

        let Some(ipv4) = self.netifs.get(netif).and_then(|n| n.ipv4) else {
            return;
        };
        let sender_ip = Ipv4Addr::from(packet.sender_ip);
        let target_ip = Ipv4Addr::from(packet.target_ip);
        let for_us = target_ip == ipv4.addr;

        // cache updates are accepted only from our local subnet, which
        // keeps a remote host from poisoning the cache with gratuitous
        // replies (RFC 826 processing with the etharp restriction)
        let on_subnet = ipv4_in_subnet(sender_ip, ipv4.addr, ipv4.mask);
        if on_subnet && !sender_ip.is_unspecified() {
            if let Some(released) =
                self.arp
                    .learn(netif, sender_ip, packet.sender_hw_addr, for_us)
            {
                let _ = self.ethernet_output(
                    netif,
                    packet.sender_hw_addr,
                    EtherType::IPV4,
                    released,
                );
            }
        }

        if for_us && packet.operation == ArpOperation::Request {
            let hwaddr = self.netifs.get(netif).expect("checked").hwaddr;
            let reply = ArpPacket {
                operation: ArpOperation::Reply,
                sender_hw_addr: hwaddr,
                sender_ip: ipv4.addr.octets(),
                target_hw_addr: packet.sender_hw_addr,
                target_ip: packet.sender_ip,
            };
            let mut buf = Buf::alloc_heap(Headroom::Link, ArpPacket::LEN);
            buf.copy_from_slice(0, &reply.to_bytes())
                .expect("sized allocation");
            let _ = self.ethernet_output(netif, packet.sender_hw_addr, EtherType::ARP, buf);
        }
    }

    /// Broadcast a who-has request for `target_ip`.
    pub(crate) fn arp_request(&mut self, netif: NetifId, target_ip: Ipv4Addr) {
        let Some(n) = self.netifs.get(netif) else {
            return;
        };
        let Some(ipv4) = n.ipv4 else {
            return;
        };
        let request = ArpPacket {
            operation: ArpOperation::Request,
            sender_hw_addr: n.hwaddr,
            sender_ip: ipv4.addr.octets(),
            // target hardware address is zeroed in requests
            target_hw_addr: [0; 6],
            target_ip: target_ip.octets(),
        };
        let mut buf = Buf::alloc_heap(Headroom::Link, ArpPacket::LEN);
        buf.copy_from_slice(0, &request.to_bytes())
            .expect("sized allocation");
        let _ = self.ethernet_output(netif, Ethernet2Header::BROADCAST, EtherType::ARP, buf);
    }

    /// Resolve the IPv4 next hop and transmit `packet` as an ethernet
    /// frame. Unresolved next hops park the packet in the cache and
    /// kick off a request.
    pub(crate) fn etharp_output(
        &mut self,
        netif: NetifId,
        next_hop: Ipv4Addr,
        packet: Buf,
    ) -> Result<(), StackError> {
        let dst_mac = if next_hop == Ipv4Addr::BROADCAST {
            Some(Ethernet2Header::BROADCAST)
        } else if next_hop.is_multicast() {
            Some(crate::addr::ipv4_multicast_mac(next_hop))
        } else if let Some(ipv4) = self.netifs.get(netif).and_then(|n| n.ipv4) {
            if crate::addr::ipv4_is_broadcast_for(next_hop, ipv4.addr, ipv4.mask) {
                Some(Ethernet2Header::BROADCAST)
            } else {
                None
            }
        } else {
            None
        };
        if let Some(dst_mac) = dst_mac {
            return self.ethernet_output(netif, dst_mac, EtherType::IPV4, packet);
        }

        match self.arp.resolve(netif, next_hop, packet) {
            ArpResolve::Resolved(dst_mac, packet) => {
                self.ethernet_output(netif, dst_mac, EtherType::IPV4, packet)
            }
            ArpResolve::Pending => {
                self.arp_request(netif, next_hop);
                Ok(())
            }
            ArpResolve::Full => Err(StackError::OutOfMemory),
        }
    }

    /// Coarse ARP aging tick.
    pub(crate) fn arp_tick(&mut self) {
        for action in self.arp.tick() {
            match action {
                ArpTickAction::Retransmit { netif, ip } => self.arp_request(netif, ip),
            }
        }
    }
}
