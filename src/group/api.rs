//! IGMPv2 / MLDv1 message handling and the join/leave API.

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::buf::{Buf, Headroom};
use crate::checksum::Sum16BitWords;
use crate::err::StackError;
use crate::group::GroupAction;
use crate::iface::NetifId;
use crate::net::{Icmpv6Header, Icmpv6Type, IgmpMessage, IgmpMessageType, Ipv4Header};
use crate::stack::Stack;
use crate::IpNumber;

/// IPv4 router alert option (RFC 2113), required on IGMP messages.
const IPV4_ROUTER_ALERT: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

/// Hop-by-hop extension header carrying the IPv6 router alert for MLD
/// (RFC 2711): next header ICMPv6, router alert value 0 (MLD), PadN.
const HBH_ROUTER_ALERT: [u8; 8] = [58, 0, 0x05, 0x02, 0x00, 0x00, 0x01, 0x00];

/// IGMPv2 all-routers group (leave messages go here).
const ALL_ROUTERS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);
/// MLDv1 all-routers group.
const ALL_ROUTERS_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

impl Stack {
    // ---- IGMP -------------------------------------------------------------

    /// Join an IPv4 multicast group on `netif`.
    pub fn igmp_join(&mut self, netif: NetifId, group: Ipv4Addr) -> Result<(), StackError> {
        if !self.cfg.igmp || !group.is_multicast() {
            return Err(StackError::Argument);
        }
        if self.netifs.get(netif).is_none() {
            return Err(StackError::Argument);
        }
        let delay = (self.rng.below(u32::from(self.igmp.unsolicited_ticks)) as u16).max(1);
        let actions = self.igmp.join(netif, group, delay);
        self.run_igmp_actions(actions);
        Ok(())
    }

    /// Leave an IPv4 multicast group.
    pub fn igmp_leave(&mut self, netif: NetifId, group: Ipv4Addr) -> Result<(), StackError> {
        if !self.cfg.igmp {
            return Err(StackError::Argument);
        }
        let actions = self.igmp.leave(netif, group);
        self.run_igmp_actions(actions);
        Ok(())
    }

    pub(crate) fn igmp_input(
        &mut self,
        mut packet: Buf,
        netif: NetifId,
        _src: Ipv4Addr,
        dst: Ipv4Addr,
    ) {
        let message = {
            let Ok(slice) = packet.pullup(IgmpMessage::LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            if Sum16BitWords::new().add_slice(slice).ones_complement() != 0 {
                self.stats.rx_dropped += 1;
                return;
            }
            match IgmpMessage::from_slice(slice) {
                Ok(Some(message)) => message,
                // unknown message types are silently ignored
                Ok(None) => return,
                Err(_) => {
                    self.stats.rx_dropped += 1;
                    return;
                }
            }
        };

        match message.message_type {
            IgmpMessageType::MembershipQuery => {
                let group = Ipv4Addr::from(message.group);
                let queried = if group.is_unspecified() {
                    None
                } else {
                    Some(group)
                };
                // a v1 querier sends zero; use the v1 default of 10 s
                let max_resp_ticks = if message.max_resp_time == 0 {
                    100
                } else {
                    u16::from(message.max_resp_time)
                };
                let rng = &mut self.rng;
                self.igmp.query_received(netif, queried, max_resp_ticks, |max| {
                    (rng.below(u32::from(max)) as u16).max(1)
                });
            }
            IgmpMessageType::V1MembershipReport | IgmpMessageType::V2MembershipReport => {
                let group = Ipv4Addr::from(message.group);
                if dst == group {
                    self.igmp.report_seen(netif, group);
                }
            }
            IgmpMessageType::LeaveGroup => {
                // hosts ignore leave messages
            }
        }
    }

    pub(crate) fn igmp_tick(&mut self) {
        let actions = self.igmp.tick();
        self.run_igmp_actions(actions);
    }

    fn run_igmp_actions(&mut self, actions: alloc::vec::Vec<GroupAction<Ipv4Addr>>) {
        for action in actions {
            match action {
                GroupAction::SendReport { netif, group } => {
                    self.igmp_send(netif, group, IgmpMessageType::V2MembershipReport, group);
                }
                GroupAction::SendLeave { netif, group } => {
                    self.igmp_send(netif, ALL_ROUTERS_V4, IgmpMessageType::LeaveGroup, group);
                }
                GroupAction::Filter { netif, group, join } => {
                    if let Some(n) = self.netifs.get_mut(netif) {
                        let _ = n.driver.multicast_filter(IpAddr::V4(group), join);
                    }
                }
            }
        }
    }

    /// Transmit one IGMP message: TTL 1, router alert option.
    fn igmp_send(
        &mut self,
        netif: NetifId,
        dst: Ipv4Addr,
        message_type: IgmpMessageType,
        group: Ipv4Addr,
    ) {
        let Some(src) = self.netifs.get(netif).and_then(|n| n.ipv4).map(|c| c.addr) else {
            return;
        };
        let message = IgmpMessage {
            message_type,
            max_resp_time: 0,
            checksum: 0,
            group: group.octets(),
        };
        let mut payload = Buf::alloc_heap(Headroom::Ip, IgmpMessage::LEN);
        payload
            .copy_from_slice(0, &message.to_bytes())
            .expect("sized allocation");

        let mut header = Ipv4Header::new(
            IgmpMessage::LEN as u16,
            1,
            IpNumber::IGMP,
            src.octets(),
            dst.octets(),
        );
        header
            .options
            .try_extend_from_slice(&IPV4_ROUTER_ALERT)
            .expect("room for one option");
        header.total_len += IPV4_ROUTER_ALERT.len() as u16;
        self.ip4_ident = self.ip4_ident.wrapping_add(1);
        header.identification = self.ip4_ident;

        self.stats.ip4_tx += 1;
        let _ = self.transmit_ipv4(header, payload, netif, dst);
    }

    // ---- MLD --------------------------------------------------------------

    /// Join an IPv6 multicast group on `netif`.
    pub fn mld_join(&mut self, netif: NetifId, group: Ipv6Addr) -> Result<(), StackError> {
        if !self.cfg.mld || !group.is_multicast() {
            return Err(StackError::Argument);
        }
        if self.netifs.get(netif).is_none() {
            return Err(StackError::Argument);
        }
        let delay = (self.rng.below(u32::from(self.mld.unsolicited_ticks)) as u16).max(1);
        let actions = self.mld.join(netif, group, delay);
        self.run_mld_actions(actions);
        Ok(())
    }

    /// Leave an IPv6 multicast group.
    pub fn mld_leave(&mut self, netif: NetifId, group: Ipv6Addr) -> Result<(), StackError> {
        if !self.cfg.mld {
            return Err(StackError::Argument);
        }
        let actions = self.mld.leave(netif, group);
        self.run_mld_actions(actions);
        Ok(())
    }

    pub(crate) fn mld_input(&mut self, icmp_type: &Icmpv6Type, netif: NetifId, _src: Ipv6Addr) {
        match icmp_type {
            Icmpv6Type::MldQuery {
                max_resp_delay_ms,
                group,
            } => {
                let group = Ipv6Addr::from(*group);
                let queried = if group.is_unspecified() {
                    None
                } else {
                    Some(group)
                };
                let max_resp_ticks = ((max_resp_delay_ms / 100) as u16).max(1);
                let rng = &mut self.rng;
                self.mld.query_received(netif, queried, max_resp_ticks, |max| {
                    (rng.below(u32::from(max)) as u16).max(1)
                });
            }
            Icmpv6Type::MldReport { group } => {
                self.mld.report_seen(netif, Ipv6Addr::from(*group));
            }
            Icmpv6Type::MldDone { .. } => {}
            _ => {}
        }
    }

    pub(crate) fn mld_tick(&mut self) {
        let actions = self.mld.tick();
        self.run_mld_actions(actions);
    }

    fn run_mld_actions(&mut self, actions: alloc::vec::Vec<GroupAction<Ipv6Addr>>) {
        for action in actions {
            match action {
                GroupAction::SendReport { netif, group } => {
                    self.mld_send(netif, group, Icmpv6Type::MldReport { group: group.octets() });
                }
                GroupAction::SendLeave { netif, group } => {
                    self.mld_send(
                        netif,
                        ALL_ROUTERS_V6,
                        Icmpv6Type::MldDone { group: group.octets() },
                    );
                }
                GroupAction::Filter { netif, group, join } => {
                    if let Some(n) = self.netifs.get_mut(netif) {
                        let _ = n.driver.multicast_filter(IpAddr::V6(group), join);
                    }
                }
            }
        }
    }

    /// Transmit one MLD message: hop limit 1, link-local source,
    /// hop-by-hop router alert (RFC 2710, section 3).
    fn mld_send(&mut self, netif: NetifId, dst: Ipv6Addr, icmp_type: Icmpv6Type) {
        let src = self
            .netifs
            .get(netif)
            .and_then(|n| {
                n.ipv6_slots()
                    .iter()
                    .find(|slot| {
                        slot.state.is_valid() && crate::addr::ipv6_scope(slot.addr) == 0x02
                    })
                    .map(|slot| slot.addr)
            })
            .unwrap_or(Ipv6Addr::UNSPECIFIED);

        let header = Icmpv6Header::with_checksum(icmp_type, src.octets(), dst.octets(), &[]);
        let fixed = header.to_bytes();

        let mut payload = Buf::alloc_heap(Headroom::Ip, HBH_ROUTER_ALERT.len() + fixed.len());
        payload
            .copy_from_slice(0, &HBH_ROUTER_ALERT)
            .expect("sized allocation");
        payload
            .copy_from_slice(HBH_ROUTER_ALERT.len(), &fixed)
            .expect("sized allocation");

        let ip = crate::net::Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            payload_length: payload.tot_len() as u16,
            next_header: IpNumber::IPV6_HOP_BY_HOP,
            hop_limit: 1,
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
        if ethernet {
            let mac = crate::addr::ipv6_multicast_mac(dst);
            let _ = self.ethernet_output(netif, mac, crate::link::EtherType::IPV6, packet);
        } else {
            let _ = self.raw_link_output(netif, &packet);
        }
    }
}
