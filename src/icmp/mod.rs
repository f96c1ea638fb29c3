//! ICMPv4 and ICMPv6 processing: echo, error generation and the
//! dispatch of neighbor discovery and MLD messages carried in ICMPv6.

use alloc::vec::Vec;

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::buf::{Buf, Headroom};
use crate::checksum::{self, Sum16BitWords};
use crate::iface::NetifId;
use crate::net::{
    DestUnreachableCode, Icmpv4Header, Icmpv4Type, Icmpv6Header, Icmpv6Type, Ipv4Header,
};
use crate::stack::Stack;
use crate::IpNumber;

/// Longest slice of the offending IPv6 packet quoted in an error
/// (keeps the error inside the minimum IPv6 MTU).
const ICMP6_QUOTE_MAX: usize = 1232 - Icmpv6Header::MIN_LEN;

impl Stack {
    // ---- ICMPv4 -----------------------------------------------------------

    pub(crate) fn icmpv4_input(
        &mut self,
        mut packet: Buf,
        _netif: NetifId,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) {
        self.stats.icmp_rx += 1;

        // checksum over the whole message must fold to zero
        let flat = packet.to_vec();
        if flat.len() < Icmpv4Header::LEN
            || Sum16BitWords::new().add_slice(&flat).ones_complement() != 0
        {
            self.stats.rx_dropped += 1;
            return;
        }
        let (header, _) = Icmpv4Header::from_slice(&flat).expect("length checked");

        match header.icmp_type {
            Icmpv4Type::EchoRequest(_) => {
                // no echo replies to broadcast or multicast requests
                if dst.is_multicast() || dst == Ipv4Addr::BROADCAST {
                    return;
                }
                // reuse the request chain: rewrite the type byte and
                // fix the checksum incrementally, addresses swap on
                // the way out
                let old_word = u16::from_be_bytes([8, 0]);
                let new_word = 0u16;
                let new_checksum = checksum::update_u16(header.checksum, old_word, new_word);
                if packet.write_u8_at(0, 0).is_err()
                    || packet
                        .copy_from_slice(2, &new_checksum.to_be_bytes())
                        .is_err()
                {
                    return;
                }
                self.stats.icmp_tx += 1;
                let _ = self.ipv4_output(
                    packet,
                    Some(dst),
                    src,
                    self.cfg.ip_default_ttl,
                    0,
                    IpNumber::ICMP,
                );
            }
            Icmpv4Type::DestinationUnreachable(code) => {
                let fatal = matches!(
                    code,
                    DestUnreachableCode::Protocol | DestUnreachableCode::Port
                );
                if fatal {
                    self.notify_transport_error(&flat[Icmpv4Header::LEN..]);
                }
            }
            Icmpv4Type::EchoReply(_)
            | Icmpv4Type::TimeExceeded { .. }
            | Icmpv4Type::ParameterProblem { .. }
            | Icmpv4Type::Unknown { .. } => {
                // echo replies belong to a raw/ping client; errors
                // other than the fatal unreachables are soft
            }
        }
    }

    /// Send an ICMPv4 error quoting the offending header + 8 payload
    /// bytes (RFC 792). Suppressed for non-unicast offenders, for
    /// offending packets that are themselves ICMP errors, for
    /// non-first fragments, and by the rate limiting decorator.
    pub(crate) fn send_icmp4_error(
        &mut self,
        to: Ipv4Addr,
        icmp_type: Icmpv4Type,
        quote: &[u8],
    ) {
        if to.is_unspecified() || to.is_multicast() || to == Ipv4Addr::BROADCAST {
            return;
        }
        if let Ok((offending, rest)) = Ipv4Header::from_slice(quote) {
            if offending.fragment_offset != 0 {
                return;
            }
            if offending.protocol == IpNumber::ICMP {
                // never answer an error with an error; echoes are fine
                if let Some(first) = rest.first() {
                    if !matches!(*first, 0 | 8) {
                        return;
                    }
                }
            }
        }
        if !self.icmp_error_allowed(IpAddr::V4(to)) {
            return;
        }

        let header = Icmpv4Header::with_checksum(icmp_type, quote);
        let mut message = Buf::alloc_heap(Headroom::Ip, Icmpv4Header::LEN + quote.len());
        message
            .copy_from_slice(0, &header.to_bytes())
            .expect("sized allocation");
        message
            .copy_from_slice(Icmpv4Header::LEN, quote)
            .expect("sized allocation");

        self.stats.icmp_tx += 1;
        let _ = self.ipv4_output(
            message,
            None,
            to,
            self.cfg.ip_default_ttl,
            0,
            IpNumber::ICMP,
        );
    }

    pub(crate) fn send_icmp4_protocol_unreachable(&mut self, header: &Ipv4Header, payload: &Buf) {
        let quote = Self::quote_ipv4(header, payload);
        self.send_icmp4_error(
            Ipv4Addr::from(header.source),
            Icmpv4Type::DestinationUnreachable(DestUnreachableCode::Protocol),
            &quote,
        );
    }

    pub(crate) fn send_icmp4_port_unreachable(&mut self, to: Ipv4Addr, quote: &[u8]) {
        self.send_icmp4_error(
            to,
            Icmpv4Type::DestinationUnreachable(DestUnreachableCode::Port),
            quote,
        );
    }

    pub(crate) fn send_icmp4_time_exceeded(&mut self, header: &Ipv4Header, payload: &Buf) {
        let quote = Self::quote_ipv4(header, payload);
        self.send_icmp4_error(
            Ipv4Addr::from(header.source),
            Icmpv4Type::TimeExceeded { code: 0 },
            &quote,
        );
    }

    /// The quoted part of an offending IPv4 packet: full header plus
    /// 8 payload bytes.
    pub(crate) fn quote_ipv4(header: &Ipv4Header, payload: &Buf) -> Vec<u8> {
        let mut quote = Vec::with_capacity(header.header_len() + 8);
        quote.extend_from_slice(&header.to_bytes());
        let take = payload.tot_len().min(8);
        let mut tail = alloc::vec![0u8; take];
        payload
            .copy_to_slice(0, &mut tail)
            .expect("take <= tot_len");
        quote.extend_from_slice(&tail);
        quote
    }

    // ---- ICMPv6 -----------------------------------------------------------

    pub(crate) fn icmpv6_input(
        &mut self,
        packet: Buf,
        netif: NetifId,
        src: Ipv6Addr,
        dst: Ipv6Addr,
    ) {
        self.stats.icmp_rx += 1;

        let flat = packet.to_vec();
        // checksum over pseudo header + message must fold to zero
        let verify = Sum16BitWords::new()
            .add_16bytes(src.octets())
            .add_16bytes(dst.octets())
            .add_4bytes((flat.len() as u32).to_be_bytes())
            .add_2bytes([0, IpNumber::IPV6_ICMP.0])
            .add_slice(&flat)
            .ones_complement();
        if flat.len() < Icmpv6Header::MIN_LEN || verify != 0 {
            self.stats.rx_dropped += 1;
            return;
        }
        let Ok((header, rest)) = Icmpv6Header::from_slice(&flat) else {
            self.stats.rx_dropped += 1;
            return;
        };

        match header.icmp_type {
            Icmpv6Type::EchoRequest(echo) => {
                if dst.is_multicast() {
                    return;
                }
                let reply = Icmpv6Header::with_checksum(
                    Icmpv6Type::EchoReply(echo),
                    dst.octets(),
                    src.octets(),
                    rest,
                );
                let mut message =
                    Buf::alloc_heap(Headroom::Ip, Icmpv6Header::MIN_LEN + rest.len());
                message
                    .copy_from_slice(0, &reply.to_bytes())
                    .expect("sized allocation");
                message
                    .copy_from_slice(Icmpv6Header::MIN_LEN, rest)
                    .expect("sized allocation");
                self.stats.icmp_tx += 1;
                let _ = self.ipv6_output(message, Some(dst), src, 255, IpNumber::IPV6_ICMP);
            }
            Icmpv6Type::DestinationUnreachable { code } => {
                // code 4 is port unreachable
                if code == 4 || code == 1 {
                    self.notify_transport_error_v6(rest);
                }
            }
            Icmpv6Type::RouterSolicitation
            | Icmpv6Type::RouterAdvertisement(_)
            | Icmpv6Type::NeighborSolicitation { .. }
            | Icmpv6Type::NeighborAdvertisement { .. }
            | Icmpv6Type::Redirect { .. } => {
                self.nd_input(header.icmp_type.clone(), rest, netif, src, dst);
            }
            Icmpv6Type::MldQuery { .. } | Icmpv6Type::MldReport { .. }
            | Icmpv6Type::MldDone { .. } => {
                if self.cfg.mld {
                    self.mld_input(&header.icmp_type, netif, src);
                }
            }
            Icmpv6Type::EchoReply(_)
            | Icmpv6Type::PacketTooBig { .. }
            | Icmpv6Type::TimeExceeded { .. }
            | Icmpv6Type::ParameterProblem { .. }
            | Icmpv6Type::Unknown { .. } => {}
        }
    }

    /// Send an ICMPv6 error quoting as much of the offending packet
    /// as fits in the minimum MTU (RFC 4443, section 2.4).
    pub(crate) fn send_icmp6_error(
        &mut self,
        to: Ipv6Addr,
        icmp_type: Icmpv6Type,
        offending: &[u8],
    ) {
        if to.is_unspecified() || to.is_multicast() {
            return;
        }
        if !self.icmp_error_allowed(IpAddr::V6(to)) {
            return;
        }
        let quote = &offending[..offending.len().min(ICMP6_QUOTE_MAX)];

        // source selection needs the route first; with_checksum needs
        // the source, so resolve it now
        let Ok(route) = self.route_ipv6(to) else {
            return;
        };
        let Some(src) = self.select_ipv6_source(route.netif(), to) else {
            return;
        };

        let header =
            Icmpv6Header::with_checksum(icmp_type, src.octets(), to.octets(), quote);
        let fixed = header.to_bytes();
        let mut message = Buf::alloc_heap(Headroom::Ip, fixed.len() + quote.len());
        message
            .copy_from_slice(0, &fixed)
            .expect("sized allocation");
        message
            .copy_from_slice(fixed.len(), quote)
            .expect("sized allocation");

        self.stats.icmp_tx += 1;
        let _ = self.ipv6_output(message, Some(src), to, 255, IpNumber::IPV6_ICMP);
    }

    pub(crate) fn send_icmp6_port_unreachable(&mut self, to: Ipv6Addr, offending: &[u8]) {
        self.send_icmp6_error(
            to,
            Icmpv6Type::DestinationUnreachable { code: 4 },
            offending,
        );
    }

    pub(crate) fn send_icmp6_param_problem(
        &mut self,
        to: Ipv6Addr,
        code: u8,
        pointer: u32,
        offending: &[u8],
    ) {
        self.send_icmp6_error(
            to,
            Icmpv6Type::ParameterProblem { code, pointer },
            offending,
        );
    }

    // ---- error notification upwards ---------------------------------------

    /// A fatal ICMPv4 unreachable arrived; the quoted bytes are the
    /// offending packet we once sent. Abort the matching TCP
    /// connection.
    fn notify_transport_error(&mut self, quoted: &[u8]) {
        let Ok((ip, rest)) = Ipv4Header::from_slice(quoted) else {
            return;
        };
        if ip.protocol != IpNumber::TCP || rest.len() < 4 {
            return;
        }
        let local_port = u16::from_be_bytes([rest[0], rest[1]]);
        let remote_port = u16::from_be_bytes([rest[2], rest[3]]);
        self.tcp_abort_unreachable(
            IpAddr::V4(Ipv4Addr::from(ip.source)),
            local_port,
            IpAddr::V4(Ipv4Addr::from(ip.destination)),
            remote_port,
        );
    }

    fn notify_transport_error_v6(&mut self, quoted: &[u8]) {
        let Ok((ip, rest)) = crate::net::Ipv6Header::from_slice(quoted) else {
            return;
        };
        if ip.next_header != IpNumber::TCP || rest.len() < 4 {
            return;
        }
        let local_port = u16::from_be_bytes([rest[0], rest[1]]);
        let remote_port = u16::from_be_bytes([rest[2], rest[3]]);
        self.tcp_abort_unreachable(
            IpAddr::V6(Ipv6Addr::from(ip.source)),
            local_port,
            IpAddr::V6(Ipv6Addr::from(ip.destination)),
            remote_port,
        );
    }
}
