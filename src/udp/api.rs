//! UDP endpoint API and input processing.

use alloc::boxed::Box;

use crate::addr::{IpAddr, Ipv4Addr, Ipv6Addr};
use crate::buf::{Buf, Headroom};
use crate::checksum::Sum16BitWords;
use crate::err::StackError;
use crate::iface::NetifId;
use crate::ipv4::Ipv4Route;
use crate::stack::Stack;
use crate::transport::UdpHeader;
use crate::udp::{demux_group, demux_unicast, UdpCtx, UdpEndpoint, UdpHooks, UdpId};
use crate::IpNumber;

impl Stack {
    /// Create a UDP endpoint.
    pub fn udp_new(&mut self) -> Result<UdpId, StackError> {
        if !self.cfg.udp {
            return Err(StackError::Argument);
        }
        self.udp
            .acquire(UdpEndpoint::new(self.cfg.ip_default_ttl))
            .ok_or(StackError::OutOfMemory)
    }

    /// Install the receive hooks of an endpoint.
    pub fn udp_set_hooks(&mut self, id: UdpId, hooks: Box<dyn UdpHooks>) -> Result<(), StackError> {
        let ep = self.udp.get_mut(id).ok_or(StackError::Argument)?;
        ep.hooks = Some(hooks);
        Ok(())
    }

    /// Delete an endpoint.
    pub fn udp_remove(&mut self, id: UdpId) -> Result<(), StackError> {
        self.udp.release(id).map(|_| ()).ok_or(StackError::Argument)
    }

    /// Bind to a local address and port. Port 0 picks an ephemeral
    /// port.
    pub fn udp_bind(&mut self, id: UdpId, addr: IpAddr, mut port: u16) -> Result<(), StackError> {
        if self.udp.get(id).is_none() {
            return Err(StackError::Argument);
        }
        if port == 0 {
            port = self.free_udp_port().ok_or(StackError::AddressInUse)?;
        } else {
            // conflict: same port and overlapping address in the same
            // family
            let conflict = self.udp.iter().any(|(other, ep)| {
                other != id
                    && ep.local_port == port
                    && match (ep.local_ip, addr) {
                        (IpAddr::V4(a), IpAddr::V4(b)) => {
                            a == b || a == Ipv4Addr::UNSPECIFIED || b == Ipv4Addr::UNSPECIFIED
                        }
                        (IpAddr::V6(a), IpAddr::V6(b)) => {
                            a == b || a == Ipv6Addr::UNSPECIFIED || b == Ipv6Addr::UNSPECIFIED
                        }
                        _ => false,
                    }
            });
            if conflict {
                return Err(StackError::AddressInUse);
            }
        }
        let ep = self.udp.get_mut(id).expect("checked");
        ep.local_ip = addr;
        ep.local_port = port;
        Ok(())
    }

    /// Fix the remote address of the endpoint (filters input, enables
    /// [`Stack::udp_send`]).
    pub fn udp_connect(&mut self, id: UdpId, addr: IpAddr, port: u16) -> Result<(), StackError> {
        if port == 0 {
            return Err(StackError::Argument);
        }
        let needs_bind = {
            let ep = self.udp.get(id).ok_or(StackError::Argument)?;
            ep.local_port == 0
        };
        if needs_bind {
            let any = match addr {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            self.udp_bind(id, any, 0)?;
        }
        let ep = self.udp.get_mut(id).expect("checked");
        ep.remote_ip = addr;
        ep.remote_port = port;
        ep.connected = true;
        Ok(())
    }

    /// Remove the remote association again.
    pub fn udp_disconnect(&mut self, id: UdpId) -> Result<(), StackError> {
        let ep = self.udp.get_mut(id).ok_or(StackError::Argument)?;
        ep.connected = false;
        Ok(())
    }

    /// Send to the connected remote.
    pub fn udp_send(&mut self, id: UdpId, data: &[u8]) -> Result<(), StackError> {
        let (dst, port) = {
            let ep = self.udp.get(id).ok_or(StackError::Argument)?;
            if !ep.connected {
                return Err(StackError::Connection);
            }
            (ep.remote_ip, ep.remote_port)
        };
        self.udp_send_to(id, dst, port, data)
    }

    /// Send one datagram to an explicit destination.
    pub fn udp_send_to(
        &mut self,
        id: UdpId,
        dst: IpAddr,
        dst_port: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        if dst_port == 0 || data.len() + UdpHeader::LEN > 0xffff {
            return Err(StackError::Argument);
        }
        let needs_bind = {
            let ep = self.udp.get(id).ok_or(StackError::Argument)?;
            ep.local_port == 0
        };
        if needs_bind {
            let any = match dst {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            self.udp_bind(id, any, 0)?;
        }

        let (local_ip, local_port, checksum_disabled, ttl) = {
            let ep = self.udp.get(id).expect("checked");
            (ep.local_ip, ep.local_port, ep.checksum_disabled, ep.ttl)
        };

        let mut header = UdpHeader {
            source_port: local_port,
            destination_port: dst_port,
            length: (UdpHeader::LEN + data.len()) as u16,
            checksum: 0,
        };

        match dst {
            IpAddr::V4(dst_v4) => {
                // the checksum needs the source address before output
                let src_v4 = match local_ip {
                    IpAddr::V4(addr) if !addr.is_unspecified() => addr,
                    _ => self.ipv4_source_for(dst_v4)?,
                };
                if !checksum_disabled {
                    header.checksum =
                        header.calc_checksum_ipv4(src_v4.octets(), dst_v4.octets(), data);
                }
                let payload = Self::udp_payload(&header, data);
                self.stats.udp_tx += 1;
                self.ipv4_output(payload, Some(src_v4), dst_v4, ttl, 0, IpNumber::UDP)
            }
            IpAddr::V6(dst_v6) => {
                let src_v6 = match local_ip {
                    IpAddr::V6(addr) if !addr.is_unspecified() => addr,
                    _ => {
                        let route = self.route_ipv6(dst_v6)?;
                        self.select_ipv6_source(route.netif(), dst_v6)
                            .ok_or(StackError::Routing)?
                    }
                };
                // IPv6 checksums are mandatory
                header.checksum =
                    header.calc_checksum_ipv6(src_v6.octets(), dst_v6.octets(), data);
                let payload = Self::udp_payload(&header, data);
                self.stats.udp_tx += 1;
                self.ipv6_output(payload, Some(src_v6), dst_v6, ttl, IpNumber::UDP)
            }
        }
    }

    fn udp_payload(header: &UdpHeader, data: &[u8]) -> Buf {
        let mut payload = Buf::alloc_heap(Headroom::Ip, UdpHeader::LEN + data.len());
        payload
            .copy_from_slice(0, &header.to_bytes())
            .expect("sized allocation");
        payload
            .copy_from_slice(UdpHeader::LEN, data)
            .expect("sized allocation");
        payload
    }

    /// The source address the v4 output path would pick for `dst`.
    pub(crate) fn ipv4_source_for(&self, dst: Ipv4Addr) -> Result<Ipv4Addr, StackError> {
        let netif = match self.route_ipv4(dst)? {
            Ipv4Route::Local { netif } => netif,
            Ipv4Route::Forward { netif, .. } => netif,
        };
        self.netifs
            .get(netif)
            .and_then(|n| n.ipv4)
            .map(|c| c.addr)
            .ok_or(StackError::Routing)
    }

    fn free_udp_port(&mut self) -> Option<u16> {
        for _ in 0..0x4000 {
            let candidate = self.next_ephemeral();
            if !self
                .udp
                .iter()
                .any(|(_, ep)| ep.local_port == candidate)
            {
                return Some(candidate);
            }
        }
        None
    }

    /// Process one received UDP datagram. Returns false when no
    /// endpoint matched (the caller answers with port unreachable for
    /// unicast).
    pub(crate) fn udp_input(
        &mut self,
        mut packet: Buf,
        _netif: NetifId,
        src: IpAddr,
        dst: IpAddr,
        is_group: bool,
    ) -> bool {
        self.stats.udp_rx += 1;

        let header = {
            let Ok(slice) = packet.pullup(UdpHeader::LEN) else {
                self.stats.rx_dropped += 1;
                return true;
            };
            UdpHeader::from_slice(slice).expect("pullup guarantees length").0
        };
        if usize::from(header.length) < UdpHeader::LEN
            || usize::from(header.length) > packet.tot_len()
        {
            self.stats.rx_dropped += 1;
            return true;
        }
        packet
            .realloc(usize::from(header.length))
            .expect("length checked");

        // checksum verification over pseudo header + segment
        let segment = packet.to_vec();
        let checksum_ok = match (src, dst) {
            (IpAddr::V4(src4), IpAddr::V4(dst4)) => {
                // zero means "no checksum calculated" for IPv4
                header.checksum == 0 || {
                    Sum16BitWords::new()
                        .add_4bytes(src4.octets())
                        .add_4bytes(dst4.octets())
                        .add_2bytes([0, IpNumber::UDP.0])
                        .add_2bytes(header.length.to_be_bytes())
                        .add_slice(&segment)
                        .ones_complement()
                        == 0
                }
            }
            (IpAddr::V6(src6), IpAddr::V6(dst6)) => {
                header.checksum != 0 && {
                    Sum16BitWords::new()
                        .add_16bytes(src6.octets())
                        .add_16bytes(dst6.octets())
                        .add_4bytes(u32::from(header.length).to_be_bytes())
                        .add_2bytes([0, IpNumber::UDP.0])
                        .add_slice(&segment)
                        .ones_complement()
                        == 0
                }
            }
            _ => false,
        };
        if !checksum_ok {
            self.stats.rx_dropped += 1;
            return true;
        }

        packet
            .header_adjust_force(-(UdpHeader::LEN as i32))
            .expect("header present");

        if is_group {
            let targets = demux_group(&self.udp, matches!(dst, IpAddr::V6(_)), header.destination_port);
            let any = !targets.is_empty();
            for id in targets {
                self.udp_deliver(id, src, header.source_port, packet.clone());
            }
            if !any {
                self.stats.udp_no_endpoint += 1;
            }
            // group traffic never triggers port unreachable
            true
        } else {
            match demux_unicast(&self.udp, dst, header.destination_port, src, header.source_port)
            {
                Some(id) => {
                    self.udp_deliver(id, src, header.source_port, packet);
                    true
                }
                None => {
                    self.stats.udp_no_endpoint += 1;
                    false
                }
            }
        }
    }

    fn udp_deliver(&mut self, id: UdpId, src: IpAddr, src_port: u16, data: Buf) {
        // take the hooks out so the hook may call back into the stack
        let Some(mut hooks) = self.udp.get_mut(id).and_then(|ep| ep.hooks.take()) else {
            return;
        };
        {
            let mut cx = UdpCtx { stack: self, udp: id };
            hooks.received(&mut cx, (src, src_port), data);
        }
        // the hook may have removed the endpoint; only restore if the
        // slot is still there and empty
        if let Some(ep) = self.udp.get_mut(id) {
            if ep.hooks.is_none() {
                ep.hooks = Some(hooks);
            }
        }
    }
}
