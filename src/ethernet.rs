//! Ethernet II framing and input classification.

use crate::buf::{Buf, Headroom};
use crate::err::StackError;
use crate::iface::NetifId;
use crate::link::{Ethernet2Header, EtherType};
use crate::stack::Stack;

impl Stack {
    /// Process one received Ethernet frame.
    pub(crate) fn ethernet_input(&mut self, mut frame: Buf, netif: NetifId) {
        let header = {
            let Ok(slice) = frame.pullup(Ethernet2Header::LEN) else {
                self.stats.rx_dropped += 1;
                return;
            };
            Ethernet2Header::from_slice(slice)
                .expect("pullup guarantees the length")
                .0
        };

        // destination filter
        let accept = {
            let Some(n) = self.netifs.get(netif) else {
                self.stats.rx_dropped += 1;
                return;
            };
            header.destination == n.hwaddr
                || header.destination == Ethernet2Header::BROADCAST
                || (n.flags.multicast && 0 != header.destination[0] & 1)
        };
        if !accept {
            self.stats.rx_dropped += 1;
            return;
        }

        frame
            .header_adjust_force(-(Ethernet2Header::LEN as i32))
            .expect("frame is at least one header long");

        match header.ether_type {
            EtherType::ARP if self.cfg.ipv4 => self.arp_input(frame, netif),
            EtherType::IPV4 if self.cfg.ipv4 => self.ipv4_input(frame, netif),
            EtherType::IPV6 if self.cfg.ipv6 => self.ipv6_input(frame, netif),
            _ => {
                self.stats.rx_dropped += 1;
            }
        }
    }

    /// Frame `packet` with an Ethernet II header and hand it to the
    /// netif's driver.
    pub(crate) fn ethernet_output(
        &mut self,
        netif: NetifId,
        dst_mac: [u8; 6],
        ether_type: EtherType,
        mut packet: Buf,
    ) -> Result<(), StackError> {
        let source = {
            let n = self.netifs.get(netif).ok_or(StackError::Argument)?;
            if !n.is_usable() {
                return Err(StackError::Routing);
            }
            n.hwaddr
        };
        let header = Ethernet2Header {
            destination: dst_mac,
            source,
            ether_type,
        };

        if packet.header_adjust(Ethernet2Header::LEN as i32).is_ok() {
            packet
                .copy_from_slice(0, &header.to_bytes())
                .expect("header fits the adjusted front");
        } else {
            // no headroom (forwarded or reassembled chain): prepend a
            // fresh segment
            let mut framed = Buf::alloc_heap(Headroom::Raw, Ethernet2Header::LEN);
            framed
                .copy_from_slice(0, &header.to_bytes())
                .expect("sized allocation");
            framed.concat(packet);
            packet = framed;
        }

        let n = self.netifs.get_mut(netif).ok_or(StackError::Argument)?;
        n.driver.link_output(&packet)?;
        self.stats.tx_frames += 1;
        Ok(())
    }

    /// Transmit a raw IP packet on a non-ethernet netif.
    pub(crate) fn raw_link_output(
        &mut self,
        netif: NetifId,
        packet: &Buf,
    ) -> Result<(), StackError> {
        let n = self.netifs.get_mut(netif).ok_or(StackError::Argument)?;
        if !n.is_usable() {
            return Err(StackError::Routing);
        }
        n.driver.link_output(packet)?;
        self.stats.tx_frames += 1;
        Ok(())
    }
}
