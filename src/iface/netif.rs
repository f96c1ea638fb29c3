use alloc::boxed::Box;
use alloc::vec::Vec;
use arrayvec::ArrayVec;
use core::any::Any;

use crate::addr::{Ipv4Addr, Ipv6Addr};
use crate::iface::LinkDriver;
use crate::pool::PoolId;

/// Handle to a network interface registered with the stack.
pub type NetifId = PoolId<Netif>;

/// Compile-time cap of IPv6 address slots per netif (the runtime
/// limit from `Config::ipv6_addrs_per_netif` may be smaller).
pub const IPV6_ADDR_SLOTS: usize = 4;

/// IPv4 configuration of a netif.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Config {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Lifecycle state of one IPv6 address slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ipv6AddrState {
    /// Slot is unused.
    Invalid,
    /// Duplicate address detection is running; the address must not be
    /// used as a source yet.
    Tentative {
        /// Number of neighbor solicitations already sent for DAD.
        probes_sent: u8,
    },
    /// Fully usable.
    Preferred,
    /// Usable but avoided for new communication.
    Deprecated,
}

impl Ipv6AddrState {
    /// True if the address may be used at all (source selection,
    /// input matching).
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, Ipv6AddrState::Preferred | Ipv6AddrState::Deprecated)
    }
}

/// One IPv6 address bound to a netif.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ipv6AddrSlot {
    pub addr: Ipv6Addr,
    pub state: Ipv6AddrState,
}

/// Behavioral flags of a netif.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NetifFlags {
    /// Administratively up.
    pub up: bool,
    /// Physical link detected.
    pub link_up: bool,
    /// The link supports broadcast frames.
    pub broadcast: bool,
    /// The link supports multicast frames.
    pub multicast: bool,
    /// Frames carry Ethernet II headers and IPv4 neighbors are
    /// resolved via ARP. Without this flag the driver exchanges raw
    /// IP packets (loopback, tunnels).
    pub ethernet: bool,
}

/// Events delivered to the extended-status callbacks registered on the
/// stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetifEvent {
    Added,
    Removed,
    StatusChanged { up: bool },
    LinkChanged { link_up: bool },
    Ipv4AddressChanged { old: Option<Ipv4Config> },
    Ipv6AddressChanged { slot: usize, old_state: Ipv6AddrState },
}

/// A network interface: addresses, MTU, flags and the link driver.
///
/// Lifecycle operations (add, up/down, address changes) go through the
/// stack so that the protocol machines and the event fanout observe
/// them; the fields here are the per-link state they maintain.
pub struct Netif {
    /// Short human readable name ("lo", "en0", ...).
    pub name: &'static str,
    /// Hardware address (all zero for non-ethernet links).
    pub hwaddr: [u8; 6],
    /// Maximum transmission unit in bytes, including the IP header.
    pub mtu: u16,
    /// Behavioral flags.
    pub flags: NetifFlags,
    pub(crate) driver: Box<dyn LinkDriver>,
    pub(crate) ipv4: Option<Ipv4Config>,
    pub(crate) ipv6: ArrayVec<Ipv6AddrSlot, IPV6_ADDR_SLOTS>,
    pub(crate) client_data: Vec<Option<Box<dyn Any>>>,
}

impl Netif {
    /// Create a netif around a driver. It starts down with no
    /// addresses; register it with `Stack::add_netif`.
    pub fn new(
        name: &'static str,
        hwaddr: [u8; 6],
        mtu: u16,
        flags: NetifFlags,
        driver: Box<dyn LinkDriver>,
    ) -> Netif {
        Netif {
            name,
            hwaddr,
            mtu,
            flags,
            driver,
            ipv4: None,
            ipv6: ArrayVec::new(),
            client_data: Vec::new(),
        }
    }

    /// IPv4 configuration, if any.
    #[inline]
    pub fn ipv4(&self) -> Option<&Ipv4Config> {
        self.ipv4.as_ref()
    }

    /// IPv6 address slots.
    #[inline]
    pub fn ipv6_slots(&self) -> &[Ipv6AddrSlot] {
        &self.ipv6
    }

    /// True if `addr` is one of this netif's usable IPv6 addresses.
    pub fn has_ipv6_addr(&self, addr: Ipv6Addr) -> bool {
        self.ipv6
            .iter()
            .any(|slot| slot.addr == addr && slot.state.is_valid())
    }

    /// True if `addr` is one of this netif's IPv6 addresses in any
    /// state except invalid (tentative addresses still defend
    /// themselves in DAD).
    pub fn owns_ipv6_addr(&self, addr: Ipv6Addr) -> bool {
        self.ipv6
            .iter()
            .any(|slot| slot.addr == addr && !matches!(slot.state, Ipv6AddrState::Invalid))
    }

    /// True if the netif is usable for traffic.
    #[inline]
    pub fn is_usable(&self) -> bool {
        self.flags.up && self.flags.link_up
    }

    /// Client data stored under a slot id allocated with
    /// `Stack::alloc_client_data_id`.
    pub fn client_data(&self, slot: usize) -> Option<&dyn Any> {
        self.client_data.get(slot)?.as_deref()
    }

    /// Store client data under a slot id. Returns the previous value.
    pub fn set_client_data(&mut self, slot: usize, value: Box<dyn Any>) -> Option<Box<dyn Any>> {
        if self.client_data.len() <= slot {
            self.client_data.resize_with(slot + 1, || None);
        }
        self.client_data[slot].replace(value)
    }
}

impl core::fmt::Debug for Netif {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Netif")
            .field("name", &self.name)
            .field("hwaddr", &self.hwaddr)
            .field("mtu", &self.mtu)
            .field("flags", &self.flags)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::Buf;
    use crate::err::StackError;

    struct NullDriver;
    impl LinkDriver for NullDriver {
        fn link_output(&mut self, _frame: &Buf) -> Result<(), StackError> {
            Ok(())
        }
    }

    fn example() -> Netif {
        Netif::new(
            "en0",
            [2, 0, 0, 0, 0, 1],
            1500,
            NetifFlags {
                broadcast: true,
                multicast: true,
                ethernet: true,
                ..Default::default()
            },
            Box::new(NullDriver),
        )
    }

    #[test]
    fn starts_down_without_addresses() {
        let netif = example();
        assert_eq!(false, netif.is_usable());
        assert!(netif.ipv4().is_none());
        assert!(netif.ipv6_slots().is_empty());
    }

    #[test]
    fn ipv6_addr_matching_respects_state() {
        let mut netif = example();
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        netif.ipv6.push(Ipv6AddrSlot {
            addr,
            state: Ipv6AddrState::Tentative { probes_sent: 0 },
        });
        // tentative: owned but not usable
        assert!(netif.owns_ipv6_addr(addr));
        assert_eq!(false, netif.has_ipv6_addr(addr));

        netif.ipv6[0].state = Ipv6AddrState::Preferred;
        assert!(netif.has_ipv6_addr(addr));
    }

    #[test]
    fn client_data_slots() {
        let mut netif = example();
        assert!(netif.client_data(2).is_none());
        assert!(netif.set_client_data(2, Box::new(42u32)).is_none());
        let value = netif.client_data(2).unwrap().downcast_ref::<u32>();
        assert_eq!(value, Some(&42));
        let old = netif.set_client_data(2, Box::new(7u32)).unwrap();
        assert_eq!(old.downcast_ref::<u32>(), Some(&42));
    }
}
