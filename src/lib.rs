//! A small-footprint TCP/IP stack: IPv4, IPv6, TCP, UDP, ICMP,
//! IGMPv2/MLDv1, ARP and neighbor discovery on top of a zero-copy
//! buffer-chain subsystem and deterministic fixed-size pools.
//!
//! # Structure
//!
//! Everything stateful hangs off one [`Stack`] value — the *core
//! context*. All tables (netifs, ARP/ND caches, endpoint pools, TCP
//! connection lists, timers) are fields of it and every mutation goes
//! through `&mut Stack`, so one thread serializes the whole stack.
//! The core never blocks: drivers and timers are polled from
//! [`Stack::poll`], and with the `std` feature the
//! [`StackRunner`](stack::StackRunner) mailbox thread does that
//! polling for you while other threads post frames and closures
//! through a [`StackHandle`](stack::StackHandle).
//!
//! The wire-format layer ([`link`], [`net`], [`transport`]) is plain
//! data: each header type decodes from a slice with
//! `from_slice`/`to_bytes` pairs and precise error values.
//!
//! # A loopback echo in a few lines
//!
//! ```
//! use picostack::iface::{LoopbackDriver, Netif, NetifFlags};
//! use picostack::stack::{Config, Stack};
//! use picostack::time::Instant;
//!
//! let mut stack = Stack::new(Config::default());
//! let lo = stack
//!     .add_netif(Netif::new(
//!         "lo0",
//!         [0; 6],
//!         1500,
//!         NetifFlags { link_up: true, multicast: true, ..Default::default() },
//!         Box::new(LoopbackDriver::new()),
//!     ))
//!     .unwrap();
//! stack.netif_set_up(lo).unwrap();
//! stack.poll(Instant::from_millis(0));
//! ```
//!
//! # Concurrency contract
//!
//! External threads never touch a `Stack` directly. They hold a
//! [`StackHandle`](stack::StackHandle) and either post received
//! frames or ship a closure into the core. Buffer chains handed out
//! of the core (for example to a driver) may be read, but every
//! mutating operation belongs to the core context.

// `false == x` is used in a few input-validation spots on purpose: it
// is harder to overlook than the single '!' character.
#![allow(clippy::bool_comparison)]
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod addr;
pub mod buf;
pub mod checksum;
pub mod err;
pub mod group;
pub mod iface;
pub mod link;
pub mod neigh;
pub mod net;
pub mod pool;
pub mod raw;
pub mod stack;
pub mod tcp;
pub mod time;
pub mod transport;
pub mod udp;

mod ethernet;
mod icmp;
mod ipv4;
mod ipv6;
mod reass;

pub use crate::buf::{Buf, BufPool, Headroom, StorageClass};
pub use crate::err::StackError;
pub use crate::link::{ArpOperation, ArpPacket, Ethernet2Header, EtherType};
pub use crate::net::{
    Icmpv4Header, Icmpv4Type, Icmpv6Header, Icmpv6Type, IgmpMessage, IpNumber, Ipv4Header,
    Ipv6FragmentHeader, Ipv6Header,
};
pub use crate::stack::{Config, Stack, Stats};
pub use crate::transport::{TcpHeader, TcpOptionElement, TcpOptions, UdpHeader};

#[cfg(feature = "std")]
pub use crate::stack::{StackHandle, StackRunner};
