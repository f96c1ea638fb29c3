//! Shared harness for the scenario tests: in-memory links with
//! controllable loss, netif setup and recording endpoint hooks.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use picostack::addr::{IpAddr, Ipv4Addr};
use picostack::buf::Buf;
use picostack::iface::{LinkDriver, Netif, NetifFlags, NetifId};
use picostack::stack::{Config, Stack};
use picostack::tcp::{TcpCtx, TcpHooks};
use picostack::time::Instant;
use picostack::udp::{UdpCtx, UdpHooks};
use picostack::StackError;

// ---- links ----------------------------------------------------------------

type FrameQueue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// Loss/observation switches of one direction of a [`link`].
#[derive(Clone)]
pub struct LinkControl {
    pub drop_a_to_b: Rc<Cell<bool>>,
    pub drop_b_to_a: Rc<Cell<bool>>,
    pub sent_a_to_b: Rc<Cell<usize>>,
    pub sent_b_to_a: Rc<Cell<usize>>,
}

pub struct TestPipe {
    tx: FrameQueue,
    rx: FrameQueue,
    drop_tx: Rc<Cell<bool>>,
    sent_tx: Rc<Cell<usize>>,
}

impl LinkDriver for TestPipe {
    fn link_output(&mut self, frame: &Buf) -> Result<(), StackError> {
        self.sent_tx.set(self.sent_tx.get() + 1);
        if !self.drop_tx.get() {
            self.tx.borrow_mut().push_back(frame.to_vec());
        }
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Buf> {
        self.rx.borrow_mut().pop_front().map(Buf::from_vec)
    }
}

/// A bidirectional in-memory link with per-direction drop switches.
pub fn link() -> (TestPipe, TestPipe, LinkControl) {
    let a_to_b: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));
    let control = LinkControl {
        drop_a_to_b: Rc::new(Cell::new(false)),
        drop_b_to_a: Rc::new(Cell::new(false)),
        sent_a_to_b: Rc::new(Cell::new(0)),
        sent_b_to_a: Rc::new(Cell::new(0)),
    };
    let a = TestPipe {
        tx: a_to_b.clone(),
        rx: b_to_a.clone(),
        drop_tx: control.drop_a_to_b.clone(),
        sent_tx: control.sent_a_to_b.clone(),
    };
    let b = TestPipe {
        tx: b_to_a,
        rx: a_to_b,
        drop_tx: control.drop_b_to_a.clone(),
        sent_tx: control.sent_b_to_a.clone(),
    };
    (a, b, control)
}

/// A driver that records every transmitted frame and lets the test
/// inject received ones.
pub struct CaptureDriver {
    pub sent: Rc<RefCell<Vec<Vec<u8>>>>,
    pub inject: FrameQueue,
}

impl CaptureDriver {
    pub fn new() -> (CaptureDriver, Rc<RefCell<Vec<Vec<u8>>>>, FrameQueue) {
        let sent: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let inject: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));
        (
            CaptureDriver {
                sent: sent.clone(),
                inject: inject.clone(),
            },
            sent,
            inject,
        )
    }
}

impl LinkDriver for CaptureDriver {
    fn link_output(&mut self, frame: &Buf) -> Result<(), StackError> {
        self.sent.borrow_mut().push(frame.to_vec());
        Ok(())
    }

    fn poll_receive(&mut self) -> Option<Buf> {
        self.inject.borrow_mut().pop_front().map(Buf::from_vec)
    }
}

// ---- netif / stack setup --------------------------------------------------

/// Add an up-and-running raw-IP netif with the given IPv4 address.
pub fn add_ip_netif(
    stack: &mut Stack,
    driver: Box<dyn LinkDriver>,
    addr: Ipv4Addr,
    mtu: u16,
) -> NetifId {
    let id = stack
        .add_netif(Netif::new(
            "p0",
            [0; 6],
            mtu,
            NetifFlags {
                link_up: true,
                multicast: true,
                ..Default::default()
            },
            driver,
        ))
        .unwrap();
    stack
        .netif_set_ipv4(
            id,
            Some(picostack::iface::Ipv4Config {
                addr,
                mask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::UNSPECIFIED,
            }),
        )
        .unwrap();
    stack.netif_set_up(id).unwrap();
    id
}

/// Scenario configuration: MSS 1460, 16 KiB windows.
pub fn scenario_config() -> Config {
    Config {
        tcp_mss: 1460,
        tcp_wnd: 16 * 1024,
        tcp_snd_buf: 16 * 1024,
        ..Config::default()
    }
}

/// Poll both stacks across a span of simulated time.
pub fn run_pair(a: &mut Stack, b: &mut Stack, from_ms: u64, to_ms: u64, step_ms: u64) {
    let mut t = from_ms;
    while t <= to_ms {
        a.poll(Instant::from_millis(t));
        b.poll(Instant::from_millis(t));
        // a second pass so answers generated by b still reach a
        // within this step
        a.poll(Instant::from_millis(t));
        b.poll(Instant::from_millis(t));
        t += step_ms;
    }
}

// ---- recording hooks ------------------------------------------------------

#[derive(Default)]
pub struct TcpRecord {
    /// Endpoint id, filled in on connect/accept.
    pub id: Option<picostack::tcp::TcbId>,
    pub connected: bool,
    pub accepted: usize,
    pub received: Vec<u8>,
    /// Size of each individual receive callback.
    pub receive_calls: Vec<usize>,
    pub remote_closed: bool,
    pub sent_total: usize,
    pub error: Option<StackError>,
    /// Bytes written back after every receive (interactive echo
    /// tests).
    pub echo: bool,
}

pub type SharedTcpRecord = Rc<RefCell<TcpRecord>>;

pub fn tcp_record() -> SharedTcpRecord {
    Rc::new(RefCell::new(TcpRecord::default()))
}

/// Recording TCP hooks; a listener hands `child` records to accepted
/// connections.
pub struct RecordHooks {
    pub record: SharedTcpRecord,
    pub child: Option<SharedTcpRecord>,
}

impl RecordHooks {
    pub fn new(record: SharedTcpRecord) -> Box<RecordHooks> {
        Box::new(RecordHooks {
            record,
            child: None,
        })
    }

    pub fn listener(record: SharedTcpRecord, child: SharedTcpRecord) -> Box<RecordHooks> {
        Box::new(RecordHooks {
            record,
            child: Some(child),
        })
    }
}

impl TcpHooks for RecordHooks {
    fn connected(&mut self, cx: &mut TcpCtx<'_>) {
        let mut record = self.record.borrow_mut();
        record.connected = true;
        record.id = Some(cx.id());
    }

    fn accepted(&mut self, cx: &mut TcpCtx<'_>) -> Option<Box<dyn TcpHooks>> {
        self.record.borrow_mut().accepted += 1;
        self.child.as_ref().map(|child| {
            child.borrow_mut().id = Some(cx.id());
            RecordHooks::new(child.clone()) as Box<dyn TcpHooks>
        })
    }

    fn received(&mut self, cx: &mut TcpCtx<'_>, data: Buf) {
        let bytes = data.to_vec();
        {
            let mut record = self.record.borrow_mut();
            record.receive_calls.push(bytes.len());
            record.received.extend_from_slice(&bytes);
        }
        cx.recved(bytes.len());
        if self.record.borrow().echo {
            let _ = cx.write(b"x", true);
        }
    }

    fn remote_closed(&mut self, _cx: &mut TcpCtx<'_>) {
        self.record.borrow_mut().remote_closed = true;
    }

    fn sent(&mut self, _cx: &mut TcpCtx<'_>, acked: usize) {
        self.record.borrow_mut().sent_total += acked;
    }

    fn error(self: Box<Self>, reason: StackError) {
        self.record.borrow_mut().error = Some(reason);
    }
}

#[derive(Default)]
pub struct UdpRecord {
    pub datagrams: Vec<(IpAddr, u16, Vec<u8>)>,
}

pub type SharedUdpRecord = Rc<RefCell<UdpRecord>>;

pub fn udp_record() -> SharedUdpRecord {
    Rc::new(RefCell::new(UdpRecord::default()))
}

pub struct UdpRecordHooks {
    pub record: SharedUdpRecord,
}

impl UdpHooks for UdpRecordHooks {
    fn received(&mut self, _cx: &mut UdpCtx<'_>, src: (IpAddr, u16), data: Buf) {
        self.record
            .borrow_mut()
            .datagrams
            .push((src.0, src.1, data.to_vec()));
    }
}
