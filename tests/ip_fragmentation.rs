//! IPv4 fragmentation on output and reassembly on input, end to end.

mod common;

use common::*;
use picostack::addr::{IpAddr, Ipv4Addr};
use picostack::stack::Stack;
use picostack::{Ipv4Header, UdpHeader};

const A_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const B_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

#[test]
fn udp_datagram_fragments_and_reassembles() {
    // sender with a capturing driver so the fragments can be examined
    let (driver_a, sent_a, _inject_a) = CaptureDriver::new();
    let mut a = Stack::new(scenario_config());
    add_ip_netif(&mut a, Box::new(driver_a), A_IP, 1500);

    let (driver_b, _sent_b, inject_b) = CaptureDriver::new();
    let mut b = Stack::new(scenario_config());
    add_ip_netif(&mut b, Box::new(driver_b), B_IP, 1500);

    // receiver endpoint
    let record = udp_record();
    let ep_b = b.udp_new().unwrap();
    b.udp_set_hooks(
        ep_b,
        Box::new(UdpRecordHooks {
            record: record.clone(),
        }),
    )
    .unwrap();
    b.udp_bind(ep_b, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000)
        .unwrap();

    // 3000 application bytes in one datagram
    let payload: Vec<u8> = (0..3000usize).map(|i| (i % 251) as u8).collect();
    let ep_a = a.udp_new().unwrap();
    a.udp_send_to(ep_a, IpAddr::V4(B_IP), 5000, &payload)
        .unwrap();
    a.poll(picostack::time::Instant::from_millis(1));

    // exactly three fragments with 8-byte aligned offsets; the
    // more-fragments bit is cleared only on the last
    let frames = sent_a.borrow().clone();
    assert_eq!(frames.len(), 3);
    let mut offsets = Vec::new();
    for (index, frame) in frames.iter().enumerate() {
        let (ip, rest) = Ipv4Header::from_slice(frame).unwrap();
        assert_eq!(ip.more_fragments, index < 2);
        assert_eq!(ip.fragment_offset % 8, 0);
        offsets.push(ip.fragment_offset);
        // every fragment fits the mtu
        assert!(rest.len() + ip.header_len() <= 1500);
    }
    assert_eq!(offsets, vec![0, 1480, 2960]);
    assert_eq!(a.stats().ip4_frag_tx, 3);

    // deliver the fragments out of order; the peer reassembles one
    // 3000 byte datagram
    inject_b.borrow_mut().push_back(frames[2].clone());
    inject_b.borrow_mut().push_back(frames[0].clone());
    inject_b.borrow_mut().push_back(frames[1].clone());
    b.poll(picostack::time::Instant::from_millis(2));

    let record = record.borrow();
    assert_eq!(record.datagrams.len(), 1);
    let (src, src_port, data) = &record.datagrams[0];
    assert_eq!(*src, IpAddr::V4(A_IP));
    assert!(*src_port >= 0xc000, "ephemeral source port");
    assert_eq!(data, &payload);
    assert_eq!(b.stats().ip4_reass_ok, 1);
}

#[test]
fn unfragmented_datagram_passes_straight_through() {
    let (driver_a, sent_a, _) = CaptureDriver::new();
    let mut a = Stack::new(scenario_config());
    add_ip_netif(&mut a, Box::new(driver_a), A_IP, 1500);

    let ep = a.udp_new().unwrap();
    a.udp_send_to(ep, IpAddr::V4(B_IP), 5000, &[1, 2, 3, 4])
        .unwrap();
    a.poll(picostack::time::Instant::from_millis(1));

    let frames = sent_a.borrow();
    assert_eq!(frames.len(), 1);
    let (ip, rest) = Ipv4Header::from_slice(&frames[0]).unwrap();
    assert!(!ip.is_fragmenting_payload());
    let (udp, data) = UdpHeader::from_slice(rest).unwrap();
    assert_eq!(udp.destination_port, 5000);
    assert_eq!(data, &[1, 2, 3, 4]);
    assert_eq!(a.stats().ip4_frag_tx, 0);
}

#[test]
fn reassembly_expires_quietly() {
    let (driver_b, sent_b, inject_b) = CaptureDriver::new();
    let mut cfg = scenario_config();
    cfg.ip_reass_max_age_ms = 2000;
    let mut b = Stack::new(cfg);
    add_ip_netif(&mut b, Box::new(driver_b), B_IP, 1500);

    // a lone first fragment, never completed
    let (driver_a, sent_a, _) = CaptureDriver::new();
    let mut a = Stack::new(scenario_config());
    add_ip_netif(&mut a, Box::new(driver_a), A_IP, 1500);
    let ep = a.udp_new().unwrap();
    let payload = vec![0u8; 3000];
    a.udp_send_to(ep, IpAddr::V4(B_IP), 5000, &payload).unwrap();
    a.poll(picostack::time::Instant::from_millis(1));
    inject_b
        .borrow_mut()
        .push_back(sent_a.borrow()[0].clone());

    b.poll(picostack::time::Instant::from_millis(10));
    // age the block out
    for t in (1000u64..=5000).step_by(500) {
        b.poll(picostack::time::Instant::from_millis(t));
    }
    assert_eq!(b.stats().ip4_reass_failed, 1);
    // no stale data surfaced, no frames emitted for it
    assert!(sent_b.borrow().is_empty());
}
