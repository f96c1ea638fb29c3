//! Segment-level TCP tests: hand-crafted packets are injected and the
//! emitted frames inspected.

mod common;

use common::*;
use picostack::addr::{IpAddr, Ipv4Addr};
use picostack::stack::Stack;
use picostack::{IpNumber, Ipv4Header, TcpHeader};

const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const ANY: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Serialize an IPv4 packet carrying one TCP segment.
fn tcp_packet(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    mut tcp: TcpHeader,
    payload: &[u8],
) -> Vec<u8> {
    tcp.checksum = tcp.calc_checksum_ipv4(src.octets(), dst.octets(), payload);
    let tcp_bytes = tcp.to_bytes();

    let mut ip = Ipv4Header::new(
        (tcp_bytes.len() + payload.len()) as u16,
        64,
        IpNumber::TCP,
        src.octets(),
        dst.octets(),
    );
    ip.header_checksum = ip.calc_header_checksum();

    let mut packet = Vec::new();
    packet.extend_from_slice(&ip.to_bytes());
    packet.extend_from_slice(&tcp_bytes);
    packet.extend_from_slice(payload);
    packet
}

/// Decode the TCP header of a captured raw-IP frame.
fn parse_tcp(frame: &[u8]) -> (Ipv4Header, TcpHeader, Vec<u8>) {
    let (ip, rest) = Ipv4Header::from_slice(frame).unwrap();
    let (tcp, payload) = TcpHeader::from_slice(rest).unwrap();
    (ip, tcp, payload.to_vec())
}

#[test]
fn rst_on_syn_to_closed_port() {
    let (driver, sent, inject) = CaptureDriver::new();
    let mut stack = Stack::new(scenario_config());
    add_ip_netif(&mut stack, Box::new(driver), OUR_IP, 1500);

    // SYN for a port nobody listens on
    let mut syn = TcpHeader::new(5555, 4242, 7_000_000, 16384);
    syn.syn = true;
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, syn, &[]));
    stack.poll(picostack::time::Instant::from_millis(10));

    let frames = sent.borrow();
    assert_eq!(frames.len(), 1, "exactly one response frame");
    let (ip, tcp, payload) = parse_tcp(&frames[0]);
    assert_eq!(ip.destination, PEER_IP.octets());
    assert!(tcp.rst);
    assert!(tcp.ack);
    assert_eq!(tcp.sequence_number, 0);
    // ack covers the SYN phantom
    assert_eq!(tcp.acknowledgment_number, 7_000_001);
    assert!(payload.is_empty());
    // no endpoint was created for it
    assert_eq!(stack.stats().tcp_rst_tx, 1);
}

#[test]
fn out_of_order_segments_deliver_in_order() {
    let (driver, sent, inject) = CaptureDriver::new();
    let mut stack = Stack::new(scenario_config());
    add_ip_netif(&mut stack, Box::new(driver), OUR_IP, 1500);

    let listen_rec = tcp_record();
    let server_rec = tcp_record();
    let listener = stack.tcp_new().unwrap();
    stack
        .tcp_set_hooks(
            listener,
            RecordHooks::listener(listen_rec.clone(), server_rec.clone()),
        )
        .unwrap();
    stack.tcp_bind(listener, ANY, 80).unwrap();
    stack.tcp_listen(listener).unwrap();

    // handshake: SYN in, SYN+ACK out, ACK in
    let client_iss = 1_000_000u32;
    let mut syn = TcpHeader::new(5555, 80, client_iss, 16384);
    syn.syn = true;
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, syn, &[]));
    stack.poll(picostack::time::Instant::from_millis(10));

    let server_iss = {
        let frames = sent.borrow();
        let (_, synack, _) = parse_tcp(frames.last().unwrap());
        assert!(synack.syn && synack.ack);
        assert_eq!(synack.acknowledgment_number, client_iss + 1);
        synack.sequence_number
    };
    let mut ack = TcpHeader::new(5555, 80, client_iss + 1, 16384);
    ack.ack = true;
    ack.acknowledgment_number = server_iss.wrapping_add(1);
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, ack, &[]));
    stack.poll(picostack::time::Instant::from_millis(20));
    assert_eq!(listen_rec.borrow().accepted, 1);

    // three 100 byte ranges; the middle one arrives last
    let base = client_iss + 1;
    let chunk = |start: u32, len: u32| -> Vec<u8> {
        (start..start + len).map(|i| (i % 251) as u8).collect()
    };
    let send_data = |stack: &mut Stack, offset: u32, data: &[u8], at: u64| {
        let mut header = TcpHeader::new(5555, 80, base + offset, 16384);
        header.ack = true;
        header.acknowledgment_number = server_iss.wrapping_add(1);
        header.psh = true;
        inject
            .borrow_mut()
            .push_back(tcp_packet(PEER_IP, OUR_IP, header, data));
        stack.poll(picostack::time::Instant::from_millis(at));
    };

    send_data(&mut stack, 0, &chunk(0, 100), 30);
    // nothing but [0,100) may be delivered yet
    assert_eq!(server_rec.borrow().receive_calls, vec![100]);

    send_data(&mut stack, 200, &chunk(200, 100), 40);
    // the gap holds delivery back
    assert_eq!(server_rec.borrow().receive_calls, vec![100]);

    send_data(&mut stack, 100, &chunk(100, 100), 50);
    // the middle segment unlocked itself and the queued range
    {
        let record = server_rec.borrow();
        assert_eq!(record.received.len(), 300);
        // in order, byte for byte
        let expected: Vec<u8> = (0u32..300).map(|i| (i % 251) as u8).collect();
        assert_eq!(record.received, expected);
        // either one merged callback for [100,300) or two back to back
        assert!(
            record.receive_calls == vec![100, 100, 100]
                || record.receive_calls == vec![100, 200],
            "unexpected delivery pattern {:?}",
            record.receive_calls
        );
    }

    // the out-of-order arrival forced an immediate duplicate ACK
    let dup_acks = {
        let frames = sent.borrow();
        frames
            .iter()
            .map(|frame| parse_tcp(frame).1)
            .filter(|tcp| tcp.ack && !tcp.syn && tcp.acknowledgment_number == base + 100)
            .count()
    };
    assert!(dup_acks >= 1, "gap did not trigger an immediate ACK");
}

#[test]
fn slow_start_grows_cwnd_by_one_mss_per_ack() {
    let (driver, sent, inject) = CaptureDriver::new();
    let mut stack = Stack::new(scenario_config());
    add_ip_netif(&mut stack, Box::new(driver), OUR_IP, 1500);

    let listen_rec = tcp_record();
    let server_rec = tcp_record();
    let listener = stack.tcp_new().unwrap();
    stack
        .tcp_set_hooks(
            listener,
            RecordHooks::listener(listen_rec.clone(), server_rec.clone()),
        )
        .unwrap();
    stack.tcp_bind(listener, ANY, 80).unwrap();
    stack.tcp_listen(listener).unwrap();

    // handshake by injection
    let client_iss = 5_000u32;
    let mut syn = TcpHeader::new(5555, 80, client_iss, 0xffff);
    syn.syn = true;
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, syn, &[]));
    stack.poll(picostack::time::Instant::from_millis(10));
    let server_iss = parse_tcp(sent.borrow().last().unwrap()).1.sequence_number;
    let mut ack = TcpHeader::new(5555, 80, client_iss + 1, 0xffff);
    ack.ack = true;
    ack.acknowledgment_number = server_iss.wrapping_add(1);
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, ack, &[]));
    stack.poll(picostack::time::Instant::from_millis(20));

    let server = server_rec.borrow().id.unwrap();
    let info = stack.tcp_info(server).unwrap();
    let mss = u32::from(info.mss);
    assert_eq!(info.cwnd, mss, "initial window is one segment");

    // queue several segments worth of data; only cwnd-many leave
    let bulk = vec![0u8; 8 * mss as usize];
    let mut queued = 0;
    while queued < bulk.len() {
        match stack.tcp_write(server, &bulk[queued..], false) {
            Ok(n) if n > 0 => queued += n,
            _ => break,
        }
    }
    stack.poll(picostack::time::Instant::from_millis(30));

    // acknowledge segment by segment and watch the window climb by
    // exactly one mss per new ack while in slow start
    let mut acked = server_iss.wrapping_add(1);
    for round in 1..=4u32 {
        acked = acked.wrapping_add(mss);
        let mut ack = TcpHeader::new(5555, 80, client_iss + 1, 0xffff);
        ack.ack = true;
        ack.acknowledgment_number = acked;
        inject
            .borrow_mut()
            .push_back(tcp_packet(PEER_IP, OUR_IP, ack, &[]));
        stack.poll(picostack::time::Instant::from_millis(30 + u64::from(round)));

        let info = stack.tcp_info(server).unwrap();
        if info.cwnd < info.ssthresh {
            assert_eq!(
                info.cwnd,
                (1 + round) * mss,
                "slow start round {round}: one mss per ack"
            );
        }
    }
}

#[test]
fn stray_ack_gets_reset() {
    let (driver, sent, inject) = CaptureDriver::new();
    let mut stack = Stack::new(scenario_config());
    add_ip_netif(&mut stack, Box::new(driver), OUR_IP, 1500);

    let mut ack = TcpHeader::new(1234, 80, 42, 512);
    ack.ack = true;
    ack.acknowledgment_number = 777;
    inject
        .borrow_mut()
        .push_back(tcp_packet(PEER_IP, OUR_IP, ack, &[]));
    stack.poll(picostack::time::Instant::from_millis(10));

    let frames = sent.borrow();
    assert_eq!(frames.len(), 1);
    let (_, rst, _) = parse_tcp(&frames[0]);
    assert!(rst.rst);
    // for a segment with ACK the reset takes its ack as sequence
    assert_eq!(rst.sequence_number, 777);
    assert!(!rst.ack);
}

#[test]
fn bad_checksum_is_dropped_silently() {
    let (driver, sent, inject) = CaptureDriver::new();
    let mut stack = Stack::new(scenario_config());
    add_ip_netif(&mut stack, Box::new(driver), OUR_IP, 1500);

    let mut syn = TcpHeader::new(5555, 80, 1, 512);
    syn.syn = true;
    let mut packet = tcp_packet(PEER_IP, OUR_IP, syn, &[]);
    let len = packet.len();
    packet[len - 1] ^= 0xff; // corrupt the segment
    inject.borrow_mut().push_back(packet);
    stack.poll(picostack::time::Instant::from_millis(10));

    assert!(sent.borrow().is_empty(), "no response to a corrupt segment");
    assert_eq!(stack.stats().tcp_checksum_errors, 1);
}
