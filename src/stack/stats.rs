/// Packet and event counters of the whole stack.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    // link
    pub rx_frames: usize,
    pub tx_frames: usize,
    pub rx_dropped: usize,

    // ipv4
    pub ip4_rx: usize,
    pub ip4_tx: usize,
    pub ip4_forwarded: usize,
    pub ip4_checksum_errors: usize,
    pub ip4_reass_ok: usize,
    pub ip4_reass_failed: usize,
    pub ip4_frag_tx: usize,

    // ipv6
    pub ip6_rx: usize,
    pub ip6_tx: usize,
    pub ip6_reass_ok: usize,
    pub ip6_reass_failed: usize,

    // icmp
    pub icmp_rx: usize,
    pub icmp_tx: usize,

    // udp
    pub udp_rx: usize,
    pub udp_tx: usize,
    pub udp_no_endpoint: usize,

    // tcp
    pub tcp_rx: usize,
    pub tcp_tx: usize,
    pub tcp_rst_tx: usize,
    pub tcp_retransmits: usize,
    pub tcp_checksum_errors: usize,
}
