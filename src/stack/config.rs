/// Compile-time configuration surface of the original, re-expressed as
/// an explicit record passed to `Stack::new`.
///
/// The defaults match a small target (tens of kilobytes of buffer
/// memory); tests and larger deployments override individual fields.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    // sizing
    pub max_netifs: usize,
    pub buf_pool_blocks: usize,
    pub buf_block_size: usize,
    pub max_udp_endpoints: usize,
    pub max_raw_endpoints: usize,
    /// Total TCB slots (listen + active + time-wait draw from this).
    pub max_tcp_endpoints: usize,
    pub max_tcp_listen: usize,
    pub max_tcp_time_wait: usize,

    // tcp tuning
    pub tcp_mss: u16,
    pub tcp_wnd: u32,
    pub tcp_snd_buf: u32,
    pub tcp_max_rtx: u8,
    pub tcp_syn_max_rtx: u8,
    pub tcp_oos_max_pbufs: u16,
    pub tcp_oos_max_segments: u16,
    /// 2·MSL lingering time of TIME_WAIT endpoints.
    pub tcp_msl_ms: u32,
    pub tcp_keep_idle_ms: u32,
    pub tcp_keep_interval_ms: u32,
    pub tcp_keep_count: u8,

    // ip tuning
    pub ip_reass_max_age_ms: u32,
    pub ip_reass_max_blocks: u16,
    pub ip_default_ttl: u8,
    pub ip_forward: bool,

    // neighbor tables
    pub arp_table_size: u16,
    pub nd_cache_size: u16,
    pub ipv6_addrs_per_netif: u8,
    pub dad_probes: u8,
    pub dad_retrans_ms: u32,

    // feature toggles
    pub ipv4: bool,
    pub ipv6: bool,
    pub tcp: bool,
    pub udp: bool,
    pub raw: bool,
    pub igmp: bool,
    pub mld: bool,
    pub dad: bool,
    /// Trust netif hardware to have verified receive checksums.
    pub rx_checksum_offload: bool,

    // timer intervals
    pub arp_tick_ms: u32,
    pub nd_tick_ms: u32,
    pub reass_tick_ms: u32,
    pub tcp_slow_tick_ms: u32,
    pub tcp_fast_tick_ms: u32,
    pub group_tick_ms: u32,

    /// Seed of the internal generator (initial sequence numbers,
    /// report jitter). Fixed seeds make test runs reproducible.
    pub rng_seed: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_netifs: 2,
            buf_pool_blocks: 64,
            buf_block_size: 1536,
            max_udp_endpoints: 8,
            max_raw_endpoints: 4,
            max_tcp_endpoints: 8,
            max_tcp_listen: 4,
            max_tcp_time_wait: 8,
            tcp_mss: 536,
            tcp_wnd: 8 * 536,
            tcp_snd_buf: 8 * 536,
            tcp_max_rtx: 12,
            tcp_syn_max_rtx: 6,
            tcp_oos_max_pbufs: 32,
            tcp_oos_max_segments: 16,
            tcp_msl_ms: 60_000,
            tcp_keep_idle_ms: 7_200_000,
            tcp_keep_interval_ms: 75_000,
            tcp_keep_count: 9,
            ip_reass_max_age_ms: 15_000,
            ip_reass_max_blocks: 8,
            ip_default_ttl: 64,
            ip_forward: false,
            arp_table_size: 10,
            nd_cache_size: 8,
            ipv6_addrs_per_netif: 3,
            dad_probes: 1,
            dad_retrans_ms: 1000,
            ipv4: true,
            ipv6: true,
            tcp: true,
            udp: true,
            raw: true,
            igmp: true,
            mld: true,
            dad: true,
            rx_checksum_offload: false,
            arp_tick_ms: 5000,
            nd_tick_ms: 1000,
            reass_tick_ms: 1000,
            tcp_slow_tick_ms: 500,
            tcp_fast_tick_ms: 250,
            group_tick_ms: 100,
            rng_seed: 0x853c_49e6_748f_ea9b,
        }
    }
}
