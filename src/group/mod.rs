//! Host-side multicast group membership (IGMPv2 for IPv4, MLDv1 for
//! IPv6).
//!
//! Both protocols run the same per-(netif, group) machine; the table
//! is generic over the address type and the stack instantiates it
//! twice. The tick granularity is 100 ms, matching the delay timer
//! resolution the wire formats use.

use alloc::vec::Vec;

use crate::iface::NetifId;

mod api;

/// Membership state of one (netif, group) pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemberState {
    /// Report scheduled after a random delay.
    DelayingMember {
        /// 100 ms ticks until the report fires.
        delay_ticks: u16,
    },
    /// Report sent, nothing pending.
    IdleMember,
}

/// One joined group.
#[derive(Debug)]
pub struct GroupEntry<A> {
    pub netif: NetifId,
    pub group: A,
    pub state: MemberState,
    /// True if this host sent the most recent report for the group
    /// (only the last reporter sends the leave message).
    pub last_reporter: bool,
    /// Nested join count; the entry lives until it drops to zero.
    pub use_count: u16,
}

/// Actions a table operation or tick asks the stack to perform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GroupAction<A> {
    /// Send a membership report for the group.
    SendReport { netif: NetifId, group: A },
    /// Send a leave/done message for the group.
    SendLeave { netif: NetifId, group: A },
    /// Tell the netif driver to update its hardware filter.
    Filter {
        netif: NetifId,
        group: A,
        join: bool,
    },
}

/// Membership table for one protocol instance.
#[derive(Debug)]
pub struct GroupTable<A> {
    groups: Vec<GroupEntry<A>>,
    /// Unsolicited reports are repeated once after this delay
    /// (RFC 2236: unsolicited report interval, 10 s; expressed in
    /// 100 ms ticks).
    pub unsolicited_ticks: u16,
}

impl<A: Copy + Eq> GroupTable<A> {
    pub fn new() -> GroupTable<A> {
        GroupTable {
            groups: Vec::new(),
            unsolicited_ticks: 100,
        }
    }

    /// Joined groups on `netif` (for input filtering).
    pub fn is_member(&self, netif: NetifId, group: A) -> bool {
        self.groups
            .iter()
            .any(|entry| entry.netif == netif && entry.group == group)
    }

    /// Iterate all entries.
    pub fn iter(&self) -> impl Iterator<Item = &GroupEntry<A>> {
        self.groups.iter()
    }

    /// Join `group` on `netif`. `initial_delay_ticks` is the random
    /// report delay the caller drew. Actions: filter + first report on
    /// a fresh join, nothing on a nested join.
    pub fn join(
        &mut self,
        netif: NetifId,
        group: A,
        initial_delay_ticks: u16,
    ) -> Vec<GroupAction<A>> {
        if let Some(entry) = self
            .groups
            .iter_mut()
            .find(|entry| entry.netif == netif && entry.group == group)
        {
            entry.use_count += 1;
            return Vec::new();
        }
        self.groups.push(GroupEntry {
            netif,
            group,
            state: MemberState::DelayingMember {
                delay_ticks: initial_delay_ticks.max(1),
            },
            last_reporter: true,
            use_count: 1,
        });
        // join reports immediately once, the delayed state covers the
        // repeated unsolicited report
        alloc::vec![
            GroupAction::Filter {
                netif,
                group,
                join: true
            },
            GroupAction::SendReport { netif, group },
        ]
    }

    /// Leave `group` on `netif`.
    pub fn leave(&mut self, netif: NetifId, group: A) -> Vec<GroupAction<A>> {
        let Some(index) = self
            .groups
            .iter()
            .position(|entry| entry.netif == netif && entry.group == group)
        else {
            return Vec::new();
        };
        if self.groups[index].use_count > 1 {
            self.groups[index].use_count -= 1;
            return Vec::new();
        }
        let entry = self.groups.swap_remove(index);
        let mut actions = alloc::vec![GroupAction::Filter {
            netif,
            group,
            join: false
        }];
        if entry.last_reporter {
            actions.push(GroupAction::SendLeave { netif, group });
        }
        actions
    }

    /// A report from another host was seen: cancel our pending report
    /// and remember we are not the last reporter.
    pub fn report_seen(&mut self, netif: NetifId, group: A) {
        if let Some(entry) = self
            .groups
            .iter_mut()
            .find(|entry| entry.netif == netif && entry.group == group)
        {
            entry.state = MemberState::IdleMember;
            entry.last_reporter = false;
        }
    }

    /// A membership query arrived. `group` is `None` for a general
    /// query. Every affected entry schedules a report at a random
    /// delay below `max_resp_ticks` (drawn by `draw_delay`).
    pub fn query_received(
        &mut self,
        netif: NetifId,
        group: Option<A>,
        max_resp_ticks: u16,
        mut draw_delay: impl FnMut(u16) -> u16,
    ) {
        for entry in self.groups.iter_mut() {
            if entry.netif != netif {
                continue;
            }
            if let Some(queried) = group {
                if entry.group != queried {
                    continue;
                }
            }
            let delay = draw_delay(max_resp_ticks.max(1)).max(1);
            match entry.state {
                MemberState::DelayingMember { delay_ticks } if delay_ticks <= delay => {
                    // an earlier report is already scheduled
                }
                _ => {
                    entry.state = MemberState::DelayingMember { delay_ticks: delay };
                }
            }
        }
    }

    /// 100 ms tick: fire due reports.
    pub fn tick(&mut self) -> Vec<GroupAction<A>> {
        let mut actions = Vec::new();
        for entry in self.groups.iter_mut() {
            if let MemberState::DelayingMember { delay_ticks } = entry.state {
                if delay_ticks <= 1 {
                    entry.state = MemberState::IdleMember;
                    entry.last_reporter = true;
                    actions.push(GroupAction::SendReport {
                        netif: entry.netif,
                        group: entry.group,
                    });
                } else {
                    entry.state = MemberState::DelayingMember {
                        delay_ticks: delay_ticks - 1,
                    };
                }
            }
        }
        actions
    }

    /// Drop all memberships of `netif`, returning the filter cleanups.
    pub fn flush_netif(&mut self, netif: NetifId) -> Vec<GroupAction<A>> {
        let mut actions = Vec::new();
        self.groups.retain(|entry| {
            if entry.netif == netif {
                actions.push(GroupAction::Filter {
                    netif,
                    group: entry.group,
                    join: false,
                });
                false
            } else {
                true
            }
        });
        actions
    }
}

impl<A: Copy + Eq> Default for GroupTable<A> {
    fn default() -> Self {
        GroupTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Ipv4Addr;
    use crate::buf::Buf;
    use crate::iface::Netif;
    use crate::pool::Pool;

    fn netif_id() -> NetifId {
        struct Null;
        impl crate::iface::LinkDriver for Null {
            fn link_output(&mut self, _f: &Buf) -> Result<(), crate::err::StackError> {
                Ok(())
            }
        }
        let mut netifs: Pool<Netif> = Pool::new(1);
        netifs
            .acquire(Netif::new(
                "t0",
                [0; 6],
                1500,
                Default::default(),
                alloc::boxed::Box::new(Null),
            ))
            .unwrap()
    }

    const GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

    #[test]
    fn join_reports_and_filters() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        let actions = table.join(id, GROUP, 20);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], GroupAction::Filter { join: true, .. }));
        assert!(matches!(actions[1], GroupAction::SendReport { .. }));
        assert!(table.is_member(id, GROUP));

        // nested join is silent
        assert!(table.join(id, GROUP, 20).is_empty());
    }

    #[test]
    fn delayed_unsolicited_report_fires() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        table.join(id, GROUP, 3);
        assert!(table.tick().is_empty());
        assert!(table.tick().is_empty());
        let actions = table.tick();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], GroupAction::SendReport { .. }));
        // idle now, no further reports
        assert!(table.tick().is_empty());
    }

    #[test]
    fn last_reporter_sends_leave() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        table.join(id, GROUP, 1);
        let _ = table.tick(); // we reported

        let actions = table.leave(id, GROUP);
        assert!(actions
            .iter()
            .any(|a| matches!(a, GroupAction::SendLeave { .. })));
    }

    #[test]
    fn not_last_reporter_leaves_quietly() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        table.join(id, GROUP, 10);
        // someone else reported first
        table.report_seen(id, GROUP);
        let actions = table.leave(id, GROUP);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], GroupAction::Filter { join: false, .. }));
    }

    #[test]
    fn nested_join_needs_matching_leaves() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        table.join(id, GROUP, 1);
        table.join(id, GROUP, 1);
        assert!(table.leave(id, GROUP).is_empty());
        assert!(table.is_member(id, GROUP));
        assert_eq!(false, table.leave(id, GROUP).is_empty());
        assert_eq!(false, table.is_member(id, GROUP));
    }

    #[test]
    fn query_schedules_report_with_bounded_delay() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        table.join(id, GROUP, 1);
        let _ = table.tick();
        table.report_seen(id, GROUP);

        table.query_received(id, Some(GROUP), 50, |max| max / 2);
        // fires after 25 ticks
        for _ in 0..24 {
            assert!(table.tick().is_empty());
        }
        let actions = table.tick();
        assert_eq!(actions.len(), 1);
        // reporting makes us the last reporter again
        assert!(table.iter().next().unwrap().last_reporter);
    }

    #[test]
    fn general_query_hits_all_groups() {
        let id = netif_id();
        let mut table: GroupTable<Ipv4Addr> = GroupTable::new();
        let group2 = Ipv4Addr::new(224, 0, 1, 1);
        table.join(id, GROUP, 1);
        table.join(id, group2, 1);
        let _ = table.tick();

        table.query_received(id, None, 10, |_| 1);
        let actions = table.tick();
        assert_eq!(actions.len(), 2);
    }
}
