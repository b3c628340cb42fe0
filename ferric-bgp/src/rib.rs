//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::af::AfiSafi;
use crate::packet::attribute::Attrs;
use crate::packet::nlri::Nlri;

//
// The unit of RIB traffic: an NLRI paired with either an attribute
// collection (announcement) or a withdrawal marker.
//
// The change's fingerprint is its NLRI: family, canonical wire bytes and
// path identifier.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Change {
    Announce { nlri: Nlri, attrs: Box<Attrs> },
    Withdraw { nlri: Nlri },
}

// Per-neighbor RIB views: one Adj-RIB-In and one Adj-RIB-Out, both
// family-partitioned and keyed by NLRI fingerprint.
#[derive(Debug, Default)]
pub struct Rib {
    pub rib_in: AdjRib,
    pub rib_out: AdjRib,
}

// One direction of a neighbor's RIB.
#[derive(Debug, Default)]
pub struct AdjRib {
    // Partitions are created lazily per family.
    partitions: BTreeMap<AfiSafi, Partition>,
}

#[derive(Debug, Default)]
struct Partition {
    entries: BTreeMap<Nlri, Entry>,
    // Fingerprints with changes awaiting emission, in insertion order.
    queue: VecDeque<Nlri>,
}

#[derive(Debug)]
struct Entry {
    change: Change,
    // Awaiting emission (present in the queue).
    pending: bool,
    // Retained across a session reset under graceful restart.
    stale: bool,
}

// ===== impl Change =====

impl Change {
    pub fn nlri(&self) -> &Nlri {
        match self {
            Change::Announce { nlri, .. } => nlri,
            Change::Withdraw { nlri } => nlri,
        }
    }

    pub fn family(&self) -> AfiSafi {
        self.nlri().family()
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            Change::Announce { attrs, .. } => Some(attrs),
            Change::Withdraw { .. } => None,
        }
    }

    pub fn nexthop(&self) -> Option<IpAddr> {
        self.attrs().and_then(|attrs| attrs.base.nexthop)
    }

    pub fn is_withdraw(&self) -> bool {
        matches!(self, Change::Withdraw { .. })
    }
}

// ===== impl AdjRib =====

impl AdjRib {
    // Stores an announcement, replacing any prior entry with the same
    // fingerprint, and queues it for emission.
    pub fn insert_announce(&mut self, change: Change) {
        let partition = self.partitions.entry(change.family()).or_default();
        partition.upsert(change);
    }

    // Stores a withdrawal for the given fingerprint.
    //
    // A withdrawal is recorded even when no announcement existed: some
    // peers rely on explicit withdrawals for their graceful-restart
    // bookkeeping.
    pub fn insert_withdraw(&mut self, nlri: Nlri) {
        let partition = self.partitions.entry(nlri.family()).or_default();
        partition.upsert(Change::Withdraw { nlri });
    }

    // Removes the entry with the given fingerprint, if any.
    pub fn remove(&mut self, nlri: &Nlri) -> Option<Change> {
        let partition = self.partitions.get_mut(&nlri.family())?;
        partition.queue.retain(|queued| queued != nlri);
        partition.entries.remove(nlri).map(|entry| entry.change)
    }

    // Queues a withdrawal for every current announcement and clears the
    // partition of announcements.
    pub fn flush(&mut self, family: AfiSafi) {
        let Some(partition) = self.partitions.get_mut(&family) else {
            return;
        };

        let announced = partition
            .entries
            .iter()
            .filter(|(_, entry)| !entry.change.is_withdraw())
            .map(|(nlri, _)| nlri.clone())
            .collect::<Vec<_>>();
        for nlri in announced {
            partition.upsert(Change::Withdraw { nlri });
        }
    }

    // Looks up a change by fingerprint.
    pub fn get(&self, nlri: &Nlri) -> Option<&Change> {
        self.partitions
            .get(&nlri.family())
            .and_then(|partition| partition.entries.get(nlri))
            .map(|entry| &entry.change)
    }

    // Iterates over all entries in a family.
    pub fn iter(&self, family: AfiSafi) -> impl Iterator<Item = &Change> {
        self.partitions
            .get(&family)
            .into_iter()
            .flat_map(|partition| partition.entries.values())
            .map(|entry| &entry.change)
    }

    // Families that currently exist in this RIB direction.
    pub fn families(&self) -> impl Iterator<Item = AfiSafi> + '_ {
        self.partitions.keys().copied()
    }

    // Families with changes awaiting emission.
    pub fn dirty_families(&self) -> Vec<AfiSafi> {
        self.partitions
            .iter()
            .filter(|(_, partition)| !partition.queue.is_empty())
            .map(|(family, _)| *family)
            .collect()
    }

    pub fn has_queued(&self, family: AfiSafi) -> bool {
        self.partitions
            .get(&family)
            .is_some_and(|partition| !partition.queue.is_empty())
    }

    // Next change awaiting emission, without consuming it.
    pub fn peek_queued(&self, family: AfiSafi) -> Option<&Change> {
        let partition = self.partitions.get(&family)?;
        let nlri = partition.queue.front()?;
        partition.entries.get(nlri).map(|entry| &entry.change)
    }

    // Consumes the next change awaiting emission.
    //
    // Withdrawals leave the table as they are consumed; announcements stay
    // resident so the Adj-RIB reflects what was advertised.
    pub fn pop_queued(&mut self, family: AfiSafi) -> Option<Change> {
        let partition = self.partitions.get_mut(&family)?;
        let nlri = partition.queue.pop_front()?;
        let entry = partition.entries.get_mut(&nlri)?;
        entry.pending = false;
        let change = entry.change.clone();
        if change.is_withdraw() {
            partition.entries.remove(&nlri);
        }
        Some(change)
    }

    // Marks every entry of every family stale (graceful restart).
    pub fn mark_stale(&mut self) {
        for partition in self.partitions.values_mut() {
            for entry in partition.entries.values_mut() {
                entry.stale = true;
            }
        }
    }

    // Clears stale marks for one family (End-of-RIB received).
    pub fn clear_stale(&mut self, family: AfiSafi) {
        if let Some(partition) = self.partitions.get_mut(&family) {
            for entry in partition.entries.values_mut() {
                entry.stale = false;
            }
        }
    }

    // Drops every entry still marked stale, returning their fingerprints.
    pub fn sweep_stale(&mut self) -> Vec<Nlri> {
        let mut swept = Vec::new();
        for partition in self.partitions.values_mut() {
            let stale = partition
                .entries
                .iter()
                .filter(|(_, entry)| entry.stale)
                .map(|(nlri, _)| nlri.clone())
                .collect::<Vec<_>>();
            for nlri in stale {
                partition.queue.retain(|queued| *queued != nlri);
                partition.entries.remove(&nlri);
                swept.push(nlri);
            }
        }
        swept
    }

    // Queues every resident entry for (re-)emission, in table order. Used
    // when a session (re-)establishes and the full Adj-RIB-Out must be
    // advertised.
    pub fn requeue_all(&mut self) {
        for partition in self.partitions.values_mut() {
            partition.queue.clear();
            for (nlri, entry) in partition.entries.iter_mut() {
                entry.pending = true;
                partition.queue.push_back(nlri.clone());
            }
        }
    }

    // Drops all entries of all families.
    pub fn clear(&mut self) {
        self.partitions.clear();
    }

    // Number of entries resident in a family.
    pub fn len(&self, family: AfiSafi) -> usize {
        self.partitions
            .get(&family)
            .map(|partition| partition.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, family: AfiSafi) -> bool {
        self.len(family) == 0
    }

    // Total number of resident entries.
    pub fn total_len(&self) -> usize {
        self.partitions
            .values()
            .map(|partition| partition.entries.len())
            .sum()
    }

    // Set of families holding at least one entry.
    pub fn non_empty_families(&self) -> BTreeSet<AfiSafi> {
        self.partitions
            .iter()
            .filter(|(_, partition)| !partition.entries.is_empty())
            .map(|(family, _)| *family)
            .collect()
    }
}

// ===== impl Partition =====

impl Partition {
    // Inserts or overwrites the entry with the change's fingerprint,
    // queueing it for emission. Overwriting keeps the original queue
    // position.
    fn upsert(&mut self, change: Change) {
        let nlri = change.nlri().clone();
        match self.entries.get_mut(&nlri) {
            Some(entry) => {
                entry.change = change;
                entry.stale = false;
                if !entry.pending {
                    entry.pending = true;
                    self.queue.push_back(nlri);
                }
            }
            None => {
                self.entries.insert(nlri.clone(), Entry {
                    change,
                    pending: true,
                    stale: false,
                });
                self.queue.push_back(nlri);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use ipnetwork::IpNetwork;

    use super::*;
    use crate::packet::attribute::{AsPath, Attrs, BaseAttrs};
    use crate::packet::consts::Origin;
    use crate::packet::nlri::{InetNlri, NlriValue};

    fn attrs(nexthop: Ipv4Addr) -> Box<Attrs> {
        Box::new(Attrs {
            base: BaseAttrs {
                origin: Origin::Igp,
                as_path: AsPath::default(),
                as4_path: None,
                nexthop: Some(nexthop.into()),
                ll_nexthop: None,
                med: None,
                local_pref: None,
                aggregator: None,
                as4_aggregator: None,
                atomic_aggregate: false,
                originator_id: None,
                cluster_list: None,
            },
            comm: None,
            ext_comm: None,
            extv6_comm: None,
            large_comm: None,
            aigp: None,
            pmsi_tunnel: None,
            prefix_sid: None,
            unknown: vec![],
        })
    }

    fn nlri(prefix: &str) -> Nlri {
        let value = NlriValue::Inet(InetNlri {
            family: AfiSafi::Ipv4Unicast,
            prefix: IpNetwork::from_str(prefix).unwrap(),
        });
        value.pack(None)
    }

    fn announce(prefix: &str, nexthop: Ipv4Addr) -> Change {
        Change::Announce {
            nlri: nlri(prefix),
            attrs: attrs(nexthop),
        }
    }

    #[test]
    fn insert_announce_idempotent() {
        let mut rib = AdjRib::default();
        let change = announce("10.0.1.0/24", Ipv4Addr::new(10, 0, 0, 1));

        rib.insert_announce(change.clone());
        rib.insert_announce(change.clone());

        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 1);
        assert_eq!(
            rib.pop_queued(AfiSafi::Ipv4Unicast).as_ref(),
            Some(&change)
        );
        assert!(rib.pop_queued(AfiSafi::Ipv4Unicast).is_none());
        // The entry stays resident after emission.
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 1);
    }

    #[test]
    fn insert_withdraw_idempotent() {
        let mut rib = AdjRib::default();
        let fingerprint = nlri("10.0.1.0/24");

        rib.insert_withdraw(fingerprint.clone());
        rib.insert_withdraw(fingerprint.clone());

        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 1);
        let change = rib.pop_queued(AfiSafi::Ipv4Unicast).unwrap();
        assert!(change.is_withdraw());
        // Withdrawals leave the table once emitted.
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 0);
    }

    #[test]
    fn announce_then_withdraw() {
        let mut rib = AdjRib::default();
        let change = announce("10.0.1.0/24", Ipv4Addr::new(10, 0, 0, 1));

        rib.insert_announce(change.clone());
        rib.insert_withdraw(change.nlri().clone());

        // The withdrawal overwrote the announcement in place.
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 1);
        let queued = rib.pop_queued(AfiSafi::Ipv4Unicast).unwrap();
        assert!(queued.is_withdraw());
        assert!(rib.pop_queued(AfiSafi::Ipv4Unicast).is_none());
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 0);
    }

    #[test]
    fn queue_preserves_insertion_order() {
        let mut rib = AdjRib::default();
        let first = announce("10.0.2.0/24", Ipv4Addr::new(10, 0, 0, 1));
        let second = announce("10.0.1.0/24", Ipv4Addr::new(10, 0, 0, 1));

        rib.insert_announce(first.clone());
        rib.insert_announce(second.clone());

        assert_eq!(
            rib.pop_queued(AfiSafi::Ipv4Unicast).as_ref(),
            Some(&first)
        );
        assert_eq!(
            rib.pop_queued(AfiSafi::Ipv4Unicast).as_ref(),
            Some(&second)
        );
    }

    #[test]
    fn flush_queues_withdrawals() {
        let mut rib = AdjRib::default();
        rib.insert_announce(announce(
            "10.0.1.0/24",
            Ipv4Addr::new(10, 0, 0, 1),
        ));
        rib.insert_announce(announce(
            "10.0.2.0/24",
            Ipv4Addr::new(10, 0, 0, 1),
        ));
        while rib.pop_queued(AfiSafi::Ipv4Unicast).is_some() {}

        rib.flush(AfiSafi::Ipv4Unicast);

        let mut withdrawn = 0;
        while let Some(change) = rib.pop_queued(AfiSafi::Ipv4Unicast) {
            assert!(change.is_withdraw());
            withdrawn += 1;
        }
        assert_eq!(withdrawn, 2);
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 0);
    }

    #[test]
    fn stale_sweep() {
        let mut rib = AdjRib::default();
        let kept = announce("10.0.1.0/24", Ipv4Addr::new(10, 0, 0, 1));
        let swept = announce("10.0.2.0/24", Ipv4Addr::new(10, 0, 0, 1));
        rib.insert_announce(kept.clone());
        rib.insert_announce(swept.clone());

        rib.mark_stale();
        // Re-learning an entry clears its stale mark.
        rib.insert_announce(kept.clone());

        let removed = rib.sweep_stale();
        assert_eq!(removed, vec![swept.nlri().clone()]);
        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 1);
        assert!(rib.get(kept.nlri()).is_some());
    }

    #[test]
    fn addpath_fingerprints_are_distinct() {
        let mut rib = AdjRib::default();
        let base = nlri("10.50.0.0/24");
        let path1 = base.with_path_id(Some(1));
        let path2 = base.with_path_id(Some(2));

        rib.insert_announce(Change::Announce {
            nlri: path1.clone(),
            attrs: attrs(Ipv4Addr::new(10, 0, 0, 5)),
        });
        rib.insert_announce(Change::Announce {
            nlri: path2.clone(),
            attrs: attrs(Ipv4Addr::new(10, 0, 0, 6)),
        });

        assert_eq!(rib.len(AfiSafi::Ipv4Unicast), 2);
        assert_ne!(path1, path2);
        assert_eq!(path1.bytes(), path2.bytes());
    }
}
