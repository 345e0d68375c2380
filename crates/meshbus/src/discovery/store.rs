// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory index of topic advertisements: topic -> process UUID ->
//! endpoint records.
//!
//! Invariants: for a fixed `(topic, pUUID)` no two records share a node
//! UUID; inserting an already-known `(addr, nUUID)` pair is a no-op;
//! removing the last record of a process removes the process entry, and
//! removing the last process of a topic removes the topic entry. The
//! store has no internal locking; the owning service serializes access.

use std::collections::BTreeMap;

use crate::protocol::Scope;

/// One advertiser of a topic: data endpoint, control endpoint, node
/// UUID and visibility scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub addr: String,
    pub ctrl: String,
    pub n_uuid: String,
    pub scope: Scope,
}

/// All publishers of one topic, keyed by process UUID.
pub type AddressMap = BTreeMap<String, Vec<EndpointRecord>>;

/// Topic advertisement index.
#[derive(Debug, Default)]
pub struct TopicStorage {
    data: BTreeMap<String, AddressMap>,
}

impl TopicStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Returns false when an equivalent record
    /// (same `addr` and `nUuid` under the same topic and process) is
    /// already present.
    pub fn add_address(
        &mut self,
        topic: &str,
        addr: &str,
        ctrl: &str,
        p_uuid: &str,
        n_uuid: &str,
        scope: Scope,
    ) -> bool {
        let procs = self.data.entry(topic.to_string()).or_default();
        let records = procs.entry(p_uuid.to_string()).or_default();

        if records.iter().any(|r| r.addr == addr && r.n_uuid == n_uuid) {
            return false;
        }

        records.push(EndpointRecord {
            addr: addr.to_string(),
            ctrl: ctrl.to_string(),
            n_uuid: n_uuid.to_string(),
            scope,
        });
        true
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.data.contains_key(topic)
    }

    /// True when `p_uuid` advertises `topic` with at least one record.
    pub fn has_any_addresses(&self, topic: &str, p_uuid: &str) -> bool {
        self.data
            .get(topic)
            .map(|procs| procs.contains_key(p_uuid))
            .unwrap_or(false)
    }

    /// Scan every record for a data endpoint. O(total records).
    pub fn has_address(&self, addr: &str) -> bool {
        self.data
            .values()
            .flat_map(|procs| procs.values())
            .flatten()
            .any(|r| r.addr == addr)
    }

    /// Exact lookup by `(topic, pUUID, nUUID)`.
    pub fn get_address(&self, topic: &str, p_uuid: &str, n_uuid: &str) -> Option<EndpointRecord> {
        self.data
            .get(topic)?
            .get(p_uuid)?
            .iter()
            .find(|r| r.n_uuid == n_uuid)
            .cloned()
    }

    /// All publishers of a topic.
    pub fn get_addresses(&self, topic: &str) -> Option<AddressMap> {
        self.data.get(topic).cloned()
    }

    /// Remove the records of one node under `(topic, pUUID)`, pruning
    /// empty parents. Returns true when something was removed.
    pub fn del_address_by_node(&mut self, topic: &str, p_uuid: &str, n_uuid: &str) -> bool {
        let mut removed = false;

        if let Some(procs) = self.data.get_mut(topic) {
            if let Some(records) = procs.get_mut(p_uuid) {
                let before = records.len();
                records.retain(|r| r.n_uuid != n_uuid);
                removed = records.len() < before;

                if records.is_empty() {
                    procs.remove(p_uuid);
                }
            }
            if procs.is_empty() {
                self.data.remove(topic);
            }
        }

        removed
    }

    /// Remove every record of a process across all topics, pruning empty
    /// topics. Returns true when something was removed.
    pub fn del_addresses_by_proc(&mut self, p_uuid: &str) -> bool {
        let mut removed = false;

        self.data.retain(|_, procs| {
            removed |= procs.remove(p_uuid).is_some();
            !procs.is_empty()
        });

        removed
    }

    /// Every record a process advertises, keyed by topic.
    pub fn get_addresses_by_proc(&self, p_uuid: &str) -> BTreeMap<String, Vec<EndpointRecord>> {
        let mut out = BTreeMap::new();
        for (topic, procs) in &self.data {
            if let Some(records) = procs.get(p_uuid) {
                out.insert(topic.clone(), records.clone());
            }
        }
        out
    }

    /// Names of every known topic.
    pub fn topic_list(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Dump the full index through the logger (verbose state output).
    pub fn log_state(&self, label: &str) {
        if self.data.is_empty() {
            log::info!("[{}] <empty>", label);
            return;
        }
        for (topic, procs) in &self.data {
            log::info!("[{}] topic [{}]", label, topic);
            for (p_uuid, records) in procs {
                for r in records {
                    log::info!(
                        "[{}]   proc {} node {} addr {} ctrl {} scope {:?}",
                        label,
                        p_uuid,
                        r.n_uuid,
                        r.addr,
                        r.ctrl,
                        r.scope
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_one() -> TopicStorage {
        let mut s = TopicStorage::new();
        assert!(s.add_address("/t1", "tcp://a:1", "tcp://a:2", "p1", "n1", Scope::All));
        s
    }

    #[test]
    fn add_then_get_returns_the_same_record() {
        let s = store_with_one();
        let rec = s.get_address("/t1", "p1", "n1").unwrap();
        assert_eq!(rec.addr, "tcp://a:1");
        assert_eq!(rec.ctrl, "tcp://a:2");
        assert_eq!(rec.n_uuid, "n1");
        assert_eq!(rec.scope, Scope::All);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut s = store_with_one();
        assert!(!s.add_address("/t1", "tcp://a:1", "tcp://a:2", "p1", "n1", Scope::All));
        assert_eq!(s.get_addresses("/t1").unwrap()["p1"].len(), 1);
    }

    #[test]
    fn same_process_different_nodes_coexist() {
        let mut s = store_with_one();
        assert!(s.add_address("/t1", "tcp://a:1", "tcp://a:2", "p1", "n2", Scope::All));
        assert_eq!(s.get_addresses("/t1").unwrap()["p1"].len(), 2);
    }

    #[test]
    fn predicates() {
        let s = store_with_one();
        assert!(s.has_topic("/t1"));
        assert!(!s.has_topic("/t2"));
        assert!(s.has_any_addresses("/t1", "p1"));
        assert!(!s.has_any_addresses("/t1", "p2"));
        assert!(s.has_address("tcp://a:1"));
        assert!(!s.has_address("tcp://b:1"));
    }

    #[test]
    fn del_by_node_prunes_empty_parents() {
        let mut s = store_with_one();
        assert!(s.del_address_by_node("/t1", "p1", "n1"));
        assert!(!s.has_topic("/t1"));

        // Removing again reports no change.
        assert!(!s.del_address_by_node("/t1", "p1", "n1"));
    }

    #[test]
    fn del_by_node_keeps_siblings() {
        let mut s = store_with_one();
        s.add_address("/t1", "tcp://b:1", "tcp://b:2", "p2", "n2", Scope::All);
        assert!(s.del_address_by_node("/t1", "p1", "n1"));
        assert!(s.has_topic("/t1"));
        assert!(s.has_any_addresses("/t1", "p2"));
    }

    #[test]
    fn del_by_proc_sweeps_all_topics() {
        let mut s = store_with_one();
        s.add_address("/t2", "tcp://a:3", "tcp://a:4", "p1", "n1", Scope::All);
        s.add_address("/t2", "tcp://b:1", "tcp://b:2", "p2", "n2", Scope::All);

        assert!(s.del_addresses_by_proc("p1"));
        assert!(!s.has_topic("/t1"));
        assert!(s.has_topic("/t2"));
        assert!(!s.del_addresses_by_proc("p1"));
    }

    #[test]
    fn addresses_by_proc_reports_per_topic() {
        let mut s = store_with_one();
        s.add_address("/t2", "tcp://a:3", "tcp://a:4", "p1", "n1", Scope::Host);
        s.add_address("/t3", "tcp://b:1", "tcp://b:2", "p2", "n2", Scope::All);

        let mine = s.get_addresses_by_proc("p1");
        assert_eq!(mine.len(), 2);
        assert!(mine.contains_key("/t1"));
        assert!(mine.contains_key("/t2"));
        assert!(!mine.contains_key("/t3"));
    }

    #[test]
    fn topic_list_is_sorted_and_complete() {
        let mut s = store_with_one();
        s.add_address("/a", "tcp://a:9", "tcp://a:10", "p1", "n1", Scope::All);
        assert_eq!(s.topic_list(), vec!["/a".to_string(), "/t1".to_string()]);
    }
}
