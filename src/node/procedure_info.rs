// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The per-node procedure scratchpad.
//!
//! In-flight protocol state lives here instead of being scattered across
//! fields: pending peer lists and event ids keyed by procedure kind, plus
//! the entity-search bookkeeping keyed by the originating `ref_event_id`.
//! `save` fails when the key is present, `load`/`update`/`remove` when it is
//! absent — a late-arriving ack hitting a missing key is the recoverable
//! path, a missing key on the initiating path is a bug.

use crate::error::{Error, Result};
use crate::messaging::system::{FindQuery, FindResult, NodesWithAttributes};
use crate::types::{Key, Peer, Value};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// The procedures a node keeps scratchpad state for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProcedureKey {
    Bootstrap,
    Join,
    Leave,
    AcceptChild,
    FindReplacement,
    EntitySearchInquiry,
}

/// The scratchpad. One per node, owned by the node core.
#[derive(Debug, Default)]
pub struct ProcedureInfo {
    peers: HashMap<ProcedureKey, Vec<Peer>>,
    event_ids: HashMap<ProcedureKey, u64>,
    find_queries: HashMap<u64, FindQuery>,
    undecided_nodes: HashMap<u64, Vec<Peer>>,
    preliminary_results: HashMap<u64, NodesWithAttributes>,
    dsn_aggregation_started: HashMap<u64, u64>,
    inquiry_aggregation_started: HashMap<u64, u64>,
    addressed_dsns: HashMap<u64, u16>,
    answered_dsns: HashMap<u64, u16>,
    find_result_senders: HashMap<u64, oneshot::Sender<FindResult>>,
}

macro_rules! keyed_store {
    ($field:ident, $value:ty, $name:literal,
     $save:ident, $load:ident, $update:ident, $remove:ident, $has:ident) => {
        pub fn $save(&mut self, key: u64, value: $value) -> Result<()> {
            if self.$field.contains_key(&key) {
                return Err(Error::ProcedureKeyExists($name));
            }
            let _ = self.$field.insert(key, value);
            Ok(())
        }

        pub fn $load(&self, key: u64) -> Result<&$value> {
            self.$field.get(&key).ok_or(Error::ProcedureKeyMissing($name))
        }

        pub fn $update(&mut self, key: u64, value: $value) -> Result<()> {
            if !self.$field.contains_key(&key) {
                return Err(Error::ProcedureKeyMissing($name));
            }
            let _ = self.$field.insert(key, value);
            Ok(())
        }

        pub fn $remove(&mut self, key: u64) -> Result<()> {
            self.$field
                .remove(&key)
                .map(|_| ())
                .ok_or(Error::ProcedureKeyMissing($name))
        }

        pub fn $has(&self, key: u64) -> bool {
            self.$field.contains_key(&key)
        }
    };
}

impl ProcedureInfo {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- peer lists by procedure ----

    pub fn save_peers(&mut self, key: ProcedureKey, peers: Vec<Peer>) -> Result<()> {
        if self.peers.contains_key(&key) {
            return Err(Error::ProcedureKeyExists("peers"));
        }
        let _ = self.peers.insert(key, peers);
        Ok(())
    }

    pub fn load_peers(&self, key: ProcedureKey) -> Result<&Vec<Peer>> {
        self.peers.get(&key).ok_or(Error::ProcedureKeyMissing("peers"))
    }

    pub fn update_peers(&mut self, key: ProcedureKey, peers: Vec<Peer>) -> Result<()> {
        if !self.peers.contains_key(&key) {
            return Err(Error::ProcedureKeyMissing("peers"));
        }
        let _ = self.peers.insert(key, peers);
        Ok(())
    }

    pub fn remove_peers(&mut self, key: ProcedureKey) -> Result<()> {
        self.peers
            .remove(&key)
            .map(|_| ())
            .ok_or(Error::ProcedureKeyMissing("peers"))
    }

    pub fn has_peers(&self, key: ProcedureKey) -> bool {
        self.peers.contains_key(&key)
    }

    // ---- event ids by procedure ----

    pub fn save_event_id(&mut self, key: ProcedureKey, event_id: u64) -> Result<()> {
        if self.event_ids.contains_key(&key) {
            return Err(Error::ProcedureKeyExists("event_id"));
        }
        let _ = self.event_ids.insert(key, event_id);
        Ok(())
    }

    pub fn load_event_id(&self, key: ProcedureKey) -> Result<u64> {
        self.event_ids
            .get(&key)
            .copied()
            .ok_or(Error::ProcedureKeyMissing("event_id"))
    }

    pub fn remove_event_id(&mut self, key: ProcedureKey) -> Result<()> {
        self.event_ids
            .remove(&key)
            .map(|_| ())
            .ok_or(Error::ProcedureKeyMissing("event_id"))
    }

    pub fn has_event_id(&self, key: ProcedureKey) -> bool {
        self.event_ids.contains_key(&key)
    }

    // ---- entity search, keyed by ref_event_id ----

    keyed_store!(
        find_queries,
        FindQuery,
        "find_query",
        save_find_query,
        load_find_query,
        update_find_query,
        remove_find_query,
        has_find_query
    );

    keyed_store!(
        undecided_nodes,
        Vec<Peer>,
        "undecided_nodes",
        save_undecided_nodes,
        load_undecided_nodes,
        update_undecided_nodes,
        remove_undecided_nodes,
        has_undecided_nodes
    );

    keyed_store!(
        dsn_aggregation_started,
        u64,
        "dsn_aggregation_start",
        save_dsn_aggregation_start,
        load_dsn_aggregation_start,
        update_dsn_aggregation_start,
        remove_dsn_aggregation_start,
        has_dsn_aggregation_start
    );

    keyed_store!(
        inquiry_aggregation_started,
        u64,
        "inquiry_aggregation_start",
        save_inquiry_aggregation_start,
        load_inquiry_aggregation_start,
        update_inquiry_aggregation_start,
        remove_inquiry_aggregation_start,
        has_inquiry_aggregation_start
    );

    keyed_store!(
        addressed_dsns,
        u16,
        "addressed_dsns",
        save_addressed_dsns,
        load_addressed_dsns,
        update_addressed_dsns,
        remove_addressed_dsns,
        has_addressed_dsns
    );

    keyed_store!(
        answered_dsns,
        u16,
        "answered_dsns",
        save_answered_dsns,
        load_answered_dsns,
        update_answered_dsns,
        remove_answered_dsns,
        has_answered_dsns
    );

    /// Snapshot of every running DSN aggregation and its start timestamp.
    pub fn dsn_aggregation_starts(&self) -> Vec<(u64, u64)> {
        self.dsn_aggregation_started
            .iter()
            .map(|(&id, &started)| (id, started))
            .collect()
    }

    /// Snapshot of every running inquiry aggregation and its start timestamp.
    pub fn inquiry_aggregation_starts(&self) -> Vec<(u64, u64)> {
        self.inquiry_aggregation_started
            .iter()
            .map(|(&id, &started)| (id, started))
            .collect()
    }

    // ---- preliminary results ----

    pub fn save_preliminary_results(
        &mut self,
        ref_event_id: u64,
        results: NodesWithAttributes,
    ) -> Result<()> {
        if self.preliminary_results.contains_key(&ref_event_id) {
            return Err(Error::ProcedureKeyExists("preliminary_results"));
        }
        let _ = self.preliminary_results.insert(ref_event_id, results);
        Ok(())
    }

    pub fn load_preliminary_results(&self, ref_event_id: u64) -> Result<&NodesWithAttributes> {
        self.preliminary_results
            .get(&ref_event_id)
            .ok_or(Error::ProcedureKeyMissing("preliminary_results"))
    }

    /// Merges one node's attributes into the preliminary result set; a node
    /// already present gets its attribute list replaced.
    pub fn add_preliminary_result(
        &mut self,
        ref_event_id: u64,
        node: Peer,
        attributes: Vec<(Key, Value)>,
    ) -> Result<()> {
        let results = self
            .preliminary_results
            .get_mut(&ref_event_id)
            .ok_or(Error::ProcedureKeyMissing("preliminary_results"))?;
        match results.iter_mut().find(|(peer, _)| peer.same_position(&node)) {
            Some((_, existing)) => *existing = attributes,
            None => results.push((node, attributes)),
        }
        Ok(())
    }

    pub fn remove_preliminary_results(&mut self, ref_event_id: u64) -> Result<()> {
        self.preliminary_results
            .remove(&ref_event_id)
            .map(|_| ())
            .ok_or(Error::ProcedureKeyMissing("preliminary_results"))
    }

    pub fn has_preliminary_results(&self, ref_event_id: u64) -> bool {
        self.preliminary_results.contains_key(&ref_event_id)
    }

    /// Number of preliminary results gathered so far.
    pub fn preliminary_result_count(&self, ref_event_id: u64) -> usize {
        self.preliminary_results
            .get(&ref_event_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // ---- find futures ----

    pub fn save_find_result_sender(
        &mut self,
        ref_event_id: u64,
        sender: oneshot::Sender<FindResult>,
    ) -> Result<()> {
        if self.find_result_senders.contains_key(&ref_event_id) {
            return Err(Error::ProcedureKeyExists("find_result_sender"));
        }
        let _ = self.find_result_senders.insert(ref_event_id, sender);
        Ok(())
    }

    /// Takes the one-shot sender; fulfilment consumes it.
    pub fn take_find_result_sender(
        &mut self,
        ref_event_id: u64,
    ) -> Result<oneshot::Sender<FindResult>> {
        self.find_result_senders
            .remove(&ref_event_id)
            .ok_or(Error::ProcedureKeyMissing("find_result_sender"))
    }

    pub fn has_find_result_sender(&self, ref_event_id: u64) -> bool {
        self.find_result_senders.contains_key(&ref_event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::system::{FindQueryScope, FindQuerySelection, QueryExpr};
    use crate::types::test_utils::test_peer;
    use assert_matches::assert_matches;

    #[test]
    fn event_id_lifecycle_is_strict() {
        let mut info = ProcedureInfo::new();
        assert_matches!(
            info.load_event_id(ProcedureKey::Leave),
            Err(Error::ProcedureKeyMissing(_))
        );

        info.save_event_id(ProcedureKey::Leave, 42).unwrap();
        assert_matches!(
            info.save_event_id(ProcedureKey::Leave, 43),
            Err(Error::ProcedureKeyExists(_))
        );
        assert_eq!(info.load_event_id(ProcedureKey::Leave).unwrap(), 42);

        info.remove_event_id(ProcedureKey::Leave).unwrap();
        assert_matches!(
            info.remove_event_id(ProcedureKey::Leave),
            Err(Error::ProcedureKeyMissing(_))
        );
    }

    #[test]
    fn peer_lists_are_keyed_by_procedure() {
        let mut info = ProcedureInfo::new();
        info.save_peers(ProcedureKey::Join, vec![test_peer(0, 0, 2, 2000)])
            .unwrap();
        info.save_peers(ProcedureKey::Bootstrap, vec![]).unwrap();
        assert_eq!(info.load_peers(ProcedureKey::Join).unwrap().len(), 1);
        assert!(info.load_peers(ProcedureKey::Bootstrap).unwrap().is_empty());
    }

    #[test]
    fn preliminary_results_merge_by_node() {
        let mut info = ProcedureInfo::new();
        info.save_preliminary_results(7, Vec::new()).unwrap();

        let node = test_peer(1, 0, 2, 2000);
        info.add_preliminary_result(7, node.clone(), vec![("a".into(), Value::Int(1))])
            .unwrap();
        info.add_preliminary_result(7, node, vec![("a".into(), Value::Int(2))])
            .unwrap();
        assert_eq!(info.preliminary_result_count(7), 1);
        assert_eq!(
            info.load_preliminary_results(7).unwrap()[0].1[0].1,
            Value::Int(2)
        );

        // late arrivals for an unknown query are the caller's recoverable path
        assert_matches!(
            info.add_preliminary_result(8, test_peer(1, 1, 2, 2001), vec![]),
            Err(Error::ProcedureKeyMissing(_))
        );
    }

    #[test]
    fn find_result_sender_is_taken_once() {
        let mut info = ProcedureInfo::new();
        let (tx, _rx) = oneshot::channel();
        info.save_find_result_sender(9, tx).unwrap();
        assert!(info.has_find_result_sender(9));
        let _ = info.take_find_result_sender(9).unwrap();
        assert_matches!(
            info.take_find_result_sender(9),
            Err(Error::ProcedureKeyMissing(_))
        );
    }

    #[test]
    fn find_queries_round_trip() {
        let mut info = ProcedureInfo::new();
        let query = FindQuery::new(
            QueryExpr::Present("cpu".into()),
            FindQueryScope::All,
            FindQuerySelection::SelectAll,
        );
        info.save_find_query(3, query.clone()).unwrap();
        assert_eq!(info.load_find_query(3).unwrap(), &query);
        info.update_find_query(3, query).unwrap();
        info.remove_find_query(3).unwrap();
        assert!(!info.has_find_query(3));
    }
}
