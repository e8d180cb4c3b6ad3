// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::local_data::{AttributeSource, StoredValue};
use crate::types::{Key, Value, ValueKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

/// How many update timestamps per key the frequency tracking keeps.
const TIMESTAMP_STORAGE_LIMIT: usize = 20;

/// What a DSN caches about one node of its cover area: the node's attribute
/// values, when each was last updated (for freshness and frequency), and the
/// keys we placed subscription orders for.
#[derive(Clone, Debug, Default)]
pub(crate) struct DistributedData {
    addr: Option<SocketAddr>,
    data: HashMap<Key, StoredValue>,
    update_timestamps: HashMap<Key, VecDeque<u64>>,
    subscription_order_keys: HashSet<Key>,
}

impl DistributedData {
    pub(crate) fn new(addr: Option<SocketAddr>) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    pub(crate) fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub(crate) fn set_addr(&mut self, addr: Option<SocketAddr>) {
        self.addr = addr;
    }

    fn push_timestamp(&mut self, key: &str, timestamp: u64) {
        let timestamps = self
            .update_timestamps
            .entry(key.to_string())
            .or_insert_with(VecDeque::new);
        timestamps.push_back(timestamp);
        if timestamps.len() > TIMESTAMP_STORAGE_LIMIT {
            let _ = timestamps.pop_front();
        }
    }

    /// Inserts a fresh key. Returns false when the key already exists.
    pub(crate) fn insert(&mut self, key: Key, value: Value, kind: ValueKind, timestamp: u64) -> bool {
        if self.data.contains_key(&key) {
            return false;
        }
        self.push_timestamp(&key, timestamp);
        let _ = self.data.insert(
            key,
            StoredValue {
                value,
                updated_at: timestamp,
                kind,
            },
        );
        true
    }

    /// Updates an existing key. Returns false when the key is unknown.
    pub(crate) fn update(&mut self, key: &str, value: Value, kind: ValueKind, timestamp: u64) -> bool {
        match self.data.get_mut(key) {
            Some(stored) => {
                stored.value = value;
                stored.updated_at = timestamp;
                stored.kind = kind;
                self.push_timestamp(key, timestamp);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        let _ = self.update_timestamps.remove(key);
        let _ = self.subscription_order_keys.remove(key);
        self.data.remove(key).is_some()
    }

    pub(crate) fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub(crate) fn value(&self, key: &str) -> Option<&Value> {
        self.data.get(key).map(|stored| &stored.value)
    }

    pub(crate) fn update_timestamps(&self, key: &str) -> Vec<u64> {
        self.update_timestamps
            .get(key)
            .map(|timestamps| timestamps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn add_subscription_order_key(&mut self, key: Key) {
        let _ = self.subscription_order_keys.insert(key);
    }

    pub(crate) fn remove_subscription_order_key(&mut self, key: &str) {
        let _ = self.subscription_order_keys.remove(key);
    }

    pub(crate) fn is_key_subscribed(&self, key: &str) -> bool {
        self.subscription_order_keys.contains(key)
    }

    pub(crate) fn subscription_order_keys(&self) -> Vec<Key> {
        self.subscription_order_keys.iter().cloned().collect()
    }
}

impl AttributeSource for DistributedData {
    fn stored(&self, key: &str) -> Option<&StoredValue> {
        self.data.get(key)
    }

    fn current_keys(&self) -> Vec<Key> {
        self.data.keys().cloned().collect()
    }
}
