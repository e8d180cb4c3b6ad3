// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::types::{Key, Value, ValueKind};
use std::collections::HashMap;

/// A stored attribute value with its last-update timestamp.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StoredValue {
    pub value: Value,
    pub updated_at: u64,
    pub kind: ValueKind,
}

/// Read access to an attribute store; query evaluation works against this so
/// the local store and the DSN cache evaluate identically.
pub(crate) trait AttributeSource {
    fn stored(&self, key: &str) -> Option<&StoredValue>;
    fn current_keys(&self) -> Vec<Key>;
}

/// The node's own attribute store, fed through the application API.
#[derive(Debug, Default)]
pub(crate) struct LocalData {
    data: HashMap<Key, StoredValue>,
}

impl LocalData {
    pub(crate) fn insert(&mut self, key: Key, value: Value, kind: ValueKind, now: u64) {
        let _ = self.data.insert(
            key,
            StoredValue {
                value,
                updated_at: now,
                kind,
            },
        );
    }

    /// Updates an existing key; unknown keys are inserted (local writes are
    /// authoritative).
    pub(crate) fn update(&mut self, key: Key, value: Value, kind: ValueKind, now: u64) {
        self.insert(key, value, kind, now);
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub(crate) fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub(crate) fn value(&self, key: &str) -> Option<&Value> {
        self.data.get(key).map(|stored| &stored.value)
    }
}

impl AttributeSource for LocalData {
    fn stored(&self, key: &str) -> Option<&StoredValue> {
        self.data.get(key)
    }

    fn current_keys(&self) -> Vec<Key> {
        self.data.keys().cloned().collect()
    }
}
