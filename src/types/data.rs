// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Attribute key in a node's local data store.
pub type Key = String;

/// An attribute value a node publishes about itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Text(value) => write!(f, "{}", value),
        }
    }
}

/// How an attribute behaves over time. Dynamic values go stale and may be
/// re-inquired; static values are assumed constant once learnt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    Static,
    Dynamic,
}

/// One attribute of a node, as inserted through the application API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub kind: ValueKind,
}

impl Entry {
    pub fn new(key: impl Into<Key>, value: Value, kind: ValueKind) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
        }
    }
}
