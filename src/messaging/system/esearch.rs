// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Entity-search wire types: the query model and the DSN aggregation
//! messages. Query *evaluation* lives with the entity-search algorithm.

use crate::types::{Entry, Key, Peer, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Nodes satisfying a query, together with the attribute values backing the
/// verdict.
pub type NodesWithAttributes = Vec<(Peer, Vec<(Key, Value)>)>;

/// What a `find()` future resolves to: the attribute entries of every
/// satisfying node. An empty result is a legal outcome.
pub type FindResult = Vec<Vec<Entry>>;

/// Boolean expression over a node's attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QueryExpr {
    /// The attribute exists (a "topic" the node announces).
    Present(Key),
    Equals(Key, Value),
    Less(Key, Value),
    Greater(Key, Value),
    Not(Box<QueryExpr>),
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
    /// Matches every node.
    All,
}

impl QueryExpr {
    /// Every attribute key the expression mentions.
    pub fn relevant_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys, false);
        keys.dedup();
        keys
    }

    /// The keys used as pure existence checks; absent values answer `false`
    /// rather than `unknown` for these.
    pub fn relevant_topic_keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys, true);
        keys.dedup();
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<Key>, topics_only: bool) {
        match self {
            QueryExpr::Present(key) => keys.push(key.clone()),
            QueryExpr::Equals(key, _) | QueryExpr::Less(key, _) | QueryExpr::Greater(key, _) => {
                if !topics_only {
                    keys.push(key.clone());
                }
            }
            QueryExpr::Not(inner) => inner.collect_keys(keys, topics_only),
            QueryExpr::And(left, right) | QueryExpr::Or(left, right) => {
                left.collect_keys(keys, topics_only);
                right.collect_keys(keys, topics_only);
            }
            QueryExpr::All => {}
        }
    }
}

/// How many satisfying nodes the caller wants.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FindQueryScope {
    /// Every satisfying node.
    All,
    /// Stop expanding once a threshold of satisfying nodes is reached.
    Some,
}

/// Which attributes of a satisfying node the answer ships.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FindQuerySelection {
    SelectAll,
    SelectSpecific(Vec<Key>),
}

/// An attribute query fanned out over the DSNs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindQuery {
    pub expr: QueryExpr,
    pub scope: FindQueryScope,
    pub selection: FindQuerySelection,
    /// Stamped by the node that called `find()`; answers flow back here.
    pub requesting_node: Peer,
}

impl FindQuery {
    pub fn new(expr: QueryExpr, scope: FindQueryScope, selection: FindQuerySelection) -> Self {
        Self {
            expr,
            scope,
            selection,
            requesting_node: Peer::default(),
        }
    }

    pub fn relevant_keys(&self) -> Vec<Key> {
        self.expr.relevant_keys()
    }

    pub fn relevant_topic_keys(&self) -> Vec<Key> {
        self.expr.relevant_topic_keys()
    }

    pub fn selected_keys(&self) -> Vec<Key> {
        match &self.selection {
            FindQuerySelection::SelectAll => Vec::new(),
            FindQuerySelection::SelectSpecific(keys) => keys.clone(),
        }
    }
}

/// Which way a DSN keeps forwarding a query along its level.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ForwardingDirection {
    None = 0,
    Left = 1,
    Right = 2,
}

/// Fans a query out to a DSN, restricted to a disjoint number interval of
/// its level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindQueryRequest {
    pub query: FindQuery,
    pub direction: ForwardingDirection,
    pub interval: (u32, u32),
}

impl FindQueryRequest {
    pub(crate) fn is_valid(&self) -> bool {
        self.query.requesting_node.is_initialised() && self.interval.0 <= self.interval.1
    }
}

/// A DSN's aggregated answer for its cover area.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindQueryAnswer {
    pub fulfilling_nodes_with_attributes: NodesWithAttributes,
}

/// Asks a cover-area node for attribute values the DSN cannot decide the
/// query on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeInquiryRequest {
    pub inquire_all: bool,
    pub missing_keys: Vec<Key>,
}

/// The inquired node's current values (and keys it dropped since the last
/// inquiry).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeInquiryAnswer {
    pub inquired_node: Peer,
    pub attribute_values_and_types: Vec<(Key, Value, ValueKind)>,
    pub removed_attribute_keys: Vec<Key>,
}

impl AttributeInquiryAnswer {
    pub(crate) fn is_valid(&self) -> bool {
        self.inquired_node.is_initialised()
    }
}

/// Orders a cover-area node to push (or stop pushing) updates for the given
/// keys instead of being polled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOrder {
    pub keys: Vec<Key>,
    pub subscribe: bool,
}

/// Pushed value changes for subscribed keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub entries: Vec<Entry>,
    pub removed_keys: Vec<Key>,
}
