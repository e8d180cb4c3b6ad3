// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::routing::calculations::is_fanout_valid;
use crate::types::Peer;
use serde::{Deserialize, Serialize};

/// Request of a fresh node to join the overlay. Forwarded through the tree
/// until a node with a free child slot on the correct side accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Join {
    /// The node that wants to enter; kept stable across forwarding hops.
    pub entering_node: Peer,
}

impl Join {
    pub(crate) fn is_valid(&self) -> bool {
        // The entering node has no position yet, but must be reachable.
        self.entering_node.addr().is_some()
    }
}

/// The accepting parent's answer: the child slot context the entering node
/// needs to build its routing information.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinAccept {
    pub fanout: u16,
    pub adjacent_left: Peer,
    pub adjacent_right: Peer,
    pub routing_table_neighbours: Vec<Peer>,
}

impl JoinAccept {
    pub(crate) fn is_valid(&self) -> bool {
        is_fanout_valid(self.fanout)
    }
}

/// Final handshake of the join; on receipt the parent broadcasts the new
/// child to everyone who needs to learn about it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct JoinAcceptAck;
