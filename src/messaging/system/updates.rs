// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::routing::NeighbourRelationship;
use crate::types::{Peer, Position};
use serde::{Deserialize, Serialize};

/// Tells the receiver that the peer at the carried position left the overlay;
/// the matching routing entries are cleared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoveNeighbour {
    pub removed_position_node: Peer,
    pub acknowledge: bool,
}

impl RemoveNeighbour {
    pub(crate) fn is_valid(&self) -> bool {
        self.removed_position_node.is_valid_peer()
    }
}

/// Generic acknowledgement for the departure/update broadcasts; counted at
/// the initiator via the header's `ref_event_id`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RemoveNeighbourAck;

/// Ships one or more peers together with the role they (now) play for the
/// receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateNeighbours {
    pub neighbours_and_relationships: Vec<(Peer, NeighbourRelationship)>,
    pub should_acknowledge: bool,
}

impl UpdateNeighbours {
    pub(crate) fn is_valid(&self) -> bool {
        self.neighbours_and_relationships
            .iter()
            .all(|(peer, _)| peer.is_valid_peer())
    }
}

/// A removal and an update that must be applied together, e.g. when a
/// departing node's left adjacent is also its direct left neighbour. The
/// embedded parts never carry their own acknowledgement flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoveAndUpdateNeighbours {
    pub remove: RemoveNeighbour,
    pub update: UpdateNeighbours,
    pub should_acknowledge: bool,
}

impl RemoveAndUpdateNeighbours {
    pub(crate) fn is_valid(&self) -> bool {
        self.remove.is_valid()
            && self.update.is_valid()
            && !self.remove.acknowledge
            && !self.update.should_acknowledge
    }
}

/// Announces that the peer formerly at `removed_position_node` now occupies
/// `replaced_position_node`'s slot under a fresh logical identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplacementUpdate {
    pub removed_position_node: Peer,
    pub replaced_position_node: Peer,
    pub new_position: Position,
    pub should_acknowledge: bool,
}

impl ReplacementUpdate {
    pub(crate) fn is_valid(&self) -> bool {
        self.removed_position_node.is_valid_peer()
            && self.replaced_position_node.is_valid_peer()
            && self.new_position.is_initialised()
    }
}

/// Asks a peer for the neighbours it holds under the given relationships.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetNeighbours {
    pub relationships: Vec<NeighbourRelationship>,
}

/// Answer to [`GetNeighbours`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InformAboutNeighbours {
    pub requested_neighbours: Vec<Peer>,
}

/// A message without payload; keeps connections observable.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Empty;
