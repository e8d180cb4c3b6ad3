// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::types::Peer;
use serde::{Deserialize, Serialize};

/// How far the search for a replacement leaf has progressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SearchProgress {
    /// Still descending towards the deepest level.
    None = 0,
    /// Scanning the deepest level along the fill direction.
    SearchLevel = 1,
    /// Final hop: the receiver is the chosen successor.
    ReplacementNode = 2,
}

impl Default for SearchProgress {
    fn default() -> Self {
        Self::None
    }
}

/// Routes towards the most recently filled leaf, which will offer itself as
/// replacement for `node_to_replace`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindReplacement {
    pub node_to_replace: Peer,
    pub search_progress: SearchProgress,
}

impl FindReplacement {
    pub(crate) fn is_valid(&self) -> bool {
        self.node_to_replace.is_initialised()
    }
}

/// The chosen successor declines (it is already engaged in another
/// procedure); the leaving node retries after a delay.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplacementNack;

/// A leaving leaf (or a successor about to move) asks its parent to sign it
/// off. The parent locks itself and its level neighbours first.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignoffParentRequest;

/// The parent's verdict. On failure the leave is aborted and retried later.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignoffParentAnswer {
    pub successful: bool,
}

/// Asks a level neighbour of the signing-off parent to lock itself for the
/// duration of the leave.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockNeighbourRequest;

/// Whether the lock was acquired; `false` whenever the target was already
/// locked by another procedure.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockNeighbourResponse {
    pub successful: bool,
}

/// Releases a lock acquired via [`LockNeighbourRequest`]; the parent forwards
/// the unlock to its level neighbours.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnlockNeighbour;

/// The successor, fully signed off at its old position, offers itself to the
/// leaving node.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplacementOffer;

/// Lock flags travelling with a [`ReplacementAck`]; the successor inherits
/// ownership of any locks the leaving node still holds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockedStates {
    pub locked: bool,
    pub locked_right: bool,
    pub locked_left: bool,
}

/// The leaving node hands its entire known neighbourhood (and lock
/// ownership) to the successor and falls back to Idle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplacementAck {
    pub neighbours: Vec<Peer>,
    pub locked_states: LockedStates,
}

impl ReplacementAck {
    pub(crate) fn is_valid(&self) -> bool {
        self.neighbours.iter().all(Peer::is_valid_peer)
    }
}
