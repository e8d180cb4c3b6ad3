// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::messaging::MsgType;
use crate::node::fsm::FsmState;
use std::io;
use thiserror::Error;

/// The type returned by the minhton message handling methods.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Internal error.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    /// A (level, number, fanout) triple that cannot exist in the tree.
    #[error("Invalid position {level}:{number} for fanout {fanout}")]
    InvalidPosition {
        level: u32,
        number: u32,
        fanout: u16,
    },
    #[error("Fanout must be within [2, 255], got {0}")]
    InvalidFanout(u16),
    #[error("Cannot get the parent of root")]
    RootHasNoParent,
    #[error("Parent cannot be removed from routing information, only updated")]
    CannotRemoveParent,
    #[error("Routing information is not initialised yet")]
    Uninitialised,
    #[error("Neighbour must be initialised to be stored")]
    NeighbourUninitialised,
    #[error("Child index {0} is out of range for fanout {1}")]
    ChildIndexOutOfRange(u16, u16),
    #[error("Node does not have the expected logical position")]
    LogicalMismatch,
    #[error("Adjacent is on the wrong side of us")]
    WrongAdjacentSide,
    #[error("The fanout of the node does not match ours")]
    FanoutMismatch,
    /// An event the FSM has no transition for in its current state.
    #[error("No transition from {state:?} for {event}")]
    Fsm { state: FsmState, event: String },
    #[error("FSM reached the error state from {0:?}")]
    FsmErrorState(FsmState),
    /// Header failed validation; dropped with a warning on receive, raises on send.
    #[error("Invalid message of type {0:?}")]
    InvalidMessage(MsgType),
    #[error("Procedure key {0} is not present")]
    ProcedureKeyMissing(&'static str),
    #[error("Procedure key {0} is already present")]
    ProcedureKeyExists(&'static str),
    #[error("Message type {0:?} cannot be forwarded after a replacement")]
    ForwardingNotSupported(MsgType),
    #[error("No neighbour is closer to the search target than we are")]
    SearchExactDeadEnd,
    #[error("Cannot join: no valid bootstrap candidate responded")]
    BootstrapFailed,
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Bincode error.
    #[error("Bincode error:: {0}")]
    Bincode(#[from] bincode::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
