// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Identity and addressing value objects, plus the attribute data model.

mod data;
mod peer;
mod position;

pub use data::{Entry, Key, Value, ValueKind};
pub use peer::{Peer, PeerStatus, PORT_MIN};
pub use position::Position;

#[cfg(test)]
pub(crate) use peer::test_utils;
