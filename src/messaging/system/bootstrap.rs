// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::types::Peer;
use serde::{Deserialize, Serialize};

/// Best-effort multicast probe of a node looking for an entry point into the
/// overlay. May be received in any state; only connected nodes answer.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BootstrapDiscover {
    pub discovery_message: String,
}

/// Unicast answer to a [`BootstrapDiscover`], carrying a candidate the
/// discovering node may direct its join at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub node_to_join: Peer,
}

impl BootstrapResponse {
    pub(crate) fn is_valid(&self) -> bool {
        self.node_to_join.is_initialised()
    }
}
