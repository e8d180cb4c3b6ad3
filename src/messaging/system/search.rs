// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::messaging::WireMsg;
use serde::{Deserialize, Serialize};

/// Hop of the greedy positional routing: carries an opaque inner message
/// towards a target whose physical address is unknown. Delivered to the
/// target's `recv()` once a hop reaches it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchExact {
    pub payload: Box<WireMsg>,
}

impl SearchExact {
    pub(crate) fn is_valid(&self) -> bool {
        self.payload.header().target().is_valid_peer()
    }
}

/// Bounced back to the origin when a hop knows no peer closer to the target
/// than itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchExactFailure {
    pub undeliverable: Box<WireMsg>,
}
