// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The messages nodes exchange, their header, and the opaque wire codec.

mod header;
pub mod system;
mod wire_msg;

pub use header::{new_event_id, AdditionalLoggingInfo, MsgHeader};
pub use system::{MsgType, NetworkMsg};
pub use wire_msg::WireMsg;
