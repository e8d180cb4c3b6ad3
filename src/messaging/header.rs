// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::MsgType;
use crate::types::Peer;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A fresh, nonzero event id. Every initiating action mints one; replies
/// carry it along as `ref_event_id` so acks can be attributed.
pub fn new_event_id() -> u64 {
    loop {
        let id: u64 = rand::thread_rng().gen();
        if id != 0 {
            return id;
        }
    }
}

/// Free-form correlation info carried for the logging sinks only.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdditionalLoggingInfo {
    pub primary_other_uuid: String,
    pub secondary_other_uuid: String,
    pub content: String,
}

/// Header carried by every message on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsgHeader {
    sender: Peer,
    target: Peer,
    msg_type: MsgType,
    event_id: u64,
    ref_event_id: u64,
    additional_logging_info: AdditionalLoggingInfo,
}

impl MsgHeader {
    /// A header with a fresh event id. The message type is stamped when the
    /// header is married to a payload in [`super::WireMsg`].
    pub fn new(sender: Peer, target: Peer, ref_event_id: u64) -> Self {
        Self {
            sender,
            target,
            msg_type: MsgType::Init,
            event_id: new_event_id(),
            ref_event_id,
            additional_logging_info: AdditionalLoggingInfo::default(),
        }
    }

    pub fn sender(&self) -> &Peer {
        &self.sender
    }

    pub fn target(&self) -> &Peer {
        &self.target
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    pub fn ref_event_id(&self) -> u64 {
        self.ref_event_id
    }

    pub fn additional_logging_info(&self) -> &AdditionalLoggingInfo {
        &self.additional_logging_info
    }

    pub fn set_sender(&mut self, sender: Peer) {
        self.sender = sender;
    }

    pub fn set_target(&mut self, target: Peer) {
        self.target = target;
    }

    pub(super) fn set_msg_type(&mut self, msg_type: MsgType) {
        self.msg_type = msg_type;
    }

    pub fn set_additional_logging_info(&mut self, info: AdditionalLoggingInfo) {
        self.additional_logging_info = info;
    }

    /// A message is well-formed iff the sender is physically reachable (a
    /// joining node has no position yet), the target is at least
    /// identifiable, the type is stamped, the event id is set, and both ends
    /// agree on the fanout.
    pub fn validate(&self) -> bool {
        let sender_reachable = self.sender.addr().is_some();
        let target_identifiable = self.target.addr().is_some() || self.target.is_valid_peer();
        let type_stamped = self.msg_type != MsgType::Init;
        let event_id_set = self.event_id > 0;
        let same_fanout = if self.sender.is_initialised() && self.target.is_valid_peer() {
            self.sender.fanout() == self.target.fanout()
        } else {
            true
        };
        sender_reachable && target_identifiable && type_stamped && event_id_set && same_fanout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::{test_addr, test_peer};

    #[test]
    fn event_ids_are_nonzero_and_fresh() {
        let a = new_event_id();
        let b = new_event_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn validation_requires_a_reachable_sender() {
        let mut header = MsgHeader::new(
            Peer::unaddressed(0, 0, 2).unwrap(),
            test_peer(1, 0, 2, 4001),
            0,
        );
        header.set_msg_type(MsgType::Empty);
        assert!(!header.validate());

        header.set_sender(test_peer(0, 0, 2, 4000));
        assert!(header.validate());
    }

    #[test]
    fn validation_accepts_logical_only_targets() {
        let mut header = MsgHeader::new(
            test_peer(0, 0, 2, 4000),
            Peer::unaddressed(1, 0, 2).unwrap(),
            0,
        );
        header.set_msg_type(MsgType::SearchExact);
        assert!(header.validate());
    }

    #[test]
    fn validation_rejects_unstamped_and_mismatched_headers() {
        let unstamped = MsgHeader::new(test_peer(0, 0, 2, 4000), test_peer(1, 0, 2, 4001), 0);
        assert!(!unstamped.validate());

        let mut mismatched =
            MsgHeader::new(test_peer(0, 0, 2, 4000), test_peer(1, 0, 3, 4001), 0);
        mismatched.set_msg_type(MsgType::Empty);
        assert!(!mismatched.validate());

        // a target known only by address is fine
        let mut addressed = MsgHeader::new(
            test_peer(0, 0, 2, 4000),
            Peer::addressed(2, test_addr(4002)).unwrap(),
            0,
        );
        addressed.set_msg_type(MsgType::JoinAccept);
        assert!(addressed.validate());
    }
}
