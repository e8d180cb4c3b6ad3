// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{MsgHeader, MsgType, NetworkMsg};
use crate::error::{Error, Result};
use crate::types::Peer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A header married to a payload; the unit of transfer on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMsg {
    header: MsgHeader,
    msg: NetworkMsg,
}

impl PartialEq for WireMsg {
    fn eq(&self, other: &Self) -> bool {
        self.header.event_id() == other.header.event_id() && self.msg == other.msg
    }
}

impl WireMsg {
    /// Stamps the header with the payload's type and combines the two.
    pub fn new(mut header: MsgHeader, msg: NetworkMsg) -> Self {
        header.set_msg_type(msg.msg_type());
        Self { header, msg }
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MsgHeader {
        &mut self.header
    }

    pub fn msg(&self) -> &NetworkMsg {
        &self.msg
    }

    pub fn into_msg(self) -> NetworkMsg {
        self.msg
    }

    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type()
    }

    pub fn sender(&self) -> &Peer {
        self.header.sender()
    }

    pub fn target(&self) -> &Peer {
        self.header.target()
    }

    /// Header and payload validation; every message passes through this
    /// before sending and after receiving.
    pub fn validate(&self) -> Result<()> {
        if self.header.validate()
            && self.header.msg_type() == self.msg.msg_type()
            && self.msg.is_valid()
        {
            Ok(())
        } else {
            Err(Error::InvalidMessage(self.msg.msg_type()))
        }
    }

    /// Serialises into the opaque wire form.
    pub fn serialize(&self) -> Result<Bytes> {
        let bytes = bincode::serialize(self)?;
        Ok(Bytes::from(bytes))
    }

    /// Deserialises from the opaque wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::system::{BootstrapResponse, Empty, Join, RemoveNeighbour};
    use crate::types::test_utils::{test_addr, test_peer};
    use crate::types::Peer;
    use assert_matches::assert_matches;

    fn header() -> MsgHeader {
        MsgHeader::new(test_peer(0, 0, 2, 4000), test_peer(1, 0, 2, 4001), 0)
    }

    #[test]
    fn wire_round_trip() {
        let msg = WireMsg::new(
            header(),
            NetworkMsg::RemoveNeighbour(RemoveNeighbour {
                removed_position_node: test_peer(1, 1, 2, 4002),
                acknowledge: true,
            }),
        );
        let bytes = msg.serialize().unwrap();
        let decoded = WireMsg::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.msg_type(), MsgType::RemoveNeighbour);
        assert_eq!(decoded.header().event_id(), msg.header().event_id());
    }

    #[test]
    fn nested_search_exact_round_trips() {
        use crate::messaging::system::SearchExact;

        let inner = WireMsg::new(header(), NetworkMsg::Empty(Empty));
        let outer = WireMsg::new(
            header(),
            NetworkMsg::SearchExact(SearchExact {
                payload: Box::new(inner),
            }),
        );
        let decoded = WireMsg::from_bytes(&outer.serialize().unwrap()).unwrap();
        assert_matches!(decoded.msg(), NetworkMsg::SearchExact(_));
    }

    #[test]
    fn header_gets_stamped_with_the_payload_type() {
        let msg = WireMsg::new(header(), NetworkMsg::Empty(Empty));
        assert_eq!(msg.header().msg_type(), MsgType::Empty);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn payload_validation_is_enforced() {
        // a join whose entering node is unreachable is useless
        let msg = WireMsg::new(
            header(),
            NetworkMsg::Join(Join {
                entering_node: Peer::unaddressed(1, 0, 2).unwrap(),
            }),
        );
        assert_matches!(msg.validate(), Err(Error::InvalidMessage(MsgType::Join)));

        let msg = WireMsg::new(
            header(),
            NetworkMsg::BootstrapResponse(BootstrapResponse {
                node_to_join: Peer::addressed(2, test_addr(4009)).unwrap(),
            }),
        );
        assert_matches!(
            msg.validate(),
            Err(Error::InvalidMessage(MsgType::BootstrapResponse))
        );
    }
}
