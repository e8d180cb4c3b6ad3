// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The closed set of messages nodes exchange.

mod bootstrap;
mod esearch;
mod join;
mod leave;
mod search;
mod updates;

pub use bootstrap::{BootstrapDiscover, BootstrapResponse};
pub use esearch::{
    AttributeInquiryAnswer, AttributeInquiryRequest, FindQuery, FindQueryAnswer, FindQueryRequest,
    FindQueryScope, FindQuerySelection, FindResult, ForwardingDirection, NodesWithAttributes,
    QueryExpr, SubscriptionOrder, SubscriptionUpdate,
};
pub use join::{Join, JoinAccept, JoinAcceptAck};
pub use leave::{
    FindReplacement, LockNeighbourRequest, LockNeighbourResponse, LockedStates, ReplacementAck,
    ReplacementNack, ReplacementOffer, SearchProgress, SignoffParentAnswer, SignoffParentRequest,
    UnlockNeighbour,
};
pub use search::{SearchExact, SearchExactFailure};
pub use updates::{
    Empty, GetNeighbours, InformAboutNeighbours, RemoveAndUpdateNeighbours, RemoveNeighbour,
    RemoveNeighbourAck, ReplacementUpdate, UpdateNeighbours,
};

use serde::{Deserialize, Serialize};

/// Tag of every message kind on the wire. `Init` marks an unstamped header
/// and never travels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgType {
    Init = 0,
    Join,
    JoinAccept,
    JoinAcceptAck,
    BootstrapDiscover,
    BootstrapResponse,
    Empty,
    RemoveNeighbour,
    RemoveNeighbourAck,
    UpdateNeighbours,
    RemoveAndUpdateNeighbours,
    ReplacementUpdate,
    GetNeighbours,
    InformAboutNeighbours,
    FindReplacement,
    ReplacementNack,
    SignoffParentRequest,
    SignoffParentAnswer,
    LockNeighbourRequest,
    LockNeighbourResponse,
    UnlockNeighbour,
    ReplacementOffer,
    ReplacementAck,
    SearchExact,
    SearchExactFailure,
    FindQueryRequest,
    FindQueryAnswer,
    AttributeInquiryRequest,
    AttributeInquiryAnswer,
    SubscriptionOrder,
    SubscriptionUpdate,
}

/// One message payload. Exhaustively matched by the algorithm dispatch — the
/// variant set is closed on purpose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum NetworkMsg {
    Join(Join),
    JoinAccept(Box<JoinAccept>),
    JoinAcceptAck(JoinAcceptAck),
    BootstrapDiscover(BootstrapDiscover),
    BootstrapResponse(BootstrapResponse),
    Empty(Empty),
    RemoveNeighbour(RemoveNeighbour),
    RemoveNeighbourAck(RemoveNeighbourAck),
    UpdateNeighbours(UpdateNeighbours),
    RemoveAndUpdateNeighbours(RemoveAndUpdateNeighbours),
    ReplacementUpdate(ReplacementUpdate),
    GetNeighbours(GetNeighbours),
    InformAboutNeighbours(InformAboutNeighbours),
    FindReplacement(FindReplacement),
    ReplacementNack(ReplacementNack),
    SignoffParentRequest(SignoffParentRequest),
    SignoffParentAnswer(SignoffParentAnswer),
    LockNeighbourRequest(LockNeighbourRequest),
    LockNeighbourResponse(LockNeighbourResponse),
    UnlockNeighbour(UnlockNeighbour),
    ReplacementOffer(ReplacementOffer),
    ReplacementAck(ReplacementAck),
    SearchExact(SearchExact),
    SearchExactFailure(SearchExactFailure),
    FindQueryRequest(Box<FindQueryRequest>),
    FindQueryAnswer(FindQueryAnswer),
    AttributeInquiryRequest(AttributeInquiryRequest),
    AttributeInquiryAnswer(AttributeInquiryAnswer),
    SubscriptionOrder(SubscriptionOrder),
    SubscriptionUpdate(SubscriptionUpdate),
}

impl NetworkMsg {
    /// The wire tag of this payload.
    pub fn msg_type(&self) -> MsgType {
        match self {
            NetworkMsg::Join(_) => MsgType::Join,
            NetworkMsg::JoinAccept(_) => MsgType::JoinAccept,
            NetworkMsg::JoinAcceptAck(_) => MsgType::JoinAcceptAck,
            NetworkMsg::BootstrapDiscover(_) => MsgType::BootstrapDiscover,
            NetworkMsg::BootstrapResponse(_) => MsgType::BootstrapResponse,
            NetworkMsg::Empty(_) => MsgType::Empty,
            NetworkMsg::RemoveNeighbour(_) => MsgType::RemoveNeighbour,
            NetworkMsg::RemoveNeighbourAck(_) => MsgType::RemoveNeighbourAck,
            NetworkMsg::UpdateNeighbours(_) => MsgType::UpdateNeighbours,
            NetworkMsg::RemoveAndUpdateNeighbours(_) => MsgType::RemoveAndUpdateNeighbours,
            NetworkMsg::ReplacementUpdate(_) => MsgType::ReplacementUpdate,
            NetworkMsg::GetNeighbours(_) => MsgType::GetNeighbours,
            NetworkMsg::InformAboutNeighbours(_) => MsgType::InformAboutNeighbours,
            NetworkMsg::FindReplacement(_) => MsgType::FindReplacement,
            NetworkMsg::ReplacementNack(_) => MsgType::ReplacementNack,
            NetworkMsg::SignoffParentRequest(_) => MsgType::SignoffParentRequest,
            NetworkMsg::SignoffParentAnswer(_) => MsgType::SignoffParentAnswer,
            NetworkMsg::LockNeighbourRequest(_) => MsgType::LockNeighbourRequest,
            NetworkMsg::LockNeighbourResponse(_) => MsgType::LockNeighbourResponse,
            NetworkMsg::UnlockNeighbour(_) => MsgType::UnlockNeighbour,
            NetworkMsg::ReplacementOffer(_) => MsgType::ReplacementOffer,
            NetworkMsg::ReplacementAck(_) => MsgType::ReplacementAck,
            NetworkMsg::SearchExact(_) => MsgType::SearchExact,
            NetworkMsg::SearchExactFailure(_) => MsgType::SearchExactFailure,
            NetworkMsg::FindQueryRequest(_) => MsgType::FindQueryRequest,
            NetworkMsg::FindQueryAnswer(_) => MsgType::FindQueryAnswer,
            NetworkMsg::AttributeInquiryRequest(_) => MsgType::AttributeInquiryRequest,
            NetworkMsg::AttributeInquiryAnswer(_) => MsgType::AttributeInquiryAnswer,
            NetworkMsg::SubscriptionOrder(_) => MsgType::SubscriptionOrder,
            NetworkMsg::SubscriptionUpdate(_) => MsgType::SubscriptionUpdate,
        }
    }

    /// Payload-specific validation on top of the header rules.
    pub fn is_valid(&self) -> bool {
        match self {
            NetworkMsg::Join(msg) => msg.is_valid(),
            NetworkMsg::JoinAccept(msg) => msg.is_valid(),
            NetworkMsg::BootstrapResponse(msg) => msg.is_valid(),
            NetworkMsg::RemoveNeighbour(msg) => msg.is_valid(),
            NetworkMsg::UpdateNeighbours(msg) => msg.is_valid(),
            NetworkMsg::RemoveAndUpdateNeighbours(msg) => msg.is_valid(),
            NetworkMsg::ReplacementUpdate(msg) => msg.is_valid(),
            NetworkMsg::FindReplacement(msg) => msg.is_valid(),
            NetworkMsg::ReplacementAck(msg) => msg.is_valid(),
            NetworkMsg::SearchExact(msg) => msg.is_valid(),
            NetworkMsg::FindQueryRequest(msg) => msg.is_valid(),
            NetworkMsg::AttributeInquiryAnswer(msg) => msg.is_valid(),
            _ => true,
        }
    }
}
