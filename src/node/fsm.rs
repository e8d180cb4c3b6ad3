// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The per-node finite state machine.
//!
//! The transition table is explicit data: `(from, guard, to)` rows, checked
//! in order, first match wins. Guards are pure functions of the event. An
//! event no row matches leaves the state untouched and surfaces an
//! [`Error::Fsm`]; whether that is fatal depends on the caller — for
//! critical messages it is a programmer error, for asynchronous updates it
//! is the normal drop path.

use crate::error::{Error, Result};
use crate::messaging::MsgType;
use crate::types::Peer;
use std::fmt;
use std::net::SocketAddr;

/// Lifecycle states of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FsmState {
    Idle,
    WaitForBootstrapResponse,
    WaitForJoinAccept,
    JoinFailed,
    Connected,
    ConnectedAcceptingChild,
    ConnectedWaitingParentResponse,
    ConnectedWaitingParentResponseDirectLeaveWoReplacement,
    SignOffFromInlevelNeighbours,
    SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
    ConnectedReplacing,
    WaitForReplacementOffer,
    ErrorState,
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Application-level signals injected into the FSM.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    JoinNetwork {
        via_bootstrap: bool,
        addr: Option<SocketAddr>,
        node: Option<Peer>,
    },
    LeaveNetwork {
        can_leave_position: bool,
    },
}

impl Signal {
    pub fn join_via_bootstrap() -> Self {
        Signal::JoinNetwork {
            via_bootstrap: true,
            addr: None,
            node: None,
        }
    }

    pub fn join_via_address(addr: SocketAddr) -> Self {
        Signal::JoinNetwork {
            via_bootstrap: false,
            addr: Some(addr),
            node: None,
        }
    }

    pub fn join_via_peer(peer: Peer) -> Self {
        Signal::JoinNetwork {
            via_bootstrap: false,
            addr: peer.addr(),
            node: Some(peer),
        }
    }

    pub fn leave_network() -> Self {
        Signal::LeaveNetwork {
            can_leave_position: false,
        }
    }
}

/// Every timeout kind the node arms; each one is cancelled by kind when its
/// paired event arrives.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TimeoutKind {
    BootstrapResponse,
    JoinAcceptResponse,
    JoinAcceptAckResponse,
    ReplacementOfferResponse,
    ReplacementAckResponse,
    DsnAggregation,
    InquiryAggregation,
    SelfDepartureRetry,
    JoinRetry,
}

/// The tagged event sum the FSM consumes.
#[derive(Clone, Debug, PartialEq)]
pub enum FsmEvent {
    Signal(Signal),
    Send {
        msg_type: MsgType,
    },
    Recv {
        msg_type: MsgType,
        does_not_need_replacement: bool,
    },
    Timeout {
        kind: TimeoutKind,
        valid_bootstrap_response: bool,
    },
}

impl FsmEvent {
    pub fn recv(msg_type: MsgType) -> Self {
        FsmEvent::Recv {
            msg_type,
            does_not_need_replacement: false,
        }
    }

    pub fn send(msg_type: MsgType) -> Self {
        FsmEvent::Send { msg_type }
    }

    pub fn timeout(kind: TimeoutKind) -> Self {
        FsmEvent::Timeout {
            kind,
            valid_bootstrap_response: false,
        }
    }
}

// ---- guards ----

fn join_signal_using_bootstrap(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Signal(Signal::JoinNetwork {
            via_bootstrap: true,
            ..
        })
    )
}

fn join_signal_using_address(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Signal(Signal::JoinNetwork {
            via_bootstrap: false,
            ..
        })
    )
}

fn leave_signal_can_leave_position(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Signal(Signal::LeaveNetwork {
            can_leave_position: true,
        })
    )
}

fn leave_signal_cannot_leave_position(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Signal(Signal::LeaveNetwork {
            can_leave_position: false,
        })
    )
}

fn bootstrap_response_timeout_invalid(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Timeout {
            kind: TimeoutKind::BootstrapResponse,
            valid_bootstrap_response: false,
        }
    )
}

fn bootstrap_response_timeout_valid(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Timeout {
            kind: TimeoutKind::BootstrapResponse,
            valid_bootstrap_response: true,
        }
    )
}

fn timeout_of(kind: TimeoutKind) -> impl Fn(&FsmEvent) -> bool {
    move |event| matches!(event, FsmEvent::Timeout { kind: k, .. } if *k == kind)
}

fn join_response_timeout(event: &FsmEvent) -> bool {
    timeout_of(TimeoutKind::JoinAcceptResponse)(event)
}

fn join_accept_ack_response_timeout(event: &FsmEvent) -> bool {
    timeout_of(TimeoutKind::JoinAcceptAckResponse)(event)
}

fn replacement_ack_response_timeout(event: &FsmEvent) -> bool {
    timeout_of(TimeoutKind::ReplacementAckResponse)(event)
}

fn replacement_offer_response_timeout(event: &FsmEvent) -> bool {
    timeout_of(TimeoutKind::ReplacementOfferResponse)(event)
}

fn timeout_non_critical_in_connected(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Timeout {
            kind: TimeoutKind::DsnAggregation,
            ..
        } | FsmEvent::Timeout {
            kind: TimeoutKind::InquiryAggregation,
            ..
        }
    )
}

fn recv_of(msg_type: MsgType) -> impl Fn(&FsmEvent) -> bool {
    move |event| matches!(event, FsmEvent::Recv { msg_type: t, .. } if *t == msg_type)
}

fn send_of(msg_type: MsgType) -> impl Fn(&FsmEvent) -> bool {
    move |event| matches!(event, FsmEvent::Send { msg_type: t } if *t == msg_type)
}

fn recv_join_accept(event: &FsmEvent) -> bool {
    recv_of(MsgType::JoinAccept)(event)
}

fn recv_join_accept_ack(event: &FsmEvent) -> bool {
    recv_of(MsgType::JoinAcceptAck)(event)
}

fn recv_replacement_ack(event: &FsmEvent) -> bool {
    recv_of(MsgType::ReplacementAck)(event)
}

fn recv_replacement_offer(event: &FsmEvent) -> bool {
    recv_of(MsgType::ReplacementOffer)(event)
}

fn recv_bootstrap_discover(event: &FsmEvent) -> bool {
    recv_of(MsgType::BootstrapDiscover)(event)
}

fn recv_bootstrap_response(event: &FsmEvent) -> bool {
    recv_of(MsgType::BootstrapResponse)(event)
}

fn recv_find_replacement_at_node_to_replace(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Recv {
            msg_type: MsgType::FindReplacement,
            does_not_need_replacement: true,
        }
    )
}

fn recv_find_replacement(event: &FsmEvent) -> bool {
    recv_of(MsgType::FindReplacement)(event)
}

fn recv_replacement_nack(event: &FsmEvent) -> bool {
    recv_of(MsgType::ReplacementNack)(event)
}

fn recv_parent_response_ack(event: &FsmEvent) -> bool {
    recv_of(MsgType::SignoffParentAnswer)(event)
}

fn send_join(event: &FsmEvent) -> bool {
    send_of(MsgType::Join)(event)
}

fn send_join_accept(event: &FsmEvent) -> bool {
    send_of(MsgType::JoinAccept)(event)
}

fn send_join_accept_ack(event: &FsmEvent) -> bool {
    send_of(MsgType::JoinAcceptAck)(event)
}

fn send_replacement_offer(event: &FsmEvent) -> bool {
    send_of(MsgType::ReplacementOffer)(event)
}

fn send_replacement_nack(event: &FsmEvent) -> bool {
    send_of(MsgType::ReplacementNack)(event)
}

fn send_parent_response(event: &FsmEvent) -> bool {
    send_of(MsgType::SignoffParentRequest)(event)
}

fn send_bootstrap_discover(event: &FsmEvent) -> bool {
    send_of(MsgType::BootstrapDiscover)(event)
}

fn send_bootstrap_response(event: &FsmEvent) -> bool {
    send_of(MsgType::BootstrapResponse)(event)
}

fn send_remove_neighbour(event: &FsmEvent) -> bool {
    send_of(MsgType::RemoveNeighbour)(event)
}

fn send_remove_and_update_neighbours(event: &FsmEvent) -> bool {
    send_of(MsgType::RemoveAndUpdateNeighbours)(event)
}

fn send_update_neighbours(event: &FsmEvent) -> bool {
    send_of(MsgType::UpdateNeighbours)(event)
}

/// The message kinds that may arrive in any connected-ish state without
/// state implications.
const NON_CRITICAL_RECV: &[MsgType] = &[
    MsgType::Join,
    MsgType::UpdateNeighbours,
    MsgType::RemoveNeighbour,
    MsgType::RemoveAndUpdateNeighbours,
    MsgType::GetNeighbours,
    MsgType::InformAboutNeighbours,
    MsgType::SearchExact,
    MsgType::SearchExactFailure,
    MsgType::Empty,
    MsgType::ReplacementUpdate,
    MsgType::FindReplacement,
    MsgType::BootstrapDiscover,
    MsgType::FindQueryAnswer,
    MsgType::FindQueryRequest,
    MsgType::AttributeInquiryAnswer,
    MsgType::AttributeInquiryRequest,
    MsgType::SubscriptionOrder,
    MsgType::SubscriptionUpdate,
    MsgType::LockNeighbourRequest,
    MsgType::LockNeighbourResponse,
    MsgType::RemoveNeighbourAck,
    MsgType::UnlockNeighbour,
    MsgType::SignoffParentRequest,
];

/// The message kinds any connected-ish state may emit.
const NON_CRITICAL_SEND: &[MsgType] = &[
    MsgType::Join,
    MsgType::UpdateNeighbours,
    MsgType::RemoveNeighbour,
    MsgType::GetNeighbours,
    MsgType::InformAboutNeighbours,
    MsgType::SearchExact,
    MsgType::SearchExactFailure,
    MsgType::Empty,
    MsgType::ReplacementUpdate,
    MsgType::FindReplacement,
    MsgType::FindQueryAnswer,
    MsgType::FindQueryRequest,
    MsgType::AttributeInquiryAnswer,
    MsgType::AttributeInquiryRequest,
    MsgType::SubscriptionOrder,
    MsgType::SubscriptionUpdate,
    MsgType::SignoffParentRequest,
    MsgType::SignoffParentAnswer,
    MsgType::LockNeighbourRequest,
    MsgType::LockNeighbourResponse,
    MsgType::RemoveNeighbourAck,
    MsgType::UnlockNeighbour,
    MsgType::ReplacementNack,
];

fn recv_non_critical(event: &FsmEvent) -> bool {
    matches!(event, FsmEvent::Recv { msg_type, .. } if NON_CRITICAL_RECV.contains(msg_type))
}

fn send_non_critical(event: &FsmEvent) -> bool {
    matches!(event, FsmEvent::Send { msg_type } if NON_CRITICAL_SEND.contains(msg_type))
}

fn send_leave_related_in_idle(event: &FsmEvent) -> bool {
    matches!(
        event,
        FsmEvent::Send { msg_type: MsgType::UnlockNeighbour }
            | FsmEvent::Send { msg_type: MsgType::SignoffParentRequest }
            | FsmEvent::Send { msg_type: MsgType::ReplacementAck }
    )
}

// ---- the table ----

type Guard = fn(&FsmEvent) -> bool;

struct Transition {
    from: FsmState,
    guard: Guard,
    to: FsmState,
}

macro_rules! row {
    ($from:ident, $guard:path, $to:ident) => {
        Transition {
            from: FsmState::$from,
            guard: $guard,
            to: FsmState::$to,
        }
    };
}

/// The transition table; rows are checked in order, first match wins.
static TRANSITIONS: &[Transition] = &[
    // workflow transitions
    row!(Idle, join_signal_using_bootstrap, WaitForBootstrapResponse),
    row!(Idle, join_signal_using_address, WaitForJoinAccept),
    row!(JoinFailed, join_signal_using_address, WaitForJoinAccept),
    row!(
        WaitForBootstrapResponse,
        bootstrap_response_timeout_invalid,
        ErrorState
    ),
    row!(
        WaitForBootstrapResponse,
        bootstrap_response_timeout_valid,
        WaitForJoinAccept
    ),
    row!(WaitForJoinAccept, join_response_timeout, JoinFailed),
    row!(WaitForJoinAccept, recv_join_accept, Connected),
    row!(Connected, send_join_accept, ConnectedAcceptingChild),
    row!(ConnectedAcceptingChild, recv_join_accept_ack, Connected),
    row!(
        ConnectedAcceptingChild,
        join_accept_ack_response_timeout,
        Connected
    ),
    row!(
        Connected,
        send_parent_response,
        ConnectedWaitingParentResponse
    ),
    row!(
        ConnectedWaitingParentResponse,
        send_replacement_nack,
        ConnectedWaitingParentResponse
    ),
    row!(
        ConnectedWaitingParentResponse,
        recv_parent_response_ack,
        SignOffFromInlevelNeighbours
    ),
    row!(
        ConnectedWaitingParentResponseDirectLeaveWoReplacement,
        recv_parent_response_ack,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    row!(
        SignOffFromInlevelNeighbours,
        send_replacement_offer,
        ConnectedReplacing
    ),
    row!(
        SignOffFromInlevelNeighbours,
        send_remove_neighbour,
        SignOffFromInlevelNeighbours
    ),
    row!(
        SignOffFromInlevelNeighbours,
        send_update_neighbours,
        SignOffFromInlevelNeighbours
    ),
    row!(
        SignOffFromInlevelNeighbours,
        send_remove_and_update_neighbours,
        SignOffFromInlevelNeighbours
    ),
    row!(
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
        send_remove_neighbour,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    row!(
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
        send_update_neighbours,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    row!(
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
        send_remove_and_update_neighbours,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    row!(ConnectedReplacing, recv_replacement_ack, Connected),
    row!(
        ConnectedReplacing,
        replacement_ack_response_timeout,
        Connected
    ),
    row!(
        Connected,
        leave_signal_can_leave_position,
        ConnectedWaitingParentResponseDirectLeaveWoReplacement
    ),
    row!(
        Connected,
        leave_signal_cannot_leave_position,
        WaitForReplacementOffer
    ),
    row!(
        WaitForReplacementOffer,
        replacement_offer_response_timeout,
        Connected
    ),
    row!(WaitForReplacementOffer, recv_replacement_offer, Idle),
    row!(Connected, send_join_accept_ack, Connected),
    // transitions needed for the workflow
    row!(WaitForJoinAccept, send_join, WaitForJoinAccept),
    row!(
        WaitForBootstrapResponse,
        send_bootstrap_discover,
        WaitForBootstrapResponse
    ),
    row!(
        WaitForBootstrapResponse,
        recv_bootstrap_response,
        WaitForBootstrapResponse
    ),
    row!(Idle, send_leave_related_in_idle, Idle),
    // non-critical connected recv transitions
    row!(Connected, recv_non_critical, Connected),
    row!(
        ConnectedAcceptingChild,
        recv_non_critical,
        ConnectedAcceptingChild
    ),
    row!(ConnectedReplacing, recv_non_critical, ConnectedReplacing),
    row!(
        WaitForReplacementOffer,
        recv_find_replacement_at_node_to_replace,
        ConnectedWaitingParentResponseDirectLeaveWoReplacement
    ),
    row!(
        WaitForReplacementOffer,
        recv_non_critical,
        WaitForReplacementOffer
    ),
    row!(
        ConnectedWaitingParentResponse,
        recv_non_critical,
        ConnectedWaitingParentResponse
    ),
    row!(
        SignOffFromInlevelNeighbours,
        recv_non_critical,
        SignOffFromInlevelNeighbours
    ),
    row!(
        ConnectedWaitingParentResponseDirectLeaveWoReplacement,
        recv_non_critical,
        ConnectedWaitingParentResponseDirectLeaveWoReplacement
    ),
    row!(
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
        recv_non_critical,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    row!(WaitForReplacementOffer, recv_replacement_nack, Connected),
    // non-critical connected send transitions
    row!(Connected, send_non_critical, Connected),
    row!(
        ConnectedAcceptingChild,
        send_non_critical,
        ConnectedAcceptingChild
    ),
    row!(ConnectedReplacing, send_non_critical, ConnectedReplacing),
    row!(
        WaitForReplacementOffer,
        send_non_critical,
        WaitForReplacementOffer
    ),
    // only for forwarding, never to initiate a departure
    row!(
        ConnectedWaitingParentResponse,
        send_non_critical,
        ConnectedWaitingParentResponse
    ),
    row!(
        SignOffFromInlevelNeighbours,
        send_non_critical,
        SignOffFromInlevelNeighbours
    ),
    row!(
        ConnectedWaitingParentResponseDirectLeaveWoReplacement,
        send_non_critical,
        ConnectedWaitingParentResponseDirectLeaveWoReplacement
    ),
    row!(
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement,
        send_non_critical,
        SignOffFromInlevelNeighboursDirectLeaveWoReplacement
    ),
    // non-critical connected timeout transitions
    row!(Connected, timeout_non_critical_in_connected, Connected),
    row!(
        ConnectedAcceptingChild,
        timeout_non_critical_in_connected,
        ConnectedAcceptingChild
    ),
    row!(
        ConnectedReplacing,
        timeout_non_critical_in_connected,
        ConnectedReplacing
    ),
    row!(
        WaitForReplacementOffer,
        timeout_non_critical_in_connected,
        WaitForReplacementOffer
    ),
    // bootstrap discover must be receivable in every state, but only
    // answered in connected
    row!(Connected, send_bootstrap_response, Connected),
    row!(Idle, recv_bootstrap_discover, Idle),
    row!(Idle, recv_find_replacement, Idle),
    row!(
        WaitForBootstrapResponse,
        recv_bootstrap_discover,
        WaitForBootstrapResponse
    ),
    row!(WaitForJoinAccept, recv_bootstrap_discover, WaitForJoinAccept),
    row!(Connected, recv_bootstrap_discover, Connected),
    row!(
        ConnectedAcceptingChild,
        recv_bootstrap_discover,
        ConnectedAcceptingChild
    ),
    row!(
        ConnectedReplacing,
        recv_bootstrap_discover,
        ConnectedReplacing
    ),
    row!(
        WaitForReplacementOffer,
        recv_bootstrap_discover,
        WaitForReplacementOffer
    ),
    row!(ErrorState, recv_bootstrap_discover, ErrorState),
    // multicast is unreliable, so stray bootstrap responses may arrive in
    // any state
    row!(Idle, recv_bootstrap_response, Idle),
    row!(WaitForJoinAccept, recv_bootstrap_response, WaitForJoinAccept),
    row!(Connected, recv_bootstrap_response, Connected),
    row!(
        ConnectedAcceptingChild,
        recv_bootstrap_response,
        ConnectedAcceptingChild
    ),
    row!(
        ConnectedReplacing,
        recv_bootstrap_response,
        ConnectedReplacing
    ),
    row!(
        WaitForReplacementOffer,
        recv_bootstrap_response,
        WaitForReplacementOffer
    ),
    row!(ErrorState, recv_bootstrap_response, ErrorState),
];

/// The state machine itself: the current state plus the static table.
#[derive(Clone, Debug)]
pub struct Fsm {
    state: FsmState,
}

impl Fsm {
    pub fn new(state: FsmState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Feeds one event through the table. On a match the state advances and
    /// the new state is returned; entering `ErrorState` is an error in
    /// itself. Without a match the state stays put and `Error::Fsm` tells
    /// the caller the event was not legal here.
    pub fn accept(&mut self, event: &FsmEvent) -> Result<FsmState> {
        for transition in TRANSITIONS {
            if transition.from == self.state && (transition.guard)(event) {
                let previous = self.state;
                self.state = transition.to;
                trace!("fsm: {} -> {} on {:?}", previous, self.state, event);
                if self.state == FsmState::ErrorState {
                    return Err(Error::FsmErrorState(previous));
                }
                return Ok(self.state);
            }
        }
        Err(Error::Fsm {
            state: self.state,
            event: format!("{:?}", event),
        })
    }

    /// Overrides the state outside the table. Only used for the documented
    /// recovery paths (negative signoff answer, leave abort).
    pub fn force(&mut self, state: FsmState) {
        trace!("fsm: forced {} -> {}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn fsm(state: FsmState) -> Fsm {
        Fsm::new(state)
    }

    #[test]
    fn join_via_bootstrap_path() {
        let mut machine = fsm(FsmState::Idle);
        machine
            .accept(&FsmEvent::Signal(Signal::join_via_bootstrap()))
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForBootstrapResponse);

        machine
            .accept(&FsmEvent::send(MsgType::BootstrapDiscover))
            .unwrap();
        machine
            .accept(&FsmEvent::recv(MsgType::BootstrapResponse))
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForBootstrapResponse);

        machine
            .accept(&FsmEvent::Timeout {
                kind: TimeoutKind::BootstrapResponse,
                valid_bootstrap_response: true,
            })
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForJoinAccept);

        machine.accept(&FsmEvent::send(MsgType::Join)).unwrap();
        machine.accept(&FsmEvent::recv(MsgType::JoinAccept)).unwrap();
        assert_eq!(machine.state(), FsmState::Connected);
    }

    #[test]
    fn bootstrap_without_responses_is_fatal() {
        let mut machine = fsm(FsmState::WaitForBootstrapResponse);
        assert_matches!(
            machine.accept(&FsmEvent::timeout(TimeoutKind::BootstrapResponse)),
            Err(Error::FsmErrorState(FsmState::WaitForBootstrapResponse))
        );
        assert_eq!(machine.state(), FsmState::ErrorState);
    }

    #[test]
    fn join_timeout_leads_to_retry_state() {
        let mut machine = fsm(FsmState::WaitForJoinAccept);
        machine
            .accept(&FsmEvent::timeout(TimeoutKind::JoinAcceptResponse))
            .unwrap();
        assert_eq!(machine.state(), FsmState::JoinFailed);

        let addr = "127.0.0.1:2000".parse().unwrap();
        machine
            .accept(&FsmEvent::Signal(Signal::join_via_address(addr)))
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForJoinAccept);
    }

    #[test]
    fn accepting_a_child_round_trips() {
        let mut machine = fsm(FsmState::Connected);
        machine.accept(&FsmEvent::send(MsgType::JoinAccept)).unwrap();
        assert_eq!(machine.state(), FsmState::ConnectedAcceptingChild);
        machine
            .accept(&FsmEvent::recv(MsgType::JoinAcceptAck))
            .unwrap();
        assert_eq!(machine.state(), FsmState::Connected);

        // timeout path frees the slot silently
        let mut machine = fsm(FsmState::ConnectedAcceptingChild);
        machine
            .accept(&FsmEvent::timeout(TimeoutKind::JoinAcceptAckResponse))
            .unwrap();
        assert_eq!(machine.state(), FsmState::Connected);
    }

    #[test]
    fn leave_signal_branches_on_can_leave() {
        let mut machine = fsm(FsmState::Connected);
        machine
            .accept(&FsmEvent::Signal(Signal::LeaveNetwork {
                can_leave_position: true,
            }))
            .unwrap();
        assert_eq!(
            machine.state(),
            FsmState::ConnectedWaitingParentResponseDirectLeaveWoReplacement
        );

        let mut machine = fsm(FsmState::Connected);
        machine
            .accept(&FsmEvent::Signal(Signal::LeaveNetwork {
                can_leave_position: false,
            }))
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForReplacementOffer);
    }

    #[test]
    fn replacement_offer_moves_the_leaver_to_idle() {
        let mut machine = fsm(FsmState::WaitForReplacementOffer);
        machine
            .accept(&FsmEvent::recv(MsgType::ReplacementOffer))
            .unwrap();
        assert_eq!(machine.state(), FsmState::Idle);
    }

    #[test]
    fn find_replacement_can_downgrade_a_waiting_leaver() {
        let mut machine = fsm(FsmState::WaitForReplacementOffer);
        machine
            .accept(&FsmEvent::Recv {
                msg_type: MsgType::FindReplacement,
                does_not_need_replacement: true,
            })
            .unwrap();
        assert_eq!(
            machine.state(),
            FsmState::ConnectedWaitingParentResponseDirectLeaveWoReplacement
        );

        // without the marker it is just a non-critical receive
        let mut machine = fsm(FsmState::WaitForReplacementOffer);
        machine
            .accept(&FsmEvent::recv(MsgType::FindReplacement))
            .unwrap();
        assert_eq!(machine.state(), FsmState::WaitForReplacementOffer);
    }

    #[test]
    fn successor_sign_off_path() {
        let mut machine = fsm(FsmState::Connected);
        machine
            .accept(&FsmEvent::send(MsgType::SignoffParentRequest))
            .unwrap();
        assert_eq!(machine.state(), FsmState::ConnectedWaitingParentResponse);
        machine
            .accept(&FsmEvent::recv(MsgType::SignoffParentAnswer))
            .unwrap();
        assert_eq!(machine.state(), FsmState::SignOffFromInlevelNeighbours);
        machine
            .accept(&FsmEvent::send(MsgType::RemoveNeighbour))
            .unwrap();
        machine
            .accept(&FsmEvent::send(MsgType::UpdateNeighbours))
            .unwrap();
        machine
            .accept(&FsmEvent::send(MsgType::ReplacementOffer))
            .unwrap();
        assert_eq!(machine.state(), FsmState::ConnectedReplacing);
        machine
            .accept(&FsmEvent::recv(MsgType::ReplacementAck))
            .unwrap();
        assert_eq!(machine.state(), FsmState::Connected);
    }

    #[test]
    fn bootstrap_discover_is_legal_everywhere() {
        for &state in &[
            FsmState::Idle,
            FsmState::WaitForBootstrapResponse,
            FsmState::WaitForJoinAccept,
            FsmState::Connected,
            FsmState::ConnectedAcceptingChild,
            FsmState::ConnectedReplacing,
            FsmState::WaitForReplacementOffer,
            FsmState::ErrorState,
        ] {
            let mut machine = fsm(state);
            machine
                .accept(&FsmEvent::recv(MsgType::BootstrapDiscover))
                .unwrap();
            assert_eq!(machine.state(), state);
        }
    }

    #[test]
    fn unmatched_events_leave_the_state_untouched() {
        let mut machine = fsm(FsmState::Idle);
        assert_matches!(
            machine.accept(&FsmEvent::recv(MsgType::JoinAccept)),
            Err(Error::Fsm { .. })
        );
        assert_eq!(machine.state(), FsmState::Idle);

        let mut machine = fsm(FsmState::Connected);
        assert_matches!(
            machine.accept(&FsmEvent::recv(MsgType::JoinAccept)),
            Err(Error::Fsm { .. })
        );
        assert_eq!(machine.state(), FsmState::Connected);
    }

    #[test]
    fn idle_may_send_the_leave_tail() {
        let mut machine = fsm(FsmState::Idle);
        machine
            .accept(&FsmEvent::send(MsgType::UnlockNeighbour))
            .unwrap();
        machine
            .accept(&FsmEvent::send(MsgType::ReplacementAck))
            .unwrap();
        assert_eq!(machine.state(), FsmState::Idle);
    }
}
