// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The protocol algorithms: message handlers that mutate the routing
//! information and the procedure scratchpad, and emit commands the node
//! shell executes (sends, timers, local deliveries).
//!
//! Handlers never block and never touch the network directly; everything a
//! handler wants to happen is a [`Cmd`]. That keeps the per-node event loop
//! single-threaded and makes multi-node protocol runs fully deterministic in
//! tests.

pub(crate) mod bootstrap;
pub(crate) mod esearch;
pub(crate) mod join;
pub(crate) mod leave;
pub(crate) mod response;
pub(crate) mod search_exact;

use crate::messaging::{MsgHeader, NetworkMsg, WireMsg};
use crate::node::config::Config;
use crate::node::fsm::{FsmState, TimeoutKind};
use crate::node::procedure_info::ProcedureInfo;
use crate::routing::RoutingInformation;
use crate::types::Peer;

/// One effect a handler wants executed after it returns.
#[derive(Debug)]
pub(crate) enum Cmd {
    /// Send to the target in the message header.
    Send(WireMsg),
    /// Send without the FSM send gate: passive forwarding on behalf of a
    /// peer that replaced us.
    Forward(WireMsg),
    /// Best-effort multicast (bootstrap discovery only).
    Multicast(WireMsg),
    /// Feed a message back into our own receive path.
    DeliverLocal(WireMsg),
    /// Route via search-exact towards a target with unknown address.
    SearchExact {
        destination: Peer,
        payload: Box<WireMsg>,
    },
    /// Arm the timeout of the given kind (length from config).
    ArmTimeout(TimeoutKind),
    /// Cancel the pending timeout of the given kind.
    CancelTimeout(TimeoutKind),
    /// Force the FSM into a state (documented recovery paths only).
    SetFsm(FsmState),
}

/// Everything a handler may touch, split-borrowed from the node core.
pub(crate) struct Ctx<'a> {
    pub routing: &'a mut RoutingInformation,
    pub procedures: &'a mut ProcedureInfo,
    /// FSM state at the time the event was gated.
    pub fsm_state: FsmState,
    /// The node-level lock flag guarding leave procedures.
    pub node_locked: &'a mut bool,
    pub config: &'a Config,
    /// Wall clock in milliseconds, sampled once per event.
    pub now: u64,
    pub cmds: &'a mut Vec<Cmd>,
}

impl<'a> Ctx<'a> {
    pub(crate) fn this_node(&self) -> Peer {
        self.routing.this_node().clone()
    }

    /// Queues a message addressed at `target`.
    pub(crate) fn send(&mut self, target: Peer, ref_event_id: u64, msg: NetworkMsg) {
        let header = MsgHeader::new(self.this_node(), target, ref_event_id);
        self.cmds.push(Cmd::Send(WireMsg::new(header, msg)));
    }

    /// Queues a message for a peer whose address we may not know; routed via
    /// search-exact when needed.
    pub(crate) fn send_or_route(&mut self, target: Peer, ref_event_id: u64, msg: NetworkMsg) {
        if target.addr().is_some() {
            self.send(target, ref_event_id, msg);
        } else {
            let header = MsgHeader::new(self.this_node(), target.clone(), ref_event_id);
            let payload = WireMsg::new(header, msg);
            self.cmds.push(Cmd::SearchExact {
                destination: target,
                payload: Box::new(payload),
            });
        }
    }

    pub(crate) fn multicast(&mut self, target: Peer, ref_event_id: u64, msg: NetworkMsg) {
        let header = MsgHeader::new(self.this_node(), target, ref_event_id);
        self.cmds.push(Cmd::Multicast(WireMsg::new(header, msg)));
    }

    pub(crate) fn deliver_local(&mut self, msg: WireMsg) {
        self.cmds.push(Cmd::DeliverLocal(msg));
    }

    pub(crate) fn arm_timeout(&mut self, kind: TimeoutKind) {
        self.cmds.push(Cmd::ArmTimeout(kind));
    }

    pub(crate) fn cancel_timeout(&mut self, kind: TimeoutKind) {
        self.cmds.push(Cmd::CancelTimeout(kind));
    }

    pub(crate) fn set_fsm(&mut self, state: FsmState) {
        self.cmds.push(Cmd::SetFsm(state));
    }
}

/// The in-order predecessor of `node` among `candidates`: the initialised
/// peer with the greatest horizontal value still left of `node`.
pub(crate) fn adjacent_left_from(node: &Peer, candidates: &[Peer]) -> Option<Peer> {
    let own = node.position().horizontal_value();
    candidates
        .iter()
        .filter(|peer| peer.is_initialised())
        .filter(|peer| peer.position().horizontal_value() < own)
        .max_by(|a, b| {
            a.position()
                .horizontal_value()
                .partial_cmp(&b.position().horizontal_value())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

/// The in-order successor of `node` among `candidates`.
pub(crate) fn adjacent_right_from(node: &Peer, candidates: &[Peer]) -> Option<Peer> {
    let own = node.position().horizontal_value();
    candidates
        .iter()
        .filter(|peer| peer.is_initialised())
        .filter(|peer| peer.position().horizontal_value() > own)
        .min_by(|a, b| {
            a.position()
                .horizontal_value()
                .partial_cmp(&b.position().horizontal_value())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}
