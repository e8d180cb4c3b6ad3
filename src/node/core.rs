// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The synchronous heart of a node.
//!
//! Every external stimulus — a received message, an application signal, a
//! fired timeout, an API call — becomes one [`Event`]. `NodeCore::handle`
//! gates it through the FSM, dispatches it to the owning algorithm, executes
//! the internal commands that fall out (local deliveries, search-exact hops,
//! forced FSM states) and returns only the externally visible effects for
//! the async shell to perform. One event at a time; no interleaving.

use crate::error::{Error, Result};
use crate::messaging::system::{FindQuery, FindResult, NetworkMsg, SearchProgress};
use crate::messaging::{MsgType, WireMsg};
use crate::node::algorithms::bootstrap::BootstrapAlgorithm;
use crate::node::algorithms::esearch::EntitySearchAlgorithm;
use crate::node::algorithms::join::JoinAlgorithm;
use crate::node::algorithms::leave::LeaveAlgorithm;
use crate::node::algorithms::response::ResponseAlgorithm;
use crate::node::algorithms::search_exact::SearchExactAlgorithm;
use crate::node::algorithms::{Cmd, Ctx};
use crate::node::config::{Config, JoinInfo};
use crate::node::fsm::{Fsm, FsmEvent, FsmState, Signal, TimeoutKind};
use crate::node::procedure_info::ProcedureInfo;
use crate::routing::{RoutingEvent, RoutingInformation};
use crate::types::{Entry, Key, Peer, PeerStatus};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// One stimulus for the node core.
#[derive(Debug)]
pub(crate) enum Event {
    /// A message arrived from the transport.
    Rx(WireMsg),
    /// An application signal (join/leave, also injectable for tests).
    Signal(Signal),
    /// A timeout of the given kind fired.
    Timeout(TimeoutKind),
    /// Local attribute store writes.
    Insert(Vec<Entry>),
    UpdateData(Vec<Entry>),
    RemoveData(Vec<Key>),
    /// An entity search; the sender resolves the caller's future.
    Find(FindQuery, oneshot::Sender<FindResult>),
}

/// Externally visible effect of handling one event.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Transmit to the address in the header.
    Send(WireMsg),
    /// Multicast to the discovery group.
    Multicast(WireMsg),
    ArmTimeout(TimeoutKind),
    CancelTimeout(TimeoutKind),
}

pub(crate) struct NodeCore {
    config: Config,
    fsm: Fsm,
    routing: RoutingInformation,
    procedures: ProcedureInfo,
    node_locked: bool,
    /// Set while we linger Idle after a replacement: the peer now holding
    /// our old position, for the passive-forwarding window.
    replacing_node: Option<Peer>,
    join: JoinAlgorithm,
    leave: LeaveAlgorithm,
    search_exact: SearchExactAlgorithm,
    esearch: EntitySearchAlgorithm,
    bootstrap: BootstrapAlgorithm,
    response: ResponseAlgorithm,
}

impl NodeCore {
    /// A core bound to `listen_addr`. The root starts connected at `(0, 0)`;
    /// everyone else starts idle and positionless.
    pub(crate) fn new(config: Config, listen_addr: SocketAddr) -> Result<Self> {
        config.validate()?;

        let (this_node, initial_state) = if config.is_root {
            let mut peer = Peer::new(0, 0, config.fanout, listen_addr)?;
            peer.set_status(PeerStatus::Running);
            (peer, FsmState::Connected)
        } else {
            (
                Peer::addressed(config.fanout, listen_addr)?,
                FsmState::Idle,
            )
        };

        Ok(Self {
            config,
            fsm: Fsm::new(initial_state),
            routing: RoutingInformation::new(this_node),
            procedures: ProcedureInfo::new(),
            node_locked: false,
            replacing_node: None,
            join: JoinAlgorithm::new(),
            leave: LeaveAlgorithm::new(),
            search_exact: SearchExactAlgorithm::new(),
            esearch: EntitySearchAlgorithm::new(),
            bootstrap: BootstrapAlgorithm::new(),
            response: ResponseAlgorithm::new(),
        })
    }

    pub(crate) fn fsm_state(&self) -> FsmState {
        self.fsm.state()
    }

    pub(crate) fn this_node(&self) -> &Peer {
        self.routing.this_node()
    }

    pub(crate) fn routing(&self) -> &RoutingInformation {
        &self.routing
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.node_locked
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The start-up signal derived from the configuration, if any.
    pub(crate) fn startup_signal(&self) -> Option<Signal> {
        if self.config.is_root {
            return None;
        }
        match &self.config.join_info {
            JoinInfo::Ip { .. } => self
                .config
                .join_target()
                .map(Signal::join_via_peer),
            JoinInfo::Discovery => Some(Signal::join_via_bootstrap()),
            JoinInfo::None => None,
        }
    }

    /// Processes one event to completion and returns the external effects.
    pub(crate) fn handle(&mut self, event: Event, now: u64) -> Vec<Effect> {
        let mut queue: VecDeque<Cmd> = VecDeque::new();
        let mut effects: Vec<Effect> = Vec::new();

        let result = match event {
            Event::Rx(msg) => self.handle_rx(msg, now, &mut queue),
            Event::Signal(signal) => self.handle_signal(signal, now, &mut queue),
            Event::Timeout(kind) => self.handle_timeout(kind, now, &mut queue),
            Event::Insert(entries) => {
                self.with_ctx(now, &mut queue, |core, ctx| {
                    core.esearch.local_insert(ctx, entries);
                    Ok(())
                })
            }
            Event::UpdateData(entries) => {
                self.with_ctx(now, &mut queue, |core, ctx| {
                    core.esearch.local_update(ctx, entries);
                    Ok(())
                })
            }
            Event::RemoveData(keys) => {
                self.with_ctx(now, &mut queue, |core, ctx| {
                    core.esearch.local_remove(ctx, keys);
                    Ok(())
                })
            }
            Event::Find(query, responder) => self.with_ctx(now, &mut queue, |core, ctx| {
                core.esearch.find(ctx, query, responder)
            }),
        };
        if let Err(error) = result {
            warn!("event handling failed: {}", error);
        }

        self.drain(now, &mut queue, &mut effects);
        effects
    }

    /// Runs the command queue (and any routing-event fallout) to quiescence.
    fn drain(&mut self, now: u64, queue: &mut VecDeque<Cmd>, effects: &mut Vec<Effect>) {
        loop {
            while let Some(cmd) = queue.pop_front() {
                match cmd {
                    Cmd::Send(msg) => {
                        if msg.target().addr().is_none() {
                            // the algorithm only knew the logical half; fall
                            // back to positional routing
                            let destination = msg.target().clone();
                            queue.push_back(Cmd::SearchExact {
                                destination,
                                payload: Box::new(msg),
                            });
                            continue;
                        }
                        if self.gate_send(&msg) {
                            effects.push(Effect::Send(msg));
                        }
                    }
                    Cmd::Forward(msg) => effects.push(Effect::Send(msg)),
                    Cmd::Multicast(msg) => {
                        if self.gate_send(&msg) {
                            effects.push(Effect::Multicast(msg));
                        }
                    }
                    Cmd::DeliverLocal(msg) => {
                        if let Err(error) = self.handle_rx(msg, now, queue) {
                            warn!("local delivery failed: {}", error);
                        }
                    }
                    Cmd::SearchExact {
                        destination,
                        payload,
                    } => {
                        let result = self.with_ctx(now, queue, |core, ctx| {
                            core.search_exact.initiate(ctx, destination, payload)
                        });
                        if let Err(error) = result {
                            warn!("search-exact initiation failed: {}", error);
                        }
                    }
                    Cmd::ArmTimeout(kind) => {
                        // a zero-length configuration disables the timer
                        if self.config.timeouts.length(kind).is_some() {
                            effects.push(Effect::ArmTimeout(kind));
                        }
                    }
                    Cmd::CancelTimeout(kind) => effects.push(Effect::CancelTimeout(kind)),
                    Cmd::SetFsm(state) => self.fsm.force(state),
                }
            }

            let routing_events = self.routing.take_events();
            if routing_events.is_empty() {
                break;
            }
            self.log_routing_events(&routing_events);
            let result = self.with_ctx(now, queue, |core, ctx| {
                core.esearch.on_routing_events(ctx, &routing_events)
            });
            if let Err(error) = result {
                warn!("routing event handling failed: {}", error);
            }
            if queue.is_empty() {
                break;
            }
        }
    }

    fn log_routing_events(&self, routing_events: &[RoutingEvent]) {
        for event in routing_events {
            match event {
                RoutingEvent::NeighbourChanged {
                    new_node,
                    relationship,
                    ..
                } => trace!("neighbour {:?} -> {}", relationship, new_node),
                RoutingEvent::PositionChanged { previous, current } => {
                    debug!("position {} -> {}", previous, current)
                }
            }
        }
    }

    /// Outgoing messages pass validation and the FSM send gate; a message
    /// the FSM refuses here is a protocol bug and gets dropped loudly.
    fn gate_send(&mut self, msg: &WireMsg) -> bool {
        if let Err(error) = msg.validate() {
            error!("refusing to send invalid message: {}", error);
            return false;
        }
        match self.fsm.accept(&FsmEvent::send(msg.msg_type())) {
            Ok(_) => true,
            Err(error) => {
                error!("dropping outgoing {:?}: {}", msg.msg_type(), error);
                false
            }
        }
    }

    fn with_ctx<F>(&mut self, now: u64, queue: &mut VecDeque<Cmd>, f: F) -> Result<()>
    where
        F: FnOnce(&mut AlgorithmsView, &mut Ctx) -> Result<()>,
    {
        let mut cmds = Vec::new();
        let mut ctx = Ctx {
            routing: &mut self.routing,
            procedures: &mut self.procedures,
            fsm_state: self.fsm.state(),
            node_locked: &mut self.node_locked,
            config: &self.config,
            now,
            cmds: &mut cmds,
        };
        let mut view = AlgorithmsView {
            join: &mut self.join,
            leave: &mut self.leave,
            search_exact: &mut self.search_exact,
            esearch: &mut self.esearch,
            bootstrap: &mut self.bootstrap,
            response: &mut self.response,
        };
        let result = f(&mut view, &mut ctx);
        queue.extend(cmds);
        result
    }

    // ---- receive path ----

    fn handle_rx(&mut self, msg: WireMsg, now: u64, queue: &mut VecDeque<Cmd>) -> Result<()> {
        if let Err(error) = msg.validate() {
            warn!("dropping invalid message: {}", error);
            return Ok(());
        }

        let msg_type = msg.msg_type();
        trace!(
            "recv {:?} from {} at {}",
            msg_type,
            msg.sender(),
            self.routing.this_node()
        );

        // passive-forwarding window after a replacement: some peers still
        // address our old identity
        if self.fsm.state() == FsmState::Idle {
            if let Some(replacing_node) = self.replacing_node.clone() {
                return self.forward_to_replacement(msg, replacing_node, queue);
            }
        }

        // a replacement search that raced our own position change
        if msg_type == MsgType::FindReplacement
            && msg.target().is_valid_peer()
            && !msg.target().same_position(self.routing.this_node())
        {
            debug!("dropping stale replacement search for {}", msg.target());
            return Ok(());
        }

        // a silent idle node takes no further part in the protocols
        if self.fsm.state() == FsmState::Idle {
            return Ok(());
        }

        let mut does_not_need_replacement = false;
        if let NetworkMsg::FindReplacement(find) = msg.msg() {
            does_not_need_replacement = find.node_to_replace.same_position(self.routing.this_node())
                && find.search_progress == SearchProgress::ReplacementNode;
        }

        let fsm_event = FsmEvent::Recv {
            msg_type,
            does_not_need_replacement,
        };
        if let Err(error) = self.fsm.accept(&fsm_event) {
            match error {
                Error::FsmErrorState(_) => return Err(error),
                _ => {
                    debug!("fsm refused {:?}: {}", msg_type, error);
                    return Ok(());
                }
            }
        }

        // a nacked leave retries after a delay instead of reaching the
        // algorithm
        if msg_type == MsgType::ReplacementNack {
            queue.push_back(Cmd::CancelTimeout(TimeoutKind::ReplacementOfferResponse));
            queue.push_back(Cmd::ArmTimeout(TimeoutKind::SelfDepartureRetry));
            return Ok(());
        }

        // remember the successor before the leave algorithm resets us
        if msg_type == MsgType::ReplacementOffer {
            let mut successor = msg.sender().clone();
            successor.set_position(self.routing.this_node().position().clone());
            self.replacing_node = Some(successor);
        }

        // a refused sign-off puts the leaver back into connected
        if let NetworkMsg::SignoffParentAnswer(answer) = msg.msg() {
            if !answer.successful {
                self.fsm.force(FsmState::Connected);
            }
        }

        self.dispatch(msg, now, queue)
    }

    fn forward_to_replacement(
        &mut self,
        msg: WireMsg,
        replacing_node: Peer,
        queue: &mut VecDeque<Cmd>,
    ) -> Result<()> {
        match msg.msg_type() {
            // a departed position accepts no newcomers and no searches
            MsgType::FindReplacement | MsgType::Join => Ok(()),
            MsgType::AttributeInquiryRequest
            | MsgType::AttributeInquiryAnswer
            | MsgType::SignoffParentRequest => {
                let mut forwarded = msg;
                forwarded.header_mut().set_target(replacing_node);
                queue.push_back(Cmd::Forward(forwarded));
                Ok(())
            }
            other => Err(Error::ForwardingNotSupported(other)),
        }
    }

    fn dispatch(&mut self, msg: WireMsg, now: u64, queue: &mut VecDeque<Cmd>) -> Result<()> {
        self.with_ctx(now, queue, |algorithms, ctx| match msg.msg_type() {
            MsgType::Join | MsgType::JoinAccept | MsgType::JoinAcceptAck => {
                algorithms.join.process(ctx, &msg)
            }
            MsgType::BootstrapDiscover | MsgType::BootstrapResponse => {
                algorithms.bootstrap.process(ctx, &msg)
            }
            MsgType::FindReplacement
            | MsgType::ReplacementOffer
            | MsgType::ReplacementAck
            | MsgType::ReplacementNack
            | MsgType::ReplacementUpdate
            | MsgType::SignoffParentRequest
            | MsgType::SignoffParentAnswer
            | MsgType::LockNeighbourRequest
            | MsgType::LockNeighbourResponse
            | MsgType::UnlockNeighbour
            | MsgType::RemoveNeighbourAck => algorithms.leave.process(ctx, &msg),
            MsgType::RemoveNeighbour
            | MsgType::UpdateNeighbours
            | MsgType::RemoveAndUpdateNeighbours
            | MsgType::GetNeighbours
            | MsgType::InformAboutNeighbours
            | MsgType::Empty => algorithms.response.process(ctx, &msg),
            MsgType::SearchExact => algorithms.search_exact.process(ctx, &msg),
            MsgType::SearchExactFailure
            | MsgType::FindQueryRequest
            | MsgType::FindQueryAnswer
            | MsgType::AttributeInquiryRequest
            | MsgType::AttributeInquiryAnswer
            | MsgType::SubscriptionOrder
            | MsgType::SubscriptionUpdate => algorithms.esearch.process(ctx, &msg),
            MsgType::Init => Ok(()),
        })
    }

    // ---- signal path ----

    fn handle_signal(
        &mut self,
        mut signal: Signal,
        now: u64,
        queue: &mut VecDeque<Cmd>,
    ) -> Result<()> {
        if let Signal::LeaveNetwork { .. } = signal {
            // keep retrying until the node actually reaches idle
            queue.push_back(Cmd::ArmTimeout(TimeoutKind::SelfDepartureRetry));
            if self.fsm.state() == FsmState::ConnectedReplacing {
                return Ok(());
            }
            signal = Signal::LeaveNetwork {
                can_leave_position: self.leave.can_leave_without_replacement(&self.routing),
            };
        }

        if let Err(error) = self.fsm.accept(&FsmEvent::Signal(signal.clone())) {
            match error {
                Error::FsmErrorState(_) => return Err(error),
                _ => {
                    debug!("signal not legal in this state: {}", error);
                    return Ok(());
                }
            }
        }

        match signal {
            Signal::JoinNetwork {
                via_bootstrap: true,
                ..
            } => self.with_ctx(now, queue, |algorithms, ctx| {
                algorithms.bootstrap.initiate(ctx)
            }),
            Signal::JoinNetwork { addr, node, .. } => {
                let fanout = self.config.fanout;
                let target = match node {
                    Some(peer) => peer,
                    None => {
                        let addr = addr.ok_or_else(|| {
                            Error::Configuration("join signal without a target".to_string())
                        })?;
                        Peer::addressed(fanout, addr)?
                    }
                };
                self.with_ctx(now, queue, |algorithms, ctx| {
                    algorithms.join.initiate(ctx, target);
                    Ok(())
                })
            }
            Signal::LeaveNetwork { can_leave_position } => {
                self.with_ctx(now, queue, |algorithms, ctx| {
                    algorithms
                        .leave
                        .initiate_self_departure(ctx, can_leave_position)
                })
            }
        }
    }

    // ---- timeout path ----

    fn handle_timeout(
        &mut self,
        kind: TimeoutKind,
        now: u64,
        queue: &mut VecDeque<Cmd>,
    ) -> Result<()> {
        // the retry timers re-enter as signals and bypass the FSM
        match kind {
            TimeoutKind::SelfDepartureRetry => {
                if self.fsm.state() != FsmState::Idle {
                    return self.handle_signal(Signal::leave_network(), now, queue);
                }
                return Ok(());
            }
            TimeoutKind::JoinRetry => {
                if self.fsm.state() == FsmState::JoinFailed {
                    if let Some(target) = self.join.retry_target() {
                        return self.handle_signal(Signal::join_via_peer(target), now, queue);
                    }
                }
                return Ok(());
            }
            _ => {}
        }

        let valid_bootstrap_response = kind == TimeoutKind::BootstrapResponse
            && self.bootstrap.is_response_valid();
        let fsm_event = FsmEvent::Timeout {
            kind,
            valid_bootstrap_response,
        };
        if let Err(error) = self.fsm.accept(&fsm_event) {
            match error {
                Error::FsmErrorState(previous) => {
                    error!("bootstrap found no overlay; node failed (was {:?})", previous);
                    return Err(error);
                }
                _ => {
                    debug!("stale timeout {:?}: {}", kind, error);
                    return Ok(());
                }
            }
        }

        match kind {
            TimeoutKind::BootstrapResponse => {
                // the window closed with a candidate: join it
                if let Some(target) = self.bootstrap.take_candidate() {
                    self.with_ctx(now, queue, |algorithms, ctx| {
                        algorithms.join.initiate(ctx, target);
                        Ok(())
                    })
                } else {
                    Ok(())
                }
            }
            TimeoutKind::JoinAcceptResponse => {
                // now in JoinFailed; schedule the retry
                queue.push_back(Cmd::ArmTimeout(TimeoutKind::JoinRetry));
                Ok(())
            }
            TimeoutKind::JoinAcceptAckResponse => self.with_ctx(now, queue, |algorithms, ctx| {
                algorithms.join.on_accept_ack_timeout(ctx)
            }),
            TimeoutKind::ReplacementOfferResponse => {
                self.leave.on_replacement_offer_timeout();
                Ok(())
            }
            TimeoutKind::ReplacementAckResponse => {
                self.leave.on_replacement_ack_timeout();
                Ok(())
            }
            TimeoutKind::DsnAggregation => self.with_ctx(now, queue, |algorithms, ctx| {
                algorithms.esearch.on_dsn_aggregation_timeout(ctx)
            }),
            TimeoutKind::InquiryAggregation => self.with_ctx(now, queue, |algorithms, ctx| {
                algorithms.esearch.on_inquiry_aggregation_timeout(ctx)
            }),
            TimeoutKind::SelfDepartureRetry | TimeoutKind::JoinRetry => Ok(()),
        }
    }
}

/// Mutable access to every algorithm, split from the rest of the core so a
/// handler can hold both its algorithm and the [`Ctx`].
pub(crate) struct AlgorithmsView<'a> {
    pub join: &'a mut JoinAlgorithm,
    pub leave: &'a mut LeaveAlgorithm,
    pub search_exact: &'a mut SearchExactAlgorithm,
    pub esearch: &'a mut EntitySearchAlgorithm,
    pub bootstrap: &'a mut BootstrapAlgorithm,
    pub response: &'a mut ResponseAlgorithm,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::system::{
        FindQueryScope, FindQuerySelection, QueryExpr,
    };
    use crate::node::config::TimeoutConfig;
    use crate::types::test_utils::test_addr;
    use crate::types::{Value, ValueKind};
    use std::collections::HashMap;

    /// A deterministic in-memory overlay: cores wired through a message
    /// queue, with explicit timer control. No sockets, no tasks.
    struct TestNet {
        nodes: Vec<(SocketAddr, NodeCore)>,
        wire: VecDeque<(SocketAddr, WireMsg)>,
        timers: Vec<(SocketAddr, TimeoutKind)>,
        now: u64,
    }

    impl TestNet {
        fn new() -> Self {
            Self {
                nodes: Vec::new(),
                wire: VecDeque::new(),
                timers: Vec::new(),
                now: 1_000_000,
            }
        }

        fn config(fanout: u16, is_root: bool) -> Config {
            Config {
                fanout,
                is_root,
                join_info: if is_root {
                    JoinInfo::None
                } else {
                    JoinInfo::Discovery
                },
                timeouts: TimeoutConfig::default(),
                ..Config::default()
            }
        }

        fn add_root(&mut self, port: u16, fanout: u16) -> SocketAddr {
            let addr = test_addr(port);
            let core = NodeCore::new(Self::config(fanout, true), addr).unwrap();
            self.nodes.push((addr, core));
            addr
        }

        fn add_idle_node(&mut self, port: u16, fanout: u16) -> SocketAddr {
            let addr = test_addr(port);
            let core = NodeCore::new(Self::config(fanout, false), addr).unwrap();
            self.nodes.push((addr, core));
            addr
        }

        /// Adds a node and drives its join via the given seed to completion.
        fn join_via(&mut self, port: u16, fanout: u16, seed: SocketAddr) -> SocketAddr {
            let addr = self.add_idle_node(port, fanout);
            let seed_peer = Peer::addressed(fanout, seed).unwrap();
            self.signal(addr, Signal::join_via_peer(seed_peer));
            self.deliver_all();
            assert_eq!(
                self.core(addr).fsm_state(),
                FsmState::Connected,
                "join of {} did not complete",
                addr
            );
            addr
        }

        fn core(&self, addr: SocketAddr) -> &NodeCore {
            &self
                .nodes
                .iter()
                .find(|(node_addr, _)| *node_addr == addr)
                .expect("unknown node")
                .1
        }

        fn apply(&mut self, from: SocketAddr, effects: Vec<Effect>) {
            for effect in effects {
                match effect {
                    Effect::Send(msg) => {
                        let to = msg.target().addr().expect("sends are addressed");
                        self.wire.push_back((to, msg));
                    }
                    Effect::Multicast(msg) => {
                        for (addr, _) in &self.nodes {
                            if *addr != from {
                                self.wire.push_back((*addr, msg.clone()));
                            }
                        }
                    }
                    Effect::ArmTimeout(kind) => {
                        self.timers
                            .retain(|(addr, pending)| !(*addr == from && *pending == kind));
                        self.timers.push((from, kind));
                    }
                    Effect::CancelTimeout(kind) => {
                        self.timers
                            .retain(|(addr, pending)| !(*addr == from && *pending == kind));
                    }
                }
            }
        }

        fn signal(&mut self, addr: SocketAddr, signal: Signal) {
            let now = self.now;
            let effects = self
                .nodes
                .iter_mut()
                .find(|(node_addr, _)| *node_addr == addr)
                .expect("unknown node")
                .1
                .handle(Event::Signal(signal), now);
            self.apply(addr, effects);
        }

        fn event(&mut self, addr: SocketAddr, event: Event) {
            let now = self.now;
            let effects = self
                .nodes
                .iter_mut()
                .find(|(node_addr, _)| *node_addr == addr)
                .expect("unknown node")
                .1
                .handle(event, now);
            self.apply(addr, effects);
        }

        /// Delivers queued messages until the wire is empty.
        fn deliver_all(&mut self) {
            let mut hops = 0;
            while let Some((to, msg)) = self.wire.pop_front() {
                hops += 1;
                assert!(hops < 10_000, "message storm, aborting test");
                let now = self.now;
                if let Some((_, core)) = self
                    .nodes
                    .iter_mut()
                    .find(|(node_addr, _)| *node_addr == to)
                {
                    let effects = core.handle(Event::Rx(msg), now);
                    self.apply(to, effects);
                }
            }
        }

        /// Fires one pending timer of the given kind at the given node, if
        /// armed, and delivers the fallout.
        fn fire(&mut self, addr: SocketAddr, kind: TimeoutKind) -> bool {
            let position = self
                .timers
                .iter()
                .position(|(timer_addr, timer_kind)| *timer_addr == addr && *timer_kind == kind);
            match position {
                Some(index) => {
                    let _ = self.timers.remove(index);
                    self.now += 1_000;
                    self.event(addr, Event::Timeout(kind));
                    self.deliver_all();
                    true
                }
                None => false,
            }
        }

        /// Fires pending timers (oldest first) until none are left or the
        /// round limit is reached.
        fn run_timers(&mut self, max_rounds: usize) {
            for _ in 0..max_rounds {
                self.deliver_all();
                if self.timers.is_empty() {
                    return;
                }
                let (addr, kind) = self.timers.remove(0);
                self.now += 1_000;
                self.event(addr, Event::Timeout(kind));
            }
            self.deliver_all();
        }

        fn positions(&self) -> HashMap<SocketAddr, (u32, u32)> {
            self.nodes
                .iter()
                .filter(|(_, core)| core.this_node().is_valid_peer())
                .map(|(addr, core)| {
                    (*addr, (core.this_node().level(), core.this_node().number()))
                })
                .collect()
        }
    }

    /// Scenario: binary root plus one joiner via direct address.
    #[test]
    fn s1_binary_root_join() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let joiner = net.join_via(2001, 2, root);

        assert_eq!(net.core(joiner).this_node().level(), 1);
        assert_eq!(net.core(joiner).this_node().number(), 0);
        assert_eq!(net.core(root).fsm_state(), FsmState::Connected);
        assert_eq!(net.core(joiner).fsm_state(), FsmState::Connected);

        let root_child = net.core(root).routing().child(0).unwrap().clone();
        assert!(root_child.is_initialised());
        assert_eq!(root_child.addr(), Some(test_addr(2001)));

        assert!(net
            .core(joiner)
            .routing()
            .parent()
            .is_initialised());
    }

    /// Joins honour the alternating fill direction.
    #[test]
    fn joins_fill_levels_in_order() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let a = net.join_via(2001, 2, root);
        let b = net.join_via(2002, 2, root);
        let c = net.join_via(2003, 2, root);
        let d = net.join_via(2004, 2, root);

        let positions = net.positions();
        assert_eq!(positions[&a], (1, 0));
        assert_eq!(positions[&b], (1, 1));
        // level 2 fills right to left
        assert_eq!(positions[&c], (2, 3));
        assert_eq!(positions[&d], (2, 2));
    }

    /// Scenario: three-node leave without replacement.
    #[test]
    fn s2_three_node_leave_without_replacement() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let left = net.join_via(2001, 2, root);
        let right = net.join_via(2002, 2, root);

        net.signal(right, Signal::leave_network());
        net.deliver_all();

        assert_eq!(net.core(right).fsm_state(), FsmState::Idle);
        assert!(!net.core(right).this_node().is_valid_peer());

        // root's right child slot is free again, and nothing is locked
        assert!(!net.core(root).routing().child(1).unwrap().is_initialised());
        assert!(!net.core(root).is_locked());
        assert!(!net.core(left).is_locked());

        // the remaining leaf no longer references the old identity
        assert!(net
            .core(left)
            .routing()
            .initialised_rt_neighbours()
            .is_empty());
    }

    /// Scenario: an interior node leaves; the most recently filled leaf
    /// replaces it.
    #[test]
    fn s3_leave_with_replacement_swaps_the_leaf_in() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let n10 = net.join_via(2001, 2, root);
        let n11 = net.join_via(2002, 2, root);
        let n23 = net.join_via(2003, 2, root);
        let n22 = net.join_via(2004, 2, root);
        let n21 = net.join_via(2005, 2, root);
        let n20 = net.join_via(2006, 2, root);

        // sanity: full tree through level 2
        let positions = net.positions();
        assert_eq!(positions[&n10], (1, 0));
        assert_eq!(positions[&n20], (2, 0));

        net.signal(n10, Signal::leave_network());
        net.deliver_all();

        // the interior node is gone, its position taken by the last leaf
        assert_eq!(net.core(n10).fsm_state(), FsmState::Idle);
        assert!(!net.core(n10).this_node().is_valid_peer());

        let positions = net.positions();
        assert_eq!(positions[&n20], (1, 0));

        // the successor kept its own transport address
        assert_eq!(net.core(n20).this_node().addr(), Some(test_addr(2006)));

        // nobody references the successor's old slot 2:0 any more
        for &addr in &[root, n11, n21, n22, n23, n20] {
            let routing = net.core(addr).routing();
            assert!(
                routing.known_peer_at(2, 0).is_none(),
                "{} still knows 2:0",
                addr
            );
        }

        // the new parent of 2:1 is the replaced 1:0 backed by the new address
        let parent_of_n21 = net.core(n21).routing().parent().clone();
        assert_eq!(parent_of_n21.addr(), Some(test_addr(2006)));

        // all locks released
        for &addr in &[root, n11, n21, n22, n23, n20] {
            assert!(!net.core(addr).is_locked(), "{} is still locked", addr);
        }
    }

    /// Scenario: bootstrap with a lost multicast fails the join.
    #[test]
    fn s4_bootstrap_without_answers_errors() {
        let mut net = TestNet::new();
        let lonely = net.add_idle_node(2000, 3);

        net.signal(lonely, Signal::join_via_bootstrap());
        net.deliver_all();
        assert_eq!(
            net.core(lonely).fsm_state(),
            FsmState::WaitForBootstrapResponse
        );

        assert!(net.fire(lonely, TimeoutKind::BootstrapResponse));
        assert_eq!(net.core(lonely).fsm_state(), FsmState::ErrorState);
    }

    /// Bootstrap with a live overlay completes the join.
    #[test]
    fn bootstrap_with_answers_joins() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let joiner = net.add_idle_node(2001, 2);

        net.signal(joiner, Signal::join_via_bootstrap());
        net.deliver_all();
        assert!(net.fire(joiner, TimeoutKind::BootstrapResponse));

        assert_eq!(net.core(joiner).fsm_state(), FsmState::Connected);
        assert_eq!(net.core(joiner).this_node().level(), 1);
        assert!(net.core(root).routing().child(0).unwrap().is_initialised());
    }

    /// Scenario: concurrent leaves contending for the same lock; the loser
    /// retries and both complete.
    #[test]
    fn s5_concurrent_leaves_retry_and_complete() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let left = net.join_via(2001, 2, root);
        let right = net.join_via(2002, 2, root);

        // both signal before any message is delivered; the second sign-off
        // reaching the root sees node_locked and is refused
        net.signal(left, Signal::leave_network());
        net.signal(right, Signal::leave_network());
        net.deliver_all();

        let done_first = [left, right]
            .iter()
            .filter(|&&addr| net.core(addr).fsm_state() == FsmState::Idle)
            .count();
        assert_eq!(done_first, 1, "exactly one leave should win the lock");

        // the refused node retries via its departure timer
        net.run_timers(16);

        assert_eq!(net.core(left).fsm_state(), FsmState::Idle);
        assert_eq!(net.core(right).fsm_state(), FsmState::Idle);
        assert!(!net.core(root).is_locked());
        assert!(!net.core(root).routing().at_least_one_child_exists());
    }

    /// Scenario: entity search over a DSN cover area with inquiries.
    #[test]
    fn s6_entity_search_aggregates_cover_area() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let left = net.join_via(2001, 2, root);
        let right = net.join_via(2002, 2, root);

        // the children publish attributes; only one satisfies the query
        net.event(
            left,
            Event::Insert(vec![Entry::new("cpu", Value::Int(8), ValueKind::Static)]),
        );
        net.event(
            right,
            Event::Insert(vec![Entry::new("disk", Value::Int(1), ValueKind::Static)]),
        );

        let query = FindQuery::new(
            QueryExpr::Present("cpu".into()),
            FindQueryScope::Some,
            FindQuerySelection::SelectAll,
        );
        let (tx, mut rx) = oneshot::channel();
        net.event(root, Event::Find(query, tx));
        net.deliver_all();

        // the root (DSN 0:0) inquired its cover area; close both windows
        assert!(net.fire(root, TimeoutKind::InquiryAggregation));
        assert!(net.fire(root, TimeoutKind::DsnAggregation));

        let result = rx.try_recv().expect("find future must be fulfilled");
        assert_eq!(result.len(), 1);
        assert!(result[0].iter().any(|entry| entry.key == "cpu"));
    }

    /// An empty result set is a legal outcome of a find.
    #[test]
    fn find_with_no_matches_resolves_empty() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let _left = net.join_via(2001, 2, root);

        let query = FindQuery::new(
            QueryExpr::Present("nonexistent".into()),
            FindQueryScope::All,
            FindQuerySelection::SelectAll,
        );
        let (tx, mut rx) = oneshot::channel();
        net.event(root, Event::Find(query, tx));
        net.deliver_all();

        assert!(net.fire(root, TimeoutKind::InquiryAggregation));
        assert!(net.fire(root, TimeoutKind::DsnAggregation));

        let result = rx.try_recv().expect("find future must be fulfilled");
        assert!(result.is_empty());
    }

    /// The passive-forwarding window after a replacement: inquiries are
    /// redirected to the successor, joins are dropped.
    #[test]
    fn passive_forwarding_window_after_replacement() {
        let mut net = TestNet::new();
        let root = net.add_root(2000, 2);
        let n10 = net.join_via(2001, 2, root);
        let _n11 = net.join_via(2002, 2, root);
        let n23 = net.join_via(2003, 2, root);
        let _n22 = net.join_via(2004, 2, root);

        net.signal(n10, Signal::leave_network());
        net.deliver_all();
        assert_eq!(net.core(n10).fsm_state(), FsmState::Idle);

        // an inquiry addressed at the departed node's old address
        let from = Peer::new(0, 0, 2, test_addr(2000)).unwrap();
        let to = Peer::addressed(2, test_addr(2001)).unwrap();
        let header = crate::messaging::MsgHeader::new(from, to, 0);
        let inquiry = WireMsg::new(
            header,
            NetworkMsg::AttributeInquiryRequest(Default::default()),
        );
        net.event(n10, Event::Rx(inquiry));

        // the forward goes to the successor (the most recently filled leaf,
        // 2:2), rewritten in the header
        let (forward_to, forwarded) = net.wire.pop_front().expect("inquiry must be forwarded");
        assert_eq!(forward_to, test_addr(2004));
        assert_eq!(
            forwarded.msg_type(),
            MsgType::AttributeInquiryRequest
        );
        let _ = n23;
        net.deliver_all();

        // joins aimed at the departed identity are dropped silently
        let entering = Peer::addressed(2, test_addr(2009)).unwrap();
        let from = Peer::new(0, 0, 2, test_addr(2000)).unwrap();
        let to = Peer::addressed(2, test_addr(2001)).unwrap();
        let header = crate::messaging::MsgHeader::new(from, to, 0);
        let join = WireMsg::new(
            header,
            NetworkMsg::Join(crate::messaging::system::Join {
                entering_node: entering,
            }),
        );
        net.event(n10, Event::Rx(join));
        assert!(net.wire.is_empty());
    }
}
