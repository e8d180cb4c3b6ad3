// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The leave protocols.
//!
//! A leaf whose departure keeps the tree balanced signs off directly: its
//! parent locks itself and its level neighbours, removes the child, and the
//! leaf then signs off from its own neighbourhood. Any other node first
//! finds the most recently filled leaf
//! via `FindReplacement`; that leaf signs off at its old position, offers
//! itself, and adopts the leaving node's logical position, announcing the
//! swap with `ReplacementUpdate`.
//!
//! Correctness under concurrent leaves rests on the node lock flag, the
//! right-then-left neighbour locking order, and the nack+retry loop.

use super::{adjacent_left_from, adjacent_right_from, Ctx};
use crate::error::Result;
use crate::messaging::system::{
    FindReplacement, LockNeighbourRequest, LockNeighbourResponse, LockedStates, NetworkMsg,
    RemoveAndUpdateNeighbours, RemoveNeighbour, RemoveNeighbourAck, ReplacementAck,
    ReplacementNack, ReplacementOffer, ReplacementUpdate, SearchProgress, SignoffParentAnswer,
    SignoffParentRequest, UnlockNeighbour, UpdateNeighbours,
};
use crate::messaging::{new_event_id, WireMsg};
use crate::node::fsm::{FsmState, TimeoutKind};
use crate::node::procedure_info::ProcedureKey;
use crate::routing::calculations::{capacity_of_level, fill_level_right_to_left};
use crate::routing::{NeighbourRelationship, RoutingInformation};
use crate::types::{Peer, PeerStatus, Position};
use std::collections::VecDeque;

/// What to do once all pending acknowledgements arrived.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AckAction {
    /// Parent: all level neighbours dropped the leaving child.
    RemoveNeighbourAcks,
    /// Leaver/successor: neighbourhood sign-off confirmed.
    SignoffNeighbourAdjacents,
    /// Successor at the new position: every neighbour applied the swap.
    ReplacementUpdateAcks,
    /// Forwarder of a `ReplacementUpdate`: downstream confirmed.
    UpdateForwardAck,
}

#[derive(Clone, Copy, Debug)]
struct AckWaiter {
    remaining: u32,
    action: AckAction,
}

/// A level-neighbour lock target: directly known, reachable only by
/// search-exact, or nonexistent.
enum LockTarget {
    Direct(Peer),
    Remote(Peer),
    Nobody,
}

/// Leave protocol state at one node.
#[derive(Debug, Default)]
pub(crate) struct LeaveAlgorithm {
    /// As successor: the node whose position we are taking over.
    replacing_node: Option<Peer>,
    leaving_event_id: u64,
    in_leave_progress: bool,
    locked_right_neighbour: bool,
    locked_left_neighbour: bool,
    remaining_lock_responses: u32,
    /// As parent: the sign-off currently being served (sender, ref id).
    current_signoff_request: Option<(Peer, u64)>,
    /// The `ReplacementUpdate` we still owe an ack for.
    last_replacement_update: Option<(Peer, u64)>,
    old_parent: Option<Peer>,
    ack_waiters: VecDeque<AckWaiter>,
}

impl LeaveAlgorithm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The pure predicate behind `LeaveNetwork.can_leave_position`: a leaf on
    /// the deepest level may go without a replacement.
    pub(crate) fn can_leave_without_replacement(&self, routing: &RoutingInformation) -> bool {
        !routing.at_least_one_child_exists()
            && !routing.at_least_one_rt_neighbour_child_exists()
            && !self.in_leave_progress
            && self.replacing_node.is_none()
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        match msg.msg() {
            NetworkMsg::FindReplacement(find) => self.process_find_replacement(ctx, msg, find),
            NetworkMsg::ReplacementOffer(_) => self.process_replacement_offer(ctx, msg),
            NetworkMsg::ReplacementAck(ack) => self.process_replacement_ack(ctx, msg, ack),
            NetworkMsg::ReplacementUpdate(update) => {
                self.process_replacement_update(ctx, msg, update)
            }
            NetworkMsg::SignoffParentRequest(_) => self.process_signoff_parent_request(ctx, msg),
            NetworkMsg::SignoffParentAnswer(answer) => {
                self.process_signoff_parent_answer(ctx, answer)
            }
            NetworkMsg::LockNeighbourRequest(_) => self.process_lock_neighbour_request(ctx, msg),
            NetworkMsg::LockNeighbourResponse(response) => {
                self.on_lock_response(ctx, response.successful)
            }
            NetworkMsg::RemoveNeighbourAck(_) => self.process_remove_neighbour_ack(ctx),
            NetworkMsg::UnlockNeighbour(_) => self.process_unlock_neighbour(ctx, msg),
            NetworkMsg::ReplacementNack(_) => Ok(()), // retry is armed by the node core
            _ => Ok(()),
        }
    }

    // ---- initiation ----

    /// We decided to leave. Called after the FSM accepted the signal.
    pub(crate) fn initiate_self_departure(
        &mut self,
        ctx: &mut Ctx,
        can_leave_position: bool,
    ) -> Result<()> {
        if can_leave_position {
            self.perform_leave_without_replacement(ctx)
        } else {
            self.initiate_leave_with_replacement(ctx)
        }
    }

    fn perform_leave_without_replacement(&mut self, ctx: &mut Ctx) -> Result<()> {
        if self.in_leave_progress || self.replacing_node.is_some() {
            // already engaged elsewhere; fall back and let the retry fire
            ctx.set_fsm(FsmState::Connected);
            return Ok(());
        }

        // the sole node of the overlay simply stops
        if !ctx.routing.parent().is_valid_peer() {
            self.finish_departure(ctx, None);
            return Ok(());
        }

        self.leaving_event_id = match ctx.procedures.load_event_id(ProcedureKey::Leave) {
            Ok(event_id) => event_id,
            Err(_) => {
                let event_id = new_event_id();
                ctx.procedures.save_event_id(ProcedureKey::Leave, event_id)?;
                event_id
            }
        };
        self.sign_off_from_parent(ctx);
        Ok(())
    }

    fn initiate_leave_with_replacement(&mut self, ctx: &mut Ctx) -> Result<()> {
        let event_id = new_event_id();
        if !ctx.procedures.has_event_id(ProcedureKey::Leave) {
            ctx.procedures.save_event_id(ProcedureKey::Leave, event_id)?;
        }
        self.leaving_event_id = ctx.procedures.load_event_id(ProcedureKey::Leave)?;

        let this_node = ctx.this_node();
        match self.find_replacement_next_hop(ctx.routing) {
            Some(hop) => {
                let progress = if hop.same_position(&this_node) {
                    SearchProgress::ReplacementNode
                } else {
                    SearchProgress::None
                };
                ctx.send_or_route(
                    hop,
                    self.leaving_event_id,
                    NetworkMsg::FindReplacement(FindReplacement {
                        node_to_replace: this_node,
                        search_progress: progress,
                    }),
                );
                ctx.arm_timeout(TimeoutKind::ReplacementOfferResponse);
                Ok(())
            }
            None => {
                // nobody to replace us with; revert and retry later
                warn!("no replacement candidate reachable; aborting leave");
                ctx.set_fsm(FsmState::Connected);
                Ok(())
            }
        }
    }

    // ---- replacement search ----

    fn process_find_replacement(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        find: &FindReplacement,
    ) -> Result<()> {
        let this_node = ctx.this_node();

        // the search came back to the leaving node itself: it is its own
        // valid successor and may leave directly
        if find.node_to_replace.same_position(&this_node)
            && find.search_progress == SearchProgress::ReplacementNode
        {
            self.leaving_event_id = msg.header().ref_event_id();
            if !ctx.procedures.has_event_id(ProcedureKey::Leave) {
                ctx.procedures
                    .save_event_id(ProcedureKey::Leave, self.leaving_event_id)?;
            }
            ctx.cancel_timeout(TimeoutKind::ReplacementOfferResponse);
            self.sign_off_from_parent(ctx);
            return Ok(());
        }

        match self.find_replacement_next_hop(ctx.routing) {
            Some(hop) if !hop.same_position(&this_node) => {
                let progress = if hop.same_position(&find.node_to_replace) {
                    SearchProgress::ReplacementNode
                } else if hop.level() == this_node.level() {
                    SearchProgress::SearchLevel
                } else {
                    find.search_progress
                };
                ctx.send_or_route(
                    hop,
                    msg.header().ref_event_id(),
                    NetworkMsg::FindReplacement(FindReplacement {
                        node_to_replace: find.node_to_replace.clone(),
                        search_progress: progress,
                    }),
                );
                Ok(())
            }
            _ => {
                // the search ends here: we are the most recently filled leaf
                self.prepare_leaving_as_successor(
                    ctx,
                    find.node_to_replace.clone(),
                    msg.header().ref_event_id(),
                )
            }
        }
    }

    /// Where a replacement search moves next from this node: down while
    /// deeper nodes are known, then along the deepest level towards the fill
    /// front. `None` when the search ends here.
    fn find_replacement_next_hop(&self, routing: &RoutingInformation) -> Option<Peer> {
        let this_node = routing.this_node();

        if let Some(lowest) = routing.lowest_node() {
            if lowest.position().is_deeper_than(this_node.position()) && lowest.is_initialised() {
                return Some(lowest);
            }
        }

        // deepest known level; the most recently filled position sits at the
        // fill front
        let rtl = fill_level_right_to_left(this_node.level());
        if rtl {
            // filling right to left: the front is the furthest occupied
            // position to our left
            routing
                .left_rt_neighbours()
                .iter()
                .find(|peer| peer.is_initialised())
                .cloned()
        } else {
            routing
                .right_rt_neighbours()
                .iter()
                .rev()
                .find(|peer| peer.is_initialised())
                .cloned()
        }
    }

    fn prepare_leaving_as_successor(
        &mut self,
        ctx: &mut Ctx,
        node_to_replace: Peer,
        ref_event_id: u64,
    ) -> Result<()> {
        let engaged = self.in_leave_progress
            || self.replacing_node.is_some()
            || matches!(
                ctx.fsm_state,
                FsmState::WaitForReplacementOffer
                    | FsmState::SignOffFromInlevelNeighbours
                    | FsmState::SignOffFromInlevelNeighboursDirectLeaveWoReplacement
                    | FsmState::ConnectedWaitingParentResponse
                    | FsmState::ConnectedWaitingParentResponseDirectLeaveWoReplacement
            );
        if engaged {
            ctx.send_or_route(
                node_to_replace,
                ref_event_id,
                NetworkMsg::ReplacementNack(ReplacementNack),
            );
            return Ok(());
        }

        if !ctx.procedures.has_event_id(ProcedureKey::Leave) {
            ctx.procedures.save_event_id(ProcedureKey::Leave, ref_event_id)?;
        }
        self.leaving_event_id = ref_event_id;
        self.replacing_node = Some(node_to_replace);
        self.sign_off_from_parent(ctx);
        Ok(())
    }

    fn sign_off_from_parent(&mut self, ctx: &mut Ctx) {
        self.in_leave_progress = true;
        let parent = ctx.routing.parent().clone();
        ctx.send(
            parent,
            self.leaving_event_id,
            NetworkMsg::SignoffParentRequest(SignoffParentRequest),
        );
    }

    // ---- the parent's side: locking and child removal ----

    fn process_signoff_parent_request(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        if *ctx.node_locked || self.current_signoff_request.is_some() {
            ctx.send(
                msg.sender().clone(),
                msg.header().ref_event_id(),
                NetworkMsg::SignoffParentAnswer(SignoffParentAnswer { successful: false }),
            );
            return Ok(());
        }

        let sender = msg.sender().clone();
        let ref_event_id = msg.header().ref_event_id();
        self.current_signoff_request = Some((sender.clone(), ref_event_id));
        *ctx.node_locked = true;

        let this_node = ctx.this_node();
        if this_node.level() == 0 && sender.level() == 1 && sender.number() == 0 {
            // we are root and the successor is 1:0 — there is nobody else in
            // the overlay to lock
            self.remaining_lock_responses = 1;
            return self.on_lock_response(ctx, true);
        }

        self.remaining_lock_responses = 2;
        match Self::lock_target_right(ctx.routing) {
            LockTarget::Direct(right) => {
                self.locked_right_neighbour = true;
                ctx.send(
                    right,
                    ref_event_id,
                    NetworkMsg::LockNeighbourRequest(LockNeighbourRequest),
                );
                Ok(())
            }
            LockTarget::Remote(target) => {
                self.locked_right_neighbour = true;
                ctx.send_or_route(
                    target,
                    ref_event_id,
                    NetworkMsg::LockNeighbourRequest(LockNeighbourRequest),
                );
                Ok(())
            }
            LockTarget::Nobody => self.on_lock_response(ctx, true),
        }
    }

    /// The level neighbour to our right, wrapping to the first node of the
    /// next level at the level edge.
    fn lock_target_right(routing: &RoutingInformation) -> LockTarget {
        if let Some(right) = routing
            .right_rt_neighbours()
            .iter()
            .find(|peer| peer.is_initialised())
        {
            return LockTarget::Direct(right.clone());
        }
        let this_node = routing.this_node();
        let deeper_known = routing
            .lowest_node()
            .map(|peer| peer.position().is_deeper_than(this_node.position()))
            .unwrap_or(false);
        if !deeper_known {
            return LockTarget::Nobody;
        }
        // the wrap target is the first node of the next level; when that is
        // our own child slot or a routing-table neighbour child we can see
        // directly whether it is vacant
        if this_node.number() == 0 {
            match routing.child(0) {
                Ok(child) if child.is_initialised() => return LockTarget::Direct(child.clone()),
                _ => return LockTarget::Nobody,
            }
        }
        if let Some(slot) = routing
            .rt_neighbour_children()
            .iter()
            .find(|child| child.level() == this_node.level() + 1 && child.number() == 0)
        {
            if slot.is_initialised() {
                return LockTarget::Direct(slot.clone());
            }
            return LockTarget::Nobody;
        }
        match Peer::unaddressed(this_node.level() + 1, 0, this_node.fanout()) {
            Ok(target) => LockTarget::Remote(target),
            Err(_) => LockTarget::Nobody,
        }
    }

    /// The level neighbour to our left, wrapping to the last node of the
    /// previous level at the level edge.
    fn lock_target_left(routing: &RoutingInformation) -> LockTarget {
        if let Some(left) = routing
            .left_rt_neighbours()
            .iter()
            .rev()
            .find(|peer| peer.is_initialised())
        {
            return LockTarget::Direct(left.clone());
        }
        let this_node = routing.this_node();
        if this_node.level() == 0 {
            return LockTarget::Nobody;
        }
        let previous_level = this_node.level() - 1;
        let last_number = (capacity_of_level(previous_level, this_node.fanout()) - 1) as u32;
        match Peer::unaddressed(previous_level, last_number, this_node.fanout()) {
            Ok(target) => LockTarget::Remote(target),
            Err(_) => LockTarget::Nobody,
        }
    }

    fn process_lock_neighbour_request(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        let successful = if *ctx.node_locked {
            false
        } else {
            *ctx.node_locked = true;
            true
        };
        ctx.send(
            msg.sender().clone(),
            msg.header().ref_event_id(),
            NetworkMsg::LockNeighbourResponse(LockNeighbourResponse { successful }),
        );
        Ok(())
    }

    fn on_lock_response(&mut self, ctx: &mut Ctx, successful: bool) -> Result<()> {
        let (requester, ref_event_id) = match &self.current_signoff_request {
            Some((requester, ref_event_id)) => (requester.clone(), *ref_event_id),
            None => {
                debug!("lock response without a pending sign-off; dropping");
                return Ok(());
            }
        };

        if !successful {
            // roll back: release anything already locked and tell the
            // requester the sign-off failed
            if self.remaining_lock_responses == 1 && self.locked_right_neighbour {
                match Self::lock_target_right(ctx.routing) {
                    LockTarget::Direct(right) => ctx.send(
                        right,
                        ref_event_id,
                        NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                    ),
                    LockTarget::Remote(target) => ctx.send_or_route(
                        target,
                        ref_event_id,
                        NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                    ),
                    LockTarget::Nobody => {}
                }
            }
            ctx.send(
                requester,
                ref_event_id,
                NetworkMsg::SignoffParentAnswer(SignoffParentAnswer { successful: false }),
            );
            self.current_signoff_request = None;
            *ctx.node_locked = false;
            self.locked_right_neighbour = false;
            self.locked_left_neighbour = false;
            self.remaining_lock_responses = 0;
            return Ok(());
        }

        self.remaining_lock_responses = self.remaining_lock_responses.saturating_sub(1);

        if self.remaining_lock_responses == 1 {
            // the right side is locked; now the left
            match Self::lock_target_left(ctx.routing) {
                LockTarget::Direct(left) => {
                    self.locked_left_neighbour = true;
                    ctx.send(
                        left,
                        ref_event_id,
                        NetworkMsg::LockNeighbourRequest(LockNeighbourRequest),
                    );
                    return Ok(());
                }
                LockTarget::Remote(target) => {
                    self.locked_left_neighbour = true;
                    ctx.send_or_route(
                        target,
                        ref_event_id,
                        NetworkMsg::LockNeighbourRequest(LockNeighbourRequest),
                    );
                    return Ok(());
                }
                LockTarget::Nobody => {
                    self.remaining_lock_responses = 0;
                }
            }
        }

        if self.remaining_lock_responses != 0 {
            return Ok(());
        }

        // all locks held: take the leaving child out of our own view and let
        // our level neighbours and the remaining children do the same
        ctx.routing.remove_neighbour(&requester, ref_event_id)?;

        let mut neighbours = ctx.routing.initialised_rt_neighbours();
        neighbours.extend(ctx.routing.initialised_children());
        let count = neighbours.len() as u32;
        for neighbour in neighbours {
            ctx.send(
                neighbour,
                ref_event_id,
                NetworkMsg::RemoveNeighbour(RemoveNeighbour {
                    removed_position_node: requester.clone(),
                    acknowledge: true,
                }),
            );
        }
        self.wait_for_acks(ctx, count, AckAction::RemoveNeighbourAcks)
    }

    // ---- the leaver's/successor's side ----

    fn process_signoff_parent_answer(
        &mut self,
        ctx: &mut Ctx,
        answer: &SignoffParentAnswer,
    ) -> Result<()> {
        if !answer.successful {
            if let Some(node) = self.replacing_node.take() {
                ctx.send_or_route(
                    node,
                    self.leaving_event_id,
                    NetworkMsg::ReplacementNack(ReplacementNack),
                );
            }
            self.in_leave_progress = false;
            return Ok(());
        }

        let count = self.sign_off_from_neighbours_and_adjacents(ctx)?;
        self.wait_for_acks(ctx, count, AckAction::SignoffNeighbourAdjacents)
    }

    /// Removes us from every symmetric neighbour and re-links our adjacents
    /// to one another. Returns how many acknowledgements to expect.
    fn sign_off_from_neighbours_and_adjacents(&mut self, ctx: &mut Ctx) -> Result<u32> {
        let this_node = ctx.this_node();
        let adjacent_left = ctx.routing.adjacent_left().clone();
        let adjacent_right = ctx.routing.adjacent_right().clone();
        let parent = ctx.routing.parent().clone();
        let direct_left = ctx.routing.direct_left_neighbour().cloned();

        let mut count = 0u32;

        for neighbour in ctx.routing.all_unique_symmetrical_existing_neighbours() {
            // adjacents are re-linked below, with their new counterpart
            if neighbour.same_position(&adjacent_left) || neighbour.same_position(&adjacent_right) {
                continue;
            }
            // the parent removed us during the sign-off
            if neighbour.same_position(&parent) {
                continue;
            }

            count += 1;
            ctx.send(
                neighbour,
                self.leaving_event_id,
                NetworkMsg::RemoveNeighbour(RemoveNeighbour {
                    removed_position_node: this_node.clone(),
                    acknowledge: true,
                }),
            );
        }

        if adjacent_left.is_initialised() {
            let is_direct_left = direct_left
                .as_ref()
                .map(|peer| peer.same_position(&adjacent_left))
                .unwrap_or(false);

            count += 1;
            if is_direct_left && adjacent_right.is_valid_peer() {
                // removal and the new adjacent travel together
                ctx.send(
                    adjacent_left.clone(),
                    self.leaving_event_id,
                    NetworkMsg::RemoveAndUpdateNeighbours(RemoveAndUpdateNeighbours {
                        remove: RemoveNeighbour {
                            removed_position_node: this_node.clone(),
                            acknowledge: false,
                        },
                        update: UpdateNeighbours {
                            neighbours_and_relationships: vec![(
                                adjacent_right.clone(),
                                NeighbourRelationship::AdjacentRight,
                            )],
                            should_acknowledge: false,
                        },
                        should_acknowledge: true,
                    }),
                );
            } else if adjacent_right.is_valid_peer() {
                ctx.send(
                    adjacent_left.clone(),
                    self.leaving_event_id,
                    NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                        neighbours_and_relationships: vec![(
                            adjacent_right.clone(),
                            NeighbourRelationship::AdjacentRight,
                        )],
                        should_acknowledge: true,
                    }),
                );
            } else {
                // no successor adjacent; the removal clears their pointer
                ctx.send(
                    adjacent_left.clone(),
                    self.leaving_event_id,
                    NetworkMsg::RemoveNeighbour(RemoveNeighbour {
                        removed_position_node: this_node.clone(),
                        acknowledge: true,
                    }),
                );
            }
        }

        if adjacent_right.is_initialised() {
            // a same-or-deeper right adjacent already received its update as
            // a neighbour
            if adjacent_right.level() < this_node.level() {
                count += 1;
                if adjacent_left.is_valid_peer() {
                    ctx.send(
                        adjacent_right,
                        self.leaving_event_id,
                        NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                            neighbours_and_relationships: vec![(
                                adjacent_left,
                                NeighbourRelationship::AdjacentLeft,
                            )],
                            should_acknowledge: true,
                        }),
                    );
                } else {
                    ctx.send(
                        adjacent_right,
                        self.leaving_event_id,
                        NetworkMsg::RemoveNeighbour(RemoveNeighbour {
                            removed_position_node: this_node,
                            acknowledge: true,
                        }),
                    );
                }
            }
        }

        Ok(count)
    }

    /// All sign-off acks are in: either offer ourselves to the node we are
    /// replacing, or — leaving directly — unlock the parent and fall silent.
    fn signoff_neighbour_adjacents_complete(&mut self, ctx: &mut Ctx) -> Result<()> {
        if self.replacing_node.is_some() {
            self.send_replacement_offer(ctx);
            return Ok(());
        }

        let parent = ctx.routing.parent().clone();
        self.finish_departure(ctx, Some(parent));
        Ok(())
    }

    fn finish_departure(&mut self, ctx: &mut Ctx, unlock_parent: Option<Peer>) {
        ctx.set_fsm(FsmState::Idle);
        if let Some(parent) = unlock_parent {
            if parent.is_initialised() {
                ctx.send(
                    parent,
                    self.leaving_event_id,
                    NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                );
            }
        }

        ctx.routing.set_node_status(PeerStatus::Left, self.leaving_event_id);
        ctx.routing.reset_position(self.leaving_event_id);

        if ctx.procedures.has_event_id(ProcedureKey::Leave) {
            let _ = ctx.procedures.remove_event_id(ProcedureKey::Leave);
        }
        // any lock somebody placed on us departs with us
        *ctx.node_locked = false;
        self.locked_right_neighbour = false;
        self.locked_left_neighbour = false;
        self.in_leave_progress = false;
        self.replacing_node = None;
        self.leaving_event_id = 0;
    }

    fn send_replacement_offer(&mut self, ctx: &mut Ctx) {
        if let Some(node) = self.replacing_node.clone() {
            ctx.arm_timeout(TimeoutKind::ReplacementAckResponse);
            ctx.send_or_route(
                node,
                self.leaving_event_id,
                NetworkMsg::ReplacementOffer(ReplacementOffer),
            );
        }
    }

    /// The leaving node accepts our offer by shipping its world state; we
    /// are Idle afterwards (the node core keeps the passive-forward pointer).
    fn process_replacement_offer(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        ctx.cancel_timeout(TimeoutKind::ReplacementOfferResponse);

        let neighbours = ctx.routing.all_unique_known_existing_neighbours();
        ctx.send(
            msg.sender().clone(),
            msg.header().ref_event_id(),
            NetworkMsg::ReplacementAck(ReplacementAck {
                neighbours,
                locked_states: LockedStates {
                    locked: *ctx.node_locked,
                    locked_right: self.locked_right_neighbour,
                    locked_left: self.locked_left_neighbour,
                },
            }),
        );

        ctx.routing
            .set_node_status(PeerStatus::Left, msg.header().ref_event_id());
        ctx.routing.reset_position(msg.header().ref_event_id());

        // lock ownership travelled to the successor
        *ctx.node_locked = false;
        self.locked_right_neighbour = false;
        self.locked_left_neighbour = false;
        self.current_signoff_request = None;
        self.replacing_node = None;
        if ctx.procedures.has_event_id(ProcedureKey::Leave) {
            let _ = ctx.procedures.remove_event_id(ProcedureKey::Leave);
        }
        Ok(())
    }

    /// We are the successor: adopt the vacated position and announce the
    /// swap to everyone who knew the leaving node.
    fn process_replacement_ack(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        ack: &ReplacementAck,
    ) -> Result<()> {
        ctx.cancel_timeout(TimeoutKind::ReplacementAckResponse);
        if !ctx.procedures.has_event_id(ProcedureKey::Leave) {
            ctx.procedures
                .save_event_id(ProcedureKey::Leave, msg.header().ref_event_id())?;
        }

        let leaving_node = msg.sender().clone();
        self.perform_leave_with_replacement(
            ctx,
            leaving_node,
            ack.neighbours.clone(),
            ack.locked_states,
        )
    }

    fn perform_leave_with_replacement(
        &mut self,
        ctx: &mut Ctx,
        leaving_node: Peer,
        neighbours_of_leaving_node: Vec<Peer>,
        locked_states: LockedStates,
    ) -> Result<()> {
        let removed_position_node = ctx.this_node();
        let replaced_position_node = leaving_node.clone();
        info!(
            "replacing {} from {}",
            replaced_position_node, removed_position_node
        );

        self.old_parent = Some(ctx.routing.parent().clone());

        self.replace_myself(ctx, &leaving_node, neighbours_of_leaving_node)?;

        *ctx.node_locked = locked_states.locked;
        self.locked_right_neighbour = locked_states.locked_right;
        self.locked_left_neighbour = locked_states.locked_left;

        let new_position = ctx.routing.this_node().position().clone();
        let mut count = 0u32;
        for neighbour in ctx.routing.all_unique_symmetrical_existing_neighbours() {
            if neighbour.same_position(&removed_position_node) {
                continue;
            }
            count += 1;
            ctx.send(
                neighbour,
                self.leaving_event_id,
                NetworkMsg::ReplacementUpdate(ReplacementUpdate {
                    removed_position_node: removed_position_node.clone(),
                    replaced_position_node: replaced_position_node.clone(),
                    new_position: new_position.clone(),
                    should_acknowledge: true,
                }),
            );
        }

        if ctx.procedures.has_event_id(ProcedureKey::Leave) {
            let _ = ctx.procedures.remove_event_id(ProcedureKey::Leave);
        }
        self.wait_for_acks(ctx, count, AckAction::ReplacementUpdateAcks)
    }

    /// Adopts the leaving node's logical position (keeping our own transport
    /// address) and rebuilds the routing information from its neighbour
    /// list.
    fn replace_myself(
        &mut self,
        ctx: &mut Ctx,
        node_to_replace: &Peer,
        neighbours: Vec<Peer>,
    ) -> Result<()> {
        let ref_event_id = self.leaving_event_id;
        let old_position = ctx.this_node();

        ctx.routing.set_node_status(PeerStatus::Left, ref_event_id);
        let position = Position::new(
            node_to_replace.level(),
            node_to_replace.number(),
            node_to_replace.fanout(),
        )?;
        ctx.routing.set_position(position);
        ctx.routing.set_node_status(PeerStatus::Running, ref_event_id);

        let neighbours: Vec<Peer> = neighbours
            .into_iter()
            .filter(|peer| !peer.same_position(&old_position))
            .collect();

        for neighbour in &neighbours {
            if neighbour.is_initialised() {
                if let Err(error) = ctx.routing.update_neighbour(neighbour.clone(), ref_event_id) {
                    debug!("skipping inherited neighbour {}: {}", neighbour, error);
                }
            }
        }

        let this_node = ctx.this_node();
        if let Some(left) = adjacent_left_from(&this_node, &neighbours) {
            ctx.routing.set_adjacent_left(left, ref_event_id)?;
        }
        if let Some(right) = adjacent_right_from(&this_node, &neighbours) {
            ctx.routing.set_adjacent_right(right, ref_event_id)?;
        }
        Ok(())
    }

    /// A neighbour of a departed node learns about the swap.
    fn process_replacement_update(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        update: &ReplacementUpdate,
    ) -> Result<()> {
        let ref_event_id = msg.header().ref_event_id();

        // the successor's old position is gone
        ctx.routing
            .remove_neighbour(&update.removed_position_node, ref_event_id)?;

        // the replaced position keeps its slot but is now backed by the
        // successor's transport address and fresh identity
        let mut replaced = update.replaced_position_node.clone();
        replaced.set_addr(update.removed_position_node.addr());
        replaced.set_position(update.new_position.clone());

        let known = ctx
            .routing
            .known_peer_at(replaced.level(), replaced.number());
        if known.is_none() {
            // the node at the replaced position already left our view
            self.last_replacement_update = Some((msg.sender().clone(), ref_event_id));
            return self.wait_for_acks(ctx, 0, AckAction::UpdateForwardAck);
        }
        ctx.routing.update_neighbour(replaced, ref_event_id)?;

        // if the leaving node was our child, our routing-table neighbours
        // know it as a neighbour child and need the swap too
        let this_node = ctx.this_node();
        let fanout = u32::from(this_node.fanout());
        let child_base = this_node.number() * fanout;
        let sender = msg.sender();
        let mut forwarded = 0u32;
        if sender.level() == this_node.level() + 1
            && sender.number() >= child_base
            && sender.number() < child_base + fanout
        {
            for neighbour in ctx.routing.initialised_rt_neighbours() {
                forwarded += 1;
                ctx.send(
                    neighbour,
                    ref_event_id,
                    NetworkMsg::ReplacementUpdate(ReplacementUpdate {
                        removed_position_node: update.removed_position_node.clone(),
                        replaced_position_node: update.replaced_position_node.clone(),
                        new_position: update.new_position.clone(),
                        should_acknowledge: true,
                    }),
                );
            }
        }

        self.last_replacement_update = Some((msg.sender().clone(), ref_event_id));
        self.wait_for_acks(ctx, forwarded, AckAction::UpdateForwardAck)
    }

    fn update_forward_ack_complete(&mut self, ctx: &mut Ctx) -> Result<()> {
        if let Some((sender, ref_event_id)) = self.last_replacement_update.take() {
            ctx.send(
                sender,
                ref_event_id,
                NetworkMsg::RemoveNeighbourAck(RemoveNeighbourAck),
            );
        }
        Ok(())
    }

    /// All `ReplacementUpdate` acks arrived: the swap is visible everywhere,
    /// release the old parent.
    fn replacement_update_acks_complete(&mut self, ctx: &mut Ctx) -> Result<()> {
        if let Some(old_parent) = self.old_parent.take() {
            let unlock = NetworkMsg::UnlockNeighbour(UnlockNeighbour);
            if old_parent.same_position(&ctx.this_node()) {
                // we replaced our own parent; the lock is ours now
                let header = crate::messaging::MsgHeader::new(
                    ctx.this_node(),
                    ctx.this_node(),
                    self.leaving_event_id,
                );
                ctx.deliver_local(WireMsg::new(header, unlock));
            } else if old_parent.is_initialised() {
                ctx.send(old_parent, self.leaving_event_id, unlock);
            }
        }

        self.in_leave_progress = false;
        self.leaving_event_id = 0;
        self.replacing_node = None;
        Ok(())
    }

    fn remove_neighbour_acks_complete(&mut self, ctx: &mut Ctx) -> Result<()> {
        if let Some((requester, ref_event_id)) = self.current_signoff_request.clone() {
            ctx.send(
                requester,
                ref_event_id,
                NetworkMsg::SignoffParentAnswer(SignoffParentAnswer { successful: true }),
            );
        }
        Ok(())
    }

    // ---- ack plumbing ----

    fn wait_for_acks(&mut self, ctx: &mut Ctx, count: u32, action: AckAction) -> Result<()> {
        if count == 0 {
            return self.complete(ctx, action);
        }
        self.ack_waiters.push_back(AckWaiter {
            remaining: count,
            action,
        });
        Ok(())
    }

    fn process_remove_neighbour_ack(&mut self, ctx: &mut Ctx) -> Result<()> {
        match self.ack_waiters.front_mut() {
            Some(waiter) => {
                waiter.remaining = waiter.remaining.saturating_sub(1);
                if waiter.remaining == 0 {
                    let action = self
                        .ack_waiters
                        .pop_front()
                        .expect("front was just observed")
                        .action;
                    return self.complete(ctx, action);
                }
                Ok(())
            }
            None => {
                debug!("acknowledgement without a pending aggregation; dropping");
                Ok(())
            }
        }
    }

    fn complete(&mut self, ctx: &mut Ctx, action: AckAction) -> Result<()> {
        match action {
            AckAction::RemoveNeighbourAcks => self.remove_neighbour_acks_complete(ctx),
            AckAction::SignoffNeighbourAdjacents => self.signoff_neighbour_adjacents_complete(ctx),
            AckAction::ReplacementUpdateAcks => self.replacement_update_acks_complete(ctx),
            AckAction::UpdateForwardAck => self.update_forward_ack_complete(ctx),
        }
    }

    // ---- unlocking ----

    fn process_unlock_neighbour(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        *ctx.node_locked = false;
        self.current_signoff_request = None;
        let ref_event_id = msg.header().ref_event_id();

        if self.locked_right_neighbour {
            match Self::lock_target_right(ctx.routing) {
                LockTarget::Direct(right) => ctx.send(
                    right,
                    ref_event_id,
                    NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                ),
                LockTarget::Remote(target) => ctx.send_or_route(
                    target,
                    ref_event_id,
                    NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                ),
                LockTarget::Nobody => {}
            }
            self.locked_right_neighbour = false;
        }

        if self.locked_left_neighbour {
            match Self::lock_target_left(ctx.routing) {
                LockTarget::Direct(left) => ctx.send(
                    left,
                    ref_event_id,
                    NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                ),
                LockTarget::Remote(target) => ctx.send_or_route(
                    target,
                    ref_event_id,
                    NetworkMsg::UnlockNeighbour(UnlockNeighbour),
                ),
                LockTarget::Nobody => {}
            }
            self.locked_left_neighbour = false;
        }
        Ok(())
    }

    /// The offered replacement never acked; give up this round and stay
    /// connected (the departure retry will try again).
    pub(crate) fn on_replacement_ack_timeout(&mut self) {
        debug!("replacement ack timed out; reverting to connected");
        self.in_leave_progress = false;
        self.replacing_node = None;
    }

    /// No offer arrived in time at the leaving node.
    pub(crate) fn on_replacement_offer_timeout(&mut self) {
        debug!("replacement offer timed out; reverting to connected");
        self.in_leave_progress = false;
        if self.leaving_event_id != 0 {
            self.leaving_event_id = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::test_peer;

    #[test]
    fn leaf_on_deepest_level_can_leave_directly() {
        let mut routing = RoutingInformation::new(test_peer(1, 1, 2, 2000));
        let algorithm = LeaveAlgorithm::new();
        assert!(algorithm.can_leave_without_replacement(&routing));

        routing.set_child(test_peer(2, 3, 2, 2001), 1, 0).unwrap();
        assert!(!algorithm.can_leave_without_replacement(&routing));
    }

    #[test]
    fn nodes_above_occupied_levels_need_replacements() {
        let mut routing = RoutingInformation::new(test_peer(1, 0, 2, 2000));
        routing
            .update_rt_neighbour_child(test_peer(2, 2, 2, 2002), 0)
            .unwrap();
        let algorithm = LeaveAlgorithm::new();
        assert!(!algorithm.can_leave_without_replacement(&routing));
    }

    #[test]
    fn replacement_search_descends_first() {
        let mut routing = RoutingInformation::new(test_peer(1, 0, 2, 2000));
        routing.set_child(test_peer(2, 0, 2, 2001), 0, 0).unwrap();
        let algorithm = LeaveAlgorithm::new();
        let hop = algorithm.find_replacement_next_hop(&routing).unwrap();
        assert_eq!(hop.level(), 2);
    }

    #[test]
    fn replacement_search_walks_towards_the_fill_front() {
        // level 2 fills right to left: the front is to the left
        let mut routing = RoutingInformation::new(test_peer(2, 2, 2, 2000));
        routing
            .update_rt_neighbour(test_peer(2, 1, 2, 2001), 0)
            .unwrap();
        let algorithm = LeaveAlgorithm::new();
        let hop = algorithm.find_replacement_next_hop(&routing).unwrap();
        assert_eq!((hop.level(), hop.number()), (2, 1));

        // nothing to our left: the search ends at us
        let routing = RoutingInformation::new(test_peer(2, 0, 2, 2002));
        assert!(algorithm.find_replacement_next_hop(&routing).is_none());
    }
}
