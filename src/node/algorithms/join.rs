// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The join protocol.
//!
//! A `Join` is forwarded through the tree until it reaches the node owning
//! the current fill front: the parent whose next child slot, in the fill
//! direction of the child level, is the overlay's next position. That node
//! allocates the slot, answers with `JoinAccept`, and — once the entering
//! node acknowledged — introduces the new child to everyone who needs to
//! know it.

use super::{adjacent_left_from, adjacent_right_from, Ctx};
use crate::error::Result;
use crate::messaging::system::{
    Join, JoinAccept, JoinAcceptAck, NetworkMsg, UpdateNeighbours,
};
use crate::messaging::WireMsg;
use crate::node::fsm::TimeoutKind;
use crate::node::procedure_info::ProcedureKey;
use crate::routing::calculations::fill_level_right_to_left;
use crate::routing::{NeighbourRelationship, RoutingInformation};
use crate::types::{Peer, PeerStatus, Position};

/// The child slot index a joining node would be placed at, honouring the
/// fill direction of the child level. `None` when all slots are taken.
pub(crate) fn next_child_slot(routing: &RoutingInformation) -> Option<u16> {
    let children = routing.children();
    if children.is_empty() {
        return None;
    }
    let child_level = routing.this_node().level() + 1;
    if fill_level_right_to_left(child_level) {
        (0..children.len())
            .rev()
            .find(|&index| !children[index].is_initialised())
            .map(|index| index as u16)
    } else {
        (0..children.len())
            .find(|&index| !children[index].is_initialised())
            .map(|index| index as u16)
    }
}

/// Whether this node may answer a bootstrap probe: it accepts joins only
/// with a free child slot on the fill side.
pub(crate) fn accepts_joins(routing: &RoutingInformation) -> bool {
    next_child_slot(routing).is_some()
}

#[derive(Clone, Debug)]
struct PendingChild {
    child: Peer,
    index: u16,
    adjacent_left: Option<Peer>,
    adjacent_right: Option<Peer>,
}

/// Join protocol state at one node.
#[derive(Debug, Default)]
pub(crate) struct JoinAlgorithm {
    /// The child we offered a slot to and whose ack is outstanding.
    pending_child: Option<PendingChild>,
    /// Where our own last join attempt was directed, for the retry path.
    last_join_target: Option<Peer>,
}

impl JoinAlgorithm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts our own join towards `target`.
    pub(crate) fn initiate(&mut self, ctx: &mut Ctx, target: Peer) {
        self.last_join_target = Some(target.clone());
        let entering_node = ctx.this_node();
        ctx.send(target, 0, NetworkMsg::Join(Join { entering_node }));
        ctx.arm_timeout(TimeoutKind::JoinAcceptResponse);
    }

    /// The target of the last join attempt, for the retry timer.
    pub(crate) fn retry_target(&self) -> Option<Peer> {
        self.last_join_target.clone()
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        match msg.msg() {
            NetworkMsg::Join(join) => self.process_join(ctx, msg, join),
            NetworkMsg::JoinAccept(accept) => self.process_join_accept(ctx, msg, accept),
            NetworkMsg::JoinAcceptAck(_) => self.process_join_accept_ack(ctx, msg),
            _ => Ok(()),
        }
    }

    /// A join request arrived: accept it here or forward it towards the fill
    /// front.
    fn process_join(&mut self, ctx: &mut Ctx, msg: &WireMsg, join: &Join) -> Result<()> {
        let this_node = ctx.this_node();
        let child_level = this_node.level() + 1;
        let rtl = fill_level_right_to_left(child_level);

        // The front-most parent on our level that still has a free slot gets
        // the join; in fill order that parent's slots come first.
        if let Some(front) = self.front_parent_with_free_slot(ctx.routing, rtl) {
            if front.same_position(&this_node) {
                return self.accept_child(ctx, msg, join);
            }
            debug!("forwarding join towards the fill front at {}", front);
            ctx.send(front, msg.header().ref_event_id(), NetworkMsg::Join(join.clone()));
            return Ok(());
        }

        // Every parent we know of on this level is saturated: descend one
        // level via our front-most child.
        let children = ctx.routing.children();
        let descend_rtl = fill_level_right_to_left(child_level + 1);
        let next = if descend_rtl {
            children.iter().rev().find(|child| child.is_initialised())
        } else {
            children.iter().find(|child| child.is_initialised())
        };
        match next {
            Some(child) => {
                let child = child.clone();
                debug!("descending join to {}", child);
                ctx.send(child, msg.header().ref_event_id(), NetworkMsg::Join(join.clone()));
                Ok(())
            }
            None => {
                // no slot and no child to descend to; accept into whatever
                // slot remains rather than dropping the joiner
                self.accept_child(ctx, msg, join)
            }
        }
    }

    /// Among ourselves and the same-level neighbours we know, the parent
    /// closest to the fill front that still has a free child slot.
    fn front_parent_with_free_slot(
        &self,
        routing: &RoutingInformation,
        rtl: bool,
    ) -> Option<Peer> {
        let this_node = routing.this_node().clone();
        let mut candidates: Vec<(Peer, bool)> = vec![(this_node, next_child_slot(routing).is_some())];

        let fanout = usize::from(this_node_fanout(routing));
        for neighbour in routing.initialised_rt_neighbours() {
            let known_children: Vec<&Peer> = routing
                .rt_neighbour_children()
                .iter()
                .filter(|child| {
                    child.level() == neighbour.level() + 1
                        && child.number() / this_node_fanout(routing) as u32 == neighbour.number()
                })
                .collect();
            let occupied = known_children
                .iter()
                .filter(|child| child.is_initialised())
                .count();
            candidates.push((neighbour, occupied < fanout));
        }

        candidates.sort_by_key(|(peer, _)| peer.number());
        if rtl {
            candidates.reverse();
        }

        // Walk front to back; stop at the first parent that plausibly owns
        // the front: it has a free slot and either some occupied slot or no
        // parent in front of it has capacity left.
        candidates
            .into_iter()
            .find(|(_, has_free)| *has_free)
            .map(|(peer, _)| peer)
    }

    /// Allocate the slot, answer with the neighbourhood the entering node
    /// needs, and wait for its ack.
    fn accept_child(&mut self, ctx: &mut Ctx, msg: &WireMsg, join: &Join) -> Result<()> {
        let index = match next_child_slot(ctx.routing) {
            Some(index) => index,
            None => {
                warn!("join reached a saturated node with nowhere to forward; dropping");
                return Ok(());
            }
        };

        let this_node = ctx.this_node();
        let fanout = this_node.fanout();
        let slot = ctx.routing.child(index)?.clone();
        let position = Position::new(slot.level(), slot.number(), fanout)?;
        let child = Peer::from_parts(position, join.entering_node.addr());

        ctx.routing.set_child(child.clone(), index, msg.header().event_id())?;

        // the new child slides into the in-order sequence next to us
        let mut candidates = ctx.routing.all_unique_known_existing_neighbours();
        candidates.push(this_node.clone());
        let adjacent_left = adjacent_left_from(&child, &candidates);
        let adjacent_right = adjacent_right_from(&child, &candidates);

        // the new child becomes our adjacent only when nothing we know sits
        // between it and us
        let child_value = child.position().horizontal_value();
        if child_value < this_node.position().horizontal_value() {
            let current = ctx.routing.adjacent_left();
            if !current.is_initialised() || current.position().horizontal_value() < child_value {
                ctx.routing.set_adjacent_left(child.clone(), msg.header().event_id())?;
            }
        } else {
            let current = ctx.routing.adjacent_right();
            if !current.is_initialised() || child_value < current.position().horizontal_value() {
                ctx.routing.set_adjacent_right(child.clone(), msg.header().event_id())?;
            }
        }

        let accept = JoinAccept {
            fanout,
            adjacent_left: adjacent_left.clone().unwrap_or_default(),
            adjacent_right: adjacent_right.clone().unwrap_or_default(),
            routing_table_neighbours: ctx.routing.known_neighbours_of(&child)?,
        };

        if ctx.procedures.has_event_id(ProcedureKey::AcceptChild) {
            ctx.procedures.remove_event_id(ProcedureKey::AcceptChild)?;
        }
        ctx.procedures
            .save_event_id(ProcedureKey::AcceptChild, msg.header().event_id())?;

        self.pending_child = Some(PendingChild {
            child: child.clone(),
            index,
            adjacent_left,
            adjacent_right,
        });

        ctx.send(
            child,
            msg.header().event_id(),
            NetworkMsg::JoinAccept(Box::new(accept)),
        );
        ctx.arm_timeout(TimeoutKind::JoinAcceptAckResponse);
        Ok(())
    }

    /// We were accepted: adopt the offered position, ingest the shipped
    /// neighbourhood and complete the handshake.
    fn process_join_accept(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        accept: &JoinAccept,
    ) -> Result<()> {
        ctx.cancel_timeout(TimeoutKind::JoinAcceptResponse);

        let offered = msg.header().target().position().clone();
        ctx.routing.set_position(offered);
        ctx.routing
            .set_node_status(PeerStatus::Running, msg.header().event_id());

        let parent = msg.sender().clone();
        ctx.routing.set_parent(parent.clone(), msg.header().event_id())?;

        if accept.adjacent_left.is_initialised() {
            ctx.routing
                .set_adjacent_left(accept.adjacent_left.clone(), msg.header().event_id())?;
        }
        if accept.adjacent_right.is_initialised() {
            ctx.routing
                .set_adjacent_right(accept.adjacent_right.clone(), msg.header().event_id())?;
        }
        for neighbour in &accept.routing_table_neighbours {
            if neighbour.is_initialised() {
                ctx.routing
                    .update_rt_neighbour(neighbour.clone(), msg.header().event_id())?;
            }
        }

        info!("joined the overlay at {}", ctx.routing.this_node());
        ctx.send(
            parent,
            msg.header().event_id(),
            NetworkMsg::JoinAcceptAck(JoinAcceptAck),
        );
        Ok(())
    }

    /// The entering node confirmed: introduce it to every neighbour that
    /// needs to learn the new position.
    fn process_join_accept_ack(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        ctx.cancel_timeout(TimeoutKind::JoinAcceptAckResponse);
        if ctx.procedures.has_event_id(ProcedureKey::AcceptChild) {
            ctx.procedures.remove_event_id(ProcedureKey::AcceptChild)?;
        }

        let pending = match self.pending_child.take() {
            Some(pending) => pending,
            None => {
                debug!("join accept ack without a pending child; dropping");
                return Ok(());
            }
        };
        let ref_event_id = msg.header().ref_event_id();
        let child = pending.child;

        // our same-level neighbours now have a new routing-table neighbour
        // child
        for neighbour in ctx.routing.initialised_rt_neighbours() {
            ctx.send(
                neighbour,
                ref_event_id,
                NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                    neighbours_and_relationships: vec![(
                        child.clone(),
                        NeighbourRelationship::RoutingTableNeighbourChild,
                    )],
                    should_acknowledge: false,
                }),
            );
        }

        // the child's own routing-table neighbours learn it directly
        for neighbour in ctx.routing.known_neighbours_of(&child)? {
            if neighbour.is_initialised() {
                ctx.send(
                    neighbour,
                    ref_event_id,
                    NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                        neighbours_and_relationships: vec![(
                            child.clone(),
                            NeighbourRelationship::RoutingTableNeighbour,
                        )],
                        should_acknowledge: false,
                    }),
                );
            }
        }

        // adjacency ripples: the peers flanking the new position point their
        // adjacents at it
        if let Some(left) = pending.adjacent_left {
            if !left.same_position(&ctx.this_node()) {
                ctx.send_or_route(
                    left,
                    ref_event_id,
                    NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                        neighbours_and_relationships: vec![(
                            child.clone(),
                            NeighbourRelationship::AdjacentRight,
                        )],
                        should_acknowledge: false,
                    }),
                );
            }
        }
        if let Some(right) = pending.adjacent_right {
            if !right.same_position(&ctx.this_node()) {
                ctx.send_or_route(
                    right,
                    ref_event_id,
                    NetworkMsg::UpdateNeighbours(UpdateNeighbours {
                        neighbours_and_relationships: vec![(
                            child.clone(),
                            NeighbourRelationship::AdjacentLeft,
                        )],
                        should_acknowledge: false,
                    }),
                );
            }
        }

        Ok(())
    }

    /// The ack never came: free the slot again, silently.
    pub(crate) fn on_accept_ack_timeout(&mut self, ctx: &mut Ctx) -> Result<()> {
        if let Some(pending) = self.pending_child.take() {
            debug!("join accept ack timed out; freeing child slot {}", pending.index);
            ctx.routing.reset_child(pending.index, 0)?;
            if ctx.procedures.has_event_id(ProcedureKey::AcceptChild) {
                ctx.procedures.remove_event_id(ProcedureKey::AcceptChild)?;
            }
        }
        Ok(())
    }
}

fn this_node_fanout(routing: &RoutingInformation) -> u16 {
    routing.this_node().fanout()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::test_peer;

    #[test]
    fn slots_follow_the_fill_direction() {
        // root's children live on level 1 which fills left to right
        let root = RoutingInformation::new(test_peer(0, 0, 2, 2000));
        assert_eq!(next_child_slot(&root), Some(0));

        // level-1 nodes have children on level 2 which fills right to left
        let inner = RoutingInformation::new(test_peer(1, 1, 2, 2001));
        assert_eq!(next_child_slot(&inner), Some(1));
    }

    #[test]
    fn saturated_nodes_refuse_bootstrap_joins() {
        let mut root = RoutingInformation::new(test_peer(0, 0, 2, 2000));
        assert!(accepts_joins(&root));
        root.set_child(test_peer(1, 0, 2, 2001), 0, 0).unwrap();
        root.set_child(test_peer(1, 1, 2, 2002), 1, 0).unwrap();
        assert!(!accepts_joins(&root));
    }
}
