// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Handling of the neighbour update broadcasts: removals, updates, the
//! combined removal+update, and the neighbour introspection pair.

use super::Ctx;
use crate::error::{Error, Result};
use crate::messaging::system::{
    GetNeighbours, InformAboutNeighbours, NetworkMsg, RemoveNeighbour, RemoveNeighbourAck,
    UpdateNeighbours,
};
use crate::messaging::WireMsg;
use crate::routing::NeighbourRelationship;

#[derive(Debug, Default)]
pub(crate) struct ResponseAlgorithm;

impl ResponseAlgorithm {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        match msg.msg() {
            NetworkMsg::RemoveNeighbour(remove) => {
                self.apply_remove(ctx, msg, remove)?;
                if remove.acknowledge {
                    self.ack(ctx, msg);
                }
                Ok(())
            }
            NetworkMsg::UpdateNeighbours(update) => {
                self.apply_update(ctx, msg, update)?;
                if update.should_acknowledge {
                    self.ack(ctx, msg);
                }
                Ok(())
            }
            NetworkMsg::RemoveAndUpdateNeighbours(combined) => {
                self.apply_remove(ctx, msg, &combined.remove)?;
                self.apply_update(ctx, msg, &combined.update)?;
                if combined.should_acknowledge {
                    self.ack(ctx, msg);
                }
                Ok(())
            }
            NetworkMsg::GetNeighbours(request) => self.process_get_neighbours(ctx, msg, request),
            NetworkMsg::InformAboutNeighbours(answer) => {
                self.process_inform_about_neighbours(ctx, msg, answer)
            }
            NetworkMsg::Empty(_) => Ok(()),
            _ => Ok(()),
        }
    }

    fn ack(&self, ctx: &mut Ctx, msg: &WireMsg) {
        ctx.send(
            msg.sender().clone(),
            msg.header().ref_event_id(),
            NetworkMsg::RemoveNeighbourAck(RemoveNeighbourAck),
        );
    }

    fn apply_remove(&self, ctx: &mut Ctx, msg: &WireMsg, remove: &RemoveNeighbour) -> Result<()> {
        match ctx
            .routing
            .remove_neighbour(&remove.removed_position_node, msg.header().ref_event_id())
        {
            Ok(()) => Ok(()),
            Err(Error::CannotRemoveParent) => {
                // A removal aimed at our parent slot is a protocol violation
                // of the sender; ignore it rather than tearing the tree.
                warn!(
                    "ignoring removal of our parent {}",
                    remove.removed_position_node
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn apply_update(&self, ctx: &mut Ctx, msg: &WireMsg, update: &UpdateNeighbours) -> Result<()> {
        let ref_event_id = msg.header().ref_event_id();
        for (peer, relationship) in &update.neighbours_and_relationships {
            let result = match relationship {
                NeighbourRelationship::Parent => ctx.routing.set_parent(peer.clone(), ref_event_id),
                NeighbourRelationship::Child => {
                    let fanout = u32::from(ctx.routing.fanout()?);
                    let index = (peer.number() % fanout) as u16;
                    ctx.routing.set_child(peer.clone(), index, ref_event_id)
                }
                NeighbourRelationship::AdjacentLeft => {
                    ctx.routing.set_adjacent_left(peer.clone(), ref_event_id)
                }
                NeighbourRelationship::AdjacentRight => {
                    ctx.routing.set_adjacent_right(peer.clone(), ref_event_id)
                }
                NeighbourRelationship::RoutingTableNeighbour => {
                    ctx.routing.update_rt_neighbour(peer.clone(), ref_event_id)
                }
                NeighbourRelationship::RoutingTableNeighbourChild => ctx
                    .routing
                    .update_rt_neighbour_child(peer.clone(), ref_event_id),
            };
            if let Err(error) = result {
                // an update that no longer fits our view is stale, not fatal
                debug!(
                    "dropping neighbour update {} as {:?}: {}",
                    peer, relationship, error
                );
            }
        }
        Ok(())
    }

    fn process_get_neighbours(
        &self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        request: &GetNeighbours,
    ) -> Result<()> {
        let mut requested = Vec::new();
        for relationship in &request.relationships {
            match relationship {
                NeighbourRelationship::Parent => {
                    if ctx.routing.parent().is_initialised() {
                        requested.push(ctx.routing.parent().clone());
                    }
                }
                NeighbourRelationship::Child => {
                    requested.extend(ctx.routing.initialised_children())
                }
                NeighbourRelationship::AdjacentLeft => {
                    if ctx.routing.adjacent_left().is_initialised() {
                        requested.push(ctx.routing.adjacent_left().clone());
                    }
                }
                NeighbourRelationship::AdjacentRight => {
                    if ctx.routing.adjacent_right().is_initialised() {
                        requested.push(ctx.routing.adjacent_right().clone());
                    }
                }
                NeighbourRelationship::RoutingTableNeighbour => {
                    requested.extend(ctx.routing.initialised_rt_neighbours())
                }
                NeighbourRelationship::RoutingTableNeighbourChild => {
                    requested.extend(ctx.routing.initialised_rt_neighbour_children())
                }
            }
        }

        ctx.send(
            msg.sender().clone(),
            msg.header().event_id(),
            NetworkMsg::InformAboutNeighbours(InformAboutNeighbours {
                requested_neighbours: requested,
            }),
        );
        Ok(())
    }

    fn process_inform_about_neighbours(
        &self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        answer: &InformAboutNeighbours,
    ) -> Result<()> {
        for peer in &answer.requested_neighbours {
            if peer.is_initialised() {
                if let Err(error) = ctx
                    .routing
                    .update_neighbour(peer.clone(), msg.header().ref_event_id())
                {
                    debug!("dropping informed neighbour {}: {}", peer, error);
                }
            }
        }
        Ok(())
    }
}
