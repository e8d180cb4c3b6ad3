// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Search-exact: greedy positional routing of an opaque inner message
//! towards a target whose logical position is known but whose transport
//! address is not. Each hop moves strictly closer in the horizontal order or
//! bounces a failure back to the origin.

use super::Ctx;
use crate::error::Result;
use crate::messaging::system::{NetworkMsg, SearchExact, SearchExactFailure};
use crate::messaging::WireMsg;
use crate::types::Peer;

#[derive(Debug, Default)]
pub(crate) struct SearchExactAlgorithm;

impl SearchExactAlgorithm {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Starts (or continues) routing `payload` towards `destination`.
    pub(crate) fn initiate(
        &mut self,
        ctx: &mut Ctx,
        destination: Peer,
        payload: Box<WireMsg>,
    ) -> Result<()> {
        self.hop(ctx, destination, payload)
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        if let NetworkMsg::SearchExact(search) = msg.msg() {
            let destination = search.payload.header().target().clone();
            self.hop(ctx, destination, search.payload.clone())
        } else {
            Ok(())
        }
    }

    fn hop(&mut self, ctx: &mut Ctx, destination: Peer, payload: Box<WireMsg>) -> Result<()> {
        let this_node = ctx.this_node();

        // arrived: hand the inner message to our own receive path
        if this_node.same_position(&destination) {
            trace!("search-exact arrived at {}", this_node);
            let mut inner = *payload;
            inner.header_mut().set_target(this_node);
            ctx.deliver_local(inner);
            return Ok(());
        }

        // if we happen to know the target's address, skip the greedy walk
        if let Some(known) = ctx
            .routing
            .known_peer_at(destination.level(), destination.number())
        {
            let header =
                crate::messaging::MsgHeader::new(this_node, known, payload.header().ref_event_id());
            ctx.cmds.push(super::Cmd::Send(WireMsg::new(
                header,
                NetworkMsg::SearchExact(SearchExact { payload }),
            )));
            return Ok(());
        }

        let target_value = destination.position().horizontal_value();
        let own_distance = (this_node.position().horizontal_value() - target_value).abs();

        let next_hop = ctx
            .routing
            .all_unique_known_existing_neighbours()
            .into_iter()
            .filter(|peer| (peer.position().horizontal_value() - target_value).abs() < own_distance)
            .min_by(|a, b| {
                let da = (a.position().horizontal_value() - target_value).abs();
                let db = (b.position().horizontal_value() - target_value).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });

        match next_hop {
            Some(hop) => {
                trace!("search-exact hop {} -> {}", this_node, hop);
                let ref_event_id = payload.header().ref_event_id();
                ctx.send(
                    hop,
                    ref_event_id,
                    NetworkMsg::SearchExact(SearchExact { payload }),
                );
                Ok(())
            }
            None => {
                // nobody we know is closer; bounce to the inner sender
                let origin = payload.header().sender().clone();
                warn!(
                    "search-exact dead end at {} towards {}",
                    this_node, destination
                );
                let ref_event_id = payload.header().ref_event_id();
                ctx.send(
                    origin,
                    ref_event_id,
                    NetworkMsg::SearchExactFailure(SearchExactFailure {
                        undeliverable: payload,
                    }),
                );
                Ok(())
            }
        }
    }
}
