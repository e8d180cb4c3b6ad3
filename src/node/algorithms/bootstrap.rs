// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Multicast bootstrap: a joining node probes the group, connected nodes
//! with spare capacity answer, and the first valid answer becomes the join
//! target once the response window closes.

use super::{join, Ctx};
use crate::error::Result;
use crate::messaging::system::{BootstrapDiscover, BootstrapResponse, NetworkMsg};
use crate::messaging::WireMsg;
use crate::node::fsm::{FsmState, TimeoutKind};
use crate::node::procedure_info::ProcedureKey;
use crate::types::Peer;

#[derive(Debug, Default)]
pub(crate) struct BootstrapAlgorithm {
    /// The first usable candidate that answered our probe.
    candidate: Option<Peer>,
}

impl BootstrapAlgorithm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sends the multicast probe and opens the response window.
    pub(crate) fn initiate(&mut self, ctx: &mut Ctx) -> Result<()> {
        self.candidate = None;
        if ctx.procedures.has_event_id(ProcedureKey::Bootstrap) {
            ctx.procedures.remove_event_id(ProcedureKey::Bootstrap)?;
        }

        let group = Peer::addressed(ctx.config.fanout, ctx.config.multicast_addr)?;
        let discover = BootstrapDiscover {
            discovery_message: "minhton bootstrap".to_string(),
        };
        ctx.multicast(group, 0, NetworkMsg::BootstrapDiscover(discover));
        ctx.arm_timeout(TimeoutKind::BootstrapResponse);
        Ok(())
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        match msg.msg() {
            NetworkMsg::BootstrapDiscover(_) => self.process_discover(ctx, msg),
            NetworkMsg::BootstrapResponse(response) => {
                self.process_response(ctx, &response.node_to_join)
            }
            _ => Ok(()),
        }
    }

    /// Somebody is probing for an entry point. Only connected nodes with a
    /// free child slot on the fill side answer; everyone else stays silent.
    fn process_discover(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        if ctx.fsm_state != FsmState::Connected {
            return Ok(());
        }
        if !join::accepts_joins(ctx.routing) {
            return Ok(());
        }

        let node_to_join = ctx.this_node();
        ctx.send(
            msg.sender().clone(),
            msg.header().event_id(),
            NetworkMsg::BootstrapResponse(BootstrapResponse { node_to_join }),
        );
        Ok(())
    }

    /// A candidate answered. The first valid one wins; stragglers and stray
    /// responses in other states are dropped silently (multicast is
    /// unreliable by design).
    fn process_response(&mut self, ctx: &mut Ctx, node_to_join: &Peer) -> Result<()> {
        if ctx.fsm_state != FsmState::WaitForBootstrapResponse {
            return Ok(());
        }
        if self.candidate.is_none() && node_to_join.is_initialised() {
            debug!("bootstrap candidate: {}", node_to_join);
            self.candidate = Some(node_to_join.clone());
        }
        Ok(())
    }

    /// Whether the response window closed with a usable candidate.
    pub(crate) fn is_response_valid(&self) -> bool {
        self.candidate.is_some()
    }

    /// Hands out the chosen candidate, clearing it.
    pub(crate) fn take_candidate(&mut self) -> Option<Peer> {
        self.candidate.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::test_peer;

    #[test]
    fn first_candidate_wins() {
        let mut algorithm = BootstrapAlgorithm::new();
        assert!(!algorithm.is_response_valid());

        // direct state manipulation: candidates only register while waiting
        algorithm.candidate = Some(test_peer(0, 0, 2, 2000));
        assert!(algorithm.is_response_valid());
        assert_eq!(algorithm.take_candidate().unwrap().level(), 0);
        assert!(!algorithm.is_response_valid());
    }
}
