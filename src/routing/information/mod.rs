// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The per-node neighbour database.
//!
//! Holds everything a node knows about its surroundings: parent, children,
//! the two in-order adjacents, the same-level routing table and the children
//! of the routing-table neighbours. Logical positions of all slots are fixed
//! the moment the own position is set; mutations only ever touch the physical
//! half (except for the adjacents, whose positions legitimately change).
//!
//! Every mutation is buffered as a [`RoutingEvent`]; the node core drains the
//! buffer after each handler run and feeds it to the DSN handler and the log.

mod queries;
mod table;

use crate::error::{Error, Result};
use crate::routing::calculations::{children as calc_children, parent as calc_parent};
use crate::types::{Peer, PeerStatus, Position};
use serde::{Deserialize, Serialize};

/// The role a peer plays in our routing information.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NeighbourRelationship {
    Parent = 0,
    Child = 1,
    AdjacentLeft = 2,
    AdjacentRight = 3,
    RoutingTableNeighbour = 4,
    RoutingTableNeighbourChild = 5,
}

/// A buffered change notification.
#[derive(Clone, Debug)]
pub enum RoutingEvent {
    /// A neighbour entry changed.
    NeighbourChanged {
        new_node: Peer,
        relationship: NeighbourRelationship,
        old_node: Peer,
        index: u16,
        ref_event_id: u64,
    },
    /// Our own position changed (set or reset).
    PositionChanged { previous: Peer, current: Peer },
}

/// All routing information a node holds about itself and its neighbours.
#[derive(Clone, Debug)]
pub struct RoutingInformation {
    this_node: Peer,
    parent: Peer,
    adjacent_left: Peer,
    adjacent_right: Peer,
    children: Vec<Peer>,
    rt_neighbours: Vec<Peer>,
    rt_neighbour_children: Vec<Peer>,
    // index of the first right-side routing table neighbour; the first right
    // routing table neighbour child sits at (this * fanout)
    right_table_start: usize,
    events: Vec<RoutingEvent>,
}

impl RoutingInformation {
    /// Routing information for `this_node`. If the peer already has a
    /// position (the root case) all neighbour slots are initialised at once.
    pub fn new(this_node: Peer) -> Self {
        let mut info = Self {
            this_node,
            parent: Peer::default(),
            adjacent_left: Peer::default(),
            adjacent_right: Peer::default(),
            children: Vec::new(),
            rt_neighbours: Vec::new(),
            rt_neighbour_children: Vec::new(),
            right_table_start: 0,
            events: Vec::new(),
        };
        if info.this_node.is_valid_peer() {
            info.init_slots();
        }
        info
    }

    /// Our own peer record.
    pub fn this_node(&self) -> &Peer {
        &self.this_node
    }

    /// The tree fanout. Fails before the own peer is known.
    pub fn fanout(&self) -> Result<u16> {
        if self.this_node.fanout() == 0 {
            return Err(Error::Uninitialised);
        }
        Ok(self.this_node.fanout())
    }

    /// Sets our position, fixing all logical neighbour slots. The physical
    /// half of the own peer is kept.
    pub fn set_position(&mut self, position: Position) {
        let previous = self.this_node.clone();
        self.this_node.set_position(position);

        if self.this_node.is_valid_peer() {
            self.init_slots();
        } else {
            self.clear_slots();
        }

        self.events.push(RoutingEvent::PositionChanged {
            previous,
            current: self.this_node.clone(),
        });
    }

    /// Clears our logical half and every neighbour entry. Subscribers see a
    /// single position-change notification, not one per neighbour.
    pub fn reset_position(&mut self, event_id: u64) {
        let previous = self.this_node.clone();
        let fanout = self.this_node.fanout();
        let position = Position::with_fanout(fanout).unwrap_or_default();
        self.this_node.set_position(position);
        self.clear_slots();

        debug!("node left its position (event {})", event_id);
        self.events.push(RoutingEvent::PositionChanged {
            previous,
            current: self.this_node.clone(),
        });
    }

    /// Records a lifecycle status change of the own node.
    pub fn set_node_status(&mut self, status: PeerStatus, event_id: u64) {
        match status {
            PeerStatus::Uninit => debug!("node uninitialised (event {})", event_id),
            PeerStatus::Running => debug!("node running (event {})", event_id),
            PeerStatus::Left => debug!("node left (event {})", event_id),
            PeerStatus::Failed => warn!("node failed (event {})", event_id),
        }
        self.this_node.set_status(status);
    }

    /// Drains the buffered change notifications.
    pub fn take_events(&mut self) -> Vec<RoutingEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- parent ----

    pub fn parent(&self) -> &Peer {
        &self.parent
    }

    /// Updates the parent. The slot's logical position is fixed; only a peer
    /// carrying exactly that position (and our fanout) is accepted.
    pub fn set_parent(&mut self, parent: Peer, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if self.this_node.level() == 0 {
            return Err(Error::RootHasNoParent);
        }
        if !self.parent.position().same_slot(parent.position()) {
            return Err(Error::LogicalMismatch);
        }
        if parent.fanout() != self.fanout()? {
            return Err(Error::FanoutMismatch);
        }
        if !parent.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }

        if parent.addr() != self.parent.addr() {
            let old_node = std::mem::replace(&mut self.parent, parent);
            self.notify(
                self.parent.clone(),
                NeighbourRelationship::Parent,
                old_node,
                0,
                ref_event_id,
            );
        }
        Ok(())
    }

    // ---- children ----

    pub fn children(&self) -> &[Peer] {
        &self.children
    }

    pub fn child(&self, index: u16) -> Result<&Peer> {
        self.ensure_initialised()?;
        let fanout = self.fanout()?;
        self.children
            .get(usize::from(index))
            .ok_or(Error::ChildIndexOutOfRange(index, fanout))
    }

    /// Fills the child slot `index` with `child`, whose logical position must
    /// match the precomputed slot.
    pub fn set_child(&mut self, child: Peer, index: u16, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        let fanout = self.fanout()?;
        if index >= fanout {
            return Err(Error::ChildIndexOutOfRange(index, fanout));
        }
        if !self.children[usize::from(index)]
            .position()
            .same_slot(child.position())
        {
            return Err(Error::LogicalMismatch);
        }
        if child.fanout() != fanout {
            return Err(Error::FanoutMismatch);
        }
        if !child.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }

        if child.addr() != self.children[usize::from(index)].addr() {
            let old_node = std::mem::replace(&mut self.children[usize::from(index)], child);
            self.notify(
                self.children[usize::from(index)].clone(),
                NeighbourRelationship::Child,
                old_node,
                index,
                ref_event_id,
            );
        }
        Ok(())
    }

    /// Clears the physical half of child slot `index`; the logical slot stays.
    pub fn reset_child(&mut self, index: u16, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        let fanout = self.fanout()?;
        if index >= fanout {
            return Err(Error::ChildIndexOutOfRange(index, fanout));
        }
        if self.children[usize::from(index)].addr().is_some() {
            let old_node = self.children[usize::from(index)].clone();
            self.children[usize::from(index)].clear_addr();
            self.notify(
                self.children[usize::from(index)].clone(),
                NeighbourRelationship::Child,
                old_node,
                index,
                ref_event_id,
            );
        }
        Ok(())
    }

    // ---- adjacents ----

    pub fn adjacent_left(&self) -> &Peer {
        &self.adjacent_left
    }

    pub fn adjacent_right(&self) -> &Peer {
        &self.adjacent_right
    }

    /// Sets the in-order predecessor. Its horizontal value must lie strictly
    /// to our left.
    pub fn set_adjacent_left(&mut self, adjacent: Peer, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if adjacent.fanout() != self.fanout()? {
            return Err(Error::FanoutMismatch);
        }
        if !adjacent.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }
        if adjacent.position().horizontal_value() >= self.this_node.position().horizontal_value() {
            return Err(Error::WrongAdjacentSide);
        }

        if self.adjacent_left != adjacent {
            let old_node = std::mem::replace(&mut self.adjacent_left, adjacent);
            self.notify(
                self.adjacent_left.clone(),
                NeighbourRelationship::AdjacentLeft,
                old_node,
                0,
                ref_event_id,
            );
        }
        Ok(())
    }

    /// Sets the in-order successor. Its horizontal value must lie strictly to
    /// our right.
    pub fn set_adjacent_right(&mut self, adjacent: Peer, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if adjacent.fanout() != self.fanout()? {
            return Err(Error::FanoutMismatch);
        }
        if !adjacent.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }
        if adjacent.position().horizontal_value() <= self.this_node.position().horizontal_value() {
            return Err(Error::WrongAdjacentSide);
        }

        if self.adjacent_right != adjacent {
            let old_node = std::mem::replace(&mut self.adjacent_right, adjacent);
            self.notify(
                self.adjacent_right.clone(),
                NeighbourRelationship::AdjacentRight,
                old_node,
                0,
                ref_event_id,
            );
        }
        Ok(())
    }

    /// Clears the adjacent left entirely; adjacency positions are not fixed
    /// slots, so the logical half goes too.
    pub fn reset_adjacent_left(&mut self, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if self.adjacent_left.is_valid_peer() {
            let empty = self.empty_peer();
            let old_node = std::mem::replace(&mut self.adjacent_left, empty);
            self.notify(
                self.adjacent_left.clone(),
                NeighbourRelationship::AdjacentLeft,
                old_node,
                0,
                ref_event_id,
            );
        }
        Ok(())
    }

    /// Clears the adjacent right entirely.
    pub fn reset_adjacent_right(&mut self, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if self.adjacent_right.is_valid_peer() {
            let empty = self.empty_peer();
            let old_node = std::mem::replace(&mut self.adjacent_right, empty);
            self.notify(
                self.adjacent_right.clone(),
                NeighbourRelationship::AdjacentRight,
                old_node,
                0,
                ref_event_id,
            );
        }
        Ok(())
    }

    // ---- internals ----

    fn ensure_initialised(&self) -> Result<()> {
        if !self.this_node.is_valid_peer() {
            return Err(Error::Uninitialised);
        }
        Ok(())
    }

    /// An empty placeholder peer carrying only our fanout.
    fn empty_peer(&self) -> Peer {
        Peer::from_parts(
            Position::with_fanout(self.this_node.fanout()).unwrap_or_default(),
            None,
        )
    }

    fn notify(
        &mut self,
        new_node: Peer,
        relationship: NeighbourRelationship,
        old_node: Peer,
        index: u16,
        ref_event_id: u64,
    ) {
        trace!(
            "neighbour change: {:?} now {} (event {})",
            relationship,
            new_node,
            ref_event_id
        );
        self.events.push(RoutingEvent::NeighbourChanged {
            new_node,
            relationship,
            old_node,
            index,
            ref_event_id,
        });
    }

    /// Fixes the logical positions of parent, children and the routing table
    /// from our own position. Adjacents stay empty: their positions change
    /// over the lifetime of the overlay, the other slots never do.
    fn init_slots(&mut self) {
        let level = self.this_node.level();
        let number = self.this_node.number();
        let fanout = self.this_node.fanout();

        self.parent = Peer::default();
        if level > 0 {
            let (parent_level, parent_number) =
                calc_parent(level, number, fanout).expect("own position was validated");
            self.parent = Peer::unaddressed(parent_level, parent_number, fanout)
                .expect("parent of a valid position is valid");
        }

        self.children = calc_children(level, number, fanout)
            .expect("own position was validated")
            .into_iter()
            .map(|(l, n)| Peer::unaddressed(l, n, fanout).expect("child of a valid position"))
            .collect();

        self.adjacent_left = Peer::default();
        self.adjacent_right = Peer::default();

        self.init_routing_table();
    }

    fn clear_slots(&mut self) {
        self.parent = Peer::default();
        self.children = Vec::new();
        self.adjacent_left = Peer::default();
        self.adjacent_right = Peer::default();
        self.rt_neighbours = Vec::new();
        self.rt_neighbour_children = Vec::new();
        self.right_table_start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::{test_addr, test_peer};
    use assert_matches::assert_matches;

    fn info_at(level: u32, number: u32, fanout: u16) -> RoutingInformation {
        RoutingInformation::new(test_peer(level, number, fanout, 2000))
    }

    #[test]
    fn construction_fixes_the_slots() {
        let info = info_at(1, 1, 2);
        assert_eq!(info.parent().level(), 0);
        assert_eq!(info.parent().number(), 0);
        assert!(!info.parent().is_initialised());
        assert_eq!(info.children().len(), 2);
        assert_eq!(info.children()[0].number(), 2);
        assert_eq!(info.children()[1].number(), 3);
    }

    #[test]
    fn set_parent_validates() {
        let mut root = info_at(0, 0, 2);
        assert_matches!(
            root.set_parent(test_peer(0, 0, 2, 2001), 0),
            Err(Error::RootHasNoParent)
        );

        let mut info = info_at(1, 1, 2);
        assert_matches!(
            info.set_parent(test_peer(1, 0, 2, 2001), 0),
            Err(Error::LogicalMismatch)
        );
        assert_matches!(
            info.set_parent(Peer::unaddressed(0, 0, 2).unwrap(), 0),
            Err(Error::NeighbourUninitialised)
        );
        assert_matches!(
            info.set_parent(test_peer(0, 0, 3, 2001), 0),
            Err(Error::LogicalMismatch) | Err(Error::FanoutMismatch)
        );

        info.set_parent(test_peer(0, 0, 2, 2001), 0).unwrap();
        assert!(info.parent().is_initialised());
        assert_eq!(info.take_events().len(), 1);
    }

    #[test]
    fn set_child_validates() {
        let mut info = info_at(0, 0, 2);
        assert_matches!(
            info.set_child(test_peer(1, 0, 2, 2001), 2, 0),
            Err(Error::ChildIndexOutOfRange(2, 2))
        );
        assert_matches!(
            info.set_child(test_peer(1, 1, 2, 2001), 0, 0),
            Err(Error::LogicalMismatch)
        );

        info.set_child(test_peer(1, 0, 2, 2001), 0, 0).unwrap();
        assert!(info.child(0).unwrap().is_initialised());
        assert!(!info.child(1).unwrap().is_initialised());
    }

    #[test]
    fn adjacents_enforce_sides() {
        let mut info = info_at(0, 0, 2);
        // 1:1 is to the right of root
        assert_matches!(
            info.set_adjacent_left(test_peer(1, 1, 2, 2001), 0),
            Err(Error::WrongAdjacentSide)
        );
        info.set_adjacent_left(test_peer(1, 0, 2, 2001), 0).unwrap();
        info.set_adjacent_right(test_peer(1, 1, 2, 2002), 0)
            .unwrap();
        assert_matches!(
            info.set_adjacent_right(test_peer(1, 0, 2, 2001), 0),
            Err(Error::WrongAdjacentSide)
        );
    }

    #[test]
    fn reset_child_keeps_the_slot() {
        let mut info = info_at(0, 0, 2);
        info.set_child(test_peer(1, 1, 2, 2001), 1, 0).unwrap();
        info.reset_child(1, 0).unwrap();
        let child = info.child(1).unwrap();
        assert!(child.is_valid_peer());
        assert!(!child.is_initialised());
        assert_eq!(child.number(), 1);
    }

    #[test]
    fn set_then_reset_position_restores_uninitialised_state() {
        let mut info = RoutingInformation::new(
            Peer::addressed(2, test_addr(2000)).expect("addressed peer"),
        );
        assert_matches!(info.fanout(), Ok(2));
        assert!(info.children().is_empty());

        info.set_position(Position::new(1, 0, 2).unwrap());
        assert_eq!(info.children().len(), 2);
        assert!(info.this_node().is_initialised());

        info.reset_position(7);
        assert!(!info.this_node().is_valid_peer());
        assert!(info.this_node().addr().is_some());
        assert!(info.children().is_empty());

        let events = info.take_events();
        let position_changes = events
            .iter()
            .filter(|event| matches!(event, RoutingEvent::PositionChanged { .. }))
            .count();
        assert_eq!(position_changes, 2);
    }

    #[test]
    fn mutations_before_initialisation_fail() {
        let mut info =
            RoutingInformation::new(Peer::addressed(2, test_addr(2000)).expect("addressed peer"));
        assert_matches!(
            info.set_child(test_peer(1, 0, 2, 2001), 0, 0),
            Err(Error::Uninitialised)
        );
        assert_matches!(
            info.set_adjacent_left(test_peer(1, 0, 2, 2001), 0),
            Err(Error::Uninitialised)
        );
    }
}
