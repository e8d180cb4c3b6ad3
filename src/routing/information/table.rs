// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Routing-table slots: the same-level neighbours at the algebraically
//! determined offsets, and their children. Both vectors are kept sorted by
//! number so lookups are binary searches.

use super::{NeighbourRelationship, RoutingInformation};
use crate::error::{Error, Result};
use crate::routing::calculations::{children as calc_children, left_rt, right_rt};
use crate::types::Peer;

impl RoutingInformation {
    /// Initialises the routing-table slots from our own position. Only called
    /// once the position is known.
    pub(super) fn init_routing_table(&mut self) {
        let level = self.this_node.level();
        let number = self.this_node.number();
        let fanout = self.this_node.fanout();

        let left = left_rt(level, number, fanout).expect("own position was validated");
        let right = right_rt(level, number, fanout).expect("own position was validated");

        self.right_table_start = left.len();
        self.rt_neighbours = Vec::with_capacity(left.len() + right.len());
        self.rt_neighbour_children = Vec::new();

        for (l, n) in left.into_iter().chain(right) {
            let neighbour = Peer::unaddressed(l, n, fanout).expect("rt slot of a valid position");
            for (cl, cn) in calc_children(l, n, fanout).expect("rt slot of a valid position") {
                let child = Peer::unaddressed(cl, cn, fanout).expect("child of a valid position");
                self.rt_neighbour_children.push(child);
            }
            self.rt_neighbours.push(neighbour);
        }

        self.rt_neighbours.sort_unstable_by_key(Peer::number);
        self.rt_neighbour_children.sort_unstable_by_key(Peer::number);
    }

    /// All routing-table neighbours, initialised or not, ordered left to
    /// right.
    pub fn rt_neighbours(&self) -> &[Peer] {
        &self.rt_neighbours
    }

    /// All routing-table neighbour children, initialised or not, ordered left
    /// to right.
    pub fn rt_neighbour_children(&self) -> &[Peer] {
        &self.rt_neighbour_children
    }

    /// The left routing table, ordered left to right.
    pub fn left_rt_neighbours(&self) -> &[Peer] {
        &self.rt_neighbours[..self.right_table_start]
    }

    /// The right routing table, ordered left to right.
    pub fn right_rt_neighbours(&self) -> &[Peer] {
        &self.rt_neighbours[self.right_table_start..]
    }

    /// Children of the left routing table, ordered left to right.
    pub fn left_rt_neighbour_children(&self) -> &[Peer] {
        let split = self.right_table_start * usize::from(self.this_node.fanout());
        &self.rt_neighbour_children[..split]
    }

    /// Children of the right routing table, ordered left to right.
    pub fn right_rt_neighbour_children(&self) -> &[Peer] {
        let split = self.right_table_start * usize::from(self.this_node.fanout());
        &self.rt_neighbour_children[split..]
    }

    /// The same-level neighbour directly to our left, e.g. 3:4 for 3:5.
    pub fn direct_left_neighbour(&self) -> Option<&Peer> {
        self.left_rt_neighbours().last()
    }

    /// The same-level neighbour directly to our right, e.g. 3:6 for 3:5.
    pub fn direct_right_neighbour(&self) -> Option<&Peer> {
        self.right_rt_neighbours().first()
    }

    /// The known neighbour closest to number 0 on our level.
    pub fn leftmost_neighbour(&self) -> Option<&Peer> {
        self.left_rt_neighbours().first()
    }

    /// The known neighbour closest to number `m^l - 1` on our level.
    pub fn rightmost_neighbour(&self) -> Option<&Peer> {
        self.right_rt_neighbours().last()
    }

    /// The leftmost known routing-table neighbour child.
    pub fn leftmost_neighbour_child(&self) -> Option<&Peer> {
        self.left_rt_neighbour_children().first()
    }

    /// Updates the physical half of the routing-table entry matching the
    /// peer's logical position. Positions not in the table are ignored.
    pub fn update_rt_neighbour(&mut self, neighbour: Peer, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if !neighbour.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }

        if let Ok(index) = self
            .rt_neighbours
            .binary_search_by_key(&neighbour.number(), Peer::number)
        {
            if self.rt_neighbours[index].addr() != neighbour.addr()
                && self.rt_neighbours[index].level() == neighbour.level()
            {
                let old_node = std::mem::replace(&mut self.rt_neighbours[index], neighbour);
                self.notify(
                    self.rt_neighbours[index].clone(),
                    NeighbourRelationship::RoutingTableNeighbour,
                    old_node,
                    index as u16,
                    ref_event_id,
                );
            }
        }
        Ok(())
    }

    /// Updates the physical half of the routing-table-neighbour-child entry
    /// matching the peer's logical position.
    pub fn update_rt_neighbour_child(&mut self, child: Peer, ref_event_id: u64) -> Result<()> {
        self.ensure_initialised()?;
        if !child.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }
        if child.fanout() != self.fanout()? {
            return Err(Error::FanoutMismatch);
        }

        if let Ok(index) = self
            .rt_neighbour_children
            .binary_search_by_key(&child.number(), Peer::number)
        {
            if self.rt_neighbour_children[index].addr() != child.addr()
                && self.rt_neighbour_children[index].level() == child.level()
            {
                let old_node = std::mem::replace(&mut self.rt_neighbour_children[index], child);
                self.notify(
                    self.rt_neighbour_children[index].clone(),
                    NeighbourRelationship::RoutingTableNeighbourChild,
                    old_node,
                    index as u16,
                    ref_event_id,
                );
            }
        }
        Ok(())
    }

    /// Clears the physical half of the routing-table entry at the peer's
    /// position. Returns whether anything changed.
    pub fn reset_rt_neighbour(&mut self, neighbour: &Peer, ref_event_id: u64) -> Result<bool> {
        self.ensure_initialised()?;
        if !neighbour.is_valid_peer() {
            return Err(Error::NeighbourUninitialised);
        }

        if let Ok(index) = self
            .rt_neighbours
            .binary_search_by_key(&neighbour.number(), Peer::number)
        {
            if self.rt_neighbours[index].level() == neighbour.level()
                && self.rt_neighbours[index].addr().is_some()
            {
                let old_node = self.rt_neighbours[index].clone();
                self.rt_neighbours[index].clear_addr();
                self.notify(
                    self.rt_neighbours[index].clone(),
                    NeighbourRelationship::RoutingTableNeighbour,
                    old_node,
                    index as u16,
                    ref_event_id,
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Clears the physical half of the routing-table-neighbour-child entry at
    /// the peer's position. Returns whether anything changed.
    pub fn reset_rt_neighbour_child(&mut self, child: &Peer, ref_event_id: u64) -> Result<bool> {
        self.ensure_initialised()?;
        if !child.is_valid_peer() {
            return Err(Error::NeighbourUninitialised);
        }

        if let Ok(index) = self
            .rt_neighbour_children
            .binary_search_by_key(&child.number(), Peer::number)
        {
            if self.rt_neighbour_children[index].level() == child.level()
                && self.rt_neighbour_children[index].addr().is_some()
            {
                let old_node = self.rt_neighbour_children[index].clone();
                self.rt_neighbour_children[index].clear_addr();
                self.notify(
                    self.rt_neighbour_children[index].clone(),
                    NeighbourRelationship::RoutingTableNeighbourChild,
                    old_node,
                    index as u16,
                    ref_event_id,
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Clears a position one level below us, whether it is our own child or a
    /// routing-table neighbour child.
    pub fn reset_child_or_rt_neighbour_child(
        &mut self,
        peer: &Peer,
        ref_event_id: u64,
    ) -> Result<bool> {
        self.ensure_initialised()?;
        if !peer.is_valid_peer() {
            return Err(Error::NeighbourUninitialised);
        }
        if peer.level() != self.this_node.level() + 1 {
            return Err(Error::LogicalMismatch);
        }

        let fanout = self.fanout()?;
        if peer.number() / u32::from(fanout) == self.this_node.number() {
            let index = (peer.number() % u32::from(fanout)) as u16;
            if self.children[usize::from(index)].is_initialised() {
                self.reset_child(index, ref_event_id)?;
                return Ok(true);
            }
            return Ok(false);
        }

        self.reset_rt_neighbour_child(peer, ref_event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_utils::test_peer;
    use assert_matches::assert_matches;

    fn info_at(level: u32, number: u32, fanout: u16) -> RoutingInformation {
        RoutingInformation::new(test_peer(level, number, fanout, 2000))
    }

    #[test]
    fn table_slots_match_the_calculations() {
        // 2:2 with fanout 2: left 2:1, 2:0; right 2:3
        let info = info_at(2, 2, 2);
        let left: Vec<u32> = info.left_rt_neighbours().iter().map(Peer::number).collect();
        let right: Vec<u32> = info
            .right_rt_neighbours()
            .iter()
            .map(Peer::number)
            .collect();
        assert_eq!(left, vec![0, 1]);
        assert_eq!(right, vec![3]);

        let child_numbers: Vec<u32> = info
            .rt_neighbour_children()
            .iter()
            .map(Peer::number)
            .collect();
        assert_eq!(child_numbers, vec![0, 1, 2, 3, 6, 7]);
    }

    #[test]
    fn directional_getters() {
        let info = info_at(1, 1, 3);
        assert_eq!(info.direct_left_neighbour().unwrap().number(), 0);
        assert_eq!(info.direct_right_neighbour().unwrap().number(), 2);
        assert_eq!(info.leftmost_neighbour().unwrap().number(), 0);
        assert_eq!(info.rightmost_neighbour().unwrap().number(), 2);

        let root = info_at(0, 0, 2);
        assert!(root.direct_left_neighbour().is_none());
        assert!(root.direct_right_neighbour().is_none());
    }

    #[test]
    fn update_and_reset_rt_neighbour() {
        let mut info = info_at(2, 2, 2);
        info.update_rt_neighbour(test_peer(2, 1, 2, 2001), 0).unwrap();
        assert!(info.left_rt_neighbours()[1].is_initialised());

        assert!(info.reset_rt_neighbour(&test_peer(2, 1, 2, 2001), 0).unwrap());
        assert!(!info.left_rt_neighbours()[1].is_initialised());
        // already cleared
        assert!(!info
            .reset_rt_neighbour(&Peer::unaddressed(2, 1, 2).unwrap(), 0)
            .unwrap());
    }

    #[test]
    fn updates_outside_the_table_are_ignored() {
        let mut info = info_at(2, 2, 2);
        // 2:2 has no rt slot for itself
        info.update_rt_neighbour(test_peer(2, 2, 2, 2009), 0).unwrap();
        assert!(info
            .rt_neighbours()
            .iter()
            .all(|peer| !peer.is_initialised()));
    }

    #[test]
    fn reset_child_or_rt_neighbour_child_routes_by_subtree() {
        let mut info = info_at(1, 0, 2);
        info.set_child(test_peer(2, 1, 2, 2001), 1, 0).unwrap();
        info.update_rt_neighbour_child(test_peer(2, 2, 2, 2002), 0)
            .unwrap();

        // own child
        assert!(info
            .reset_child_or_rt_neighbour_child(&test_peer(2, 1, 2, 2001), 0)
            .unwrap());
        assert!(!info.child(1).unwrap().is_initialised());

        // neighbour's child
        assert!(info
            .reset_child_or_rt_neighbour_child(&test_peer(2, 2, 2, 2002), 0)
            .unwrap());

        // wrong level
        assert_matches!(
            info.reset_child_or_rt_neighbour_child(&test_peer(3, 0, 2, 2003), 0),
            Err(Error::LogicalMismatch)
        );
    }
}
