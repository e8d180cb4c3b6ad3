// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Aggregate queries over the neighbour database, and the two "route it to
//! wherever it belongs" helpers used by the update protocols.

use super::RoutingInformation;
use crate::error::{Error, Result};
use crate::routing::calculations::{
    children as calc_children, covering_dsn, dsn_set, left_rt, parent as calc_parent, right_rt,
    routing_sequence,
};
use crate::types::Peer;

impl RoutingInformation {
    /// All children that exist.
    pub fn initialised_children(&self) -> Vec<Peer> {
        self.children
            .iter()
            .filter(|child| child.is_initialised())
            .cloned()
            .collect()
    }

    pub fn children_full(&self) -> bool {
        self.children.iter().all(Peer::is_initialised)
    }

    pub fn at_least_one_child_exists(&self) -> bool {
        self.children.iter().any(Peer::is_initialised)
    }

    pub fn at_least_one_child_is_free(&self) -> bool {
        self.children.iter().any(|child| !child.is_initialised())
    }

    pub fn rt_neighbours_full(&self) -> bool {
        self.rt_neighbours.iter().all(Peer::is_initialised)
    }

    pub fn rt_neighbour_children_empty(&self) -> bool {
        !self.rt_neighbour_children.iter().any(Peer::is_initialised)
    }

    pub fn rt_neighbour_children_full(&self) -> bool {
        self.rt_neighbour_children.iter().all(Peer::is_initialised)
    }

    pub fn at_least_one_rt_neighbour_child_exists(&self) -> bool {
        self.rt_neighbour_children.iter().any(Peer::is_initialised)
    }

    pub fn at_least_one_rt_neighbour_child_is_free(&self) -> bool {
        self.rt_neighbour_children
            .iter()
            .any(|child| !child.is_initialised())
    }

    /// Every initialised routing-table neighbour, left to right.
    pub fn initialised_rt_neighbours(&self) -> Vec<Peer> {
        self.rt_neighbours
            .iter()
            .filter(|peer| peer.is_initialised())
            .cloned()
            .collect()
    }

    /// Every initialised routing-table neighbour child, left to right.
    pub fn initialised_rt_neighbour_children(&self) -> Vec<Peer> {
        self.rt_neighbour_children
            .iter()
            .filter(|peer| peer.is_initialised())
            .cloned()
            .collect()
    }

    /// Every initialised routing-table neighbour and neighbour child.
    pub fn initialised_rt_neighbours_and_children(&self) -> Vec<Peer> {
        let mut peers = self.initialised_rt_neighbours();
        peers.extend(self.initialised_rt_neighbour_children());
        peers
    }

    /// Every neighbour that exists and also knows us: parent, children,
    /// routing-table neighbours, and the adjacents. Used for departure and
    /// update broadcasts.
    pub fn all_unique_symmetrical_existing_neighbours(&self) -> Vec<Peer> {
        let mut neighbours = Vec::new();

        if self.this_node.level() != 0 && self.parent.is_initialised() {
            neighbours.push(self.parent.clone());
        }
        neighbours.extend(self.initialised_children());
        neighbours.extend(self.initialised_rt_neighbours());

        for adjacent in [&self.adjacent_left, &self.adjacent_right] {
            if adjacent.is_initialised()
                && !neighbours
                    .iter()
                    .any(|peer| peer.same_position(adjacent))
            {
                neighbours.push(adjacent.clone());
            }
        }

        neighbours
    }

    /// The symmetrical neighbours plus the routing-table neighbour children
    /// (which know us only asymmetrically). Shipped to a successor during
    /// replacement.
    pub fn all_unique_known_existing_neighbours(&self) -> Vec<Peer> {
        let mut neighbours = self.all_unique_symmetrical_existing_neighbours();
        neighbours.extend(self.initialised_rt_neighbour_children());
        neighbours
    }

    /// The initialised entry we hold for `(level, number)`, if any.
    pub fn known_peer_at(&self, level: u32, number: u32) -> Option<Peer> {
        self.all_unique_known_existing_neighbours()
            .into_iter()
            .find(|peer| peer.level() == level && peer.number() == number)
    }

    /// Locates the slot(s) matching the peer's logical position and clears
    /// them. The parent is never removable.
    pub fn remove_neighbour(&mut self, peer: &Peer, ref_event_id: u64) -> Result<()> {
        if self.parent.is_valid_peer() && self.parent.position().same_slot(peer.position()) {
            return Err(Error::CannotRemoveParent);
        }

        if self.adjacent_left.is_valid_peer()
            && self.adjacent_left.position().same_slot(peer.position())
        {
            self.reset_adjacent_left(ref_event_id)?;
        } else if self.adjacent_right.is_valid_peer()
            && self.adjacent_right.position().same_slot(peer.position())
        {
            self.reset_adjacent_right(ref_event_id)?;
        }

        if peer.level() == self.this_node.level() {
            let _ = self.reset_rt_neighbour(peer, ref_event_id)?;
        } else if peer.level() == self.this_node.level() + 1 {
            let _ = self.reset_child_or_rt_neighbour_child(peer, ref_event_id)?;
        }
        Ok(())
    }

    /// The inverse helper: inspects the peer's logical position against our
    /// structure and stores it wherever it belongs (possibly several slots).
    pub fn update_neighbour(&mut self, peer: Peer, ref_event_id: u64) -> Result<()> {
        if !peer.is_initialised() {
            return Err(Error::NeighbourUninitialised);
        }

        if self.adjacent_left.is_valid_peer()
            && self.adjacent_left.position().same_slot(peer.position())
        {
            self.set_adjacent_left(peer.clone(), ref_event_id)?;
        } else if self.adjacent_right.is_valid_peer()
            && self.adjacent_right.position().same_slot(peer.position())
        {
            self.set_adjacent_right(peer.clone(), ref_event_id)?;
        }

        if self.parent.is_valid_peer() && self.parent.position().same_slot(peer.position()) {
            self.set_parent(peer.clone(), ref_event_id)?;
        }

        if peer.level() == self.this_node.level() {
            self.update_rt_neighbour(peer, ref_event_id)?;
        } else if peer.level() == self.this_node.level() + 1 {
            let fanout = u32::from(self.fanout()?);
            if peer.number() / fanout == self.this_node.number() {
                let index = (peer.number() % fanout) as u16;
                self.set_child(peer, index, ref_event_id)?;
            } else {
                self.update_rt_neighbour_child(peer, ref_event_id)?;
            }
        }
        Ok(())
    }

    /// The deepest node we know of that is at least as deep as us. Used for
    /// bootstrap discovery and the replacement search.
    pub fn lowest_node(&self) -> Option<Peer> {
        let mut lowest: Option<&Peer> = None;
        for adjacent in [&self.adjacent_left, &self.adjacent_right] {
            if adjacent.is_initialised() {
                let deeper = match lowest {
                    Some(current) => adjacent
                        .position()
                        .is_deeper_than_or_same_level(current.position()),
                    None => true,
                };
                if deeper {
                    lowest = Some(adjacent);
                }
            }
        }

        if let Some(peer) = lowest {
            if peer.position().is_deeper_than(self.this_node.position()) {
                return Some(peer.clone());
            }
        }

        // Nothing deeper among the adjacents; look for neighbour children,
        // then fall back to our own level.
        if let Some(peer) = self
            .left_rt_neighbour_children()
            .iter()
            .rev()
            .find(|peer| peer.is_initialised())
        {
            return Some(peer.clone());
        }
        if let Some(peer) = self
            .right_rt_neighbour_children()
            .iter()
            .find(|peer| peer.is_initialised())
        {
            return Some(peer.clone());
        }
        if let Some(peer) = self.children.iter().find(|peer| peer.is_initialised()) {
            return Some(peer.clone());
        }
        if let Some(peer) = self
            .left_rt_neighbours()
            .iter()
            .rev()
            .find(|peer| peer.is_initialised())
        {
            return Some(peer.clone());
        }
        if let Some(peer) = self
            .right_rt_neighbours()
            .iter()
            .find(|peer| peer.is_initialised())
        {
            return Some(peer.clone());
        }

        None
    }

    // ---- DSN awareness ----

    /// Whether our own position belongs to the DSN set of its level.
    pub fn am_i_dsn(&self) -> Result<bool> {
        let set = dsn_set(self.this_node.level(), self.fanout()?)?;
        Ok(set.contains(&self.this_node.number()))
    }

    /// Whether we stand in for a DSN child position of ours that is not
    /// occupied yet, while deeper nodes already exist.
    pub fn am_i_temp_dsn(&self) -> Result<bool> {
        if self.am_i_dsn()? {
            return Ok(false);
        }

        let set_below = dsn_set(self.this_node.level() + 1, self.fanout()?)?;
        if set_below.is_empty() {
            return Ok(false);
        }

        for child in &self.children {
            let child_is_dsn = set_below.contains(&child.number());
            if child_is_dsn && !child.is_initialised() {
                if let Some(lowest) = self.lowest_node() {
                    if lowest.level() > self.this_node.level() {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// The peer responsible for aggregating our attribute data: the covering
    /// DSN if we know it, otherwise the node standing in for it.
    pub fn covering_dsn_or_temp_dsn(&self) -> Result<Peer> {
        let fanout = self.fanout()?;
        let (covering_level, covering_number) =
            covering_dsn(self.this_node.level(), self.this_node.number(), fanout)?;

        if let Some(peer) = self.known_peer_at(covering_level, covering_number) {
            return Ok(peer);
        }

        // If we are on the level below, the covering DSN has to exist anyway.
        if self.this_node.level() != covering_level {
            return Peer::unaddressed(covering_level, covering_number, fanout);
        }

        let set = dsn_set(covering_level, fanout)?;
        let covering_is_first = set.first() == Some(&covering_number);

        if covering_is_first {
            let (parent_level, parent_number) =
                calc_parent(covering_level, covering_number, fanout)?;
            return Peer::unaddressed(parent_level, parent_number, fanout);
        }

        let prior = set
            .iter()
            .rev()
            .find(|&&number| number < covering_number)
            .copied()
            .unwrap_or(covering_number);
        Peer::unaddressed(covering_level, prior, fanout)
    }

    /// Whether the next DSN to our right exists. Only meaningful when we are
    /// a DSN ourselves.
    pub fn next_dsn_exists(&self) -> Result<bool> {
        Ok(self
            .next_dsn()?
            .map(|peer| peer.is_initialised())
            .unwrap_or(false))
    }

    /// The initialised entry for the next DSN to our right, `None` when we
    /// are the last DSN on the level or do not know the peer.
    pub fn next_dsn(&self) -> Result<Option<Peer>> {
        let set = dsn_set(self.this_node.level(), self.fanout()?)?;
        let index = set
            .iter()
            .position(|&number| number == self.this_node.number())
            .ok_or(Error::LogicalMismatch)?;

        match set.get(index + 1) {
            Some(&next_number) => Ok(self.known_peer_at(self.this_node.level(), next_number)),
            None => Ok(None),
        }
    }

    // ---- static helpers ----

    /// The parents of a node's routing-table neighbours: the peers that know
    /// `node` as a routing-table neighbour child (asymmetrically). Physical
    /// halves are unknown.
    pub fn rt_neighbour_parents(node: &Peer) -> Result<Vec<Peer>> {
        if node.level() == 0 {
            return Ok(Vec::new());
        }

        let fanout = node.fanout();
        let (parent_level, parent_number) = calc_parent(node.level(), node.number(), fanout)?;

        let mut positions = left_rt(parent_level, parent_number, fanout)?;
        positions.extend(right_rt(parent_level, parent_number, fanout)?);

        positions
            .into_iter()
            .map(|(l, n)| Peer::unaddressed(l, n, fanout))
            .collect()
    }

    /// Combines two peer lists without positional duplicates; when both sides
    /// know a position, the entry with an initialised physical half wins.
    pub fn combine_unique(left: Vec<Peer>, right: &[Peer]) -> Vec<Peer> {
        let mut result = right.to_vec();
        for peer in left {
            match result
                .iter_mut()
                .find(|existing| existing.same_position(&peer))
            {
                Some(existing) => {
                    if existing.addr().is_none() && peer.addr().is_some() {
                        existing.set_addr(peer.addr());
                    }
                }
                None => result.push(peer),
            }
        }
        result
    }

    /// Removes from `neighbours` every peer that is a routing-table neighbour
    /// child from `node`'s perspective.
    pub fn without_rt_neighbour_children_of(node: &Peer, neighbours: Vec<Peer>) -> Result<Vec<Peer>> {
        let sequence = routing_sequence(node.level(), node.fanout())?;
        let fanout = u32::from(node.fanout());

        Ok(neighbours
            .into_iter()
            .filter(|peer| {
                if peer.level() != node.level() + 1 {
                    return true;
                }
                let parent_number = peer.number() / fanout;
                let distance =
                    u64::from(parent_number.max(node.number()) - parent_number.min(node.number()));
                distance == 0 || !sequence.contains(&distance)
            })
            .collect())
    }

    /// The peers `node` would hold in its own routing information, with the
    /// physical halves we happen to know. Shipped in `JoinAccept`.
    pub fn known_neighbours_of(&self, node: &Peer) -> Result<Vec<Peer>> {
        let fanout = node.fanout();
        let mut positions = left_rt(node.level(), node.number(), fanout)?;
        positions.extend(right_rt(node.level(), node.number(), fanout)?);

        let mut peers = Vec::new();
        for (level, number) in positions {
            if let Some(known) = self.known_peer_at(level, number) {
                peers.push(known);
            } else {
                peers.push(Peer::unaddressed(level, number, fanout)?);
            }
        }
        Ok(peers)
    }

    /// Debug rendering of the whole neighbour database.
    pub fn describe(&self) -> String {
        use itertools::Itertools;
        use std::fmt::Write as _;

        let mut text = format!("self: {}\n", self.this_node);
        let _ = writeln!(text, "parent: {}", self.parent);
        for (index, child) in self.children.iter().enumerate() {
            let _ = writeln!(text, "child {}: {}", index, child);
        }
        let _ = writeln!(text, "adjacent left: {}", self.adjacent_left);
        let _ = writeln!(text, "adjacent right: {}", self.adjacent_right);
        let _ = writeln!(
            text,
            "rt neighbours: {}",
            self.rt_neighbours.iter().map(ToString::to_string).join(", ")
        );
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::information::RoutingInformation;
    use crate::types::test_utils::test_peer;
    use assert_matches::assert_matches;

    fn info_at(level: u32, number: u32, fanout: u16) -> RoutingInformation {
        RoutingInformation::new(test_peer(level, number, fanout, 2000))
    }

    /// 1:0 with fanout 2, parent and right neighbour known.
    fn three_node_view() -> RoutingInformation {
        let mut info = info_at(1, 0, 2);
        info.set_parent(test_peer(0, 0, 2, 2001), 0).unwrap();
        info.update_rt_neighbour(test_peer(1, 1, 2, 2002), 0)
            .unwrap();
        info.set_adjacent_right(test_peer(0, 0, 2, 2001), 0).unwrap();
        info
    }

    #[test]
    fn symmetrical_neighbours_deduplicate_adjacents() {
        let info = three_node_view();
        let neighbours = info.all_unique_symmetrical_existing_neighbours();
        // parent (== adjacent right) and the rt neighbour
        assert_eq!(neighbours.len(), 2);
        assert!(neighbours.iter().any(|peer| peer.level() == 0));
        assert!(neighbours
            .iter()
            .any(|peer| peer.level() == 1 && peer.number() == 1));
    }

    #[test]
    fn known_neighbours_include_rt_children() {
        let mut info = info_at(1, 0, 2);
        info.update_rt_neighbour_child(test_peer(2, 2, 2, 2003), 0)
            .unwrap();
        let known = info.all_unique_known_existing_neighbours();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].number(), 2);
    }

    #[test]
    fn remove_neighbour_rejects_parent() {
        let mut info = three_node_view();
        let parent = test_peer(0, 0, 2, 2001);
        assert_matches!(
            info.remove_neighbour(&parent, 0),
            Err(Error::CannotRemoveParent)
        );
    }

    #[test]
    fn remove_neighbour_clears_all_roles() {
        let mut info = info_at(1, 0, 2);
        let neighbour = test_peer(1, 1, 2, 2002);
        info.update_rt_neighbour(neighbour.clone(), 0).unwrap();
        info.set_adjacent_left(test_peer(2, 0, 2, 2004), 0).unwrap();
        info.set_child(test_peer(2, 1, 2, 2005), 1, 0).unwrap();

        info.remove_neighbour(&neighbour, 0).unwrap();
        assert!(info.initialised_rt_neighbours().is_empty());

        info.remove_neighbour(&test_peer(2, 1, 2, 2005), 0).unwrap();
        assert!(!info.child(1).unwrap().is_initialised());
    }

    #[test]
    fn remove_then_update_restores_the_state() {
        let mut info = info_at(1, 0, 2);
        let neighbour = test_peer(1, 1, 2, 2002);
        info.update_rt_neighbour(neighbour.clone(), 0).unwrap();
        let before = info.initialised_rt_neighbours();

        info.remove_neighbour(&neighbour, 0).unwrap();
        info.update_neighbour(neighbour, 0).unwrap();

        assert_eq!(info.initialised_rt_neighbours(), before);
    }

    #[test]
    fn update_neighbour_routes_to_child_slot() {
        let mut info = info_at(1, 0, 2);
        info.update_neighbour(test_peer(2, 0, 2, 2006), 0).unwrap();
        assert!(info.child(0).unwrap().is_initialised());

        // not our subtree: lands in the rt neighbour children
        info.update_neighbour(test_peer(2, 2, 2, 2007), 0).unwrap();
        assert!(!info.initialised_rt_neighbour_children().is_empty());
    }

    #[test]
    fn lowest_node_prefers_deeper_adjacents() {
        let mut info = info_at(1, 0, 2);
        info.set_adjacent_left(test_peer(2, 0, 2, 2008), 0).unwrap();
        assert_eq!(info.lowest_node().unwrap().level(), 2);
    }

    #[test]
    fn lowest_node_falls_back_to_the_level() {
        let info = three_node_view();
        // adjacent right is the root (shallower); the rt neighbour 1:1 is the
        // only node at our depth
        let lowest = info.lowest_node().unwrap();
        assert_eq!(lowest.level(), 1);
        assert_eq!(lowest.number(), 1);
    }

    #[test]
    fn dsn_queries() {
        let info = info_at(2, 2, 2);
        assert!(info.am_i_dsn().unwrap());

        let info = info_at(2, 1, 2);
        assert!(!info.am_i_dsn().unwrap());

        // 2:1 is covered by the DSN 2:2; since we do not know 2:2 and it is
        // the first DSN on the level, its parent 1:1 stands in.
        let covering = info.covering_dsn_or_temp_dsn().unwrap();
        assert_eq!(covering.level(), 1);
        assert_eq!(covering.number(), 1);
    }

    #[test]
    fn temp_dsn_requires_a_free_dsn_child_and_deeper_nodes() {
        // 1:1 with fanout 2 has child 2:2 (a DSN); while 2:2 is absent and
        // deeper nodes exist, 1:1 stands in.
        let mut info = info_at(1, 1, 2);
        assert!(!info.am_i_temp_dsn().unwrap());

        info.set_adjacent_left(test_peer(2, 2, 2, 2009), 0).unwrap();
        // child slot 2:2 still free, deeper node known
        assert!(info.am_i_temp_dsn().unwrap());

        info.set_child(test_peer(2, 2, 2, 2009), 0, 0).unwrap();
        assert!(!info.am_i_temp_dsn().unwrap());
    }

    #[test]
    fn combine_unique_prefers_initialised_entries() {
        let with_addr = test_peer(1, 0, 2, 2010);
        let without_addr = Peer::unaddressed(1, 0, 2).unwrap();
        let combined =
            RoutingInformation::combine_unique(vec![with_addr], &[without_addr]);
        assert_eq!(combined.len(), 1);
        assert!(combined[0].addr().is_some());
    }

    #[test]
    fn rt_neighbour_parents_of_root_is_empty() {
        let root = test_peer(0, 0, 2, 2000);
        assert!(RoutingInformation::rt_neighbour_parents(&root)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rt_neighbour_parents_are_the_parents_level_neighbours() {
        // parent of 2:2 is 1:1, whose rt neighbours are 1:0 — exactly the
        // peers that know 2:2 asymmetrically as a neighbour child
        let node = test_peer(2, 2, 2, 2000);
        let parents = RoutingInformation::rt_neighbour_parents(&node).unwrap();
        let positions: Vec<(u32, u32)> = parents
            .iter()
            .map(|peer| (peer.level(), peer.number()))
            .collect();
        assert_eq!(positions, vec![(1, 0)]);
        assert!(parents.iter().all(|peer| !peer.is_initialised()));
    }

    #[test]
    fn known_neighbours_of_fills_in_addresses_we_have() {
        let mut info = info_at(1, 0, 2);
        info.update_rt_neighbour(test_peer(1, 1, 2, 2011), 0).unwrap();

        // the rt neighbourhood of our (future) child 2:1 contains 2:0 and,
        // unknown to us, nothing else initialised
        let child = Peer::unaddressed(2, 1, 2).unwrap();
        let known = info.known_neighbours_of(&child).unwrap();
        assert!(known
            .iter()
            .all(|peer| peer.level() == 2 && !peer.same_position(&child)));
        // nothing on level 2 is known yet, so no entry carries an address
        assert!(known.iter().all(|peer| peer.addr().is_none()));
    }

    #[test]
    fn without_rt_neighbour_children_of_strips_asymmetric_entries() {
        // from 1:1's perspective, 2:0 and 2:1 (children of its rt neighbour
        // 1:0) are neighbour children; its own child 2:2 is not
        let node = test_peer(1, 1, 2, 2000);
        let neighbours = vec![
            test_peer(2, 0, 2, 2001),
            test_peer(2, 2, 2, 2002),
            test_peer(0, 0, 2, 2003),
        ];
        let filtered =
            RoutingInformation::without_rt_neighbour_children_of(&node, neighbours).unwrap();
        let positions: Vec<(u32, u32)> = filtered
            .iter()
            .map(|peer| (peer.level(), peer.number()))
            .collect();
        assert_eq!(positions, vec![(2, 2), (0, 0)]);
    }

    #[test]
    fn next_dsn_is_looked_up_among_known_peers() {
        // 4:2 with fanout 2; the next dsn on the level is 4:6
        let mut info = info_at(4, 2, 2);
        assert!(!info.next_dsn_exists().unwrap());

        info.update_rt_neighbour(test_peer(4, 6, 2, 2012), 0).unwrap();
        assert!(info.next_dsn_exists().unwrap());
        assert_eq!(info.next_dsn().unwrap().unwrap().number(), 6);
    }
}
