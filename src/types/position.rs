// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Error, Result};
use crate::routing::calculations::{
    is_fanout_valid, is_part_of_prio_set, is_position_valid, tree_mapper, TREE_MAPPER_K,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// The logical half of a peer: its position `(level, number)` in the m-ary
/// tree of the given fanout.
///
/// An uninitialised `Position` represents "no peer known here". The UUID is a
/// fresh identity regenerated on every position change — the same tree slot
/// occupied twice is two different peers. Equality deliberately ignores it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    level: u32,
    number: u32,
    fanout: u16,
    uuid: Uuid,
    initialised: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            level: 0,
            number: 0,
            fanout: 0,
            uuid: Uuid::new_v4(),
            initialised: false,
        }
    }
}

impl Position {
    /// An initialised position. Fails when the triple cannot exist in the
    /// tree.
    pub fn new(level: u32, number: u32, fanout: u16) -> Result<Self> {
        if !is_position_valid(level, number, fanout) {
            if !is_fanout_valid(fanout) {
                return Err(Error::InvalidFanout(fanout));
            }
            return Err(Error::InvalidPosition {
                level,
                number,
                fanout,
            });
        }
        Ok(Self {
            level,
            number,
            fanout,
            uuid: Uuid::new_v4(),
            initialised: true,
        })
    }

    /// An uninitialised position that only knows the tree's fanout. Stands in
    /// for a peer that does not exist (yet).
    pub fn with_fanout(fanout: u16) -> Result<Self> {
        if !is_fanout_valid(fanout) {
            return Err(Error::InvalidFanout(fanout));
        }
        Ok(Self {
            fanout,
            ..Self::default()
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn fanout(&self) -> u16 {
        self.fanout
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Moves this position to new coordinates, regenerating the UUID — the
    /// peer at the new slot is a new identity.
    pub fn set_position(&mut self, level: u32, number: u32) -> Result<()> {
        if !is_position_valid(level, number, self.fanout) {
            return Err(Error::InvalidPosition {
                level,
                number,
                fanout: self.fanout,
            });
        }
        self.level = level;
        self.number = number;
        self.uuid = Uuid::new_v4();
        self.initialised = true;
        Ok(())
    }

    /// True for the initialised root position `(0, 0)`.
    pub fn is_root(&self) -> bool {
        self.initialised && self.level == 0 && self.number == 0
    }

    /// Both initialised and on the same level.
    pub fn is_same_level(&self, other: &Self) -> bool {
        self.initialised && other.initialised && self.level == other.level
    }

    /// Both initialised and we sit strictly deeper in the tree.
    pub fn is_deeper_than(&self, other: &Self) -> bool {
        self.initialised && other.initialised && self.level > other.level
    }

    /// Both initialised and we sit at least as deep in the tree.
    pub fn is_deeper_than_or_same_level(&self, other: &Self) -> bool {
        self.initialised && other.initialised && self.level >= other.level
    }

    /// Whether this position belongs to the prio set of its level.
    pub fn is_prio_node(&self) -> bool {
        self.initialised
            && is_part_of_prio_set(self.level, self.number, self.fanout).unwrap_or(false)
    }

    /// The horizontal value derived via the tree mapper. The sole basis for
    /// left-of comparisons across levels.
    pub fn horizontal_value(&self) -> f64 {
        tree_mapper(self.level, self.number, self.fanout, TREE_MAPPER_K)
    }

    /// Same tree slot, ignoring uuid and initialisation.
    pub fn same_slot(&self, other: &Self) -> bool {
        self.level == other.level && self.number == other.number
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.initialised {
            write!(f, "{}:{} (m={})", self.level, self.number, self.fanout)
        } else {
            write!(f, "-:- (m={})", self.fanout)
        }
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
            && self.number == other.number
            && self.fanout == other.fanout
            && self.initialised == other.initialised
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.number.hash(state);
        self.fanout.hash(state);
        self.initialised.hash(state);
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        // Total order along the in-order traversal; coordinates break the
        // (never observed) float ties.
        self.horizontal_value()
            .partial_cmp(&other.horizontal_value())
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| self.number.cmp(&other.number))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn equality_ignores_uuid() {
        let a = Position::new(1, 1, 2).unwrap();
        let b = Position::new(1, 1, 2).unwrap();
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(a, b);
    }

    #[test]
    fn equality_tracks_initialisation() {
        let a = Position::with_fanout(2).unwrap();
        let b = Position::new(0, 0, 2).unwrap();
        assert_ne!(a, b);
        assert!(!a.is_root());
        assert!(b.is_root());
    }

    #[test]
    fn set_position_regenerates_uuid() {
        let mut a = Position::new(2, 3, 2).unwrap();
        let before = a.uuid();
        a.set_position(1, 0).unwrap();
        assert_ne!(a.uuid(), before);
        assert_eq!(a.level(), 1);
        assert_eq!(a.number(), 0);
    }

    #[test]
    fn invalid_positions_are_rejected() {
        assert_matches!(Position::new(1, 2, 2), Err(Error::InvalidPosition { .. }));
        assert_matches!(Position::new(0, 0, 1), Err(Error::InvalidFanout(1)));
        let mut p = Position::new(0, 0, 2).unwrap();
        assert_matches!(p.set_position(1, 7), Err(Error::InvalidPosition { .. }));
    }

    #[test]
    fn horizontal_order_is_in_order_traversal() {
        let left_leaf = Position::new(1, 0, 2).unwrap();
        let root = Position::new(0, 0, 2).unwrap();
        let right_leaf = Position::new(1, 1, 2).unwrap();
        assert!(left_leaf < root);
        assert!(root < right_leaf);
    }

    #[test]
    fn level_comparisons_require_initialisation() {
        let unset = Position::with_fanout(2).unwrap();
        let root = Position::new(0, 0, 2).unwrap();
        assert!(!unset.is_same_level(&unset));
        assert!(!root.is_deeper_than(&unset));
        assert!(root.is_deeper_than_or_same_level(&root));
    }
}
