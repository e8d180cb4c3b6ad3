// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Pure positional algebra over the m-ary tree.
//!
//! Everything in here is a deterministic, side-effect free function of
//! `(level, number, fanout)`. The rest of the crate derives routing tables,
//! DSN cover areas and the horizontal in-order ordering from these.

use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Smallest fanout the tree supports.
pub const FANOUT_MIN: u16 = 2;
/// Largest fanout the tree supports.
pub const FANOUT_MAX: u16 = 255;

/// Fixed constant fed into [`tree_mapper`]. The same value must be used by
/// every node of a deployment, otherwise horizontal comparisons disagree.
pub const TREE_MAPPER_K: f64 = 1000.0;

/// The fill ("sweep") direction of a level: even levels fill right to left,
/// odd levels left to right.
pub fn fill_level_right_to_left(level: u32) -> bool {
    level % 2 == 0
}

/// A fanout is valid iff it lies within `[FANOUT_MIN, FANOUT_MAX]`.
pub fn is_fanout_valid(fanout: u16) -> bool {
    (FANOUT_MIN..=FANOUT_MAX).contains(&fanout)
}

/// A position is valid iff the fanout is valid and `number < fanout^level`.
pub fn is_position_valid(level: u32, number: u32, fanout: u16) -> bool {
    is_fanout_valid(fanout) && u64::from(number) < capacity_of_level(level, fanout)
}

/// Number of positions on `level`, saturating at `u64::MAX` for depths the
/// overlay will never reach.
pub fn capacity_of_level(level: u32, fanout: u16) -> u64 {
    let mut cap: u64 = 1;
    for _ in 0..level {
        cap = match cap.checked_mul(u64::from(fanout)) {
            Some(next) => next,
            None => return u64::MAX,
        };
    }
    cap
}

fn check_position(level: u32, number: u32, fanout: u16) -> Result<()> {
    if !is_fanout_valid(fanout) {
        return Err(Error::InvalidFanout(fanout));
    }
    if !is_position_valid(level, number, fanout) {
        return Err(Error::InvalidPosition {
            level,
            number,
            fanout,
        });
    }
    Ok(())
}

/// The parent of `(level, number)`. Fails for root and invalid positions.
pub fn parent(level: u32, number: u32, fanout: u16) -> Result<(u32, u32)> {
    check_position(level, number, fanout)?;
    if level == 0 {
        return Err(Error::RootHasNoParent);
    }
    Ok((level - 1, number / u32::from(fanout)))
}

/// The ordered children of `(level, number)`, always exactly `fanout` many.
pub fn children(level: u32, number: u32, fanout: u16) -> Result<Vec<(u32, u32)>> {
    check_position(level, number, fanout)?;
    let child_level = level
        .checked_add(1)
        .ok_or(Error::InvalidPosition {
            level,
            number,
            fanout,
        })?;
    let base = u64::from(number) * u64::from(fanout);
    (0..u64::from(fanout))
        .map(|i| {
            let child_number = base + i;
            if child_number > u64::from(u32::MAX) {
                Err(Error::InvalidPosition {
                    level,
                    number,
                    fanout,
                })
            } else {
                Ok((child_level, child_number as u32))
            }
        })
        .collect()
}

/// The sequence of horizontal distances `{d * m^i}` used to derive routing
/// table offsets. Strictly increasing; consumers stop once an offset leaves
/// the level.
pub fn routing_sequence(level: u32, fanout: u16) -> Result<Vec<u64>> {
    if !is_fanout_valid(fanout) {
        return Err(Error::InvalidFanout(fanout));
    }

    let m = u64::from(fanout);
    let mut seq = Vec::new();
    let mut power: u64 = 1;
    for _ in 0..u64::from(fanout - 1) * u64::from(level) {
        for d in 1..m {
            seq.push(d.saturating_mul(power));
        }
        power = match power.checked_mul(m) {
            Some(next) => next,
            // Offsets beyond u64 can never fall inside a level.
            None => break,
        };
    }
    Ok(seq)
}

/// The left routing table of `(level, number)`: same-level positions at every
/// routing-sequence offset to the left, ordered nearest first.
pub fn left_rt(level: u32, number: u32, fanout: u16) -> Result<Vec<(u32, u32)>> {
    check_position(level, number, fanout)?;
    let mut lrt = Vec::new();
    for offset in routing_sequence(level, fanout)? {
        if offset > u64::from(number) {
            break;
        }
        lrt.push((level, number - offset as u32));
    }
    Ok(lrt)
}

/// The right routing table of `(level, number)`, ordered nearest first.
pub fn right_rt(level: u32, number: u32, fanout: u16) -> Result<Vec<(u32, u32)>> {
    check_position(level, number, fanout)?;
    let max_number = capacity_of_level(level, fanout);
    let mut rrt = Vec::new();
    for offset in routing_sequence(level, fanout)? {
        let candidate = u64::from(number) + offset;
        if candidate >= max_number {
            break;
        }
        rrt.push((level, candidate as u32));
    }
    Ok(rrt)
}

/// The numbers of the prio nodes on `level` — the distinguished positions the
/// sophisticated join routes over.
pub fn prio_set(level: u32, fanout: u16) -> Result<BTreeSet<u32>> {
    if !is_fanout_valid(fanout) {
        return Err(Error::InvalidFanout(fanout));
    }

    if level == 0 {
        return Ok(std::iter::once(0).collect());
    }
    if level == 1 {
        let middle = (u32::from(fanout) + 1) / 2;
        return Ok(std::iter::once(middle).collect());
    }

    let max_number = capacity_of_level(level, fanout) - 1;
    let m = u64::from(fanout);
    let mut set = BTreeSet::new();
    let _ = set.insert(fanout as u32);

    let mut i = m;
    while i <= max_number {
        i += 2 * m;
        if i <= max_number {
            let _ = set.insert(i as u32);
        }
    }

    let last = *set.iter().next_back().expect("set is never empty here");
    if u64::from(last) < max_number - m {
        let _ = set.insert((max_number - m) as u32);
    }

    Ok(set)
}

/// Whether `(level, number)` belongs to the prio set of its level.
pub fn is_part_of_prio_set(level: u32, number: u32, fanout: u16) -> Result<bool> {
    Ok(prio_set(level, fanout)?.contains(&number))
}

/// The DSN numbers on `level`. Empty for odd levels; `{0}` for the root
/// level; otherwise every `fanout + 2 * fanout * k`, plus a terminal DSN at
/// `max - fanout` when the tail would otherwise be uncovered.
pub fn dsn_set(level: u32, fanout: u16) -> Result<Vec<u32>> {
    if !is_fanout_valid(fanout) {
        return Err(Error::InvalidFanout(fanout));
    }

    if level % 2 == 1 {
        return Ok(Vec::new());
    }
    if level == 0 {
        return Ok(vec![0]);
    }

    let max_number = capacity_of_level(level, fanout) - 1;
    let m = u64::from(fanout);
    let mut set = Vec::new();

    let mut i = m;
    while i <= max_number {
        set.push(i as u32);
        i += 2 * m;
    }

    if let Some(&last) = set.last() {
        if u64::from(last) < max_number - m {
            set.push((max_number - m) as u32);
        }
    }

    Ok(set)
}

/// The cover area of the DSN at `(level, number)`: the non-DSN siblings
/// between it and its neighbouring DSNs (halved boundaries), all direct
/// children of those siblings, and its own children. Empty when the position
/// is not a DSN.
pub fn cover_area(level: u32, number: u32, fanout: u16) -> Result<Vec<(u32, u32)>> {
    check_position(level, number, fanout)?;

    if level == 0 && number == 0 {
        return children(0, 0, fanout);
    }

    let set = dsn_set(level, fanout)?;
    let index = match set.iter().position(|&n| n == number) {
        Some(index) => index,
        None => return Ok(Vec::new()),
    };

    let max_number = (capacity_of_level(level, fanout) - 1) as u32;
    let mut area = Vec::new();

    if index == 0 {
        area.extend((0..number).map(|i| (level, i)));
    } else {
        let prior = set[index - 1];
        let gap = (number - prior) / 2;
        area.extend((number - gap + 1..number).map(|i| (level, i)));
    }

    if index == set.len() - 1 {
        area.extend((number + 1..=max_number).map(|i| (level, i)));
    } else {
        let after = set[index + 1];
        let gap = (after - number) / 2;
        area.extend((number + 1..=number + gap).map(|i| (level, i)));
    }

    let mut covered_children = Vec::new();
    for &(l, n) in &area {
        covered_children.extend(children(l, n, fanout)?);
    }
    area.extend(covered_children);
    area.extend(children(level, number, fanout)?);

    Ok(area)
}

/// The DSN responsible for `(level, number)`. Positions on odd levels map up
/// to their parent first; on the DSN level the nearest DSN wins, with ties
/// going to the left.
pub fn covering_dsn(level: u32, number: u32, fanout: u16) -> Result<(u32, u32)> {
    check_position(level, number, fanout)?;

    let (level, number) = if level % 2 == 0 {
        (level, number)
    } else {
        parent(level, number, fanout)?
    };

    let set = dsn_set(level, fanout)?;
    debug_assert!(!set.is_empty(), "even levels always have a DSN set");

    let first = set[0];
    let last = *set.last().expect("checked non-empty");

    if number <= first {
        return Ok((level, first));
    }
    if number >= last {
        return Ok((level, last));
    }

    match set.binary_search(&number) {
        Ok(_) => Ok((level, number)),
        Err(insertion) => {
            let prior = set[insertion - 1];
            let after = set[insertion];
            if after - number < number - prior {
                Ok((level, after))
            } else {
                Ok((level, prior))
            }
        }
    }
}

/// The horizontal value of `(level, number)`: the centre of its nested
/// tree-mapper interval. Establishes a total order consistent with an
/// in-order traversal of the conceptual tree.
pub fn tree_mapper(level: u32, number: u32, fanout: u16, k: f64) -> f64 {
    tree_mapper_bounds(level, number, fanout, k).2
}

/// Internal recursion of [`tree_mapper`], additionally carrying the interval
/// bounds: child `i` inherits the i-th m-th of the parent interval; the
/// centre sits at the cell offset `ceil(m / 2)`.
fn tree_mapper_bounds(level: u32, number: u32, fanout: u16, k: f64) -> (f64, f64, f64) {
    let m = f64::from(fanout);
    let centre_cell = (f64::from(fanout) / 2.0).ceil();

    if level == 0 {
        let lower = 0.0;
        let upper = (k / centre_cell) * m;
        let centre = lower + ((upper - lower) / m) * centre_cell;
        return (lower, upper, centre);
    }

    let parent_number = number / u32::from(fanout);
    let (parent_lower, parent_upper, _) = tree_mapper_bounds(level - 1, parent_number, fanout, k);

    let cell_width = (parent_upper - parent_lower) / m;
    let lower = parent_lower + cell_width * f64::from(number % u32::from(fanout));
    let upper = lower + cell_width;
    let centre = lower + ((upper - lower) / m) * centre_cell;
    (lower, upper, centre)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn parent_of_root_fails() {
        assert_matches!(parent(0, 0, 2), Err(Error::RootHasNoParent));
    }

    #[test]
    fn invalid_positions_are_rejected() {
        assert_matches!(parent(1, 5, 2), Err(Error::InvalidPosition { .. }));
        assert_matches!(children(2, 9, 3), Err(Error::InvalidPosition { .. }));
        assert_matches!(left_rt(1, 0, 1), Err(Error::InvalidFanout(1)));
        assert_matches!(right_rt(1, 0, 0), Err(Error::InvalidFanout(0)));
    }

    #[test]
    fn children_of_known_positions() {
        assert_eq!(children(1, 1, 3).unwrap(), vec![(2, 3), (2, 4), (2, 5)]);
        assert_eq!(children(0, 0, 2).unwrap(), vec![(1, 0), (1, 1)]);
        assert_eq!(children(2, 3, 2).unwrap(), vec![(3, 6), (3, 7)]);
    }

    #[test]
    fn parent_of_known_positions() {
        assert_eq!(parent(1, 1, 2).unwrap(), (0, 0));
        assert_eq!(parent(2, 5, 3).unwrap(), (1, 1));
        assert_eq!(parent(3, 6, 2).unwrap(), (2, 3));
    }

    #[test]
    fn routing_tables_of_known_positions() {
        assert_eq!(left_rt(1, 2, 3).unwrap(), vec![(1, 1), (1, 0)]);
        assert_eq!(right_rt(1, 0, 3).unwrap(), vec![(1, 1), (1, 2)]);

        // 2:2 with fanout 2: offsets 1 and 2 to the left, 1 to the right.
        assert_eq!(left_rt(2, 2, 2).unwrap(), vec![(2, 1), (2, 0)]);
        assert_eq!(right_rt(2, 2, 2).unwrap(), vec![(2, 3)]);
    }

    #[test]
    fn routing_sequence_prefix_is_powers_times_digits() {
        let seq = routing_sequence(2, 2).unwrap();
        assert_eq!(&seq[..2], &[1, 2]);

        let seq = routing_sequence(1, 3).unwrap();
        assert_eq!(&seq[..4], &[1, 2, 3, 6]);
    }

    #[test]
    fn capacity_saturates_for_absurd_depths() {
        assert_eq!(capacity_of_level(0, 2), 1);
        assert_eq!(capacity_of_level(3, 2), 8);
        assert_eq!(capacity_of_level(4, 10), 10_000);
        assert_eq!(capacity_of_level(1_000, 255), u64::MAX);
    }

    #[test]
    fn fill_direction_alternates() {
        assert!(fill_level_right_to_left(0));
        assert!(!fill_level_right_to_left(1));
        assert!(fill_level_right_to_left(2));
    }

    #[test]
    fn prio_sets_of_small_levels() {
        assert_eq!(
            prio_set(0, 2).unwrap().into_iter().collect::<Vec<_>>(),
            vec![0]
        );
        assert_eq!(
            prio_set(1, 3).unwrap().into_iter().collect::<Vec<_>>(),
            vec![2]
        );
        assert!(prio_set(2, 2).unwrap().contains(&2));
    }

    #[test]
    fn dsn_sets_of_small_levels() {
        assert!(dsn_set(1, 2).unwrap().is_empty());
        assert!(dsn_set(3, 5).unwrap().is_empty());
        assert_eq!(dsn_set(0, 2).unwrap(), vec![0]);
        assert_eq!(dsn_set(2, 2).unwrap(), vec![2]);
        // level 4, fanout 2: 2, 6, 10, 14
        assert_eq!(dsn_set(4, 2).unwrap(), vec![2, 6, 10, 14]);
        // level 2, fanout 3: max 8, dsn at 3 plus the terminal dsn at 8 - 3
        assert_eq!(dsn_set(2, 3).unwrap(), vec![3, 5]);
    }

    #[test]
    fn cover_area_of_root() {
        assert_eq!(cover_area(0, 0, 2).unwrap(), vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn cover_area_of_non_dsn_is_empty() {
        assert!(cover_area(2, 0, 2).unwrap().is_empty());
        assert!(cover_area(1, 1, 2).unwrap().is_empty());
    }

    #[test]
    fn covering_dsn_maps_odd_levels_up() {
        // 3:4 with fanout 2 -> parent 2:2, which is the DSN itself
        assert_eq!(covering_dsn(3, 4, 2).unwrap(), (2, 2));
        // positions before the first DSN belong to it
        assert_eq!(covering_dsn(2, 0, 2).unwrap(), (2, 2));
        // position after the last DSN on level 4, fanout 2
        assert_eq!(covering_dsn(4, 15, 2).unwrap(), (4, 14));
        // nearest DSN wins, tie to the left: 4 is between 2 and 6
        assert_eq!(covering_dsn(4, 4, 2).unwrap(), (4, 2));
        assert_eq!(covering_dsn(4, 5, 2).unwrap(), (4, 6));
    }

    #[test]
    fn dsn_cover_areas_tile_both_levels() {
        // Invariant: the DSN cover areas on an even level partition the
        // positions of that level and the one below.
        for &(level, fanout) in &[(2u32, 2u16), (2, 3), (4, 2)] {
            let mut covered: Vec<(u32, u32)> = Vec::new();
            for number in dsn_set(level, fanout).unwrap() {
                covered.push((level, number));
                covered.extend(cover_area(level, number, fanout).unwrap());
            }
            covered.sort_unstable();
            covered.dedup();

            let mut expected: Vec<(u32, u32)> = Vec::new();
            for n in 0..capacity_of_level(level, fanout) as u32 {
                expected.push((level, n));
            }
            for n in 0..capacity_of_level(level + 1, fanout) as u32 {
                expected.push((level + 1, n));
            }
            expected.sort_unstable();

            assert_eq!(covered, expected, "level {} fanout {}", level, fanout);
        }
    }

    #[test]
    fn tree_mapper_orders_in_order_traversal() {
        // fanout 2: in-order over the first three levels
        let value = |l, n| tree_mapper(l, n, 2, TREE_MAPPER_K);
        assert!(value(2, 0) < value(1, 0));
        assert!(value(1, 0) < value(2, 1));
        assert!(value(2, 1) < value(0, 0));
        assert!(value(0, 0) < value(2, 2));
        assert!(value(2, 2) < value(1, 1));
        assert!(value(1, 1) < value(2, 3));
    }

    proptest! {
        #[test]
        fn parent_child_roundtrip(
            fanout in 2u16..=16,
            level in 0u32..6,
            seed in any::<u64>(),
        ) {
            let cap = capacity_of_level(level, fanout);
            let number = (seed % cap) as u32;

            for (child_level, child_number) in children(level, number, fanout).unwrap() {
                prop_assert_eq!(
                    parent(child_level, child_number, fanout).unwrap(),
                    (level, number)
                );
            }
        }

        #[test]
        fn routing_tables_stay_within_level(
            fanout in 2u16..=16,
            level in 0u32..5,
            seed in any::<u64>(),
        ) {
            let cap = capacity_of_level(level, fanout);
            let number = (seed % cap) as u32;

            for (l, n) in left_rt(level, number, fanout)
                .unwrap()
                .into_iter()
                .chain(right_rt(level, number, fanout).unwrap())
            {
                prop_assert_eq!(l, level);
                prop_assert!(u64::from(n) < cap);
                prop_assert!(n != number);
            }
        }

        #[test]
        fn routing_tables_cover_the_level(
            fanout in 2u16..=5,
            level in 0u32..4,
        ) {
            // Invariant: the union of every node's RT neighbourhood plus the
            // node itself is the whole level.
            let cap = capacity_of_level(level, fanout) as u32;
            let mut seen = vec![false; cap as usize];
            for number in 0..cap {
                seen[number as usize] = true;
                for (_, n) in left_rt(level, number, fanout)
                    .unwrap()
                    .into_iter()
                    .chain(right_rt(level, number, fanout).unwrap())
                {
                    seen[n as usize] = true;
                }
            }
            prop_assert!(seen.into_iter().all(|covered| covered));
        }

        #[test]
        fn rt_neighbourhood_is_symmetric(
            fanout in 2u16..=5,
            level in 0u32..4,
            seed in any::<u64>(),
        ) {
            let cap = capacity_of_level(level, fanout);
            let number = (seed % cap) as u32;

            for (l, n) in left_rt(level, number, fanout)
                .unwrap()
                .into_iter()
                .chain(right_rt(level, number, fanout).unwrap())
            {
                let mut back = left_rt(l, n, fanout).unwrap();
                back.extend(right_rt(l, n, fanout).unwrap());
                prop_assert!(back.contains(&(level, number)));
            }
        }

        #[test]
        fn tree_mapper_is_total_order_on_level(
            fanout in 2u16..=5,
            level in 0u32..4,
        ) {
            let cap = capacity_of_level(level, fanout) as u32;
            let mut previous = f64::NEG_INFINITY;
            for number in 0..cap {
                let value = tree_mapper(level, number, fanout, TREE_MAPPER_K);
                prop_assert!(value > previous);
                previous = value;
            }
        }
    }
}
