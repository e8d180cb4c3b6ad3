// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Cover-area bookkeeping of a Distributed Search Node.
//!
//! Follows the node's own position: whenever the routing information reports
//! a position or neighbour change, the handler re-derives whether this node
//! is a DSN (or stands in for one) and keeps its per-peer attribute cache
//! aligned with the cover area. It also tracks request and update
//! frequencies per attribute to decide when pushing beats polling.

use super::distributed_data::DistributedData;
use super::find_query::{self, TriState};
use super::local_data::AttributeSource;
use crate::messaging::system::FindQuery;
use crate::routing::calculations::{cover_area, covering_dsn, dsn_set};
use crate::routing::RoutingInformation;
use crate::types::{Key, Peer, Position, Value, ValueKind};
use std::collections::{HashMap, VecDeque};

/// How many request timestamps per key are kept for frequency estimation.
const TIMESTAMP_STORAGE_LIMIT: usize = 20;
/// Requests seen before a key is considered for subscription.
const MIN_REQUESTS_FOR_SUBSCRIPTION: usize = 3;
/// Minimum request frequency (Hz) before subscribing pays off.
const MIN_REQUEST_FREQUENCY: f64 = 0.01;

#[derive(Debug, Default)]
pub(crate) struct DsnHandler {
    active: bool,
    was_previously_active: bool,
    cover_positions: Vec<(u32, u32)>,
    extended_cover_positions: Vec<(u32, u32)>,
    cover_data: HashMap<Position, DistributedData>,
    extended_cover_data: HashMap<Position, DistributedData>,
    request_timestamps: HashMap<Key, VecDeque<u64>>,
}

impl DsnHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Re-checks our position and reports whether we currently aggregate a
    /// cover area.
    pub(crate) fn is_active(&mut self, routing: &RoutingInformation) -> bool {
        self.was_previously_active = self.active;
        self.check_position(routing);
        self.active
    }

    fn check_position(&mut self, routing: &RoutingInformation) {
        self.active = false;

        if !routing.this_node().is_valid_peer() {
            self.cover_data.clear();
            self.extended_cover_data.clear();
            return;
        }

        let we_are_dsn = routing.am_i_dsn().unwrap_or(false);
        let we_are_temp_dsn = routing.am_i_temp_dsn().unwrap_or(false);

        if !we_are_dsn && !we_are_temp_dsn {
            self.cover_data.clear();
            self.extended_cover_data.clear();
            return;
        }

        self.active = true;

        if we_are_dsn && !self.was_previously_active {
            self.build_cover_area(routing);
            if !routing.next_dsn_exists().unwrap_or(false) {
                self.build_extended_cover_area(routing);
            } else {
                self.extended_cover_data.clear();
            }
        } else if we_are_temp_dsn && !self.was_previously_active {
            // a stand-in DSN never has an extended cover area
            self.build_temp_cover_area(routing);
        }
    }

    fn build_cover_area(&mut self, routing: &RoutingInformation) {
        let this_node = routing.this_node();
        let positions = match cover_area(this_node.level(), this_node.number(), this_node.fanout())
        {
            Ok(positions) => positions,
            Err(_) => return,
        };

        self.rebuild_cover_data(routing, positions);
    }

    /// We have no occupied DSN child yet but deeper nodes exist; we stand in
    /// for the DSN covering our children's level.
    fn build_temp_cover_area(&mut self, routing: &RoutingInformation) {
        let fanout = match routing.fanout() {
            Ok(fanout) => fanout,
            Err(_) => return,
        };
        let children = routing.children();
        let first_child = match children.first() {
            Some(child) => child,
            None => return,
        };

        let (dsn_level, dsn_number) =
            match covering_dsn(first_child.level(), first_child.number(), fanout) {
                Ok(position) => position,
                Err(_) => return,
            };
        let positions = match cover_area(dsn_level, dsn_number, fanout) {
            Ok(positions) => positions,
            Err(_) => return,
        };

        // a stand-in only covers the children's level
        let child_level = first_child.level();
        let positions = positions
            .into_iter()
            .filter(|&(level, _)| level == child_level)
            .collect();

        self.rebuild_cover_data(routing, positions);
    }

    /// We are the last occupied DSN of our level: additionally cover the
    /// residual positions belonging to the still-unoccupied DSN to our right.
    fn build_extended_cover_area(&mut self, routing: &RoutingInformation) {
        let this_node = routing.this_node();
        let fanout = this_node.fanout();

        let set = match dsn_set(this_node.level(), fanout) {
            Ok(set) => set,
            Err(_) => return,
        };
        let index = match set.iter().position(|&n| n == this_node.number()) {
            Some(index) => index,
            None => return,
        };
        let next_number = match set.get(index + 1) {
            Some(&next) => next,
            // we are the terminal DSN; there is nothing to extend over
            None => return,
        };

        let mut positions = vec![(this_node.level(), next_number)];
        if let Ok(area) = cover_area(this_node.level(), next_number, fanout) {
            positions.extend(area);
        }
        self.extended_cover_positions = positions.clone();

        self.extended_cover_data.clear();
        for (level, number) in positions {
            if let Some(peer) = routing.known_peer_at(level, number) {
                let _ = self
                    .extended_cover_data
                    .insert(peer.position().clone(), DistributedData::new(peer.addr()));
            }
        }
    }

    fn rebuild_cover_data(&mut self, routing: &RoutingInformation, positions: Vec<(u32, u32)>) {
        self.cover_positions = positions.clone();

        // keep entries still inside the cover area, drop the rest
        let positions_set: Vec<(u32, u32)> = positions;
        self.cover_data.retain(|position, _| {
            positions_set
                .iter()
                .any(|&(level, number)| position.level() == level && position.number() == number)
        });

        for &(level, number) in &positions_set {
            let already_known = self
                .cover_data
                .keys()
                .any(|position| position.level() == level && position.number() == number);
            if already_known {
                continue;
            }
            if let Some(peer) = routing.known_peer_at(level, number) {
                let _ = self
                    .cover_data
                    .insert(peer.position().clone(), DistributedData::new(peer.addr()));
            }
        }
    }

    /// Reacts to a neighbour change. Returns the peers whose attribute data
    /// we now need to inquire.
    pub(crate) fn on_neighbour_change(
        &mut self,
        routing: &RoutingInformation,
        neighbour: &Peer,
    ) -> Vec<Peer> {
        if !self.is_active(routing) {
            return Vec::new();
        }

        let in_cover_area = self
            .cover_positions
            .iter()
            .any(|&(level, number)| neighbour.level() == level && neighbour.number() == number);
        if !in_cover_area {
            return Vec::new();
        }

        let existing = self
            .cover_data
            .keys()
            .find(|position| position.same_slot(neighbour.position()))
            .cloned();

        match (existing, neighbour.addr()) {
            // gone: drop the cached data
            (Some(position), None) => {
                let _ = self.cover_data.remove(&position);
                Vec::new()
            }
            // reachable under a new address: keep the data, fix the address
            (Some(position), Some(addr)) => {
                if let Some(data) = self.cover_data.get_mut(&position) {
                    if data.addr() != Some(addr) {
                        data.set_addr(Some(addr));
                    }
                }
                Vec::new()
            }
            // newly appeared in the cover area: cache it and pull its data
            (None, Some(_)) => {
                let _ = self
                    .cover_data
                    .insert(neighbour.position().clone(), DistributedData::new(neighbour.addr()));
                vec![neighbour.clone()]
            }
            (None, None) => Vec::new(),
        }
    }

    /// Reacts to our own position changing. Returns the peers to inquire
    /// when we just became a DSN.
    pub(crate) fn on_position_change(&mut self, routing: &RoutingInformation) -> Vec<Peer> {
        if self.is_active(routing) && !self.was_previously_active {
            return self
                .cover_data
                .iter()
                .filter_map(|(position, data)| {
                    data.addr()
                        .map(|addr| Peer::from_parts(position.clone(), Some(addr)))
                })
                .collect();
        }
        Vec::new()
    }

    /// The cover-area nodes the query cannot be decided on, with the keys an
    /// inquiry has to ask them for.
    pub(crate) fn undecided_nodes_and_missing_keys(
        &self,
        query: &FindQuery,
        all_information_present: bool,
        valid_after: u64,
    ) -> Vec<(Peer, Vec<Key>)> {
        self.cover_data
            .iter()
            .filter_map(|(position, data)| {
                let verdict =
                    find_query::evaluate(query, data, all_information_present, valid_after);
                if verdict.is_undecided() {
                    let peer = Peer::from_parts(position.clone(), data.addr());
                    Some((peer, find_query::missing_keys(query, data, valid_after)))
                } else {
                    None
                }
            })
            .collect()
    }

    /// The cover-area nodes known to satisfy the query.
    pub(crate) fn true_nodes(&self, query: &FindQuery, valid_after: u64) -> Vec<Peer> {
        self.cover_data
            .iter()
            .filter_map(|(position, data)| {
                if find_query::evaluate(query, data, true, valid_after) == TriState::True {
                    Some(Peer::from_parts(position.clone(), data.addr()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Folds an inquiry answer (or subscription push) into the cache.
    pub(crate) fn update_inquired_values(
        &mut self,
        node: &Peer,
        values: &[(Key, Value, ValueKind)],
        timestamp: u64,
    ) {
        let position = node.position();
        let data = match self
            .cover_data
            .iter_mut()
            .find(|(cached, _)| cached.same_slot(position))
        {
            Some((_, data)) => data,
            None => match self
                .extended_cover_data
                .iter_mut()
                .find(|(cached, _)| cached.same_slot(position))
            {
                Some((_, data)) => data,
                // neither cover area knows the node; a stale answer
                None => return,
            },
        };

        if data.addr() != node.addr() && node.addr().is_some() {
            data.set_addr(node.addr());
        }

        for (key, value, kind) in values {
            if !data.update(key, value.clone(), *kind, timestamp) {
                let _ = data.insert(key.clone(), value.clone(), *kind, timestamp);
            }
        }
    }

    /// Drops keys an inquired node reported as removed.
    pub(crate) fn update_removed_attributes(&mut self, node: &Peer, removed_keys: &[Key]) {
        if let Some((_, data)) = self
            .cover_data
            .iter_mut()
            .find(|(cached, _)| cached.same_slot(node.position()))
        {
            for key in removed_keys {
                let _ = data.remove(key);
            }
        }
    }

    /// The cached attribute pairs of one cover-area node.
    pub(crate) fn node_attributes(&self, node: &Peer) -> Vec<(Key, Value)> {
        self.cover_data
            .iter()
            .find(|(cached, _)| cached.same_slot(node.position()))
            .map(|(_, data)| {
                data.current_keys()
                    .into_iter()
                    .filter_map(|key| data.value(&key).map(|value| (key.clone(), value.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn cover_data(&self) -> &HashMap<Position, DistributedData> {
        &self.cover_data
    }

    /// Records a query over the keys it touches, for frequency tracking.
    pub(crate) fn notify_about_query_request(&mut self, query: &FindQuery, timestamp: u64) {
        for key in query.relevant_keys() {
            let timestamps = self
                .request_timestamps
                .entry(key)
                .or_insert_with(VecDeque::new);
            timestamps.push_back(timestamp);
            if timestamps.len() > TIMESTAMP_STORAGE_LIMIT {
                let _ = timestamps.pop_front();
            }
        }
    }

    fn frequency(timestamps: &[u64], now: u64) -> f64 {
        if timestamps.len() <= 1 {
            return 0.0;
        }
        let oldest = timestamps[0];
        let period = now.saturating_sub(oldest);
        if period == 0 {
            return f64::INFINITY;
        }
        (timestamps.len() as f64 * 1000.0) / period as f64
    }

    /// Per node: the frequently-queried, rarely-updated keys worth a
    /// subscription order.
    pub(crate) fn nodes_and_keys_to_subscribe(&self, now: u64) -> Vec<(Peer, Vec<Key>)> {
        let mut orders: Vec<(Peer, Vec<Key>)> = Vec::new();

        for (key, timestamps) in &self.request_timestamps {
            if timestamps.len() < MIN_REQUESTS_FOR_SUBSCRIPTION {
                continue;
            }
            let request_timestamps: Vec<u64> = timestamps.iter().copied().collect();
            let request_frequency = Self::frequency(&request_timestamps, now);
            if request_frequency < MIN_REQUEST_FREQUENCY {
                continue;
            }

            for (position, data) in &self.cover_data {
                if data.addr().is_none() || data.is_key_subscribed(key) {
                    continue;
                }
                let update_frequency = Self::frequency(&data.update_timestamps(key), now);
                if update_frequency < request_frequency {
                    let peer = Peer::from_parts(position.clone(), data.addr());
                    match orders.iter_mut().find(|(node, _)| node.same_position(&peer)) {
                        Some((_, keys)) => keys.push(key.clone()),
                        None => orders.push((peer, vec![key.clone()])),
                    }
                }
            }
        }

        orders
    }

    /// Per node: the subscribed keys whose updates now outpace the queries.
    pub(crate) fn nodes_and_keys_to_unsubscribe(&self, now: u64) -> Vec<(Peer, Vec<Key>)> {
        let mut orders: Vec<(Peer, Vec<Key>)> = Vec::new();

        for (position, data) in &self.cover_data {
            if data.addr().is_none() {
                continue;
            }
            for key in data.subscription_order_keys() {
                let request_timestamps: Vec<u64> = self
                    .request_timestamps
                    .get(&key)
                    .map(|timestamps| timestamps.iter().copied().collect())
                    .unwrap_or_default();
                let request_frequency = Self::frequency(&request_timestamps, now);
                let update_frequency = Self::frequency(&data.update_timestamps(&key), now);

                if update_frequency > request_frequency {
                    let peer = Peer::from_parts(position.clone(), data.addr());
                    match orders.iter_mut().find(|(node, _)| node.same_position(&peer)) {
                        Some((_, keys)) => keys.push(key.clone()),
                        None => orders.push((peer, vec![key.clone()])),
                    }
                }
            }
        }

        orders
    }

    /// Marks the keys we placed subscription orders for.
    pub(crate) fn set_placed_subscription_orders(&mut self, orders: &[(Peer, Vec<Key>)]) {
        for (node, keys) in orders {
            if let Some((_, data)) = self
                .cover_data
                .iter_mut()
                .find(|(cached, _)| cached.same_slot(node.position()))
            {
                for key in keys {
                    data.add_subscription_order_key(key.clone());
                }
            }
        }
    }

    /// Clears the marks of keys we unsubscribed from.
    pub(crate) fn set_placed_unsubscription_orders(&mut self, orders: &[(Peer, Vec<Key>)]) {
        for (node, keys) in orders {
            if let Some((_, data)) = self
                .cover_data
                .iter_mut()
                .find(|(cached, _)| cached.same_slot(node.position()))
            {
                for key in keys {
                    data.remove_subscription_order_key(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::system::{FindQueryScope, FindQuerySelection, QueryExpr};
    use crate::types::test_utils::test_peer;

    fn dsn_routing() -> RoutingInformation {
        // 2:2 with fanout 2 is the only DSN of level 2
        let mut routing = RoutingInformation::new(test_peer(2, 2, 2, 3000));
        routing
            .update_rt_neighbour(test_peer(2, 1, 2, 3001), 0)
            .unwrap();
        routing
            .update_rt_neighbour(test_peer(2, 3, 2, 3002), 0)
            .unwrap();
        routing
    }

    fn query(expr: QueryExpr) -> FindQuery {
        FindQuery::new(expr, FindQueryScope::All, FindQuerySelection::SelectAll)
    }

    #[test]
    fn activation_builds_the_cover_area() {
        let routing = dsn_routing();
        let mut handler = DsnHandler::new();
        assert!(handler.is_active(&routing));
        // both known level-2 neighbours are covered
        assert_eq!(handler.cover_data().len(), 2);
    }

    #[test]
    fn non_dsn_positions_stay_inactive() {
        let routing = RoutingInformation::new(test_peer(2, 0, 2, 3000));
        let mut handler = DsnHandler::new();
        assert!(!handler.is_active(&routing));
        assert!(handler.cover_data().is_empty());
    }

    #[test]
    fn new_cover_node_triggers_an_inquiry() {
        let mut routing = dsn_routing();
        let mut handler = DsnHandler::new();
        let _ = handler.is_active(&routing);

        // 3:4 is a child of 2:2's left rt neighbour 2:1... actually of 2:2's
        // cover area via the children of 2:1
        routing
            .update_rt_neighbour_child(test_peer(3, 2, 2, 3003), 0)
            .unwrap();
        let to_inquire = handler.on_neighbour_change(&routing, &test_peer(3, 2, 2, 3003));
        assert_eq!(to_inquire.len(), 1);
        assert_eq!(to_inquire[0].level(), 3);

        // the same node dropping out clears the cache entry
        let gone = Peer::unaddressed(3, 2, 2).unwrap();
        let to_inquire = handler.on_neighbour_change(&routing, &gone);
        assert!(to_inquire.is_empty());
    }

    #[test]
    fn inquiry_answers_decide_queries() {
        let routing = dsn_routing();
        let mut handler = DsnHandler::new();
        let _ = handler.is_active(&routing);

        let q = query(QueryExpr::Present("cpu".into()));
        assert_eq!(handler.undecided_nodes_and_missing_keys(&q, false, 0).len(), 2);
        assert!(handler.true_nodes(&q, 0).is_empty());

        let answered = test_peer(2, 1, 2, 3001);
        handler.update_inquired_values(
            &answered,
            &[("cpu".into(), Value::Int(4), ValueKind::Static)],
            10,
        );
        assert_eq!(handler.true_nodes(&q, 0).len(), 1);
        assert_eq!(handler.undecided_nodes_and_missing_keys(&q, false, 0).len(), 1);

        handler.update_removed_attributes(&answered, &["cpu".into()]);
        assert!(handler.true_nodes(&q, 0).is_empty());
    }

    #[test]
    fn frequent_requests_with_rare_updates_cause_subscriptions() {
        let routing = dsn_routing();
        let mut handler = DsnHandler::new();
        let _ = handler.is_active(&routing);

        let answered = test_peer(2, 1, 2, 3001);
        handler.update_inquired_values(
            &answered,
            &[("load".into(), Value::Float(0.1), ValueKind::Dynamic)],
            0,
        );

        let q = query(QueryExpr::Present("load".into()));
        for timestamp in [100u64, 200, 300, 400] {
            handler.notify_about_query_request(&q, timestamp);
        }

        // both covered nodes update less often than the key is queried
        let orders = handler.nodes_and_keys_to_subscribe(1000);
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|(_, keys)| keys == &[Key::from("load")]));

        handler.set_placed_subscription_orders(&orders);
        // now marked; no repeated order
        assert!(handler.nodes_and_keys_to_subscribe(1000).is_empty());

        // heavy updates flip it back
        for timestamp in [500u64, 510, 520, 530, 540, 550, 560, 570] {
            handler.update_inquired_values(
                &answered,
                &[("load".into(), Value::Float(0.2), ValueKind::Dynamic)],
                timestamp,
            );
        }
        let unsubscribe = handler.nodes_and_keys_to_unsubscribe(600);
        assert_eq!(unsubscribe.len(), 1);
        handler.set_placed_unsubscription_orders(&unsubscribe);
        assert!(handler.nodes_and_keys_to_unsubscribe(600).is_empty());
    }
}
