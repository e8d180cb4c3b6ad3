// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Entity search: attribute queries aggregated across the DSN tiling.
//!
//! A `find()` fans the query out to one DSN per even level. Each DSN
//! forwards along its level within a disjoint number interval, inquires the
//! undecided nodes of its cover area, and answers the requester after its
//! inquiry window closes. The requester concludes after its own aggregation
//! window and fulfils the caller's future.

mod distributed_data;
mod dsn_handler;
mod find_query;
mod local_data;

use super::Ctx;
use crate::error::Result;
use crate::messaging::system::{
    AttributeInquiryAnswer, AttributeInquiryRequest, FindQuery, FindQueryAnswer, FindQueryRequest,
    FindQueryScope, FindQuerySelection, FindResult, ForwardingDirection, NetworkMsg,
    NodesWithAttributes, SubscriptionOrder, SubscriptionUpdate,
};
use crate::messaging::{new_event_id, WireMsg};
use crate::node::fsm::TimeoutKind;
use crate::routing::calculations::{capacity_of_level, dsn_set};
use crate::routing::{RoutingEvent, RoutingInformation};
use crate::types::{Entry, Key, Peer, Value, ValueKind};
use dsn_handler::DsnHandler;
use local_data::{AttributeSource, LocalData};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// How stale a cached dynamic value may be when a query arrives.
const VALUE_VALIDITY_AT_REQUEST_MS: u64 = 5000;
/// Result count at which a `Some`-scope query stops expanding.
const SOME_SCOPE_THRESHOLD: usize = 5;

/// Entity-search state at one node: its own attributes, the DSN bookkeeping
/// and the subscriptions others placed on us.
#[derive(Debug, Default)]
pub(crate) struct EntitySearchAlgorithm {
    dsn_handler: DsnHandler,
    local_data: LocalData,
    /// key -> the DSNs that subscribed to pushes for it
    subscribers: HashMap<Key, Vec<Peer>>,
}

impl EntitySearchAlgorithm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn validity_threshold_after_aggregation(&self, ctx: &Ctx) -> u64 {
        let inquiry_window = ctx
            .config
            .timeouts
            .length(TimeoutKind::InquiryAggregation)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        VALUE_VALIDITY_AT_REQUEST_MS + inquiry_window
    }

    pub(crate) fn process(&mut self, ctx: &mut Ctx, msg: &WireMsg) -> Result<()> {
        match msg.msg() {
            NetworkMsg::FindQueryRequest(request) => self.process_find_query_request(ctx, msg, request),
            NetworkMsg::FindQueryAnswer(answer) => self.process_find_query_answer(ctx, msg, answer),
            NetworkMsg::AttributeInquiryRequest(request) => {
                self.process_attribute_inquiry_request(ctx, msg, request)
            }
            NetworkMsg::AttributeInquiryAnswer(answer) => {
                self.process_attribute_inquiry_answer(ctx, answer)
            }
            NetworkMsg::SubscriptionOrder(order) => self.process_subscription_order(ctx, msg, order),
            NetworkMsg::SubscriptionUpdate(update) => {
                self.process_subscription_update(ctx, msg, update)
            }
            NetworkMsg::SearchExactFailure(failure) => {
                warn!(
                    "search-exact failed for a {:?} towards {}",
                    failure.undeliverable.msg_type(),
                    failure.undeliverable.header().target(),
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Routing changes feed the DSN bookkeeping; newly covered peers get an
    /// immediate full inquiry.
    pub(crate) fn on_routing_events(
        &mut self,
        ctx: &mut Ctx,
        routing_events: &[RoutingEvent],
    ) -> Result<()> {
        let mut to_inquire = Vec::new();
        for event in routing_events {
            match event {
                RoutingEvent::NeighbourChanged { new_node, .. } => {
                    to_inquire.extend(self.dsn_handler.on_neighbour_change(ctx.routing, new_node));
                }
                RoutingEvent::PositionChanged { .. } => {
                    to_inquire.extend(self.dsn_handler.on_position_change(ctx.routing));
                }
            }
        }

        for peer in to_inquire {
            self.request_attribute_information(ctx, peer);
        }
        Ok(())
    }

    fn request_attribute_information(&mut self, ctx: &mut Ctx, peer: Peer) {
        if peer.addr().is_none() {
            return;
        }
        ctx.send(
            peer,
            0,
            NetworkMsg::AttributeInquiryRequest(AttributeInquiryRequest {
                inquire_all: true,
                missing_keys: Vec::new(),
            }),
        );
    }

    // ---- the requester's side ----

    /// Application entry point: fan the query out and park the caller's
    /// one-shot sender until the aggregation window closes.
    pub(crate) fn find(
        &mut self,
        ctx: &mut Ctx,
        mut query: FindQuery,
        responder: oneshot::Sender<FindResult>,
    ) -> Result<()> {
        query.requesting_node = ctx.this_node();

        let ref_event_id = new_event_id();
        ctx.procedures.save_find_query(ref_event_id, query.clone())?;
        ctx.procedures
            .save_preliminary_results(ref_event_id, Vec::new())?;
        ctx.procedures
            .save_find_result_sender(ref_event_id, responder)?;

        ctx.arm_timeout(TimeoutKind::DsnAggregation);
        ctx.procedures
            .save_dsn_aggregation_start(ref_event_id, ctx.now)?;

        let dsns = Self::initial_dsns(ctx.routing);
        ctx.procedures
            .save_addressed_dsns(ref_event_id, dsns.len() as u16)?;
        ctx.procedures.save_answered_dsns(ref_event_id, 0)?;

        let this_node = ctx.this_node();
        for dsn in dsns {
            let interval_end = capacity_of_level(dsn.level(), this_node.fanout())
                .min(u64::from(u32::MAX)) as u32;
            let request = FindQueryRequest {
                query: query.clone(),
                direction: ForwardingDirection::None,
                interval: (0, interval_end),
            };

            if dsn.same_position(&this_node) {
                if self.dsn_handler.is_active(ctx.routing) {
                    self.perform_find_query_forwarding(ctx, ref_event_id, &request)?;
                    self.perform_send_inquiry_aggregations(ctx, ref_event_id, &query)?;
                }
            } else {
                ctx.send_or_route(
                    dsn,
                    ref_event_id,
                    NetworkMsg::FindQueryRequest(Box::new(request)),
                );
            }
        }
        Ok(())
    }

    /// Root plus one DSN per even level, each the middle of its level's DSN
    /// set, down to the deepest level we can estimate from our adjacents.
    fn initial_dsns(routing: &RoutingInformation) -> Vec<Peer> {
        let this_node = routing.this_node().clone();
        let fanout = this_node.fanout();
        let mut dsns: Vec<Peer> = Vec::new();

        let we_are_dsn = routing.am_i_dsn().unwrap_or(false);

        let adjacent_left = routing.adjacent_left();
        let adjacent_right = routing.adjacent_right();
        let mut known_max_level = this_node.level();
        if adjacent_left.is_initialised() {
            known_max_level = known_max_level.max(adjacent_left.level());
        }
        if adjacent_right.is_initialised() {
            known_max_level = known_max_level.max(adjacent_right.level());
        }

        let mut push = |peer: Peer| {
            if !dsns.iter().any(|existing| existing.same_position(&peer)) {
                dsns.push(peer);
            }
        };

        if this_node.level() == 0 {
            push(this_node.clone());
        } else if let Ok(root) = Peer::unaddressed(0, 0, fanout) {
            push(root);
        }

        let mut level = 2;
        while level <= known_max_level {
            if this_node.level() == level && we_are_dsn {
                push(this_node.clone());
            } else if let Ok(set) = dsn_set(level, fanout) {
                if let Some(&middle) = set.get(set.len() / 2) {
                    if let Ok(peer) = Peer::unaddressed(level, middle, fanout) {
                        push(peer);
                    }
                }
            }
            level += 2;
        }

        dsns
    }

    /// The requester's aggregation window closed: final-filter and fulfil.
    pub(crate) fn on_dsn_aggregation_timeout(&mut self, ctx: &mut Ctx) -> Result<()> {
        let window = ctx
            .config
            .timeouts
            .length(TimeoutKind::DsnAggregation)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        let threshold = ctx.now.saturating_sub(window);

        for (ref_event_id, started) in ctx.procedures.dsn_aggregation_starts() {
            if started <= threshold {
                self.conclude_aggregation_of_dsns(ctx, ref_event_id)?;
            }
        }
        Ok(())
    }

    fn conclude_aggregation_of_dsns(&mut self, ctx: &mut Ctx, ref_event_id: u64) -> Result<()> {
        let query = ctx.procedures.load_find_query(ref_event_id)?.clone();
        let results = ctx.procedures.load_preliminary_results(ref_event_id)?.clone();
        let filtered = filter_results_by_scope(results, query.scope);

        let mut entries: FindResult = Vec::new();
        for (_, attributes) in &filtered {
            let node_entries: Vec<Entry> = attributes
                .iter()
                .map(|(key, value)| Entry::new(key.clone(), value.clone(), ValueKind::Dynamic))
                .collect();
            entries.push(node_entries);
        }

        if let Ok(sender) = ctx.procedures.take_find_result_sender(ref_event_id) {
            let _ = sender.send(entries);
        }

        ctx.procedures.remove_find_query(ref_event_id)?;
        ctx.procedures.remove_preliminary_results(ref_event_id)?;
        ctx.procedures.remove_dsn_aggregation_start(ref_event_id)?;
        if ctx.procedures.has_addressed_dsns(ref_event_id) {
            let _ = ctx.procedures.remove_addressed_dsns(ref_event_id);
        }
        if ctx.procedures.has_answered_dsns(ref_event_id) {
            let _ = ctx.procedures.remove_answered_dsns(ref_event_id);
        }
        Ok(())
    }

    /// A DSN's partial answer arrives at the requester.
    fn process_find_query_answer(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        answer: &FindQueryAnswer,
    ) -> Result<()> {
        let ref_event_id = msg.header().ref_event_id();
        if !ctx.procedures.has_preliminary_results(ref_event_id) {
            debug!("find query answer after conclusion; dropping");
            return Ok(());
        }
        for (node, attributes) in &answer.fulfilling_nodes_with_attributes {
            ctx.procedures
                .add_preliminary_result(ref_event_id, node.clone(), attributes.clone())?;
        }
        if ctx.procedures.has_answered_dsns(ref_event_id) {
            let answered = *ctx.procedures.load_answered_dsns(ref_event_id)?;
            ctx.procedures
                .update_answered_dsns(ref_event_id, answered.saturating_add(1))?;
        }
        Ok(())
    }

    // ---- the DSN's side ----

    fn process_find_query_request(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        request: &FindQueryRequest,
    ) -> Result<()> {
        if !self.dsn_handler.is_active(ctx.routing) {
            return Ok(());
        }

        let ref_event_id = msg.header().ref_event_id();
        self.perform_find_query_forwarding(ctx, ref_event_id, request)?;

        if !request.query.requesting_node.same_position(&ctx.this_node()) {
            self.perform_send_inquiry_aggregations(ctx, ref_event_id, &request.query)?;
        }
        Ok(())
    }

    /// Splits the own interval at the DSN neighbours inside it and forwards
    /// the query outwards.
    fn perform_find_query_forwarding(
        &mut self,
        ctx: &mut Ctx,
        ref_event_id: u64,
        request: &FindQueryRequest,
    ) -> Result<()> {
        let this_node = ctx.this_node();
        let level = this_node.level();
        let number = this_node.number();
        let fanout = this_node.fanout();
        let (interval_start, interval_end) = request.interval;

        let dsn_numbers = dsn_set(level, fanout)?;
        let rt_neighbours = ctx.routing.initialised_rt_neighbours();
        let dsn_neighbours_in_interval: Vec<&Peer> = rt_neighbours
            .iter()
            .filter(|peer| dsn_numbers.contains(&peer.number()))
            .filter(|peer| interval_start < peer.number() && peer.number() < interval_end)
            .collect();

        if dsn_neighbours_in_interval.is_empty() {
            return Ok(());
        }

        let level_capacity = capacity_of_level(level, fanout).min(u64::from(u32::MAX)) as u32;
        let mut forwards: Vec<(Peer, ForwardingDirection, (u32, u32))> = Vec::new();

        if matches!(
            request.direction,
            ForwardingDirection::Right | ForwardingDirection::None
        ) {
            let mut right: Vec<&Peer> = dsn_neighbours_in_interval
                .iter()
                .copied()
                .filter(|peer| peer.number() > number)
                .collect();
            right.sort_by_key(|peer| peer.number());

            for (index, peer) in right.iter().enumerate() {
                let lower = peer.number();
                let upper = match right.get(index + 1) {
                    Some(next) => next.number(),
                    None => interval_end.min(level_capacity),
                };
                forwards.push(((*peer).clone(), ForwardingDirection::Right, (lower, upper)));
            }
        }

        if matches!(
            request.direction,
            ForwardingDirection::Left | ForwardingDirection::None
        ) {
            let mut left: Vec<&Peer> = dsn_neighbours_in_interval
                .iter()
                .copied()
                .filter(|peer| peer.number() < number)
                .collect();
            left.sort_by_key(|peer| std::cmp::Reverse(peer.number()));

            for (index, peer) in left.iter().enumerate() {
                let upper = peer.number();
                let lower = match left.get(index + 1) {
                    Some(next) => next.number(),
                    None => interval_start,
                };
                forwards.push(((*peer).clone(), ForwardingDirection::Left, (lower, upper)));
            }
        }

        for (peer, direction, interval) in forwards {
            ctx.send(
                peer,
                ref_event_id,
                NetworkMsg::FindQueryRequest(Box::new(FindQueryRequest {
                    query: request.query.clone(),
                    direction,
                    interval,
                })),
            );
        }
        Ok(())
    }

    /// Inquires every undecided cover-area node, or concludes at once when
    /// nothing is undecided (or a `Some` query already has enough hits).
    fn perform_send_inquiry_aggregations(
        &mut self,
        ctx: &mut Ctx,
        ref_event_id: u64,
        query: &FindQuery,
    ) -> Result<()> {
        let valid_after = ctx.now.saturating_sub(VALUE_VALIDITY_AT_REQUEST_MS);

        let undecided =
            self.dsn_handler
                .undecided_nodes_and_missing_keys(query, false, valid_after);
        let true_nodes = self.dsn_handler.true_nodes(query, valid_after);

        self.dsn_handler.notify_about_query_request(query, ctx.now);

        if !query.requesting_node.same_position(&ctx.this_node())
            && !ctx.procedures.has_find_query(ref_event_id)
        {
            ctx.procedures.save_find_query(ref_event_id, query.clone())?;
        }

        let enough_for_some_scope =
            query.scope == FindQueryScope::Some && true_nodes.len() >= SOME_SCOPE_THRESHOLD;
        if undecided.is_empty() || enough_for_some_scope {
            return self.conclude_aggregation_of_inquiries(ctx, ref_event_id);
        }

        let undecided_nodes: Vec<Peer> = undecided.iter().map(|(node, _)| node.clone()).collect();
        if ctx.procedures.has_undecided_nodes(ref_event_id) {
            ctx.procedures
                .update_undecided_nodes(ref_event_id, undecided_nodes)?;
        } else {
            ctx.procedures
                .save_undecided_nodes(ref_event_id, undecided_nodes)?;
        }

        let inquire_all = query.selection == FindQuerySelection::SelectAll;
        for (node, missing_keys) in undecided {
            if node.addr().is_none() {
                continue;
            }
            ctx.send(
                node,
                ref_event_id,
                NetworkMsg::AttributeInquiryRequest(AttributeInquiryRequest {
                    inquire_all,
                    missing_keys,
                }),
            );
        }

        ctx.arm_timeout(TimeoutKind::InquiryAggregation);
        if ctx.procedures.has_inquiry_aggregation_start(ref_event_id) {
            ctx.procedures
                .update_inquiry_aggregation_start(ref_event_id, ctx.now)?;
        } else {
            ctx.procedures
                .save_inquiry_aggregation_start(ref_event_id, ctx.now)?;
        }
        Ok(())
    }

    pub(crate) fn on_inquiry_aggregation_timeout(&mut self, ctx: &mut Ctx) -> Result<()> {
        let window = ctx
            .config
            .timeouts
            .length(TimeoutKind::InquiryAggregation)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        let threshold = ctx.now.saturating_sub(window);

        for (ref_event_id, started) in ctx.procedures.inquiry_aggregation_starts() {
            if started <= threshold {
                self.conclude_aggregation_of_inquiries(ctx, ref_event_id)?;
            }
        }
        Ok(())
    }

    /// The inquiry window closed: evaluate the cover area and either answer
    /// the requester or merge into our own preliminary results.
    fn conclude_aggregation_of_inquiries(&mut self, ctx: &mut Ctx, ref_event_id: u64) -> Result<()> {
        let query = match ctx.procedures.load_find_query(ref_event_id) {
            Ok(query) => query.clone(),
            Err(_) => {
                debug!("inquiry window closed for an unknown query; dropping");
                return Ok(());
            }
        };

        let valid_after = ctx
            .now
            .saturating_sub(self.validity_threshold_after_aggregation(ctx));
        let mut true_nodes = self.dsn_handler.true_nodes(&query, valid_after);

        if find_query::evaluate(&query, &self.local_data, true, valid_after).is_true() {
            true_nodes.push(ctx.this_node());
        }

        let results = self.relevant_attributes_and_values(ctx, &true_nodes, &query);
        let filtered = filter_results_by_scope(results, query.scope);

        if !query.requesting_node.same_position(&ctx.this_node()) {
            ctx.send_or_route(
                query.requesting_node.clone(),
                ref_event_id,
                NetworkMsg::FindQueryAnswer(FindQueryAnswer {
                    fulfilling_nodes_with_attributes: filtered,
                }),
            );
            // the requester still needs the query for its own conclusion; a
            // plain DSN does not
            ctx.procedures.remove_find_query(ref_event_id)?;
        } else {
            for (node, attributes) in filtered {
                if ctx
                    .procedures
                    .add_preliminary_result(ref_event_id, node, attributes)
                    .is_err()
                {
                    debug!("preliminary results already concluded for {}", ref_event_id);
                    break;
                }
            }
        }

        if ctx.procedures.has_inquiry_aggregation_start(ref_event_id) {
            let _ = ctx.procedures.remove_inquiry_aggregation_start(ref_event_id);
        }
        if ctx.procedures.has_undecided_nodes(ref_event_id) {
            let _ = ctx.procedures.remove_undecided_nodes(ref_event_id);
        }

        self.optimise_subscriptions(ctx);
        Ok(())
    }

    /// Collects the attribute values the answer should carry for each
    /// satisfying node.
    fn relevant_attributes_and_values(
        &self,
        ctx: &Ctx,
        true_nodes: &[Peer],
        query: &FindQuery,
    ) -> NodesWithAttributes {
        let mut results: NodesWithAttributes = Vec::new();
        let topic_keys = query.relevant_topic_keys();
        let this_node = ctx.routing.this_node();

        for node in true_nodes {
            let mut node_data: Vec<(Key, Value)> = Vec::new();

            if node.same_position(this_node) {
                let keys = match &query.selection {
                    FindQuerySelection::SelectAll => self.local_data.current_keys(),
                    FindQuerySelection::SelectSpecific(keys) => keys.clone(),
                };
                for key in keys {
                    if let Some(value) = self.local_data.value(&key) {
                        node_data.push((key, value.clone()));
                    } else if topic_keys.contains(&key) {
                        node_data.push((key, Value::Bool(false)));
                    }
                }
            } else {
                let cached = self.dsn_handler.node_attributes(node);
                let keys = match &query.selection {
                    FindQuerySelection::SelectAll => {
                        cached.iter().map(|(key, _)| key.clone()).collect()
                    }
                    FindQuerySelection::SelectSpecific(keys) => keys.clone(),
                };
                for key in keys {
                    if let Some((_, value)) = cached.iter().find(|(cached_key, _)| *cached_key == key)
                    {
                        node_data.push((key, value.clone()));
                    } else if topic_keys.contains(&key) {
                        node_data.push((key, Value::Bool(false)));
                    }
                }
            }

            if !node_data.is_empty() {
                results.push((node.clone(), node_data));
            }
        }
        results
    }

    // ---- the inquired node's side ----

    fn process_attribute_inquiry_request(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        request: &AttributeInquiryRequest,
    ) -> Result<()> {
        let mut values: Vec<(Key, Value, ValueKind)> = Vec::new();

        if request.inquire_all {
            for key in self.local_data.current_keys() {
                if let Some(stored) = self.local_data.stored(&key) {
                    values.push((key, stored.value.clone(), stored.kind));
                }
            }
        } else {
            for key in &request.missing_keys {
                if let Some(stored) = self.local_data.stored(key) {
                    values.push((key.clone(), stored.value.clone(), stored.kind));
                }
            }
        }

        ctx.send(
            msg.sender().clone(),
            msg.header().ref_event_id(),
            NetworkMsg::AttributeInquiryAnswer(AttributeInquiryAnswer {
                inquired_node: ctx.this_node(),
                attribute_values_and_types: values,
                removed_attribute_keys: Vec::new(),
            }),
        );
        Ok(())
    }

    fn process_attribute_inquiry_answer(
        &mut self,
        ctx: &mut Ctx,
        answer: &AttributeInquiryAnswer,
    ) -> Result<()> {
        self.dsn_handler.update_inquired_values(
            &answer.inquired_node,
            &answer.attribute_values_and_types,
            ctx.now,
        );
        if !answer.removed_attribute_keys.is_empty() {
            self.dsn_handler
                .update_removed_attributes(&answer.inquired_node, &answer.removed_attribute_keys);
        }
        Ok(())
    }

    // ---- subscriptions ----

    /// Places or removes subscription orders based on the tracked request
    /// and update frequencies.
    fn optimise_subscriptions(&mut self, ctx: &mut Ctx) {
        let subscribe = self.dsn_handler.nodes_and_keys_to_subscribe(ctx.now);
        for (node, keys) in &subscribe {
            ctx.send(
                node.clone(),
                0,
                NetworkMsg::SubscriptionOrder(SubscriptionOrder {
                    keys: keys.clone(),
                    subscribe: true,
                }),
            );
        }
        self.dsn_handler.set_placed_subscription_orders(&subscribe);

        let unsubscribe = self.dsn_handler.nodes_and_keys_to_unsubscribe(ctx.now);
        for (node, keys) in &unsubscribe {
            ctx.send(
                node.clone(),
                0,
                NetworkMsg::SubscriptionOrder(SubscriptionOrder {
                    keys: keys.clone(),
                    subscribe: false,
                }),
            );
        }
        self.dsn_handler
            .set_placed_unsubscription_orders(&unsubscribe);
    }

    /// A DSN ordered us to push (or stop pushing) updates for some keys.
    fn process_subscription_order(
        &mut self,
        _ctx: &mut Ctx,
        msg: &WireMsg,
        order: &SubscriptionOrder,
    ) -> Result<()> {
        let dsn = msg.sender().clone();
        for key in &order.keys {
            let subscribers = self.subscribers.entry(key.clone()).or_insert_with(Vec::new);
            if order.subscribe {
                if !subscribers.iter().any(|peer| peer.same_position(&dsn)) {
                    subscribers.push(dsn.clone());
                }
            } else {
                subscribers.retain(|peer| !peer.same_position(&dsn));
            }
        }
        Ok(())
    }

    /// A node we subscribed to pushes fresh values.
    fn process_subscription_update(
        &mut self,
        ctx: &mut Ctx,
        msg: &WireMsg,
        update: &SubscriptionUpdate,
    ) -> Result<()> {
        let values: Vec<(Key, Value, ValueKind)> = update
            .entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone(), entry.kind))
            .collect();
        self.dsn_handler
            .update_inquired_values(msg.sender(), &values, ctx.now);
        if !update.removed_keys.is_empty() {
            self.dsn_handler
                .update_removed_attributes(msg.sender(), &update.removed_keys);
        }
        Ok(())
    }

    // ---- the local attribute store ----

    pub(crate) fn local_insert(&mut self, ctx: &mut Ctx, entries: Vec<Entry>) {
        for entry in &entries {
            self.local_data
                .insert(entry.key.clone(), entry.value.clone(), entry.kind, ctx.now);
        }
        self.push_to_subscribers(ctx, entries, Vec::new());
    }

    pub(crate) fn local_update(&mut self, ctx: &mut Ctx, entries: Vec<Entry>) {
        for entry in &entries {
            self.local_data
                .update(entry.key.clone(), entry.value.clone(), entry.kind, ctx.now);
        }
        self.push_to_subscribers(ctx, entries, Vec::new());
    }

    pub(crate) fn local_remove(&mut self, ctx: &mut Ctx, keys: Vec<Key>) {
        let mut removed = Vec::new();
        for key in keys {
            if self.local_data.remove(&key) {
                removed.push(key);
            }
        }
        self.push_to_subscribers(ctx, Vec::new(), removed);
    }

    /// Pushes changed values to every DSN subscribed to any affected key.
    fn push_to_subscribers(&mut self, ctx: &mut Ctx, entries: Vec<Entry>, removed: Vec<Key>) {
        let mut per_dsn: Vec<(Peer, Vec<Entry>, Vec<Key>)> = Vec::new();

        fn index_for(per_dsn: &mut Vec<(Peer, Vec<Entry>, Vec<Key>)>, dsn: &Peer) -> usize {
            if let Some(index) = per_dsn
                .iter()
                .position(|(peer, _, _)| peer.same_position(dsn))
            {
                index
            } else {
                per_dsn.push((dsn.clone(), Vec::new(), Vec::new()));
                per_dsn.len() - 1
            }
        }

        for entry in entries {
            if let Some(subscribers) = self.subscribers.get(&entry.key) {
                for dsn in subscribers.clone() {
                    let index = index_for(&mut per_dsn, &dsn);
                    per_dsn[index].1.push(entry.clone());
                }
            }
        }
        for key in removed {
            if let Some(subscribers) = self.subscribers.get(&key) {
                for dsn in subscribers.clone() {
                    let index = index_for(&mut per_dsn, &dsn);
                    per_dsn[index].2.push(key.clone());
                }
            }
        }

        for (dsn, entries, removed_keys) in per_dsn {
            ctx.send(
                dsn,
                0,
                NetworkMsg::SubscriptionUpdate(SubscriptionUpdate {
                    entries,
                    removed_keys,
                }),
            );
        }
    }
}

/// `Some`-scope answers stop at the threshold; `All` ships everything.
fn filter_results_by_scope(
    results: NodesWithAttributes,
    scope: FindQueryScope,
) -> NodesWithAttributes {
    match scope {
        FindQueryScope::All => results,
        FindQueryScope::Some => results.into_iter().take(SOME_SCOPE_THRESHOLD).collect(),
    }
}
