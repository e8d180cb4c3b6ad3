// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Tri-state evaluation of a [`FindQuery`] over an attribute source.
//!
//! A DSN evaluating a query over its cache may simply not know an attribute
//! (or only know a stale value) — that answers *undecided*, not false, and
//! drives the inquiry fan-out. Only once all obtainable information is in is
//! the unknown collapsed to false.

use super::local_data::AttributeSource;
use crate::messaging::system::{FindQuery, QueryExpr};
use crate::types::{Key, Value, ValueKind};

/// Three-valued query verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TriState {
    True,
    False,
    Undecided,
}

impl TriState {
    pub(crate) fn is_true(self) -> bool {
        self == TriState::True
    }

    pub(crate) fn is_undecided(self) -> bool {
        self == TriState::Undecided
    }

    fn not(self) -> Self {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Undecided => TriState::Undecided,
        }
    }

    fn and(self, other: Self) -> Self {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Undecided,
        }
    }

    fn or(self, other: Self) -> Self {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Undecided,
        }
    }
}

/// A value we can use for a verdict: present and, if dynamic, fresh enough.
fn usable_value<'a>(
    source: &'a dyn AttributeSource,
    key: &str,
    valid_after: u64,
) -> Option<&'a Value> {
    source.stored(key).and_then(|stored| {
        if stored.kind == ValueKind::Static || stored.updated_at >= valid_after {
            Some(&stored.value)
        } else {
            None
        }
    })
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn eval_expr(
    expr: &QueryExpr,
    source: &dyn AttributeSource,
    all_information_present: bool,
    valid_after: u64,
) -> TriState {
    let unknown = |key: &str| -> TriState {
        // If every obtainable value is present, an absent attribute is a
        // definite miss. Otherwise we may simply not have heard of it yet.
        if all_information_present || source.stored(key).is_some() {
            TriState::False
        } else {
            TriState::Undecided
        }
    };

    match expr {
        QueryExpr::All => TriState::True,
        QueryExpr::Present(key) => match usable_value(source, key, valid_after) {
            Some(_) => TriState::True,
            None => unknown(key),
        },
        QueryExpr::Equals(key, expected) => match usable_value(source, key, valid_after) {
            Some(value) => {
                if value == expected {
                    TriState::True
                } else {
                    TriState::False
                }
            }
            None => unknown(key),
        },
        QueryExpr::Less(key, bound) => match usable_value(source, key, valid_after) {
            Some(value) => match compare(value, bound) {
                Some(std::cmp::Ordering::Less) => TriState::True,
                Some(_) => TriState::False,
                None => TriState::False,
            },
            None => unknown(key),
        },
        QueryExpr::Greater(key, bound) => match usable_value(source, key, valid_after) {
            Some(value) => match compare(value, bound) {
                Some(std::cmp::Ordering::Greater) => TriState::True,
                Some(_) => TriState::False,
                None => TriState::False,
            },
            None => unknown(key),
        },
        QueryExpr::Not(inner) => {
            eval_expr(inner, source, all_information_present, valid_after).not()
        }
        QueryExpr::And(left, right) => eval_expr(left, source, all_information_present, valid_after)
            .and(eval_expr(right, source, all_information_present, valid_after)),
        QueryExpr::Or(left, right) => eval_expr(left, source, all_information_present, valid_after)
            .or(eval_expr(right, source, all_information_present, valid_after)),
    }
}

/// Evaluates `query` against `source`. `valid_after` is the oldest update
/// timestamp a dynamic value may carry and still count as known.
pub(crate) fn evaluate(
    query: &FindQuery,
    source: &dyn AttributeSource,
    all_information_present: bool,
    valid_after: u64,
) -> TriState {
    eval_expr(&query.expr, source, all_information_present, valid_after)
}

/// The keys the query mentions for which `source` has no usable value — what
/// an attribute inquiry has to ask for.
pub(crate) fn missing_keys(query: &FindQuery, source: &dyn AttributeSource, valid_after: u64) -> Vec<Key> {
    let mut missing: Vec<Key> = query
        .relevant_keys()
        .into_iter()
        .filter(|key| usable_value(source, key, valid_after).is_none())
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::super::local_data::LocalData;
    use super::*;
    use crate::messaging::system::{FindQueryScope, FindQuerySelection};

    fn query(expr: QueryExpr) -> FindQuery {
        FindQuery::new(expr, FindQueryScope::All, FindQuerySelection::SelectAll)
    }

    fn store() -> LocalData {
        let mut data = LocalData::default();
        data.insert("cpu".into(), Value::Int(8), ValueKind::Static, 100);
        data.insert("load".into(), Value::Float(0.5), ValueKind::Dynamic, 100);
        data
    }

    #[test]
    fn present_and_comparisons() {
        let data = store();
        let q = query(QueryExpr::Present("cpu".into()));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::True);

        let q = query(QueryExpr::Greater("cpu".into(), Value::Int(4)));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::True);

        let q = query(QueryExpr::Less("cpu".into(), Value::Int(4)));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::False);
    }

    #[test]
    fn unknown_attributes_are_undecided_until_all_information_present() {
        let data = store();
        let q = query(QueryExpr::Present("gpu".into()));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::Undecided);
        assert_eq!(evaluate(&q, &data, true, 0), TriState::False);
    }

    #[test]
    fn stale_dynamic_values_are_undecided() {
        let data = store();
        // load updated at 100; validity threshold at 200
        let q = query(QueryExpr::Present("load".into()));
        assert_eq!(evaluate(&q, &data, false, 200), TriState::Undecided);
        // static values never go stale
        let q = query(QueryExpr::Present("cpu".into()));
        assert_eq!(evaluate(&q, &data, false, 200), TriState::True);
    }

    #[test]
    fn kleene_logic_combines_verdicts() {
        let data = store();
        let q = query(QueryExpr::And(
            Box::new(QueryExpr::Present("cpu".into())),
            Box::new(QueryExpr::Present("gpu".into())),
        ));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::Undecided);

        let q = query(QueryExpr::Or(
            Box::new(QueryExpr::Present("cpu".into())),
            Box::new(QueryExpr::Present("gpu".into())),
        ));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::True);

        let q = query(QueryExpr::Not(Box::new(QueryExpr::Present("gpu".into()))));
        assert_eq!(evaluate(&q, &data, false, 0), TriState::Undecided);
    }

    #[test]
    fn missing_keys_drive_the_inquiry() {
        let data = store();
        let q = query(QueryExpr::And(
            Box::new(QueryExpr::Present("gpu".into())),
            Box::new(QueryExpr::Greater("load".into(), Value::Float(0.1))),
        ));
        assert_eq!(missing_keys(&q, &data, 0), vec![Key::from("gpu")]);
        // with a tight freshness bound the dynamic value needs re-inquiring
        assert_eq!(
            missing_keys(&q, &data, 200),
            vec![Key::from("gpu"), Key::from("load")]
        );
    }
}
