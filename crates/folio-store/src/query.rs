//! The store's native query form.
//!
//! Collections translate their declarative filters into a [`StoreQuery`]:
//! a conjunction of [`Condition`]s, an ordering, and an offset/limit window.

use std::cmp::Ordering;

use folio_types::{FieldPath, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::{compare_values, same_type};

/// Comparison operator of one condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

/// `path <op> value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: FieldPath,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(path: FieldPath, op: Operator, value: Value) -> Self {
        Self { path, op, value }
    }

    /// Evaluate against a document body.
    ///
    /// A document lacking the field never matches, including for `NotEq`
    /// and `NotIn`. Range operators only match values of the operand's type.
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = self.path.get(fields) else {
            return false;
        };
        let ranged = || same_type(actual, &self.value).then(|| compare_values(actual, &self.value));
        match self.op {
            Operator::Eq => compare_values(actual, &self.value) == Ordering::Equal,
            Operator::NotEq => compare_values(actual, &self.value) != Ordering::Equal,
            Operator::Lt => ranged() == Some(Ordering::Less),
            Operator::Lte => matches!(ranged(), Some(Ordering::Less | Ordering::Equal)),
            Operator::Gt => ranged() == Some(Ordering::Greater),
            Operator::Gte => matches!(ranged(), Some(Ordering::Greater | Ordering::Equal)),
            Operator::In => candidates(&self.value).any(|c| compare_values(actual, c) == Ordering::Equal),
            Operator::NotIn => !candidates(&self.value).any(|c| compare_values(actual, c) == Ordering::Equal),
            Operator::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|i| compare_values(i, &self.value) == Ordering::Equal)),
            Operator::ArrayContainsAny => actual.as_array().is_some_and(|items| {
                items
                    .iter()
                    .any(|i| candidates(&self.value).any(|c| compare_values(i, c) == Ordering::Equal))
            }),
        }
    }
}

fn candidates(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: FieldPath,
    pub direction: Direction,
}

/// A query over one collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub collection: String,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl StoreQuery {
    /// Every document of `collection`.
    pub fn all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Returns `true` if the body satisfies every condition and carries
    /// every ordering field.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.conditions.iter().all(|c| c.matches(fields))
            && self.order_by.iter().all(|o| o.path.get(fields).is_some())
    }

    /// Compare two bodies by this query's ordering.
    pub fn compare(&self, a: &Fields, b: &Fields) -> Ordering {
        for order in &self.order_by {
            let (Some(left), Some(right)) = (order.path.get(a), order.path.get(b)) else {
                continue;
            };
            let ord = compare_values(left, right);
            let ord = match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
