//! Declarative collection queries.
//!
//! A [`Query`] is built from field filters, ordering and pagination and
//! translated into the store's [`StoreQuery`] form. `Query::default()` is the
//! empty-query sentinel: reads treat it as "everything", but query-driven
//! deletes refuse it. Deleting everything has to be asked for explicitly with
//! [`Query::all`].

use folio_store::{Condition, Direction, Operator, OrderBy, StoreQuery};
use folio_types::{FieldPath, Fields};
use serde_json::Value;

use crate::error::CollectionResult;

/// One `field <op> value` condition; `field` may be dotted.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// How much of the ordered result to return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pagination {
    /// Zero-based page of `items_count` documents.
    Page { page: usize, items_count: usize },
    /// The first `n` documents.
    Limit(usize),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Vec<(String, Direction)>,
    pagination: Option<Pagination>,
    match_all: bool,
}

impl Query {
    /// A query that explicitly matches every document.
    pub fn all() -> Self {
        Self {
            match_all: true,
            ..Self::default()
        }
    }

    /// Build an equality query from a filter object.
    ///
    /// Nested objects match field by field, so `{"address": {"city": "Oslo"}}`
    /// requires `address.city == "Oslo"`. An empty object matches everything.
    pub fn from_fields(filter: &Fields) -> Self {
        let mut query = Self::all();
        for (field, value) in filter {
            query = query.nested(field, value.clone());
        }
        query
    }

    /// Returns `true` for the empty-query sentinel.
    pub fn is_empty(&self) -> bool {
        !self.match_all && self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Eq, value)
    }

    pub fn not_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::NotEq, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Lte, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Gte, value)
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, Operator::In, Value::Array(values))
    }

    pub fn not_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, Operator::NotIn, Value::Array(values))
    }

    pub fn array_contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::ArrayContains, value)
    }

    pub fn array_contains_any(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(field, Operator::ArrayContainsAny, Value::Array(values))
    }

    /// Equality on a possibly nested value, flattened to dotted fields.
    pub fn nested(mut self, field: impl Into<String>, value: Value) -> Self {
        let field = field.into();
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                for (key, value) in inner {
                    self = self.nested(format!("{field}.{key}"), value);
                }
                self
            }
            other => self.eq(field, other),
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    pub fn page(mut self, page: usize, items_count: usize) -> Self {
        self.pagination = Some(Pagination::Page { page, items_count });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.pagination = Some(Pagination::Limit(n));
        self
    }

    /// Translate into the store's query form for `collection`.
    pub fn to_store_query(&self, collection: &str) -> CollectionResult<StoreQuery> {
        let mut query = StoreQuery::all(collection);
        for filter in &self.filters {
            query.conditions.push(Condition::new(
                FieldPath::parse(&filter.field)?,
                filter.op,
                filter.value.clone(),
            ));
        }
        for (field, direction) in &self.order {
            query.order_by.push(OrderBy {
                path: FieldPath::parse(field)?,
                direction: *direction,
            });
        }
        match self.pagination {
            Some(Pagination::Page { page, items_count }) => {
                query.offset = page.saturating_mul(items_count);
                query.limit = Some(items_count);
            }
            Some(Pagination::Limit(n)) => query.limit = Some(n),
            None => {}
        }
        Ok(query)
    }
}
