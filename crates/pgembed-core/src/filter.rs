use std::ops::Not;

use crate::MetadataValue;

/// A predicate over segment metadata, applied by the store before ranking.
///
/// Comparison variants name a metadata key. How a key is resolved (a
/// dedicated column or a member of a JSON document) is up to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, MetadataValue),
    /// Also matches rows where the key is absent.
    Ne(String, MetadataValue),
    Gt(String, MetadataValue),
    Gte(String, MetadataValue),
    Lt(String, MetadataValue),
    Lte(String, MetadataValue),
    In(String, Vec<MetadataValue>),
    /// Also matches rows where the key is absent.
    NotIn(String, Vec<MetadataValue>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Eq(key.into(), value.into())
    }

    pub fn ne(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Ne(key.into(), value.into())
    }

    pub fn gt(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Gt(key.into(), value.into())
    }

    pub fn gte(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Gte(key.into(), value.into())
    }

    pub fn lt(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Lt(key.into(), value.into())
    }

    pub fn lte(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Lte(key.into(), value.into())
    }

    pub fn is_in<V: Into<MetadataValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(key.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_not_in<V: Into<MetadataValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::NotIn(key.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}
