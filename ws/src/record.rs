//! Record trait and index types
//!
//! A [`Record`] declares its collection name and which fields the store
//! should index. Index values are a small closed set of scalar types so the
//! index map stays hashable and comparable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A value that can be stored in a secondary index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Comparison operator for filtered queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// A single filter condition on an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Equality filter on an indexed field
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Inequality filter on an indexed field
    pub fn ne(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Ne,
            value: value.into(),
        }
    }

    /// Check whether a record's indexed fields satisfy this filter
    pub fn matches(&self, fields: &HashMap<String, IndexValue>) -> bool {
        match (self.op, fields.get(&self.field)) {
            (FilterOp::Eq, Some(v)) => *v == self.value,
            (FilterOp::Eq, None) => false,
            (FilterOp::Ne, Some(v)) => *v != self.value,
            (FilterOp::Ne, None) => true,
        }
    }
}

/// A persistable record with a stable id and declared indexes
pub trait Record: Serialize + for<'de> Deserialize<'de> + Clone {
    /// Stable unique identifier
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds)
    fn updated_at(&self) -> i64;

    /// Collection this record type is stored in
    fn collection_name() -> &'static str;

    /// Fields to maintain secondary indexes on
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, IndexValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), IndexValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_filter_eq() {
        let f = Filter::eq("status", "pending");
        assert!(f.matches(&fields(&[("status", "pending")])));
        assert!(!f.matches(&fields(&[("status", "done")])));
        assert!(!f.matches(&fields(&[])));
    }

    #[test]
    fn test_filter_ne() {
        let f = Filter::ne("status", "pending");
        assert!(!f.matches(&fields(&[("status", "pending")])));
        assert!(f.matches(&fields(&[("status", "done")])));
        // Missing field is "not equal"
        assert!(f.matches(&fields(&[])));
    }

    #[test]
    fn test_index_value_display() {
        assert_eq!(IndexValue::from("abc").to_string(), "abc");
        assert_eq!(IndexValue::Int(7).to_string(), "7");
        assert_eq!(IndexValue::Bool(true).to_string(), "true");
    }
}
