//! Metadata query predicates.
//!
//! A [`MetadataPredicate`] describes a filter over entity metadata:
//! equality, set membership, ranges, negation, and boolean combinators.
//! The metadata index answers equality and membership in O(1) per posting
//! and ranges in O(log n); [`MetadataPredicate::matches`] is the
//! post-filter form evaluated against a concrete metadata map (used by
//! the HNSW traversal filter and as a fallback for unindexed fields).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::value::{get_path, MetadataMap, MetadataValue, DELETED_KEY};

/// A filter over entity metadata fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataPredicate {
    /// Field equals the value exactly.
    Equals {
        /// Dotted field path.
        field: String,
        /// Value to match.
        value: MetadataValue,
    },

    /// Field equals any of the values.
    In {
        /// Dotted field path.
        field: String,
        /// Accepted values.
        values: Vec<MetadataValue>,
    },

    /// Field falls within the (half-)open range.
    ///
    /// Bounds left `None` are unconstrained. Values that don't compare
    /// with the bound type (e.g. a string against a numeric bound) fail
    /// the predicate.
    Range {
        /// Dotted field path.
        field: String,
        /// Exclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<MetadataValue>,
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<MetadataValue>,
        /// Exclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<MetadataValue>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<MetadataValue>,
    },

    /// Negation of the inner predicate.
    Not(Box<MetadataPredicate>),

    /// Disjunction: any branch matches.
    Or(Vec<MetadataPredicate>),

    /// Conjunction: every branch matches.
    And(Vec<MetadataPredicate>),
}

impl MetadataPredicate {
    /// Equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Set membership predicate.
    pub fn is_in(
        field: impl Into<String>,
        values: impl IntoIterator<Item = MetadataValue>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Exclusive greater-than range predicate.
    pub fn gt(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Range {
            field: field.into(),
            gt: Some(value.into()),
            gte: None,
            lt: None,
            lte: None,
        }
    }

    /// Inclusive greater-or-equal range predicate.
    pub fn gte(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Range {
            field: field.into(),
            gt: None,
            gte: Some(value.into()),
            lt: None,
            lte: None,
        }
    }

    /// Exclusive less-than range predicate.
    pub fn lt(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Range {
            field: field.into(),
            gt: None,
            gte: None,
            lt: Some(value.into()),
            lte: None,
        }
    }

    /// Inclusive less-or-equal range predicate.
    pub fn lte(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Range {
            field: field.into(),
            gt: None,
            gte: None,
            lt: None,
            lte: Some(value.into()),
        }
    }

    /// Negation combinator.
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: MetadataPredicate) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Disjunction combinator.
    pub fn or(branches: impl IntoIterator<Item = MetadataPredicate>) -> Self {
        Self::Or(branches.into_iter().collect())
    }

    /// Conjunction combinator.
    pub fn and(branches: impl IntoIterator<Item = MetadataPredicate>) -> Self {
        Self::And(branches.into_iter().collect())
    }

    /// The canonical tombstone exclusion filter (`_brainy.deleted = false`).
    ///
    /// A positive match on `false` rather than a negation of `true`: the
    /// index maintains a `deleted=false` posting for every live entity,
    /// keeping the exclusion an O(1) lookup.
    pub fn not_deleted() -> Self {
        Self::eq(DELETED_KEY, false)
    }

    /// Conjoins the tombstone exclusion filter onto this predicate.
    pub fn with_tombstone_filter(self) -> Self {
        match self {
            Self::And(mut branches) => {
                branches.push(Self::not_deleted());
                Self::And(branches)
            }
            other => Self::And(vec![other, Self::not_deleted()]),
        }
    }

    /// Evaluates the predicate against a concrete metadata map.
    pub fn matches(&self, meta: &MetadataMap) -> bool {
        match self {
            Self::Equals { field, value } => field_values(meta, field)
                .iter()
                .any(|candidate| values_equal(candidate, value)),
            Self::In { field, values } => {
                let present = field_values(meta, field);
                present
                    .iter()
                    .any(|candidate| values.iter().any(|v| values_equal(candidate, v)))
            }
            Self::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => field_values(meta, field).iter().any(|candidate| {
                bound_ok(candidate, gt.as_ref(), Ordering::Greater, false)
                    && bound_ok(candidate, gte.as_ref(), Ordering::Greater, true)
                    && bound_ok(candidate, lt.as_ref(), Ordering::Less, false)
                    && bound_ok(candidate, lte.as_ref(), Ordering::Less, true)
            }),
            Self::Not(inner) => !inner.matches(meta),
            Self::Or(branches) => branches.iter().any(|b| b.matches(meta)),
            Self::And(branches) => branches.iter().all(|b| b.matches(meta)),
        }
    }

    /// Collects every field path referenced by the predicate tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Equals { field, .. } | Self::In { field, .. } | Self::Range { field, .. } => {
                out.push(field)
            }
            Self::Not(inner) => inner.collect_fields(out),
            Self::Or(branches) | Self::And(branches) => {
                for b in branches {
                    b.collect_fields(out);
                }
            }
        }
    }
}

/// Returns the scalar values a field holds: the value itself, or each
/// element for list fields. A missing tombstone flag reads as `false`
/// so `not_deleted()` matches entities written before any delete.
fn field_values<'a>(meta: &'a MetadataMap, field: &str) -> Vec<&'a MetadataValue> {
    static NOT_DELETED: MetadataValue = MetadataValue::Bool(false);
    match get_path(meta, field) {
        Some(MetadataValue::List(items)) => items.iter().filter(|v| v.is_scalar()).collect(),
        Some(value) => vec![value],
        None if field == DELETED_KEY => vec![&NOT_DELETED],
        None => Vec::new(),
    }
}

/// Equality across the scalar kinds; Int and Float compare numerically.
pub(crate) fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a, b) {
        (MetadataValue::Int(x), MetadataValue::Float(y))
        | (MetadataValue::Float(y), MetadataValue::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// Ordering across comparable scalar kinds.
///
/// Numerics compare as f64 (so `Int(2)` and `Float(2.5)` order
/// naturally); strings and booleans compare within their own kind.
/// Incomparable kinds return `None` and fail range predicates.
pub(crate) fn compare_values(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    match (a, b) {
        (MetadataValue::Str(x), MetadataValue::Str(y)) => Some(x.cmp(y)),
        (MetadataValue::Bool(x), MetadataValue::Bool(y)) => Some(x.cmp(y)),
        _ => {
            let x = a.as_f64()?;
            let y = b.as_f64()?;
            x.partial_cmp(&y)
        }
    }
}

fn bound_ok(
    candidate: &MetadataValue,
    bound: Option<&MetadataValue>,
    wanted: Ordering,
    or_equal: bool,
) -> bool {
    match bound {
        None => true,
        Some(bound) => match compare_values(candidate, bound) {
            Some(ord) => ord == wanted || (or_equal && ord == Ordering::Equal),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta() -> MetadataMap {
        let mut m = BTreeMap::new();
        m.insert("label".to_string(), MetadataValue::from("alpha"));
        m.insert("year".to_string(), MetadataValue::Int(2024));
        m.insert("score".to_string(), MetadataValue::Float(0.5));
        m.insert(
            "tags".to_string(),
            MetadataValue::List(vec![MetadataValue::from("rust"), MetadataValue::from("db")]),
        );
        m
    }

    #[test]
    fn test_equals() {
        assert!(MetadataPredicate::eq("label", "alpha").matches(&meta()));
        assert!(!MetadataPredicate::eq("label", "beta").matches(&meta()));
        assert!(!MetadataPredicate::eq("missing", "x").matches(&meta()));
    }

    #[test]
    fn test_equals_numeric_cross_kind() {
        assert!(MetadataPredicate::eq("year", 2024.0).matches(&meta()));
        assert!(MetadataPredicate::eq("score", 0.5).matches(&meta()));
    }

    #[test]
    fn test_list_field_matches_any_element() {
        assert!(MetadataPredicate::eq("tags", "rust").matches(&meta()));
        assert!(!MetadataPredicate::eq("tags", "python").matches(&meta()));
    }

    #[test]
    fn test_in() {
        let p = MetadataPredicate::is_in(
            "label",
            [MetadataValue::from("beta"), MetadataValue::from("alpha")],
        );
        assert!(p.matches(&meta()));

        let p = MetadataPredicate::is_in("label", [MetadataValue::from("beta")]);
        assert!(!p.matches(&meta()));
    }

    #[test]
    fn test_range_bounds() {
        assert!(MetadataPredicate::gt("year", 2020i64).matches(&meta()));
        assert!(!MetadataPredicate::gt("year", 2024i64).matches(&meta()));
        assert!(MetadataPredicate::gte("year", 2024i64).matches(&meta()));
        assert!(MetadataPredicate::lt("year", 2025i64).matches(&meta()));
        assert!(!MetadataPredicate::lt("year", 2024i64).matches(&meta()));
        assert!(MetadataPredicate::lte("year", 2024i64).matches(&meta()));
    }

    #[test]
    fn test_range_incomparable_kinds_fail() {
        // String field against numeric bound
        assert!(!MetadataPredicate::gt("label", 10i64).matches(&meta()));
    }

    #[test]
    fn test_combined_range() {
        let p = MetadataPredicate::Range {
            field: "year".to_string(),
            gt: None,
            gte: Some(MetadataValue::Int(2000)),
            lt: Some(MetadataValue::Int(2030)),
            lte: None,
        };
        assert!(p.matches(&meta()));
    }

    #[test]
    fn test_not_and_or() {
        let p = MetadataPredicate::not(MetadataPredicate::eq("label", "beta"));
        assert!(p.matches(&meta()));

        let p = MetadataPredicate::or([
            MetadataPredicate::eq("label", "beta"),
            MetadataPredicate::eq("year", 2024i64),
        ]);
        assert!(p.matches(&meta()));

        let p = MetadataPredicate::and([
            MetadataPredicate::eq("label", "alpha"),
            MetadataPredicate::eq("year", 1999i64),
        ]);
        assert!(!p.matches(&meta()));
    }

    #[test]
    fn test_not_deleted_matches_untombstoned() {
        // No tombstone key at all: still matches the positive filter
        assert!(MetadataPredicate::not_deleted().matches(&meta()));

        let mut deleted = meta();
        deleted.insert(DELETED_KEY.to_string(), MetadataValue::Bool(true));
        assert!(!MetadataPredicate::not_deleted().matches(&deleted));
    }

    #[test]
    fn test_with_tombstone_filter_flattens_into_and() {
        let p = MetadataPredicate::eq("label", "alpha").with_tombstone_filter();
        match &p {
            MetadataPredicate::And(branches) => assert_eq!(branches.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
        assert!(p.matches(&meta()));
    }

    #[test]
    fn test_fields_enumeration() {
        let p = MetadataPredicate::and([
            MetadataPredicate::eq("a", 1i64),
            MetadataPredicate::not(MetadataPredicate::gt("b", 2i64)),
            MetadataPredicate::or([MetadataPredicate::eq("c", 3i64)]),
        ]);
        let mut fields = p.fields();
        fields.sort_unstable();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_predicate_serde_roundtrip() {
        let p = MetadataPredicate::and([
            MetadataPredicate::eq("label", "alpha"),
            MetadataPredicate::gte("year", 2000i64),
        ]);
        let json = serde_json::to_string(&p).unwrap();
        let restored: MetadataPredicate = serde_json::from_str(&json).unwrap();
        assert_eq!(p, restored);
    }
}
