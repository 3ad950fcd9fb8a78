//! Label queries for `list`/`watch` (spec §4.1, §8 "Label queries").

use corestate_types::resource::Labels;

/// A single predicate over one label key, with an optional negation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelTerm {
    /// The label `key` must equal `value`.
    Equal { key: String, value: String },
    /// The label `key` must be present, with any value.
    Exists { key: String },
    /// The label `key` must be absent.
    NotExists { key: String },
    /// The label `key` must be present and its value must be one of `values`.
    In { key: String, values: Vec<String> },
}

impl LabelTerm {
    fn matches_positive(&self, labels: &Labels) -> bool {
        match self {
            LabelTerm::Equal { key, value } => labels.get(key).map(|v| v == value).unwrap_or(false),
            LabelTerm::Exists { key } => labels.contains_key(key),
            LabelTerm::NotExists { key } => !labels.contains_key(key),
            LabelTerm::In { key, values } => {
                labels.get(key).map(|v| values.iter().any(|x| x == v)).unwrap_or(false)
            }
        }
    }
}

/// One query: a disjunction of terms, optionally negated as a whole.
///
/// Negating a disjunction of terms inverts the overall predicate (De
/// Morgan's), matching spec §4.1's "terms are equal, exists, not-exists,
/// in, plus negations."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelQuery {
    /// The OR'd terms making up this query.
    pub terms: Vec<LabelTerm>,
    /// Whether the whole disjunction is negated.
    pub negate: bool,
}

impl LabelQuery {
    /// A single, non-negated equality term.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            terms: vec![LabelTerm::Equal { key: key.into(), value: value.into() }],
            negate: false,
        }
    }

    /// A single, non-negated existence term.
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            terms: vec![LabelTerm::Exists { key: key.into() }],
            negate: false,
        }
    }

    /// A single, non-negated non-existence term.
    pub fn not_exists(key: impl Into<String>) -> Self {
        Self {
            terms: vec![LabelTerm::NotExists { key: key.into() }],
            negate: false,
        }
    }

    /// A single, non-negated membership term.
    pub fn in_values(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            terms: vec![LabelTerm::In { key: key.into(), values }],
            negate: false,
        }
    }

    /// Negates this query in place.
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Whether `labels` satisfies this query: any term matches (OR),
    /// inverted if `negate` is set.
    pub fn matches(&self, labels: &Labels) -> bool {
        let positive = self.terms.iter().any(|t| t.matches_positive(labels));
        positive != self.negate
    }
}

/// Whether `labels` satisfies every query in `queries` (AND across an
/// ordered sequence of queries, each itself an OR of terms — spec §4.1).
pub fn matches_all(queries: &[LabelQuery], labels: &Labels) -> bool {
    queries.iter().all(|q| q.matches(labels))
}
