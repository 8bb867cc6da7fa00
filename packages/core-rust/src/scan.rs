//! Range/prefix scan arguments shared by every backend.

use std::cmp::Ordering;
use std::ops::Bound;

use crate::tuple::{compare_tuple, Tuple};

/// Arguments of a range scan or subscription.
///
/// Bounds are relative to `prefix`: the effective bound is `prefix ++ b`.
///
/// - `lower = Included(b)`: keys `>= prefix ++ b`
/// - `lower = Excluded(b)`: keys after `prefix ++ b` and after all of its
///   extensions
/// - `upper = Excluded(b)`: keys `< prefix ++ b`
/// - `upper = Included(b)`: keys `<= prefix ++ b`, plus all of its extensions
///
/// Subscriptions ignore `reverse` and `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanArgs {
    pub prefix: Tuple,
    pub lower: Bound<Tuple>,
    pub upper: Bound<Tuple>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self {
            prefix: Tuple::empty(),
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }
}

impl ScanArgs {
    /// Every key, ascending.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key under `prefix`, ascending.
    #[must_use]
    pub fn prefix(prefix: Tuple) -> Self {
        Self {
            prefix,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn gte(mut self, bound: Tuple) -> Self {
        self.lower = Bound::Included(bound);
        self
    }

    #[must_use]
    pub fn gt(mut self, bound: Tuple) -> Self {
        self.lower = Bound::Excluded(bound);
        self
    }

    #[must_use]
    pub fn lt(mut self, bound: Tuple) -> Self {
        self.upper = Bound::Excluded(bound);
        self
    }

    #[must_use]
    pub fn lte(mut self, bound: Tuple) -> Self {
        self.upper = Bound::Included(bound);
        self
    }

    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The same range seen from one level up: `outer` is prepended to the
    /// prefix. Used by subspaces to translate relative arguments into
    /// absolute ones.
    #[must_use]
    pub fn within(&self, outer: &Tuple) -> Self {
        Self {
            prefix: outer.concat(&self.prefix),
            ..self.clone()
        }
    }

    /// Whether `key` lies in the prefix and both bounds.
    #[must_use]
    pub fn contains(&self, key: &Tuple) -> bool {
        let Some(rest) = key.strip_prefix(&self.prefix) else {
            return false;
        };
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(b) => compare_tuple(&rest, b) != Ordering::Less,
            Bound::Excluded(b) => {
                compare_tuple(&rest, b) == Ordering::Greater && !rest.starts_with(b)
            }
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Excluded(b) => compare_tuple(&rest, b) == Ordering::Less,
            Bound::Included(b) => compare_tuple(&rest, b) != Ordering::Greater || rest.starts_with(b),
        };
        above && below
    }

    /// Orders, truncates and returns an ascending sequence of in-range items
    /// according to `reverse` and `limit`.
    pub fn finish<T>(&self, mut ascending: Vec<T>) -> Vec<T> {
        if self.reverse {
            ascending.reverse();
        }
        if let Some(limit) = self.limit {
            ascending.truncate(limit);
        }
        ascending
    }
}
