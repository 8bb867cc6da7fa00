//! Composite sort keys and the total order over them.
//!
//! A [`Tuple`] is an ordered sequence of primitive [`Element`]s. Every
//! backend, the k-way merge, and the key codec agree on a single total order
//! defined by [`compare_tuple`]:
//!
//! - element kinds rank `Null < Bool < Int < Float < String < Bytes`
//! - within a kind: `false < true`, integers numerically, floats by the
//!   IEEE-754 total order, strings and bytes lexicographically by byte
//! - tuples compare element-wise; a strict prefix sorts before its extensions

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single primitive component of a [`Tuple`].
///
/// Equality and ordering follow [`compare_element`], so unlike raw `f64`
/// comparison `Float(NaN) == Float(NaN)` and `Float(-0.0) < Float(0.0)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Element {
    /// Absent value. Sorts before every other kind.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Element {
    /// Position of this element's kind in the cross-kind order.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::String(_) => 4,
            Self::Bytes(_) => 5,
        }
    }
}

/// Compares two elements under the tuple total order.
#[must_use]
pub fn compare_element(a: &Element, b: &Element) -> Ordering {
    match (a, b) {
        (Element::Null, Element::Null) => Ordering::Equal,
        (Element::Bool(x), Element::Bool(y)) => x.cmp(y),
        (Element::Int(x), Element::Int(y)) => x.cmp(y),
        (Element::Float(x), Element::Float(y)) => x.total_cmp(y),
        (Element::String(x), Element::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Element::Bytes(x), Element::Bytes(y)) => x.cmp(y),
        _ => a.rank().cmp(&b.rank()),
    }
}

/// Compares two tuples element-wise; a strict prefix is the lesser tuple.
#[must_use]
pub fn compare_tuple(a: &Tuple, b: &Tuple) -> Ordering {
    for (x, y) in a.0.iter().zip(b.0.iter()) {
        match compare_element(x, y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.0.len().cmp(&b.0.len())
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        compare_element(self, other) == Ordering::Equal
    }
}

impl Eq for Element {}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_element(self, other)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b{b:?}"),
        }
    }
}

impl From<bool> for Element {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Element {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Element {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Element {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Element {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Element {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Element {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Element {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Ordered composite key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuple(Vec<Element>);

impl Tuple {
    /// Creates a tuple from its elements.
    #[must_use]
    pub fn new(elements: Vec<Element>) -> Self {
        Self(elements)
    }

    /// The zero-length tuple. Prefix of every tuple.
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.0.iter()
    }

    pub fn push(&mut self, element: impl Into<Element>) {
        self.0.push(element.into());
    }

    /// Returns `self ++ suffix` as a new tuple.
    #[must_use]
    pub fn concat(&self, suffix: &Tuple) -> Tuple {
        let mut elements = Vec::with_capacity(self.0.len() + suffix.0.len());
        elements.extend_from_slice(&self.0);
        elements.extend_from_slice(&suffix.0);
        Tuple(elements)
    }

    /// Whether `prefix` is an element-wise prefix of `self` (or equal to it).
    #[must_use]
    pub fn starts_with(&self, prefix: &Tuple) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns the remainder of `self` after `prefix`, or `None` if `prefix`
    /// is not a prefix of `self`.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Tuple) -> Option<Tuple> {
        self.0.strip_prefix(prefix.0.as_slice()).map(|rest| Tuple(rest.to_vec()))
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Element> {
        self.0
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_tuple(self, other)
    }
}

impl From<Vec<Element>> for Tuple {
    fn from(elements: Vec<Element>) -> Self {
        Self(elements)
    }
}

impl FromIterator<Element> for Tuple {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{element}")?;
        }
        if self.0.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// Builds a [`Tuple`] from values convertible into [`Element`].
///
/// ```
/// use multistore_core::tuple;
/// let key = tuple!["users", 42];
/// assert_eq!(key.len(), 2);
/// ```
#[macro_export]
macro_rules! tuple {
    () => {
        $crate::Tuple::empty()
    };
    ($($element:expr),+ $(,)?) => {
        $crate::Tuple::new(vec![$($crate::Element::from($element)),+])
    };
}

/// A key paired with its stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair<V> {
    pub key: Tuple,
    pub value: V,
}

impl<V> KeyValuePair<V> {
    #[must_use]
    pub fn new(key: Tuple, value: V) -> Self {
        Self { key, value }
    }
}
