//! Dependency keys: ordered tuples of primitive values compared by value.
//!
//! Two keys are equal only if they have the same length and every position
//! holds an equal value of the same kind. Floats follow IEEE equality, so
//! `0.0 == -0.0` and a key containing NaN never matches anything.

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;

use std::fmt;

/// One primitive element of a dependency key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for KeyValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Ordered tuple of key values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyKey(Vec<KeyValue>);

impl DependencyKey {
    #[must_use]
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<KeyValue>> for DependencyKey {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

impl FromIterator<KeyValue> for DependencyKey {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

macro_rules! impl_from_tuple {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: Into<KeyValue>),+> From<($($ty,)+)> for DependencyKey {
            fn from(($($var,)+): ($($ty,)+)) -> Self {
                Self(vec![$($var.into()),+])
            }
        }
    };
}

impl_from_tuple!(A a);
impl_from_tuple!(A a, B b);
impl_from_tuple!(A a, B b, C c);
impl_from_tuple!(A a, B b, C c, D d);
impl_from_tuple!(A a, B b, C c, D d, E e);
impl_from_tuple!(A a, B b, C c, D d, E e, F f);
