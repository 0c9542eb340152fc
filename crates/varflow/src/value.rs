//! Value trees carried through engine primitives.
//!
//! Uses Arc for tuples to make Clone O(1), like arrays.

use crate::array::Array;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Unit,
    Array(Array),
    Tuple(Arc<[Value]>),
}

/// Shape-only description of a value tree (batch axes excluded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Structure {
    Unit,
    Array(Vec<usize>),
    Tuple(Vec<Structure>),
}

impl Value {
    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn scalar(value: f64) -> Self {
        Value::Array(Array::scalar(value))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn into_array(self, context: &'static str) -> Result<Array> {
        match self {
            Value::Array(array) => Ok(array),
            _ => Err(Error::NotAnArray(context)),
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Split a pair produced by [`Value::tuple`].
    pub fn into_pair(self, context: &'static str) -> Result<(Value, Value)> {
        match self.as_tuple() {
            Some([first, second]) => Ok((first.clone(), second.clone())),
            _ => Err(Error::NotATuple(context)),
        }
    }

    /// Item `index` of a tuple.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_tuple().and_then(|items| items.get(index))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        self.as_array().and_then(Array::as_scalar)
    }

    pub fn structure(&self) -> Structure {
        match self {
            Value::Unit => Structure::Unit,
            Value::Array(array) => Structure::Array(array.shape().to_vec()),
            Value::Tuple(items) => Structure::Tuple(items.iter().map(Value::structure).collect()),
        }
    }

    /// All arrays of the tree, depth first.
    pub fn leaves(&self) -> Vec<&Array> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Array>) {
        match self {
            Value::Unit => {}
            Value::Array(array) => out.push(array),
            Value::Tuple(items) => items.iter().for_each(|item| item.collect_leaves(out)),
        }
    }

    pub fn map_arrays(&self, f: &mut impl FnMut(&Array) -> Result<Array>) -> Result<Value> {
        Ok(match self {
            Value::Unit => Value::Unit,
            Value::Array(array) => Value::Array(f(array)?),
            Value::Tuple(items) => Value::Tuple(
                items
                    .iter()
                    .map(|item| item.map_arrays(&mut *f))
                    .collect::<Result<Arc<[Value]>>>()?,
            ),
        })
    }

    /// Common length of the leading axis of every leaf, `None` for a tree
    /// without arrays.
    pub fn leading_len(&self) -> Result<Option<usize>> {
        let mut len = None;
        for leaf in self.leaves() {
            let found = leaf.len().ok_or(Error::ScalarAxis)?;
            match len {
                Some(expected) if expected != found => {
                    return Err(Error::LengthMismatch { expected, found });
                }
                _ => len = Some(found),
            }
        }
        Ok(len)
    }

    /// Entry `index` along the leading axis of every leaf.
    pub fn index_leading(&self, index: usize) -> Result<Value> {
        self.map_arrays(&mut |array| array.index(index))
    }

    /// Stack equally structured trees along a new leading axis.
    pub fn stack(items: &[Value]) -> Result<Value> {
        let first = items.first().ok_or(Error::EmptyStack)?;
        let expected = first.structure();
        for item in &items[1..] {
            let found = item.structure();
            if found != expected {
                return Err(Error::StructureMismatch {
                    context: "stacked outputs",
                    expected,
                    found,
                });
            }
        }
        Self::stack_unchecked(first, items)
    }

    fn stack_unchecked(first: &Value, items: &[Value]) -> Result<Value> {
        Ok(match first {
            Value::Unit => Value::Unit,
            Value::Array(_) => {
                let arrays = items
                    .iter()
                    .map(|item| item.clone().into_array("stack"))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(Array::stack(&arrays)?)
            }
            Value::Tuple(fields) => {
                let mut stacked = Vec::with_capacity(fields.len());
                for (position, field) in fields.iter().enumerate() {
                    let column = items
                        .iter()
                        .map(|item| item.get(position).cloned().ok_or(Error::NotATuple("stack")))
                        .collect::<Result<Vec<_>>>()?;
                    stacked.push(Self::stack_unchecked(field, &column)?);
                }
                Value::tuple(stacked)
            }
        })
    }

    /// Per-element choice between two equally structured trees.
    pub fn select(pred: &Array, on_true: &Value, on_false: &Value) -> Result<Value> {
        match (on_true, on_false) {
            (Value::Unit, Value::Unit) => Ok(Value::Unit),
            (Value::Array(t), Value::Array(f)) => Ok(Value::Array(Array::select(pred, t, f)?)),
            (Value::Tuple(ts), Value::Tuple(fs)) if ts.len() == fs.len() => Ok(Value::Tuple(
                ts.iter()
                    .zip(fs.iter())
                    .map(|(t, f)| Value::select(pred, t, f))
                    .collect::<Result<Arc<[Value]>>>()?,
            )),
            _ => Err(Error::StructureMismatch {
                context: "select",
                expected: on_true.structure(),
                found: on_false.structure(),
            }),
        }
    }

    pub fn is_batched(&self) -> bool {
        self.leaves().iter().any(|leaf| leaf.is_batched())
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::scalar(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Array(Array::from(value))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::tuple(items)
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Value::tuple([a.into(), b.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> From<(A, B, C)> for Value {
    fn from((a, b, c): (A, B, C)) -> Self {
        Value::tuple([a.into(), b.into(), c.into()])
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Array(array) => write!(f, "{array}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Structure::Unit => write!(f, "()"),
            Structure::Array(shape) => write!(f, "f64{shape:?}"),
            Structure::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}
