//! Dense `f64` arrays with an optional batch axis.
//!
//! Booleans are stored as `0.0` / `1.0`. A batched array holds one logical
//! array per batch element; `shape()` always reports the logical
//! (per-element) shape, the batch size is tracked separately.

use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

pub type Shape = SmallVec<[usize; 4]>;

/// Immutable array value. Clone is O(1) (data is `Arc`-backed).
///
/// The arithmetic operators (`+`, `-`, `*`, `/`) broadcast and panic when
/// the shapes or batch sizes are incompatible. Use [`Array::zip_with`] in
/// code that must report the mismatch as an [`Error`].
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Shape,
    batch: Option<usize>,
    data: Arc<[f64]>,
}

fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Right-aligned (numpy style) broadcast of two logical shapes.
fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Option<Shape> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = Shape::with_capacity(ndim);
    for axis in 0..ndim {
        let dim = |shape: &[usize]| {
            let skip = ndim - shape.len();
            if axis < skip { 1 } else { shape[axis - skip] }
        };
        let (a, b) = (dim(lhs), dim(rhs));
        out.push(match (a, b) {
            _ if a == b => a,
            (1, _) => b,
            (_, 1) => a,
            _ => return None,
        });
    }
    Some(out)
}

fn join_batch(lhs: Option<usize>, rhs: Option<usize>) -> Result<Option<usize>> {
    match (lhs, rhs) {
        (Some(a), Some(b)) if a != b => Err(Error::BatchMismatch { lhs: a, rhs: b }),
        (Some(n), _) | (_, Some(n)) => Ok(Some(n)),
        (None, None) => Ok(None),
    }
}

impl Array {
    pub fn new(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        if data.len() != numel(shape) {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                found: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.into(),
            batch: None,
            data: data.into(),
        })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::new(),
            batch: None,
            data: Arc::from([value]),
        }
    }

    /// One-dimensional array.
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self {
            shape: smallvec::smallvec![values.len()],
            batch: None,
            data: values.into(),
        }
    }

    /// Two-dimensional array from equally long rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            if row.len() != cols {
                return Err(Error::ShapeMismatch {
                    expected: vec![cols],
                    found: vec![row.len()],
                });
            }
            data.extend(row);
        }
        Self::new(&[n, cols], data)
    }

    pub fn full(shape: &[usize], value: f64) -> Self {
        Self {
            shape: shape.into(),
            batch: None,
            data: vec![value; numel(shape)].into(),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements of one logical array.
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Total number of stored elements, batch included.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch
    }

    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    /// Raw storage: batch-major, then row-major over the logical shape.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// The single element of an unbatched one-element array.
    pub fn as_scalar(&self) -> Option<f64> {
        match (self.batch, &*self.data) {
            (None, [value]) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().map(|v| v != 0.0)
    }

    /// Whether any stored element is non-zero.
    pub fn any(&self) -> bool {
        self.data.iter().any(|&v| v != 0.0)
    }

    pub fn all_close(&self, other: &Array, tolerance: f64) -> bool {
        self.shape == other.shape
            && self.batch == other.batch
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance || a == b)
    }

    // ----- Batch axis -----

    /// Move the leading logical axis into the batch axis.
    pub fn into_batched(self) -> Result<Self> {
        if self.batch.is_some() {
            return Err(Error::NestedBatch);
        }
        let Some((&n, rest)) = self.shape.split_first() else {
            return Err(Error::ScalarAxis);
        };
        Ok(Self {
            shape: rest.into(),
            batch: Some(n),
            data: self.data,
        })
    }

    /// Move the batch axis back to the leading logical axis.
    pub fn into_unbatched(self) -> Self {
        match self.batch {
            None => self,
            Some(n) => {
                let mut shape = Shape::with_capacity(self.shape.len() + 1);
                shape.push(n);
                shape.extend_from_slice(&self.shape);
                Self {
                    shape,
                    batch: None,
                    data: self.data,
                }
            }
        }
    }

    /// Same data under another logical shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if numel(shape) != self.numel() {
            return Err(Error::ShapeMismatch {
                expected: self.shape.to_vec(),
                found: shape.to_vec(),
            });
        }
        Ok(Self {
            shape: shape.into(),
            batch: self.batch,
            data: self.data.clone(),
        })
    }

    /// Materialize `self` with the given logical shape and batch size.
    pub fn broadcast_to(&self, shape: &[usize], batch: Option<usize>) -> Result<Self> {
        if self.shape.as_slice() == shape && self.batch == batch {
            return Ok(self.clone());
        }
        let broadcast_error = || Error::Broadcast {
            lhs: self.shape.to_vec(),
            rhs: shape.to_vec(),
        };
        match (self.batch, batch) {
            (Some(a), Some(b)) if a != b => return Err(Error::BatchMismatch { lhs: a, rhs: b }),
            (Some(a), None) => return Err(Error::BatchMismatch { lhs: a, rhs: 0 }),
            _ => {}
        }
        let offset = shape
            .len()
            .checked_sub(self.ndim())
            .ok_or_else(broadcast_error)?;
        let mut strides = vec![0usize; shape.len()];
        let mut step = 1;
        for axis in (0..self.ndim()).rev() {
            let dim = self.shape[axis];
            if dim != 1 && dim != shape[axis + offset] {
                return Err(broadcast_error());
            }
            strides[axis + offset] = if dim == 1 { 0 } else { step };
            step *= dim;
        }

        let src_numel = self.numel();
        let out_numel = numel(shape);
        let copies = batch.unwrap_or(1);
        let mut data = Vec::with_capacity(copies * out_numel);
        for k in 0..copies {
            let base = if self.batch.is_some() { k * src_numel } else { 0 };
            for linear in 0..out_numel {
                let mut rest = linear;
                let mut offset = 0;
                for axis in (0..shape.len()).rev() {
                    offset += (rest % shape[axis]) * strides[axis];
                    rest /= shape[axis];
                }
                data.push(self.data[base + offset]);
            }
        }
        Ok(Self {
            shape: shape.into(),
            batch,
            data: data.into(),
        })
    }

    // ----- Elementwise -----

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            batch: self.batch,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Broadcasting binary operation.
    pub fn zip_with(&self, other: &Array, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        let shape = broadcast_shapes(&self.shape, &other.shape).ok_or_else(|| Error::Broadcast {
            lhs: self.shape.to_vec(),
            rhs: other.shape.to_vec(),
        })?;
        let batch = join_batch(self.batch, other.batch)?;
        let lhs = self.broadcast_to(&shape, batch)?;
        let rhs = other.broadcast_to(&shape, batch)?;
        let data = lhs
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self { shape, batch, data })
    }

    /// Per-element choice between `on_true` and `on_false`.
    ///
    /// `pred` is usually a (possibly batched) scalar; it broadcasts like any
    /// other operand.
    pub fn select(pred: &Array, on_true: &Array, on_false: &Array) -> Result<Self> {
        let incompatible = |lhs: &[usize], rhs: &[usize]| Error::Broadcast {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        };
        let shape = broadcast_shapes(&on_true.shape, &on_false.shape)
            .ok_or_else(|| incompatible(&on_true.shape[..], &on_false.shape[..]))?;
        let shape = broadcast_shapes(&shape, &pred.shape)
            .ok_or_else(|| incompatible(&shape[..], &pred.shape[..]))?;
        let batch = join_batch(join_batch(on_true.batch, on_false.batch)?, pred.batch)?;
        let pred = pred.broadcast_to(&shape, batch)?;
        let on_true = on_true.broadcast_to(&shape, batch)?;
        let on_false = on_false.broadcast_to(&shape, batch)?;
        let data = pred
            .data
            .iter()
            .zip(on_true.data.iter().zip(on_false.data.iter()))
            .map(|(&p, (&t, &f))| if p != 0.0 { t } else { f })
            .collect();
        Ok(Self { shape, batch, data })
    }

    pub fn sin(&self) -> Self {
        self.map(f64::sin)
    }

    pub fn cos(&self) -> Self {
        self.map(f64::cos)
    }

    pub fn tan(&self) -> Self {
        self.map(f64::tan)
    }

    pub fn tanh(&self) -> Self {
        self.map(f64::tanh)
    }

    pub fn exp(&self) -> Self {
        self.map(f64::exp)
    }

    pub fn abs(&self) -> Self {
        self.map(f64::abs)
    }

    pub fn gt(&self, rhs: f64) -> Self {
        self.map(|v| f64::from(u8::from(v > rhs)))
    }

    pub fn ge(&self, rhs: f64) -> Self {
        self.map(|v| f64::from(u8::from(v >= rhs)))
    }

    pub fn lt(&self, rhs: f64) -> Self {
        self.map(|v| f64::from(u8::from(v < rhs)))
    }

    pub fn le(&self, rhs: f64) -> Self {
        self.map(|v| f64::from(u8::from(v <= rhs)))
    }

    // ----- Reductions and indexing -----

    /// Sum over all logical axes; keeps the batch axis.
    pub fn sum(&self) -> Self {
        let inner = self.numel().max(1);
        let data: Vec<f64> = if self.numel() == 0 {
            vec![0.0; self.batch.unwrap_or(1)]
        } else {
            self.data.chunks(inner).map(|chunk| chunk.iter().sum()).collect()
        };
        Self {
            shape: Shape::new(),
            batch: self.batch,
            data: data.into(),
        }
    }

    pub fn mean(&self) -> Self {
        let n = self.numel() as f64;
        self.sum().map(|v| v / n)
    }

    /// Length of the leading logical axis.
    pub fn len(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Entry `index` along the leading logical axis (per batch element).
    pub fn index(&self, index: usize) -> Result<Self> {
        let Some((&len, rest)) = self.shape.split_first() else {
            return Err(Error::ScalarAxis);
        };
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        let inner = numel(rest);
        let per_element = len * inner;
        let mut data = Vec::with_capacity(self.batch.unwrap_or(1) * inner);
        for k in 0..self.batch.unwrap_or(1) {
            let start = k * per_element + index * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }
        Ok(Self {
            shape: rest.into(),
            batch: self.batch,
            data: data.into(),
        })
    }

    /// Stack equally shaped arrays along a new leading logical axis.
    pub fn stack(items: &[Array]) -> Result<Self> {
        let first = items.first().ok_or(Error::EmptyStack)?;
        let mut batch = None;
        for item in items {
            if item.shape != first.shape {
                return Err(Error::ShapeMismatch {
                    expected: first.shape.to_vec(),
                    found: item.shape.to_vec(),
                });
            }
            batch = join_batch(batch, item.batch)?;
        }
        let inner = first.numel();
        let items = items
            .iter()
            .map(|item| item.broadcast_to(&first.shape, batch))
            .collect::<Result<Vec<_>>>()?;
        let mut data = Vec::with_capacity(batch.unwrap_or(1) * items.len() * inner);
        for k in 0..batch.unwrap_or(1) {
            for item in &items {
                data.extend_from_slice(&item.data[k * inner..(k + 1) * inner]);
            }
        }
        let mut shape = Shape::with_capacity(first.ndim() + 1);
        shape.push(items.len());
        shape.extend_from_slice(&first.shape);
        Ok(Self {
            shape,
            batch,
            data: data.into(),
        })
    }
}

impl From<f64> for Array {
    fn from(value: f64) -> Self {
        Array::scalar(value)
    }
}

impl From<i32> for Array {
    fn from(value: i32) -> Self {
        Array::scalar(f64::from(value))
    }
}

impl From<bool> for Array {
    fn from(value: bool) -> Self {
        Array::scalar(f64::from(u8::from(value)))
    }
}

impl From<Vec<f64>> for Array {
    fn from(values: Vec<f64>) -> Self {
        Array::from_vec(values)
    }
}

// Operators panic on incompatible shapes; use `zip_with` to get an error
// instead.
macro_rules! binary_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl std::ops::$trait<&Array> for &Array {
            type Output = Array;

            fn $method(self, rhs: &Array) -> Array {
                match self.zip_with(rhs, |a, b| a $op b) {
                    Ok(out) => out,
                    Err(err) => panic!("{}: {err}", stringify!($method)),
                }
            }
        }

        impl std::ops::$trait<Array> for Array {
            type Output = Array;

            fn $method(self, rhs: Array) -> Array {
                (&self).$method(&rhs)
            }
        }

        impl std::ops::$trait<&Array> for Array {
            type Output = Array;

            fn $method(self, rhs: &Array) -> Array {
                (&self).$method(rhs)
            }
        }

        impl std::ops::$trait<Array> for &Array {
            type Output = Array;

            fn $method(self, rhs: Array) -> Array {
                self.$method(&rhs)
            }
        }

        impl std::ops::$trait<f64> for &Array {
            type Output = Array;

            fn $method(self, rhs: f64) -> Array {
                self.map(|a| a $op rhs)
            }
        }

        impl std::ops::$trait<f64> for Array {
            type Output = Array;

            fn $method(self, rhs: f64) -> Array {
                self.map(|a| a $op rhs)
            }
        }
    };
}

binary_op!(Add, add, +);
binary_op!(Sub, sub, -);
binary_op!(Mul, mul, *);
binary_op!(Div, div, /);

impl std::ops::Neg for &Array {
    type Output = Array;

    fn neg(self) -> Array {
        self.map(|v| -v)
    }
}

impl std::ops::Neg for Array {
    type Output = Array;

    fn neg(self) -> Array {
        self.map(|v| -v)
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, shape: &[usize], data: &[f64]) -> fmt::Result {
    match shape.split_first() {
        None => write!(f, "{}", data[0]),
        Some((&len, rest)) => {
            let inner = numel(rest);
            write!(f, "[")?;
            for i in 0..len {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_nested(f, rest, &data[i * inner..(i + 1) * inner])?;
            }
            write!(f, "]")
        }
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.batch {
            write!(f, "batched<{n}>")?;
            let unbatched = self.clone().into_unbatched();
            return write_nested(f, &unbatched.shape, &unbatched.data);
        }
        write_nested(f, &self.shape, &self.data)
    }
}
