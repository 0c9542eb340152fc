//! State containers.
//!
//! A `Variable` is a handle: clones alias the same cell and identity is the
//! allocation's [`VarId`], never the value. Every read and write goes through
//! the discovery tracker so resolution can see it.

use crate::array::Array;
use crate::error::{Error, Result};
use crate::tracking;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

/// Stable per-container key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u64);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

struct VarCell {
    id: VarId,
    name: Option<Arc<str>>,
    value: RwLock<Array>,
}

#[derive(Clone)]
pub struct Variable {
    cell: Arc<VarCell>,
}

impl Variable {
    pub fn new(value: impl Into<Array>) -> Self {
        Self::with_name(None, value.into())
    }

    pub fn named(name: impl Into<Arc<str>>, value: impl Into<Array>) -> Self {
        Self::with_name(Some(name.into()), value.into())
    }

    fn with_name(name: Option<Arc<str>>, value: Array) -> Self {
        Self {
            cell: Arc::new(VarCell {
                id: VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)),
                name,
                value: RwLock::new(value),
            }),
        }
    }

    pub fn id(&self) -> VarId {
        self.cell.id
    }

    pub fn name(&self) -> Option<&str> {
        self.cell.name.as_deref()
    }

    /// Logical shape of the current value. Not recorded as an access.
    pub fn shape(&self) -> Vec<usize> {
        self.cell.value.read().shape().to_vec()
    }

    /// Current value.
    pub fn value(&self) -> Array {
        let current = self.cell.value.read().clone();
        tracking::record(self, &current);
        current
    }

    /// Replace the current value. The logical shape must not change.
    pub fn set_value(&self, value: impl Into<Array>) -> Result<()> {
        let value = value.into();
        let mut slot = self.cell.value.write();
        if slot.shape() != value.shape() {
            return Err(Error::ShapeMismatch {
                expected: slot.shape().to_vec(),
                found: value.shape().to_vec(),
            });
        }
        tracking::record(self, &slot);
        *slot = value;
        Ok(())
    }

    /// Read-modify-write in one call.
    pub fn update(&self, f: impl FnOnce(&Array) -> Array) -> Result<()> {
        let next = f(&self.value());
        self.set_value(next)
    }

    /// Untracked write used to undo discovery side effects.
    pub(crate) fn restore(&self, value: Array) {
        *self.cell.value.write() = value;
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("value", &*self.cell.value.read())
            .finish()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}={}", self.cell.value.read()),
            None => write!(f, "{}={}", self.id(), self.cell.value.read()),
        }
    }
}
