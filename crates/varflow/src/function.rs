//! Callables with a stable identity.
//!
//! The resolver caches by [`FnKey`], so two `Function` values built from the
//! same closure are still different keys unless they are bound methods of
//! the same owner.

use crate::error::Result;
use crate::value::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a stateful object that owns bound methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolution cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FnKey {
    Free(u64),
    /// Method `method` of instance `owner`: one entry per instance.
    Bound { owner: ObjectId, method: &'static str },
}

type Body = dyn Fn(&Value) -> Result<Value>;

#[derive(Clone)]
pub struct Function {
    key: FnKey,
    name: Arc<str>,
    body: Arc<Body>,
    /// Shared by all clones; the resolver drops a free function's cache
    /// entry once this has no strong references left.
    alive: Arc<()>,
}

impl Function {
    pub fn new(body: impl Fn(&Value) -> Result<Value> + 'static) -> Self {
        let id = NEXT_FN_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            key: FnKey::Free(id),
            name: format!("fn#{id}").into(),
            body: Arc::new(body),
            alive: Arc::default(),
        }
    }

    pub fn named(name: impl Into<Arc<str>>, body: impl Fn(&Value) -> Result<Value> + 'static) -> Self {
        Self {
            name: name.into(),
            ..Self::new(body)
        }
    }

    /// A method of `owner`. Every call with the same `(owner, method)` pair
    /// shares one resolution cache entry.
    pub fn bound(
        owner: ObjectId,
        method: &'static str,
        body: impl Fn(&Value) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            key: FnKey::Bound { owner, method },
            name: method.into(),
            body: Arc::new(body),
            alive: Arc::default(),
        }
    }

    pub fn key(&self) -> FnKey {
        self.key
    }

    /// Weak handle that dies with the last clone of a free function.
    /// Bound methods are keyed by their owner instead and return `None`.
    pub(crate) fn liveness(&self) -> Option<Weak<()>> {
        match self.key {
            FnKey::Free(_) => Some(Arc::downgrade(&self.alive)),
            FnKey::Bound { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &Value) -> Result<Value> {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One arm of an `ifelse` chain.
#[derive(Clone, Debug)]
pub enum Branch {
    Callable(Function),
    /// Returned as-is; never called, never resolved.
    Constant(Value),
}

impl Branch {
    pub fn call(&self, operands: &Value) -> Result<Value> {
        match self {
            Branch::Callable(function) => function.call(operands),
            Branch::Constant(value) => Ok(value.clone()),
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Branch::Callable(function) => Some(function),
            Branch::Constant(_) => None,
        }
    }
}

impl From<Function> for Branch {
    fn from(function: Function) -> Self {
        Branch::Callable(function)
    }
}

impl From<Value> for Branch {
    fn from(value: Value) -> Self {
        Branch::Constant(value)
    }
}

impl From<crate::array::Array> for Branch {
    fn from(array: crate::array::Array) -> Self {
        Branch::Constant(Value::Array(array))
    }
}

impl From<f64> for Branch {
    fn from(value: f64) -> Self {
        Branch::Constant(Value::from(value))
    }
}

impl From<i32> for Branch {
    fn from(value: i32) -> Self {
        Branch::Constant(Value::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_functions_get_distinct_keys() {
        let a = Function::new(|args| Ok(args.clone()));
        let b = Function::new(|args| Ok(args.clone()));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.clone().key(), a.key());
    }

    #[test]
    fn bound_methods_key_by_owner_and_name() {
        let owner = ObjectId::new();
        let first = Function::bound(owner, "update", |_| Ok(Value::Unit));
        let second = Function::bound(owner, "update", |_| Ok(Value::Unit));
        let other = Function::bound(ObjectId::new(), "update", |_| Ok(Value::Unit));
        assert_eq!(first.key(), second.key());
        assert_ne!(first.key(), other.key());
    }

    #[test]
    fn constant_branch_returns_its_value() {
        let branch = Branch::from(5);
        assert_eq!(branch.call(&Value::Unit).unwrap().as_scalar(), Some(5.0));
        assert!(branch.as_function().is_none());
    }
}
