//! Dependency resolution.
//!
//! The first time a callable is resolved it runs once inside a discovery
//! frame and every [`Variable`] it reads or writes is recorded. The result
//! is cached per [`FnKey`]; later resolutions return the cached set without
//! running anything. Resolving inside another discovery folds the nested set
//! into the outer one, whether it was freshly discovered or cached.

use crate::error::Result;
use crate::function::{FnKey, Function};
use crate::tracking::{self, DiscoveryGuard};
use crate::value::Value;
use crate::variable::{VarId, Variable};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock, Weak};

/// Variables touched by a callable, in first-touch order.
///
/// The order is what positions each Variable in threaded state tuples.
#[derive(Clone, Default)]
pub struct DependencySet {
    vars: IndexMap<VarId, Variable, FxBuildHasher>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `var` was already present.
    pub fn insert(&mut self, var: Variable) -> bool {
        self.vars.insert(var.id(), var).is_none()
    }

    pub fn extend(&mut self, other: &DependencySet) {
        for var in other.iter() {
            self.insert(var.clone());
        }
    }

    pub fn union(mut self, other: &DependencySet) -> Self {
        self.extend(other);
        self
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.vars.contains_key(&var.id())
    }

    pub fn get(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars.keys().copied()
    }
}

impl fmt::Debug for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.vars.keys()).finish()
    }
}

impl FromIterator<Variable> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Variable>>(iter: I) -> Self {
        let mut set = Self::new();
        for var in iter {
            set.insert(var);
        }
        set
    }
}

impl From<Variable> for DependencySet {
    fn from(var: Variable) -> Self {
        std::iter::once(var).collect()
    }
}

impl From<&Variable> for DependencySet {
    fn from(var: &Variable) -> Self {
        std::iter::once(var.clone()).collect()
    }
}

impl From<Vec<Variable>> for DependencySet {
    fn from(vars: Vec<Variable>) -> Self {
        vars.into_iter().collect()
    }
}

impl From<&[Variable]> for DependencySet {
    fn from(vars: &[Variable]) -> Self {
        vars.iter().cloned().collect()
    }
}

impl<const N: usize> From<[Variable; N]> for DependencySet {
    fn from(vars: [Variable; N]) -> Self {
        vars.into_iter().collect()
    }
}

/// Per-key cache slot.
///
/// `discovery` serializes discovery of one key; `deps` is readable without
/// it, so lookups never wait on a running discovery.
#[derive(Default)]
struct Slot {
    discovery: Mutex<()>,
    deps: OnceLock<DependencySet>,
}

struct Entry {
    /// Liveness of a free function. `None` for bound methods, which stay
    /// cached until forgotten.
    owner: Option<Weak<()>>,
    slot: Arc<Slot>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.owner.as_ref().is_none_or(|owner| owner.strong_count() > 0)
    }
}

/// Cache of discovered dependency sets.
///
/// Entries of free functions are dropped once every clone of the function
/// is gone. Discovery holds its key's slot while the callable runs: two
/// threads resolving mutually nested keys in opposite order deadlock.
#[derive(Default)]
pub struct Resolver {
    slots: Mutex<FxHashMap<FnKey, Entry>>,
}

static GLOBAL: LazyLock<Resolver> = LazyLock::new(Resolver::new);

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide resolver used by the combinators.
    pub fn global() -> &'static Resolver {
        &GLOBAL
    }

    /// Dependency set of `function`, discovering it by calling
    /// `function(args)` once if it is not cached yet.
    ///
    /// A failed discovery propagates the error and caches nothing.
    pub fn resolve(&self, function: &Function, args: &Value) -> Result<DependencySet> {
        let key = function.key();
        if tracking::is_discovering(key) {
            log::trace!("{} is already being discovered, skipping", function.name());
            return Ok(DependencySet::new());
        }

        let slot = self.slot(function);
        if let Some(deps) = slot.deps.get() {
            return Ok(cached(function, deps));
        }
        let _discovering = slot.discovery.lock();
        if let Some(deps) = slot.deps.get() {
            return Ok(cached(function, deps));
        }

        let guard = DiscoveryGuard::enter(key);
        function.call(args)?;
        let deps = guard.finish();
        log::debug!("{}: discovered {} variable(s)", function.name(), deps.len());

        tracking::merge(&deps);
        Ok(slot.deps.get_or_init(|| deps).clone())
    }

    fn slot(&self, function: &Function) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get(&function.key()) {
            return entry.slot.clone();
        }
        slots.retain(|_, entry| entry.is_live());
        slots
            .entry(function.key())
            .or_insert_with(|| Entry {
                owner: function.liveness(),
                slot: Arc::default(),
            })
            .slot
            .clone()
    }

    /// Union of the dependency sets of `functions`, in order.
    pub fn resolve_all<'a>(
        &self,
        functions: impl IntoIterator<Item = &'a Function>,
        args: &Value,
    ) -> Result<DependencySet> {
        let mut deps = DependencySet::new();
        for function in functions {
            deps.extend(&self.resolve(function, args)?);
        }
        Ok(deps)
    }

    pub fn is_resolved(&self, key: FnKey) -> bool {
        self.slots
            .lock()
            .get(&key)
            .is_some_and(|entry| entry.is_live() && entry.slot.deps.get().is_some())
    }

    /// Drop the cache entry of `key`; the next resolution rediscovers.
    pub fn forget(&self, key: FnKey) {
        self.slots.lock().remove(&key);
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of cached entries whose callable is still alive.
    pub fn len(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.retain(|_, entry| entry.is_live());
        slots.values().filter(|entry| entry.slot.deps.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cached(function: &Function, deps: &DependencySet) -> DependencySet {
    log::trace!("{}: cached {} variable(s)", function.name(), deps.len());
    tracking::merge(deps);
    deps.clone()
}

/// Resolve `function` against the global resolver.
pub fn evaluate_dyn_vars(function: &Function, args: &Value) -> Result<DependencySet> {
    Resolver::global().resolve(function, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn discovers_reads_and_writes_in_first_touch_order() {
        let resolver = Resolver::new();
        let (a, b, c) = (Variable::new(1.0), Variable::new(2.0), Variable::new(3.0));
        let f = {
            let (a, b, c) = (a.clone(), b.clone(), c.clone());
            Function::new(move |_| {
                b.set_value(a.value() + c.value())?;
                Ok(Value::Unit)
            })
        };
        let deps = resolver.resolve(&f, &Value::Unit).unwrap();
        let order: Vec<VarId> = deps.ids().collect();
        assert_eq!(order, vec![a.id(), c.id(), b.id()]);
        assert_eq!(b.value().as_scalar(), Some(2.0));
    }

    #[test]
    fn second_resolution_does_not_call() {
        let resolver = Resolver::new();
        let calls = Rc::new(Cell::new(0));
        let v = Variable::new(Array::zeros(&[2]));
        let f = {
            let (calls, v) = (calls.clone(), v.clone());
            Function::new(move |_| {
                calls.set(calls.get() + 1);
                v.value();
                Ok(Value::Unit)
            })
        };
        resolver.resolve(&f, &Value::Unit).unwrap();
        resolver.resolve(&f, &Value::Unit).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(resolver.is_resolved(f.key()));
        assert_eq!(resolver.len(), 1);

        resolver.forget(f.key());
        assert!(resolver.is_empty());
        resolver.resolve(&f, &Value::Unit).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn recursive_resolution_yields_empty_set() {
        let resolver = Rc::new(Resolver::new());
        let inner = Rc::new(Cell::new(None));
        let v = Variable::new(1.0);
        let f = {
            let (resolver, inner, v) = (resolver.clone(), inner.clone(), v.clone());
            let me: Rc<Cell<Option<Function>>> = Rc::new(Cell::new(None));
            let me_inner = me.clone();
            let f = Function::new(move |args| {
                v.value();
                if let Some(this) = me_inner.take() {
                    inner.set(Some(resolver.resolve(&this, args)?.len()));
                    me_inner.set(Some(this));
                }
                Ok(Value::Unit)
            });
            me.set(Some(f.clone()));
            f
        };
        let deps = resolver.resolve(&f, &Value::Unit).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(inner.get(), Some(0));
    }

    #[test]
    fn dropped_functions_leave_the_cache() {
        let resolver = Resolver::new();
        let v = Variable::new(1.0);
        for _ in 0..100 {
            let v = v.clone();
            let f = Function::new(move |_| {
                v.value();
                Ok(Value::Unit)
            });
            resolver.resolve(&f, &Value::Unit).unwrap();
            assert_eq!(resolver.len(), 1);
        }
        assert!(resolver.is_empty());
        assert!(resolver.slots.lock().is_empty());
    }

    #[test]
    fn bound_methods_outlive_their_functions() {
        let resolver = Resolver::new();
        let owner = crate::function::ObjectId::new();
        let key = {
            let f = Function::bound(owner, "step", |_| Ok(Value::Unit));
            resolver.resolve(&f, &Value::Unit).unwrap();
            f.key()
        };
        assert!(resolver.is_resolved(key));
    }

    #[test]
    fn lookups_during_discovery_do_not_block() {
        let resolver = Rc::new(Resolver::new());
        let seen = Rc::new(Cell::new(None));
        let me: Rc<Cell<Option<FnKey>>> = Rc::new(Cell::new(None));
        let f = {
            let (resolver, seen, me) = (resolver.clone(), seen.clone(), me.clone());
            Function::new(move |_| {
                let resolved = me.get().is_some_and(|key| resolver.is_resolved(key));
                seen.set(Some((resolver.len(), resolved)));
                Ok(Value::Unit)
            })
        };
        me.set(Some(f.key()));
        resolver.resolve(&f, &Value::Unit).unwrap();
        assert_eq!(seen.get(), Some((0, false)));
        assert!(resolver.is_resolved(f.key()));
    }
}
