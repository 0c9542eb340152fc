//! Discovery tracking context.
//!
//! While a discovery frame is open on this thread, every [`Variable`] read or
//! write is recorded into the innermost frame. A frame snapshots each
//! Variable the first time it is touched and puts the snapshot back when the
//! frame closes, so running a callable for discovery leaves no trace.
//!
//! Frames are opened with [`DiscoveryGuard::enter`] and always closed by the
//! guard, on success ([`DiscoveryGuard::finish`]) or on unwind/early return
//! (`Drop`).

use crate::array::Array;
use crate::function::FnKey;
use crate::resolver::DependencySet;
use crate::variable::{VarId, Variable};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

struct DiscoveryFrame {
    key: FnKey,
    deps: DependencySet,
    originals: FxHashMap<VarId, (Variable, Array)>,
}

impl DiscoveryFrame {
    fn restore(self) -> DependencySet {
        for (_, (var, original)) in self.originals {
            var.restore(original);
        }
        self.deps
    }
}

thread_local! {
    /// Open discovery frames, innermost last.
    static FRAMES: RefCell<Vec<DiscoveryFrame>> = const { RefCell::new(Vec::new()) };
}

/// Whether any discovery frame is open on this thread.
pub fn is_active() -> bool {
    FRAMES.with(|frames| !frames.borrow().is_empty())
}

/// Whether `key` is being discovered somewhere up the current stack.
pub(crate) fn is_discovering(key: FnKey) -> bool {
    FRAMES.with(|frames| frames.borrow().iter().any(|frame| frame.key == key))
}

/// Record an access to `var`, whose value right now is `current`.
pub(crate) fn record(var: &Variable, current: &Array) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        frame.deps.insert(var.clone());
        frame
            .originals
            .entry(var.id())
            .or_insert_with(|| (var.clone(), current.clone()));
    });
}

/// Fold a nested resolution result into the innermost frame.
pub(crate) fn merge(deps: &DependencySet) {
    FRAMES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            frame.deps.extend(deps);
        }
    });
}

/// Run `f` and put back every Variable it wrote. What it touched still
/// counts toward an enclosing discovery.
pub(crate) fn without_writes<T>(key: FnKey, f: impl FnOnce() -> T) -> T {
    let guard = DiscoveryGuard::enter(key);
    let out = f();
    merge(&guard.finish());
    out
}

/// RAII handle for one open discovery frame.
pub(crate) struct DiscoveryGuard {
    depth: usize,
    closed: bool,
}

impl DiscoveryGuard {
    pub(crate) fn enter(key: FnKey) -> Self {
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(DiscoveryFrame {
                key,
                deps: DependencySet::new(),
                originals: FxHashMap::default(),
            });
            frames.len()
        });
        Self {
            depth,
            closed: false,
        }
    }

    /// Close the frame, undo its side effects and hand back what it saw.
    pub(crate) fn finish(mut self) -> DependencySet {
        self.closed = true;
        self.pop().map(DiscoveryFrame::restore).unwrap_or_default()
    }

    fn pop(&self) -> Option<DiscoveryFrame> {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            debug_assert_eq!(frames.len(), self.depth, "discovery frames closed out of order");
            frames.pop()
        })
    }
}

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        if !self.closed {
            if let Some(frame) = self.pop() {
                frame.restore();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;

    #[test]
    fn frame_restores_touched_variables() {
        let v = Variable::new(1.0);
        let key = Function::new(|_| Ok(crate::Value::Unit)).key();
        let guard = DiscoveryGuard::enter(key);
        assert!(is_active());
        assert!(is_discovering(key));
        v.set_value(5.0).unwrap();
        v.set_value(7.0).unwrap();
        let deps = guard.finish();
        assert!(!is_active());
        assert!(deps.contains(&v));
        assert_eq!(v.value().as_scalar(), Some(1.0));
    }

    #[test]
    fn dropped_frame_still_restores() {
        let v = Variable::new(1.0);
        {
            let _guard = DiscoveryGuard::enter(Function::new(|_| Ok(crate::Value::Unit)).key());
            v.set_value(3.0).unwrap();
        }
        assert!(!is_active());
        assert_eq!(v.value().as_scalar(), Some(1.0));
    }

    #[test]
    fn accesses_outside_frames_are_ignored() {
        let v = Variable::new(1.0);
        v.set_value(2.0).unwrap();
        assert!(!is_active());
        assert_eq!(v.value().as_scalar(), Some(2.0));
    }

    #[test]
    fn writes_are_undone_but_still_recorded_outside() {
        let v = Variable::new(1.0);
        let outer = DiscoveryGuard::enter(Function::new(|_| Ok(crate::Value::Unit)).key());
        let inner = Function::new(|_| Ok(crate::Value::Unit)).key();
        let seen = without_writes(inner, || {
            v.set_value(9.0).unwrap();
            v.value().as_scalar()
        });
        assert_eq!(seen, Some(9.0));
        assert_eq!(v.value().as_scalar(), Some(1.0));
        assert!(outer.finish().contains(&v));
    }
}
