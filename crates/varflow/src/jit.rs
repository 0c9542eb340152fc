//! Object-aware compilation.
//!
//! [`Jit`] threads the Variables a function touches through the adapter so
//! that a call commits its state once, and keeps one trace per call
//! signature. A trace records the output structure; later calls with the
//! same signature must reproduce it.

use crate::adapter::StateThreader;
use crate::config::jit_enabled;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::resolver::{DependencySet, evaluate_dyn_vars};
use crate::value::{Structure, Value};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// `(args structure, state structure)`
type Signature = (Structure, Structure);

pub struct Jit {
    function: Function,
    dyn_vars: Option<DependencySet>,
    traces: RefCell<FxHashMap<Signature, Structure>>,
}

pub fn jit(function: Function) -> Jit {
    Jit {
        function,
        dyn_vars: None,
        traces: RefCell::new(FxHashMap::default()),
    }
}

impl Jit {
    /// Use `deps` instead of resolving the function.
    pub fn with_dyn_vars(mut self, deps: impl Into<DependencySet>) -> Self {
        self.dyn_vars = Some(deps.into());
        self
    }

    pub fn trace_count(&self) -> usize {
        self.traces.borrow().len()
    }

    pub fn call(&self, args: &Value) -> Result<Value> {
        if !jit_enabled() {
            return self.function.call(args);
        }
        let deps = match &self.dyn_vars {
            Some(deps) => deps.clone(),
            None => evaluate_dyn_vars(&self.function, args)?,
        };
        let threader = StateThreader::new(deps);
        threader.run(|state| {
            let signature = (args.structure(), state.structure());
            let (state, out) = threader.step(state, || self.function.call(args))?;
            self.check_trace(signature, &out)?;
            Ok((state, out))
        })
    }

    fn check_trace(&self, signature: Signature, out: &Value) -> Result<()> {
        let found = out.structure();
        let mut traces = self.traces.borrow_mut();
        if let Some(expected) = traces.get(&signature) {
            if *expected != found {
                return Err(Error::StructureMismatch {
                    context: "jit output",
                    expected: expected.clone(),
                    found,
                });
            }
            return Ok(());
        }
        if traces.is_empty() {
            log::debug!("{}: traced for {}", self.function.name(), signature.0);
        } else {
            log::warn!(
                "{}: re-traced for new signature {} ({} trace(s) so far)",
                self.function.name(),
                signature.0,
                traces.len()
            );
        }
        traces.insert(signature, found);
        Ok(())
    }

    /// A plain [`Function`] that calls the compiled one, e.g. as a loop body.
    pub fn into_function(self) -> Function {
        let name = format!("jit({})", self.function.name());
        let compiled = Rc::new(self);
        Function::named(name, move |args| compiled.call(args))
    }
}
