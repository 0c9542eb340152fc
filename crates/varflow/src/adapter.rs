//! Threads Variable contents through pure engine calls.
//!
//! The state tuple holds one array per Variable of a [`DependencySet`], in
//! set order. Inside an engine body the adapter writes the incoming state
//! into the Variables, runs the user body, and reads the state back out.
//! After the engine returns the final state is committed once; if anything
//! failed the Variables get their initial contents back.

use crate::error::{Error, Result};
use crate::resolver::DependencySet;
use crate::value::Value;

pub struct StateThreader {
    deps: DependencySet,
}

impl StateThreader {
    pub fn new(deps: DependencySet) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &DependencySet {
        &self.deps
    }

    /// Current contents of every Variable as a state tuple.
    pub fn read_state(&self) -> Value {
        Value::tuple(self.deps.iter().map(|var| Value::Array(var.value())))
    }

    pub fn write_state(&self, state: &Value) -> Result<()> {
        let items = state.as_tuple().ok_or(Error::NotATuple("threaded state"))?;
        if items.len() != self.deps.len() {
            return Err(Error::LengthMismatch {
                expected: self.deps.len(),
                found: items.len(),
            });
        }
        for (var, item) in self.deps.iter().zip(items) {
            var.set_value(item.clone().into_array("threaded state")?)?;
        }
        Ok(())
    }

    /// One engine step: load `state`, run `f`, collect the new state.
    pub fn step<T>(&self, state: Value, f: impl FnOnce() -> Result<T>) -> Result<(Value, T)> {
        self.write_state(&state)?;
        let out = f()?;
        Ok((self.read_state(), out))
    }

    /// Write a final state into the Variables.
    pub fn commit(&self, state: &Value) -> Result<()> {
        log::trace!("committing {} variable(s)", self.deps.len());
        self.write_state(state)
    }

    /// Run `call` from the current state and commit the state it returns.
    pub fn run<T>(&self, call: impl FnOnce(Value) -> Result<(Value, T)>) -> Result<T> {
        let initial = self.read_state();
        let result = call(initial.clone()).and_then(|(state, out)| {
            self.commit(&state)?;
            Ok(out)
        });
        if result.is_err() {
            if let Err(err) = self.write_state(&initial) {
                log::warn!("could not restore threaded state: {err}");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::variable::Variable;

    #[test]
    fn step_loads_runs_and_collects() {
        let v = Variable::new(Array::zeros(&[2]));
        let threader = StateThreader::new(DependencySet::from(&v));
        let state = Value::tuple([Value::from(Array::ones(&[2]))]);
        let (state, out) = threader
            .step(state, || {
                v.update(|a| a * 3.0)?;
                Ok(v.value().sum())
            })
            .unwrap();
        assert_eq!(out.as_scalar(), Some(6.0));
        assert_eq!(state.get(0).unwrap().as_array().unwrap().to_vec(), vec![3.0, 3.0]);
    }

    #[test]
    fn failed_run_restores_initial_contents() {
        let v = Variable::new(1.0);
        let threader = StateThreader::new(DependencySet::from(&v));
        let result: Result<()> = threader.run(|state| {
            threader.step(state, || v.set_value(9.0))?;
            Err(Error::msg("body failed"))
        });
        assert!(result.is_err());
        assert_eq!(v.value().as_scalar(), Some(1.0));
    }

    #[test]
    fn wrong_state_arity_is_rejected() {
        let threader = StateThreader::new(DependencySet::from(Variable::new(1.0)));
        let err = threader.write_state(&Value::tuple([])).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 1, found: 0 }));
    }
}
