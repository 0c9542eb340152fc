//! Conditional combinators.
//!
//! `ifelse` turns `if c0: b0 elif c1: b1 ... else: bn` into nested two-way
//! engine conds. Each callable branch runs through the state threader, so
//! a branch that is not taken leaves no mutation behind.

use crate::adapter::StateThreader;
use crate::array::Array;
use crate::config::{self, jit_enabled};
use crate::engine::{Engine, default_engine, predicate};
use crate::error::{Error, Result};
use crate::function::Branch;
use crate::resolver::{DependencySet, Resolver};
use crate::value::Value;
use std::fmt::Write as _;

#[derive(Clone, Debug, Default)]
pub struct IfElseOptions {
    /// Declared Variables. Resolved from the callable branches when absent.
    pub dyn_vars: Option<DependencySet>,
    /// Log the rendered chain at info level.
    pub show_code: bool,
}

impl IfElseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dyn_vars(mut self, deps: impl Into<DependencySet>) -> Self {
        self.dyn_vars = Some(deps.into());
        self
    }

    pub fn show_code(mut self) -> Self {
        self.show_code = true;
        self
    }
}

/// Run the first branch whose condition holds, or the last branch.
///
/// `branches` must have exactly one more entry than `conditions`.
///
/// With the jit disabled and unbatched conditions the selected branch is
/// called directly: if it fails, the writes it made before failing stay.
pub fn ifelse(
    conditions: &[Array],
    branches: &[Branch],
    operands: &Value,
    options: IfElseOptions,
) -> Result<Value> {
    if branches.len() != conditions.len() + 1 {
        return Err(Error::BranchCount {
            conditions: conditions.len(),
            branches: branches.len(),
        });
    }
    if options.show_code || config::settings().show_code {
        log::info!("ifelse:\n{}", render_ifelse(conditions.len(), branches));
    }

    let conditions = conditions.iter().map(predicate).collect::<Result<Vec<_>>>()?;
    let batched = conditions.iter().any(Array::is_batched);
    if !jit_enabled() && !batched {
        let selected = conditions
            .iter()
            .position(Array::any)
            .unwrap_or(conditions.len());
        return branches[selected].call(operands);
    }

    let deps = match options.dyn_vars {
        Some(deps) => deps,
        None => Resolver::global()
            .resolve_all(branches.iter().filter_map(Branch::as_function), operands)?,
    };
    let chain = Chain {
        conditions: &conditions,
        branches,
        threader: StateThreader::new(deps),
        engine: default_engine(),
    };
    chain
        .threader
        .run(|state| chain.select(0, Value::tuple([state, operands.clone()]))?.into_pair("ifelse result"))
}

/// Nested conds over a `(state, operands)` carry. Every branch returns
/// `(state, output)`.
struct Chain<'a> {
    conditions: &'a [Array],
    branches: &'a [Branch],
    threader: StateThreader,
    engine: &'static dyn Engine,
}

impl Chain<'_> {
    fn select(&self, index: usize, carry: Value) -> Result<Value> {
        if index == self.conditions.len() {
            return self.run_branch(index, carry);
        }
        self.engine.cond(
            &self.conditions[index],
            &mut |carry| self.run_branch(index, carry),
            &mut |carry| self.select(index + 1, carry),
            carry,
        )
    }

    fn run_branch(&self, index: usize, carry: Value) -> Result<Value> {
        let (state, operands) = carry.into_pair("ifelse carry")?;
        let (state, output) = match &self.branches[index] {
            Branch::Constant(value) => (state, value.clone()),
            Branch::Callable(function) => self.threader.step(state, || function.call(&operands))?,
        };
        Ok(Value::tuple([state, output]))
    }
}

/// Two-way [`ifelse`].
pub fn cond(
    pred: &Array,
    on_true: impl Into<Branch>,
    on_false: impl Into<Branch>,
    operands: &Value,
    dyn_vars: Option<DependencySet>,
) -> Result<Value> {
    let options = IfElseOptions {
        dyn_vars,
        show_code: false,
    };
    ifelse(
        std::slice::from_ref(pred),
        &[on_true.into(), on_false.into()],
        operands,
        options,
    )
}

/// A reusable two-way conditional over a fixed set of Variables.
pub struct Cond {
    branches: [Branch; 2],
    deps: DependencySet,
}

pub fn make_cond(
    on_true: impl Into<Branch>,
    on_false: impl Into<Branch>,
    dyn_vars: impl Into<DependencySet>,
) -> Cond {
    Cond {
        branches: [on_true.into(), on_false.into()],
        deps: dyn_vars.into(),
    }
}

impl Cond {
    pub fn call(&self, pred: &Array, operands: &Value) -> Result<Value> {
        ifelse(
            std::slice::from_ref(pred),
            &self.branches,
            operands,
            IfElseOptions::new().with_dyn_vars(self.deps.clone()),
        )
    }
}

/// Nested-cond rendering of an `ifelse` chain.
///
/// ```text
/// cond(c[0],
///   |x| 1,
///   |x| cond(c[1],
///     |x| double(x),
///     |x| 5))
/// ```
pub fn render_ifelse(num_conditions: usize, branches: &[Branch]) -> String {
    let mut code = String::new();
    for (index, branch) in branches.iter().enumerate() {
        let indent = "  ".repeat(index);
        if index < num_conditions {
            let prefix = if index == 0 { "" } else { "|x| " };
            let _ = writeln!(code, "{indent}{prefix}cond(c[{index}],");
            let _ = writeln!(code, "{indent}  |x| {},", describe(branch));
        } else {
            let _ = write!(code, "{indent}|x| {}", describe(branch));
            code.push_str(&")".repeat(num_conditions));
        }
    }
    code
}

fn describe(branch: &Branch) -> String {
    match branch {
        Branch::Callable(function) => format!("{}(x)", function.name()),
        Branch::Constant(value) => value.to_string(),
    }
}
