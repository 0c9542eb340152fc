//! Loop combinators.
//!
//! Each combinator resolves the Variables its body touches (unless they are
//! declared), threads them through an engine primitive as part of the
//! carry, and commits the final values once. With the jit disabled the body
//! runs directly and mutates Variables in place.

use crate::adapter::StateThreader;
use crate::array::Array;
use crate::config::{self, jit_enabled};
use crate::engine::{ScanOptions, default_engine, predicate, scan_length};
use crate::error::{Error, Result};
use crate::function::Function;
use crate::resolver::{DependencySet, Resolver, evaluate_dyn_vars};
use crate::tracking;
use crate::value::Value;
use crate::variable::Variable;

/// Variables whose per-step values a [`Loop`] accumulates.
#[derive(Clone, Debug, Default)]
pub enum OutVars {
    #[default]
    None,
    /// Accumulated as a single stacked array.
    Single(Variable),
    /// Accumulated as a tuple, one stacked array per Variable.
    Many(Vec<Variable>),
}

impl OutVars {
    fn read(&self) -> Value {
        match self {
            OutVars::None => Value::Unit,
            OutVars::Single(var) => Value::Array(var.value()),
            OutVars::Many(vars) => Value::tuple(vars.iter().map(|var| Value::Array(var.value()))),
        }
    }
}

impl From<Variable> for OutVars {
    fn from(var: Variable) -> Self {
        OutVars::Single(var)
    }
}

impl From<Vec<Variable>> for OutVars {
    fn from(vars: Vec<Variable>) -> Self {
        OutVars::Many(vars)
    }
}

/// Scan steps without an engine, in the same order the engine visits them.
fn eager_scan(
    xs: &Value,
    options: ScanOptions,
    mut step: impl FnMut(Value) -> Result<Value>,
) -> Result<Value> {
    let length = scan_length(xs, options.length)?;
    let order: Vec<usize> = if options.reverse {
        (0..length).rev().collect()
    } else {
        (0..length).collect()
    };
    let mut ys: Vec<Option<Value>> = vec![None; length];
    for index in order {
        ys[index] = Some(step(xs.index_leading(index)?)?);
    }
    let ys: Vec<Value> = ys.into_iter().flatten().collect();
    if ys.is_empty() {
        Ok(Value::Unit)
    } else {
        Value::stack(&ys)
    }
}

/// A reusable scan over a fixed set of Variables.
pub struct Loop {
    body: Function,
    deps: DependencySet,
    out_vars: OutVars,
    has_return: bool,
}

pub fn make_loop(
    body: Function,
    dyn_vars: impl Into<DependencySet>,
    out_vars: impl Into<OutVars>,
    has_return: bool,
) -> Loop {
    Loop {
        body,
        deps: dyn_vars.into(),
        out_vars: out_vars.into(),
        has_return,
    }
}

impl Loop {
    /// One step per leading-axis entry of `xs`.
    pub fn call(&self, xs: &Value) -> Result<Value> {
        self.run(xs, None)
    }

    /// `length` steps with unit operands.
    pub fn call_n(&self, length: usize) -> Result<Value> {
        self.run(&Value::Unit, Some(length))
    }

    fn run(&self, xs: &Value, length: Option<usize>) -> Result<Value> {
        let options = ScanOptions {
            length,
            unroll: config::settings().default_unroll,
            reverse: false,
        };
        let stacked = if jit_enabled() {
            let threader = StateThreader::new(self.deps.clone());
            threader.run(|init| {
                default_engine().scan(
                    &mut |state, x| threader.step(state, || self.step(&x)),
                    init,
                    xs,
                    options,
                )
            })?
        } else {
            eager_scan(xs, options, |x| self.step(&x))?
        };

        let (outs, returns) = if stacked.is_unit() {
            (Value::Unit, Value::Unit)
        } else {
            stacked.into_pair("loop outputs")?
        };
        Ok(if self.has_return {
            Value::tuple([outs, returns])
        } else {
            outs
        })
    }

    fn step(&self, x: &Value) -> Result<Value> {
        let returned = self.body.call(x)?;
        let returned = if self.has_return { returned } else { Value::Unit };
        Ok(Value::tuple([self.out_vars.read(), returned]))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ForLoopOptions {
    /// Declared Variables. Resolved from the body when absent.
    pub dyn_vars: Option<DependencySet>,
    /// Defaults to `Settings::default_unroll`.
    pub unroll: Option<usize>,
    pub reverse: bool,
}

impl ForLoopOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dyn_vars(mut self, deps: impl Into<DependencySet>) -> Self {
        self.dyn_vars = Some(deps.into());
        self
    }

    pub fn with_unroll(mut self, unroll: usize) -> Self {
        self.unroll = Some(unroll);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Call `body` once per leading-axis entry of `operands` and stack the
/// results. Zero entries return `Value::Unit` without calling `body`.
///
/// Traced, a failing step leaves every Variable as it was before the call.
/// With the jit disabled the body runs directly, so steps that completed
/// before the failure keep their writes.
pub fn for_loop(body: &Function, operands: &Value, options: ForLoopOptions) -> Result<Value> {
    let length = scan_length(operands, None)?;
    let scan = ScanOptions {
        length: Some(length),
        unroll: options
            .unroll
            .unwrap_or_else(|| config::settings().default_unroll),
        reverse: options.reverse,
    };
    if !jit_enabled() {
        return eager_scan(operands, scan, |x| body.call(&x));
    }
    if length == 0 {
        return Ok(Value::Unit);
    }

    let deps = match options.dyn_vars {
        Some(deps) => deps,
        None => evaluate_dyn_vars(body, &operands.index_leading(0)?)?,
    };
    let threader = StateThreader::new(deps);
    threader.run(|init| {
        default_engine().scan(
            &mut |state, x| threader.step(state, || body.call(&x)),
            init,
            operands,
            scan,
        )
    })
}

/// Replace `operands` with `body(operands)` while `cond(operands)` holds.
///
/// Variable writes made by `cond` are undone after every check. Like
/// [`for_loop`], only the traced path rolls back on a failing `body`.
pub fn while_loop(
    body: &Function,
    cond: &Function,
    operands: &Value,
    dyn_vars: Option<DependencySet>,
) -> Result<Value> {
    if !jit_enabled() && !operands.is_batched() {
        return eager_while(body, cond, operands);
    }
    let deps = match dyn_vars {
        Some(deps) => deps,
        None => Resolver::global().resolve_all([cond, body], operands)?,
    };
    traced_while(body, cond, deps, operands)
}

/// A reusable while loop over a fixed set of Variables.
pub struct WhileLoop {
    body: Function,
    cond: Function,
    deps: DependencySet,
}

pub fn make_while(body: Function, cond: Function, dyn_vars: impl Into<DependencySet>) -> WhileLoop {
    WhileLoop {
        body,
        cond,
        deps: dyn_vars.into(),
    }
}

impl WhileLoop {
    pub fn call(&self, operands: &Value) -> Result<Value> {
        if !jit_enabled() && !operands.is_batched() {
            return eager_while(&self.body, &self.cond, operands);
        }
        traced_while(&self.body, &self.cond, self.deps.clone(), operands)
    }
}

/// Evaluate `cond`. Its Variable writes never survive the check.
fn test(cond: &Function, operands: &Value) -> Result<Array> {
    let pred = tracking::without_writes(cond.key(), || cond.call(operands))?;
    predicate(&pred.into_array("while_loop cond")?)
}

fn eager_while(body: &Function, cond: &Function, operands: &Value) -> Result<Value> {
    let expected = operands.structure();
    let mut operands = operands.clone();
    loop {
        let pred = test(cond, &operands)?;
        if pred.is_batched() {
            return Err(Error::msg(
                "while_loop: batched predicate with the jit disabled, operands must carry the batch",
            ));
        }
        if !pred.any() {
            return Ok(operands);
        }
        let next = body.call(&operands)?;
        let found = next.structure();
        if found != expected {
            return Err(Error::StructureMismatch {
                context: "while_loop carry",
                expected,
                found,
            });
        }
        operands = next;
    }
}

fn traced_while(
    body: &Function,
    cond: &Function,
    deps: DependencySet,
    operands: &Value,
) -> Result<Value> {
    let threader = StateThreader::new(deps);
    threader.run(|state| {
        let carry = default_engine().while_loop(
            &mut |carry| {
                let (state, operands) = carry.clone().into_pair("while_loop carry")?;
                let (_, pred) = threader.step(state, || test(cond, &operands))?;
                Ok(pred)
            },
            &mut |carry| {
                let (state, operands) = carry.into_pair("while_loop carry")?;
                let (state, operands) = threader.step(state, || body.call(&operands))?;
                Ok(Value::tuple([state, operands]))
            },
            Value::tuple([state, operands.clone()]),
        )?;
        carry.into_pair("while_loop carry")
    })
}
