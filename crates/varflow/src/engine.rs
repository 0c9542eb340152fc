//! Pure structured control flow.
//!
//! [`Engine`] is the seam every combinator drives. Bodies handed to an
//! engine are pure from its point of view: everything they depend on
//! arrives through the carry and everything they change leaves through it.
//! [`Interpreter`] is the reference implementation: it runs the bodies
//! directly and handles batched predicates by running both sides and
//! selecting per batch element.

use crate::array::Array;
use crate::error::{Error, Result};
use crate::value::{Structure, Value};

pub type StepFn<'a> = dyn FnMut(Value, Value) -> Result<(Value, Value)> + 'a;
pub type CarryFn<'a> = dyn FnMut(Value) -> Result<Value> + 'a;
pub type PredicateFn<'a> = dyn FnMut(&Value) -> Result<Array> + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Number of steps. Required when `xs` has no arrays.
    pub length: Option<usize>,
    /// Steps grouped per iteration of the driver loop. Never changes results.
    pub unroll: usize,
    /// Visit entries last to first. Outputs stay in entry order.
    pub reverse: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            length: None,
            unroll: 1,
            reverse: false,
        }
    }
}

pub trait Engine {
    /// `body(carry, x_i) -> (carry, y_i)` over the leading axis of `xs`.
    /// Returns the final carry and the `y_i` stacked along a new leading
    /// axis (`Value::Unit` for zero steps). The carry keeps the structure
    /// of `init`.
    fn scan(
        &self,
        body: &mut StepFn<'_>,
        init: Value,
        xs: &Value,
        options: ScanOptions,
    ) -> Result<(Value, Value)>;

    /// Apply `body` while `cond` holds. A batched predicate keeps running
    /// until it is false everywhere; finished elements keep their carry.
    fn while_loop(
        &self,
        cond: &mut PredicateFn<'_>,
        body: &mut CarryFn<'_>,
        init: Value,
    ) -> Result<Value>;

    /// Two-way branch on a scalar predicate. A batched predicate evaluates
    /// both sides and selects per element; both must produce the same
    /// structure.
    fn cond(
        &self,
        pred: &Array,
        on_true: &mut CarryFn<'_>,
        on_false: &mut CarryFn<'_>,
        operand: Value,
    ) -> Result<Value>;

    /// Map `f` over the leading axis of `xs` as one batched call.
    fn vmap(&self, f: &mut CarryFn<'_>, xs: &Value) -> Result<Value>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

static INTERPRETER: Interpreter = Interpreter;

pub fn default_engine() -> &'static dyn Engine {
    &INTERPRETER
}

/// Number of scan steps for `xs` with an optional explicit `length`.
pub(crate) fn scan_length(xs: &Value, length: Option<usize>) -> Result<usize> {
    match (xs.leading_len()?, length) {
        (Some(found), Some(expected)) if found != expected => {
            Err(Error::LengthMismatch { expected, found })
        }
        (Some(n), _) | (None, Some(n)) => Ok(n),
        (None, None) => Err(Error::MissingLength),
    }
}

/// Normalize a predicate to a logical scalar.
pub(crate) fn predicate(array: &Array) -> Result<Array> {
    if array.numel() != 1 {
        return Err(Error::NotAPredicate {
            shape: array.shape().to_vec(),
        });
    }
    array.reshape(&[])
}

fn check_structure(context: &'static str, expected: &Structure, value: &Value) -> Result<()> {
    let found = value.structure();
    if &found != expected {
        return Err(Error::StructureMismatch {
            context,
            expected: expected.clone(),
            found,
        });
    }
    Ok(())
}

impl Engine for Interpreter {
    fn scan(
        &self,
        body: &mut StepFn<'_>,
        init: Value,
        xs: &Value,
        options: ScanOptions,
    ) -> Result<(Value, Value)> {
        let length = scan_length(xs, options.length)?;
        let unroll = options.unroll.max(1);
        log::trace!("scan: {length} step(s), unroll {unroll}, reverse {}", options.reverse);

        let expected = init.structure();
        let order: Vec<usize> = if options.reverse {
            (0..length).rev().collect()
        } else {
            (0..length).collect()
        };
        let mut carry = init;
        let mut ys: Vec<Option<Value>> = vec![None; length];
        for chunk in order.chunks(unroll) {
            for &index in chunk {
                let (next, y) = body(carry, xs.index_leading(index)?)?;
                check_structure("scan carry", &expected, &next)?;
                carry = next;
                ys[index] = Some(y);
            }
        }

        let ys: Vec<Value> = ys.into_iter().flatten().collect();
        let stacked = if ys.is_empty() {
            Value::Unit
        } else {
            Value::stack(&ys)?
        };
        Ok((carry, stacked))
    }

    fn while_loop(
        &self,
        cond: &mut PredicateFn<'_>,
        body: &mut CarryFn<'_>,
        init: Value,
    ) -> Result<Value> {
        let expected = init.structure();
        let mut carry = init;
        let mut iterations = 0usize;
        loop {
            let pred = predicate(&cond(&carry)?)?;
            if !pred.any() {
                break;
            }
            let next = body(carry.clone())?;
            check_structure("while_loop carry", &expected, &next)?;
            carry = if pred.is_batched() {
                Value::select(&pred, &next, &carry)?
            } else {
                next
            };
            iterations += 1;
        }
        log::trace!("while_loop: {iterations} iteration(s)");
        Ok(carry)
    }

    fn cond(
        &self,
        pred: &Array,
        on_true: &mut CarryFn<'_>,
        on_false: &mut CarryFn<'_>,
        operand: Value,
    ) -> Result<Value> {
        let pred = predicate(pred)?;
        if !pred.is_batched() {
            return if pred.any() {
                on_true(operand)
            } else {
                on_false(operand)
            };
        }
        let taken = on_true(operand.clone())?;
        let skipped = on_false(operand)?;
        check_structure("cond branches", &taken.structure(), &skipped)?;
        Value::select(&pred, &taken, &skipped)
    }

    fn vmap(&self, f: &mut CarryFn<'_>, xs: &Value) -> Result<Value> {
        let size = xs.leading_len()?.ok_or(Error::MissingLength)?;
        log::trace!("vmap: batch of {size}");
        let batched = xs.map_arrays(&mut |leaf| leaf.clone().into_batched())?;
        let out = f(batched)?;
        out.map_arrays(&mut |leaf| {
            let leaf = match leaf.batch_size() {
                Some(_) => leaf.clone(),
                None => leaf.broadcast_to(leaf.shape(), Some(size))?,
            };
            Ok(leaf.into_unbatched())
        })
    }
}

/// Map `f` over the leading axis of `xs` with the default engine.
///
/// Variables written under a batched predicate inside `f` come back holding
/// one value per element and stay batched after `vmap` returns, so scalar
/// accessors such as `as_scalar` give `None`. Read them with
/// `Array::into_unbatched`.
pub fn vmap(mut f: impl FnMut(Value) -> Result<Value>, xs: &Value) -> Result<Value> {
    default_engine().vmap(&mut f, xs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_accumulates_and_stacks() {
        let xs = Value::from(Array::from_vec(vec![1.0, 2.0, 3.0]));
        let (carry, ys) = Interpreter
            .scan(
                &mut |carry, x| {
                    let sum = carry.into_array("carry")? + x.into_array("x")?;
                    Ok((Value::from(sum.clone()), Value::from(sum)))
                },
                Value::from(0.0),
                &xs,
                ScanOptions::default(),
            )
            .unwrap();
        assert_eq!(carry.as_scalar(), Some(6.0));
        assert_eq!(ys.as_array().unwrap().to_vec(), vec![1.0, 3.0, 6.0]);
    }

    #[test]
    fn reverse_scan_keeps_outputs_in_entry_order() {
        let xs = Value::from(Array::from_vec(vec![1.0, 2.0, 3.0]));
        let (carry, ys) = Interpreter
            .scan(
                &mut |carry, x| {
                    let seen = carry.into_array("carry")? * 10.0 + x.into_array("x")?;
                    Ok((Value::from(seen.clone()), Value::from(seen)))
                },
                Value::from(0.0),
                &xs,
                ScanOptions {
                    reverse: true,
                    ..ScanOptions::default()
                },
            )
            .unwrap();
        assert_eq!(carry.as_scalar(), Some(321.0));
        assert_eq!(ys.as_array().unwrap().to_vec(), vec![321.0, 32.0, 3.0]);
    }

    #[test]
    fn scan_without_operands_needs_a_length() {
        let mut body = |carry: Value, _x: Value| -> Result<(Value, Value)> { Ok((carry, Value::Unit)) };
        let err = Interpreter
            .scan(&mut body, Value::Unit, &Value::Unit, ScanOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingLength));

        let options = ScanOptions {
            length: Some(4),
            ..ScanOptions::default()
        };
        let (_, ys) = Interpreter.scan(&mut body, Value::Unit, &Value::Unit, options).unwrap();
        assert!(ys.is_unit());
    }

    #[test]
    fn scan_rejects_carry_structure_change() {
        let xs = Value::from(Array::zeros(&[2]));
        let err = Interpreter
            .scan(
                &mut |_carry, _x| Ok((Value::from((1.0, 2.0)), Value::Unit)),
                Value::from(0.0),
                &xs,
                ScanOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::StructureMismatch { context: "scan carry", .. }));
    }

    #[test]
    fn batched_while_stops_each_element_independently() {
        let out = vmap(
            |x| {
                Interpreter.while_loop(
                    &mut |carry| carry.as_array().map(|a| a.lt(6.0)).ok_or(Error::NotAnArray("carry")),
                    &mut |carry| Ok(Value::from(carry.into_array("carry")? * 2.0)),
                    x,
                )
            },
            &Value::from(Array::from_vec(vec![1.0, 3.0, 7.0])),
        )
        .unwrap();
        assert_eq!(out.as_array().unwrap().to_vec(), vec![8.0, 6.0, 7.0]);
    }

    #[test]
    fn cond_requires_scalar_predicate() {
        let err = Interpreter
            .cond(
                &Array::from_vec(vec![1.0, 0.0]),
                &mut |x| Ok(x),
                &mut |x| Ok(x),
                Value::Unit,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotAPredicate { .. }));
    }

    #[test]
    fn vmap_broadcasts_unbatched_outputs() {
        let xs = Value::from(Array::from_vec(vec![1.0, 2.0, 3.0]));
        let out = vmap(|_| Ok(Value::from(7.0)), &xs).unwrap();
        assert_eq!(out.as_array().unwrap().to_vec(), vec![7.0, 7.0, 7.0]);

        let nested = vmap(|x| vmap(Ok, &x), &xs).unwrap_err();
        assert!(matches!(nested, Error::NestedBatch | Error::ScalarAxis));
    }
}
