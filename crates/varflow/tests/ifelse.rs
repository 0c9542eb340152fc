//! ifelse, cond and make_cond.

use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use varflow::{
    Array, Branch, Error, Function, IfElseOptions, Value, Variable, cond, disable_jit, ifelse,
    make_cond, vmap,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn conditions(a: &Array) -> Vec<Array> {
    vec![a.gt(10.0), a.gt(5.0), a.gt(2.0), a.gt(0.0)]
}

fn returning(value: f64) -> Branch {
    Function::named(format!("return_{value}"), move |_| Ok(Value::from(value))).into()
}

fn callable_branches() -> Vec<Branch> {
    (1..=5_i32).map(|i| returning(f64::from(i))).collect()
}

fn constant_branches() -> Vec<Branch> {
    (1..=5_i32).map(Branch::from).collect()
}

fn select(a: f64, branches: &[Branch], options: IfElseOptions) -> f64 {
    let out = ifelse(&conditions(&Array::scalar(a)), branches, &Value::Unit, options).unwrap();
    out.as_scalar().unwrap()
}

#[test]
fn chain_picks_first_true_condition() {
    init();
    for branches in [callable_branches(), constant_branches()] {
        assert_eq!(select(11.0, &branches, IfElseOptions::new()), 1.0);
        assert_eq!(select(6.0, &branches, IfElseOptions::new()), 2.0);
        assert_eq!(select(3.0, &branches, IfElseOptions::new()), 3.0);
        assert_eq!(select(1.0, &branches, IfElseOptions::new()), 4.0);
        assert_eq!(select(-1.0, &branches, IfElseOptions::new()), 5.0);
    }
}

#[test]
fn eager_chain_agrees() {
    init();
    let branches = callable_branches();
    for a in [11.0, 6.0, 3.0, 1.0, -1.0] {
        let traced = select(a, &branches, IfElseOptions::new());
        let eager = disable_jit(|| select(a, &branches, IfElseOptions::new()));
        assert_eq!(traced, eager);
    }
}

#[test]
fn show_code_does_not_change_results() {
    init();
    let branches = callable_branches();
    assert_eq!(select(3.0, &branches, IfElseOptions::new().show_code()), 3.0);
}

#[test]
fn only_the_taken_branch_mutates() {
    init();
    let counter = Variable::named("counter", Array::zeros(&[1]));
    let increment = {
        let counter = counter.clone();
        Function::named("increment", move |_| {
            counter.update(|c| c + 1.0)?;
            Ok(Value::from(1))
        })
    };
    let mut branches = constant_branches();
    branches[0] = increment.into();

    let declared = || IfElseOptions::new().with_dyn_vars(&counter);
    assert_eq!(select(11.0, &branches, declared()), 1.0);
    assert_eq!(counter.value().to_vec(), vec![1.0]);
    assert_eq!(select(1.0, &branches, declared()), 4.0);
    assert_eq!(counter.value().to_vec(), vec![1.0]);
    assert_eq!(select(-1.0, &branches, IfElseOptions::new()), 5.0);
    assert_eq!(counter.value().to_vec(), vec![1.0]);
    assert_eq!(select(20.0, &branches, IfElseOptions::new()), 1.0);
    assert_eq!(counter.value().to_vec(), vec![2.0]);
}

#[test]
fn untaken_branch_runs_only_for_discovery() {
    init();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let calls = calls.clone();
        Function::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(7))
        })
    };
    let branches = [Branch::from(counted), Branch::from(0)];
    let out = ifelse(&[Array::from(false)], &branches, &Value::Unit, IfElseOptions::new()).unwrap();
    assert_eq!(out.as_scalar(), Some(0.0));
    // One discovery call, the branch itself is not taken.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn branch_count_must_match() {
    init();
    let a = Array::scalar(3.0);
    let err = ifelse(&conditions(&a), &constant_branches()[..4], &Value::Unit, IfElseOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::BranchCount { conditions: 4, branches: 4 }));
}

#[test]
fn predicates_must_be_scalar() {
    init();
    let err = ifelse(
        &[Array::from_vec(vec![1.0, 0.0])],
        &[Branch::from(1), Branch::from(2)],
        &Value::Unit,
        IfElseOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotAPredicate { .. }));
}

#[test]
fn batched_branches_mutate_per_element() {
    init();
    let counter = Variable::named("hits", 0.0);
    let hit = {
        let counter = counter.clone();
        Function::named("hit", move |_| {
            counter.update(|c| c + 1.0)?;
            Ok(Value::from(1))
        })
    };
    let branches = [Branch::from(hit), Branch::from(2)];
    let out = vmap(
        |a| {
            let a = a.into_array("a")?;
            ifelse(&[a.gt(0.0)], &branches, &Value::Unit, IfElseOptions::new())
        },
        &Value::from(Array::from_vec(vec![-1.0, 2.0, 3.0, -4.0])),
    )
    .unwrap();
    assert_eq!(out.as_array().unwrap().to_vec(), vec![2.0, 1.0, 1.0, 2.0]);
    assert_eq!(counter.value().as_scalar(), None);
    assert_eq!(counter.value().into_unbatched().to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
}

#[test]
fn two_way_cond_passes_operands() {
    init();
    let double = Function::named("double", |x| Ok(Value::from(x.clone().into_array("x")? * 2.0)));
    let taken = cond(&Array::from(true), double.clone(), 0.0, &Value::from(3.0), None).unwrap();
    assert_eq!(taken.as_scalar(), Some(6.0));
    let skipped = cond(&Array::from(false), double, 0.0, &Value::from(3.0), None).unwrap();
    assert_eq!(skipped.as_scalar(), Some(0.0));
}

#[test]
fn reusable_cond_keeps_its_variables() {
    init();
    let level = Variable::named("level", 0.0);
    let (up, down) = {
        let (a, b) = (level.clone(), level.clone());
        (
            Function::named("up", move |_| {
                a.update(|l| l + 1.0)?;
                Ok(Value::Unit)
            }),
            Function::named("down", move |_| {
                b.update(|l| l - 1.0)?;
                Ok(Value::Unit)
            }),
        )
    };
    let step = make_cond(up, down, &level);
    for pred in [true, true, false, true] {
        step.call(&Array::from(pred), &Value::Unit).unwrap();
    }
    assert_eq!(level.value().as_scalar(), Some(2.0));
}

fn expected_branch(a: f64) -> f64 {
    if a > 10.0 {
        1.0
    } else if a > 5.0 {
        2.0
    } else if a > 2.0 {
        3.0
    } else if a > 0.0 {
        4.0
    } else {
        5.0
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn batched_chain_selects_per_element(values in prop::collection::vec(-15.0f64..15.0, 200)) {
        let mut branches = callable_branches();
        branches[2] = Branch::from(3);
        let expected: Vec<f64> = values.iter().copied().map(expected_branch).collect();
        let out = vmap(
            |a| {
                let a = a.into_array("a")?;
                ifelse(&conditions(&a), &branches, &Value::Unit, IfElseOptions::new())
            },
            &Value::from(Array::from_vec(values)),
        )
        .unwrap();
        prop_assert_eq!(out.as_array().unwrap().shape(), &[200][..]);
        prop_assert_eq!(out.as_array().unwrap().to_vec(), expected);
    }
}
