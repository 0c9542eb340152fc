//! varflow: stateful loops and branches over pure array primitives.
//!
//! Model code keeps its state in [`Variable`]s and mutates them freely.
//! The combinators ([`for_loop`], [`while_loop`], [`ifelse`], ...) find out
//! which Variables a body touches by running it once under a tracking frame
//! (cached per callable), then thread those Variables through an [`Engine`]
//! primitive as explicit carry and write the results back once.
//!
//! Inside [`disable_jit`] the same combinators run their bodies directly,
//! which is the reference behaviour the traced path must match.

pub mod adapter;
pub mod array;
pub mod branch;
pub mod config;
pub mod engine;
pub mod error;
pub mod function;
pub mod jit;
pub mod loops;
pub mod resolver;
pub mod tracking;
pub mod value;
pub mod variable;

pub use adapter::StateThreader;
pub use array::Array;
pub use branch::{Cond, IfElseOptions, cond, ifelse, make_cond, render_ifelse};
pub use config::{Settings, disable_jit, jit_enabled, set_settings, settings};
pub use engine::{Engine, Interpreter, ScanOptions, default_engine, vmap};
pub use error::{Error, Result};
pub use function::{Branch, FnKey, Function, ObjectId};
pub use jit::{Jit, jit};
pub use loops::{ForLoopOptions, Loop, OutVars, WhileLoop, for_loop, make_loop, make_while, while_loop};
pub use resolver::{DependencySet, Resolver, evaluate_dyn_vars};
pub use value::{Structure, Value};
pub use variable::{VarId, Variable};
