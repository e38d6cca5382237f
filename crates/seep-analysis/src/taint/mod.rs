//! Taint model and transfer functions.
//!
//! [`types`] holds the lattice; [`flow`] is the per-block transfer
//! driven by the dataflow worklist; [`condition`] narrows taint along
//! True/False edges for recognizable guards.

pub mod condition;
pub mod flow;
pub mod types;

pub use flow::{analyze_file, analyze_subroutine_default, RunContext, TaintEnv, TaintFlow};
pub use types::{ExpressionInfo, TaintKind, TaintLevel, TaintSets};
