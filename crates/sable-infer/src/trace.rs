//! Tracing types for checker observability.
//!
//! These types capture step-by-step traces of unification and
//! instantiation, so external tooling can replay the checker's reasoning.
//! All tracing is opt-in via `Checker::enable_tracing()` — zero overhead
//! when disabled.

use serde::Serialize;

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical — no-op.
    Identity,
    /// A unification variable was solved to a type.
    Solve,
    /// A quantifier was instantiated to a fresh univar or skolem.
    Instantiate,
    /// Structural recursion into a compound type.
    Decompose,
    /// A row extension variable was solved to a fresh singleton row.
    RowSolve,
    /// A univar left the generalization region and became a quantifier.
    Generalize,
}
