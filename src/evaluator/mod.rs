//! Decision condition evaluation.
//!
//! Conditions are compiled into a [`Predicate`] tree when a flow graph is
//! built and evaluated against the run context at each decision node.

pub mod condition;
pub mod expression;
pub mod operators;

pub use condition::{
    BranchSelection, CompareOp, CompiledDecision, DecisionBranch, Operand, Predicate,
    DEFAULT_BRANCH_LABEL,
};
pub use expression::{parse_condition, ExpressionError};
