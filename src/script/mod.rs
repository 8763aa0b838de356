//! Bundle scripts: the module format the CLI host loads
//!
//! Handles evaluating, validating, and executing bundle scripts.

pub mod evaluator;
pub mod runner;
pub mod validator;

pub use evaluator::{eval_expr, to_text, ExprEvaluator};
pub use runner::{BundleRuntime, ScriptedLifecycle};
pub use validator::{
    check_bundle, has_errors, validate_bundle, BundleCheck, BundleIssue, ValidationOptions,
    ValidationSeverity,
};
