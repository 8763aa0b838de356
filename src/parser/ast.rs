//! Abstract Syntax Tree definitions for bundle scripts

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A bundle script is a sequence of top-level statements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub statements: Vec<Statement>,
}

/// One statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    /// `LET key = expr`
    Let { name: String, value: Expr },
    /// `EVAL "source" INTO key`
    Eval { source: String, target: String },
    Print(Expr),
    /// Set the mount element's text
    Render(Expr),
    /// Empty the mount element
    Clear,
    Fail(String),
    /// `IF HOSTED THEN .. ELSE .. END IF`
    IfHosted {
        then_branch: Vec<Statement>,
        else_branch: Vec<Statement>,
    },
    Register(Registration),
}

impl Statement {
    /// Keyword shown in diagnostics
    pub fn keyword(&self) -> &'static str {
        match self {
            Statement::Let { .. } => "LET",
            Statement::Eval { .. } => "EVAL",
            Statement::Print(_) => "PRINT",
            Statement::Render(_) => "RENDER",
            Statement::Clear => "CLEAR",
            Statement::Fail(_) => "FAIL",
            Statement::IfHosted { .. } => "IF",
            Statement::Register(_) => "REGISTER",
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// `REGISTER "name" DO .. END REGISTER`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub hooks: Vec<HookBlock>,
}

impl Registration {
    /// Body of the first hook of `kind`
    pub fn hook(&self, kind: HookKind) -> Option<&[Statement]> {
        self.hooks
            .iter()
            .find(|h| h.kind == kind)
            .map(|h| h.body.as_slice())
    }
}

/// `ON MOUNT DO .. END ON`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookBlock {
    pub kind: HookKind,
    pub body: Vec<Statement>,
}

/// Lifecycle phase a hook block handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    Bootstrap,
    Mount,
    Unmount,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::Bootstrap => write!(f, "BOOTSTRAP"),
            HookKind::Mount => write!(f, "MOUNT"),
            HookKind::Unmount => write!(f, "UNMOUNT"),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Operands joined by `+`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(Value),
    /// Global or parameter reference
    Ident(String),
}
