use thiserror::Error;

/// Errors that can occur while lowering an AST into IR
///
/// Invariant violations inside the IR itself (operand arity, type
/// mismatches on use replacement, double erasure) are programmer faults
/// and panic instead; these variants cover source-level diagnostics the
/// caller can act on.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("Empty variable name in declaration")]
    EmptyVariableName,

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Undefined function: {0}")]
    UndefinedFunction(String),

    #[error("Call to '{callee}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid array length {len} for '{id}'")]
    InvalidArrayLength { id: String, len: i32 },

    #[error("'{0}' is not callable")]
    NotCallable(String),
}

/// Result type for lowering operations
pub type Result<T> = std::result::Result<T, IrError>;
