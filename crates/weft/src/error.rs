//! Error types for the execution engine.
//!
//! Two kinds of failure exist: *user* errors (bad input, bad access,
//! immutability violations, no pattern match, runtime-reported logical
//! failures) and *system* errors (missing or not-ready runtime, internal
//! contract violations, cancellation). Each carries a stable short code and
//! an optional source position.
//!
//! `break` and `continue` are not errors at all: they travel as dedicated
//! variants of [`ExecError`] and are consumed by the innermost enclosing
//! loop, never surfacing to the caller.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::ast::CodeRange;

/// Result alias for public engine operations.
pub type RunResult<T> = Result<T, EngineError>;

/// Result alias for internal statement/expression execution, where
/// break/continue propagation is possible.
pub(crate) type ExecResult<T> = Result<T, ExecError>;

/// Stable short codes identifying every failure the engine can report.
///
/// The serialized form is the SCREAMING_SNAKE_CASE code that hosts match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorCode {
    #[strum(serialize = "VARIABLE_NOT_FOUND")]
    VariableNotFound,
    #[strum(serialize = "FUNCTION_NOT_FOUND")]
    FunctionNotFound,
    #[strum(serialize = "IMMUTABLE_VARIABLE_ERROR")]
    ImmutableVariable,
    #[strum(serialize = "INDEXED_ASSIGNMENT_ERROR")]
    IndexedAssignment,
    #[strum(serialize = "FIELD_ACCESS_ERROR")]
    FieldAccess,
    #[strum(serialize = "INDEX_ERROR")]
    Index,
    #[strum(serialize = "TYPE_ERROR")]
    Type,
    #[strum(serialize = "WRONG_ARGUMENT")]
    WrongArgument,
    #[strum(serialize = "CONDITION_EVAL_ERROR")]
    ConditionEval,
    #[strum(serialize = "NO_PATTERN_MATCH")]
    NoPatternMatch,
    #[strum(serialize = "BITSTRING_ERROR")]
    Bitstring,
    #[strum(serialize = "RUNTIME_ERROR")]
    Runtime,
    #[strum(serialize = "RUNTIME_NOT_READY")]
    RuntimeNotReady,
    #[strum(serialize = "RUNTIME_UNAVAILABLE")]
    RuntimeUnavailable,
    #[strum(serialize = "TRANSPILE_ERROR")]
    Transpile,
    #[strum(serialize = "EXECUTION_CANCELLED")]
    ExecutionCancelled,
    #[strum(serialize = "INTERNAL_ERROR")]
    Internal,
    /// Control-flow sentinel; never observed by hosts unless a `break`
    /// escapes all loops in a malformed program.
    #[strum(serialize = "BREAK")]
    Break,
    /// Control-flow sentinel, see [`ErrorCode::Break`].
    #[strum(serialize = "CONTINUE")]
    Continue,
}

/// Whether a failure was caused by the program or by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    User,
    System,
}

/// A positioned engine failure with a stable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    pub position: Option<CodeRange>,
}

impl EngineError {
    /// Creates a user error with no position attached yet.
    pub fn user(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::User,
            message: message.into(),
            position: None,
        }
    }

    /// Creates a system error with no position attached yet.
    pub fn system(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: ErrorKind::System,
            message: message.into(),
            position: None,
        }
    }

    /// Attaches a position, keeping an earlier one if already set.
    ///
    /// Errors are positioned at the innermost node that raised them; outer
    /// callers re-invoking `at` must not clobber that.
    #[must_use]
    pub fn at(mut self, position: CodeRange) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }

    /// True for user errors.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.kind == ErrorKind::User
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(position) = self.position {
            write!(f, " at {position}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Internal propagation type for statement execution.
///
/// `Break` and `Continue` unwind through statement execution until the
/// innermost loop consumes them; `Raise` carries a real error.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExecError {
    Break(CodeRange),
    Continue(CodeRange),
    Raise(EngineError),
}

impl ExecError {
    /// Converts to the public error type.
    ///
    /// A stray break/continue outside any loop is a user error carrying the
    /// matching sentinel code.
    pub fn into_engine_error(self) -> EngineError {
        match self {
            Self::Break(position) => {
                EngineError::user(ErrorCode::Break, "break outside of loop").at(position)
            }
            Self::Continue(position) => {
                EngineError::user(ErrorCode::Continue, "continue outside of loop").at(position)
            }
            Self::Raise(error) => error,
        }
    }

    /// Attaches a position to the carried error, if any.
    #[must_use]
    pub fn at(self, position: CodeRange) -> Self {
        match self {
            Self::Raise(error) => Self::Raise(error.at(position)),
            other => other,
        }
    }
}

impl From<EngineError> for ExecError {
    fn from(error: EngineError) -> Self {
        Self::Raise(error)
    }
}
