//! Control flow: if/else, while, the three for forms, and loop unwinding.
//!
//! Loops push a fresh scope per iteration, check the cancellation token at
//! the top of each pass, and consume `Break`/`Continue` from their bodies.
//! Iteration output follows the block executor's collection policy and is
//! accumulated newline-separated.

use crate::ast::{CodeRange, Expr, ExprLoc, Identifier, Operator, Stmt, StmtLoc};
use crate::error::{EngineError, ErrorCode, ExecError, ExecResult};
use crate::run::Engine;
use crate::runtime::{RuntimeError, canonical_language};
use crate::scope::VariableInfo;
use crate::value::{Numeric, Value};

/// What a loop body pass asked the loop to do next.
enum Iteration {
    Normal(Value),
    Continue,
    Break,
}

impl Engine {
    /// `if`/`else`, including pattern-match conditions.
    ///
    /// A pattern condition runs the matcher; on success the consequent
    /// executes in a child scope seeded with the match bindings. On failure
    /// the alternate runs without them.
    pub(crate) fn exec_if(
        &mut self,
        condition: &ExprLoc,
        then_block: &[StmtLoc],
        else_block: Option<&[StmtLoc]>,
        position: CodeRange,
    ) -> ExecResult<Value> {
        if let Expr::PatternMatch { pattern, value } = &condition.expr {
            let subject = self.eval_expr(value)?;
            if let Some(bindings) = self.match_pattern(pattern, &subject)? {
                // Run the bind in a temporary scope, keep only its local
                // bindings, and seed the consequent's scope with them.
                self.push_scope(position)?;
                let bound = self.apply_bindings(&bindings, condition.position);
                let locals = self.scopes.get_all_local();
                self.scopes.pop();
                bound?;
                self.push_scope(position)?;
                for (name, info) in locals {
                    self.scopes.set_local(&name, info);
                }
                let result = self.exec_body(then_block);
                self.scopes.pop();
                return result;
            }
            return match else_block {
                Some(else_block) => self.exec_branch(else_block, position),
                None => Ok(Value::Null),
            };
        }

        let truthy = match self.eval_expr(condition) {
            Ok(value) => value.is_truthy(),
            Err(ExecError::Raise(error)) if error.is_user() => {
                return Err(EngineError::user(
                    ErrorCode::ConditionEval,
                    format!("condition evaluation failed: {}", error.message),
                )
                .at(condition.position)
                .into());
            }
            Err(other) => return Err(other),
        };
        if truthy {
            self.exec_branch(then_block, position)
        } else {
            match else_block {
                Some(else_block) => self.exec_branch(else_block, position),
                None => Ok(Value::Null),
            }
        }
    }

    fn exec_branch(&mut self, body: &[StmtLoc], position: CodeRange) -> ExecResult<Value> {
        self.push_scope(position)?;
        let result = self.exec_body(body);
        self.scopes.pop();
        result
    }

    /// `while condition { body }`.
    ///
    /// User errors in the condition terminate the loop (treated as falsy);
    /// system errors propagate.
    pub(crate) fn exec_while(&mut self, condition: &ExprLoc, body: &[StmtLoc], position: CodeRange) -> ExecResult<Value> {
        let mut outputs: Vec<String> = vec![];
        loop {
            self.check_cancelled(position)?;
            let truthy = match self.eval_expr(condition) {
                Ok(value) => value.is_truthy(),
                Err(ExecError::Raise(error)) if error.is_user() => false,
                Err(other) => return Err(other),
            };
            if !truthy {
                break;
            }
            match self.run_iteration(body, position)? {
                Iteration::Normal(value) => collect_iteration_output(&mut outputs, &value),
                Iteration::Continue => {}
                Iteration::Break => break,
            }
        }
        Ok(join_outputs(outputs))
    }

    /// `for variable in iterable { body }` - lists iterate items, maps
    /// iterate keys.
    pub(crate) fn exec_for_in(
        &mut self,
        variable: &Identifier,
        iterable: &ExprLoc,
        body: &[StmtLoc],
        position: CodeRange,
    ) -> ExecResult<Value> {
        let subject = self.eval_expr(iterable)?;
        let items: Vec<Value> = match &subject {
            Value::List(items) => items.clone(),
            Value::Map(map) => map.keys().map(|k| Value::Str(k.clone())).collect(),
            other => {
                return Err(EngineError::user(
                    ErrorCode::Type,
                    format!("cannot iterate over {}", other.type_name()),
                )
                .at(iterable.position)
                .into());
            }
        };

        let language = infer_loop_language(variable, iterable, body);
        let handle = match &language {
            Some(language) => self.registry.get_or_create(language).ok(),
            None => None,
        };
        let saved = std::mem::replace(&mut self.loop_language, language);

        let mut outputs: Vec<String> = vec![];
        let mut result = Ok(());
        for item in items {
            if let Err(error) = self.check_cancelled(position) {
                result = Err(error);
                break;
            }
            if let Some(handle) = &handle {
                match handle.set_variable(&variable.name, item.clone()) {
                    Ok(()) | Err(RuntimeError::VariableNotFound(_)) => {}
                    Err(e) => {
                        let language = handle.language().to_owned();
                        result = Err(ExecError::Raise(e.into_engine_error(&language).at(position)));
                        break;
                    }
                }
            }
            let iteration = self.run_iteration_with(body, position, |engine| {
                engine.scopes.set_local(&variable.name, VariableInfo::mutable(item.clone()));
            });
            match iteration {
                Ok(Iteration::Normal(value)) => collect_iteration_output(&mut outputs, &value),
                Ok(Iteration::Continue) => {}
                Ok(Iteration::Break) => break,
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.loop_language = saved;
        result?;
        Ok(join_outputs(outputs))
    }

    /// Numeric for: half-open bounds, `[start, end)` ascending and
    /// `(end, start]` descending, default step 1.
    pub(crate) fn exec_numeric_for(
        &mut self,
        variable: &Identifier,
        start: &ExprLoc,
        end: &ExprLoc,
        step: Option<&ExprLoc>,
        body: &[StmtLoc],
        position: CodeRange,
    ) -> ExecResult<Value> {
        let start_value = self.eval_loop_bound(start)?;
        let end_value = self.eval_loop_bound(end)?;
        let step_value = match step {
            Some(step) => self.eval_loop_bound(step)?,
            None => 1,
        };
        if step_value == 0 {
            return Err(EngineError::user(ErrorCode::WrongArgument, "loop step must not be zero")
                .at(position)
                .into());
        }

        let mut outputs: Vec<String> = vec![];
        let mut i = start_value;
        loop {
            if step_value > 0 {
                if i >= end_value {
                    break;
                }
            } else if i <= end_value {
                break;
            }
            self.check_cancelled(position)?;
            if variable.qualified
                && let Some(language) = variable.language.as_deref()
            {
                let canonical = canonical_language(language);
                if let Ok(handle) = self.registry.get_or_create(canonical) {
                    match handle.set_variable(&variable.name, Value::Int(i)) {
                        Ok(()) | Err(RuntimeError::VariableNotFound(_)) => {}
                        Err(e) => return Err(ExecError::Raise(e.into_engine_error(canonical).at(position))),
                    }
                }
            }
            let current = i;
            match self.run_iteration_with(body, position, |engine| {
                engine
                    .scopes
                    .set_local(&variable.name, VariableInfo::mutable(Value::Int(current)));
            })? {
                Iteration::Normal(value) => collect_iteration_output(&mut outputs, &value),
                Iteration::Continue => {}
                Iteration::Break => break,
            }
            i = match i.checked_add(step_value) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(join_outputs(outputs))
    }

    /// C-style for. The initializer's scope outlives the loop iff the
    /// initializer is present; a missing condition loops until `break`.
    pub(crate) fn exec_c_style_for(
        &mut self,
        init: Option<&StmtLoc>,
        condition: Option<&ExprLoc>,
        increment: Option<&StmtLoc>,
        body: &[StmtLoc],
        position: CodeRange,
    ) -> ExecResult<Value> {
        let has_init_scope = init.is_some();
        if has_init_scope {
            self.push_scope(position)?;
        }
        let result = self.c_style_loop(init, condition, increment, body, position);
        if has_init_scope {
            self.scopes.pop();
        }
        result
    }

    fn c_style_loop(
        &mut self,
        init: Option<&StmtLoc>,
        condition: Option<&ExprLoc>,
        increment: Option<&StmtLoc>,
        body: &[StmtLoc],
        position: CodeRange,
    ) -> ExecResult<Value> {
        if let Some(init) = init {
            self.exec_stmt(init)?;
        }
        let mut outputs: Vec<String> = vec![];
        loop {
            self.check_cancelled(position)?;
            let truthy = match condition {
                None => true,
                Some(condition) => match self.eval_expr(condition) {
                    Ok(value) => value.is_truthy(),
                    Err(ExecError::Raise(error)) if error.is_user() => false,
                    Err(other) => return Err(other),
                },
            };
            if !truthy {
                break;
            }
            match self.run_iteration(body, position)? {
                Iteration::Normal(value) => collect_iteration_output(&mut outputs, &value),
                Iteration::Continue => {}
                // Break skips the increment and exits.
                Iteration::Break => break,
            }
            if let Some(increment) = increment {
                self.exec_increment(increment)?;
            }
        }
        Ok(join_outputs(outputs))
    }

    /// Executes a C-style for increment.
    ///
    /// Accepts assignment statements directly, and expression increments of
    /// the form `i = i + 1` / `i := i + 1` where the assignment node may sit
    /// inside nested binary expressions.
    fn exec_increment(&mut self, stmt: &StmtLoc) -> ExecResult<()> {
        if let Stmt::Expression(expr) = &stmt.stmt
            && let Some((identifier, op, rhs)) = find_increment_assignment(expr)
        {
            let value = self.eval_expr(rhs)?;
            if identifier.qualified {
                if let Some(language) = identifier.language.clone() {
                    self.write_qualified(&language, &identifier.name, &value, stmt.position)?;
                    return Ok(());
                }
            }
            if op == Operator::AssignDeclare {
                self.scopes.set_local(&identifier.name, VariableInfo::mutable(value));
            } else if !self.scopes.set(&identifier.name, value) {
                return Err(EngineError::user(
                    ErrorCode::ImmutableVariable,
                    format!("cannot assign to immutable variable '{}'", identifier.name),
                )
                .at(stmt.position)
                .into());
            }
            return Ok(());
        }
        self.exec_stmt(stmt)?;
        Ok(())
    }

    /// Runs one loop-body pass in its own scope, converting break/continue
    /// into iteration outcomes.
    fn run_iteration(&mut self, body: &[StmtLoc], position: CodeRange) -> ExecResult<Iteration> {
        self.run_iteration_with(body, position, |_| {})
    }

    fn run_iteration_with(
        &mut self,
        body: &[StmtLoc],
        position: CodeRange,
        seed: impl FnOnce(&mut Self),
    ) -> ExecResult<Iteration> {
        self.push_scope(position)?;
        seed(self);
        let result = self.exec_body(body);
        self.scopes.pop();
        match result {
            Ok(value) => Ok(Iteration::Normal(value)),
            Err(ExecError::Break(_)) => Ok(Iteration::Break),
            Err(ExecError::Continue(_)) => Ok(Iteration::Continue),
            Err(other) => Err(other),
        }
    }

    fn eval_loop_bound(&mut self, expr: &ExprLoc) -> ExecResult<i64> {
        let value = self.eval_expr(expr)?;
        match value.as_numeric() {
            Some(Numeric::Int(i)) => Ok(i),
            Some(Numeric::Big(b)) => num_traits::ToPrimitive::to_i64(&b).ok_or_else(|| {
                EngineError::user(ErrorCode::WrongArgument, "loop bound out of range")
                    .at(expr.position)
                    .into()
            }),
            Some(Numeric::Float(f)) if f.fract() == 0.0 => Ok(f as i64),
            _ => Err(EngineError::user(
                ErrorCode::WrongArgument,
                format!("loop bound must be an integer, got {}", value.type_name()),
            )
            .at(expr.position)
            .into()),
        }
    }

    /// Cancellation observation point, hit at the top of every iteration.
    pub(crate) fn check_cancelled(&mut self, position: CodeRange) -> ExecResult<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::system(ErrorCode::ExecutionCancelled, "execution was cancelled")
                .at(position)
                .into())
        } else {
            Ok(())
        }
    }
}

/// Infers the loop language: loop-variable qualifier, then iterable
/// qualifier, then the first qualified assignment target or language call
/// in the body (in source order, nested bodies included).
fn infer_loop_language(variable: &Identifier, iterable: &ExprLoc, body: &[StmtLoc]) -> Option<String> {
    if let Some(language) = variable.language.as_deref() {
        return Some(canonical_language(language).to_owned());
    }
    if let Expr::Identifier(identifier) = &iterable.expr
        && let Some(language) = identifier.language.as_deref()
    {
        return Some(canonical_language(language).to_owned());
    }
    first_body_language(body).map(|language| canonical_language(&language).to_owned())
}

fn first_body_language(body: &[StmtLoc]) -> Option<String> {
    for stmt in body {
        let found = match &stmt.stmt {
            Stmt::Assignment { target, .. } if target.qualified => target.language.clone(),
            Stmt::LanguageCall { call, .. } => match &call.expr {
                Expr::LanguageCall { language, .. } => Some(language.clone()),
                _ => None,
            },
            Stmt::Expression(expr) => match &expr.expr {
                Expr::LanguageCall { language, .. } => Some(language.clone()),
                _ => None,
            },
            Stmt::If {
                then_block, else_block, ..
            } => first_body_language(then_block)
                .or_else(|| else_block.as_deref().and_then(first_body_language)),
            Stmt::While { body, .. }
            | Stmt::ForIn { body, .. }
            | Stmt::NumericFor { body, .. }
            | Stmt::CStyleFor { body, .. } => first_body_language(body),
            Stmt::Block(stmts) => first_body_language(stmts),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Locates an `i = i + 1` / `i := i + 1` assignment inside arbitrarily
/// nested binary expressions.
pub(crate) fn find_increment_assignment(expr: &ExprLoc) -> Option<(&Identifier, Operator, &ExprLoc)> {
    if let Expr::Binary { left, op, right } = &expr.expr {
        if matches!(op, Operator::Assign | Operator::AssignDeclare)
            && let Expr::Identifier(identifier) = &left.expr
        {
            return Some((identifier, *op, right));
        }
        return find_increment_assignment(left).or_else(|| find_increment_assignment(right));
    }
    None
}

fn collect_iteration_output(outputs: &mut Vec<String>, value: &Value) {
    match value {
        Value::PreFormatted(s) => outputs.push(s.clone()),
        Value::Str(s) if !s.is_empty() => outputs.push(s.clone()),
        _ => {}
    }
}

fn join_outputs(outputs: Vec<String>) -> Value {
    if outputs.is_empty() {
        Value::Null
    } else {
        Value::PreFormatted(outputs.join("\n"))
    }
}
